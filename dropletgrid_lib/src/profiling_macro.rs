//! Provides the [`profile`](crate::profile) macro or a dummy implementation depending on the selected feature

#[cfg(feature = "profiling")]
/// Creates a profiling scope that lasts until the end of the enclosing block
///
/// Only records timings when the `profiling` feature is enabled, otherwise the macro expands to
/// nothing. Scopes nest according to the scopes entered before on the same thread. Scopes
/// entered on rayon worker threads or on rank threads show up as separate roots of the report.
/// The collected timings of all threads can be printed with [`write`](crate::profiling::write):
/// ```text
/// DistributedDomain::step: 100.00%, 2.31ms avg, 50 calls (total: 0.116s)
///   move_superdroplets: 41.20%, 0.95ms avg, 50 calls (total: 0.048s)
///   run_transport_cycle: 55.03%, 1.27ms avg, 50 calls (total: 0.064s)
/// ```
///
/// The guard of the scope is stored in a variable called `_profiling_scope_guard`.
#[macro_export]
#[cfg_attr(docsrs, doc(cfg(feature = "profiling")))]
macro_rules! profile {
    ($name:expr) => {
        $crate::profile_impl!($name);
    };
}

#[cfg(not(feature = "profiling"))]
/// No-op macro if profiling is disabled
#[macro_export]
macro_rules! profile {
    ($name:expr) => {};
}
