//! Implementation details for the [`profile`](crate::profile) macro
//!
//! Every thread records its scopes in a thread local [`Profiler`]. Scopes are identified by their
//! path, i.e. the names of all enclosing scopes of the same thread. Scopes with the same path are
//! merged over all threads when the report is written.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::error::Error;
use std::io;
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use thread_local::ThreadLocal;

/// Thread local storage of the [`Profiler`]s of all threads
pub static PROFILER: LazyLock<ThreadLocal<RwLock<Profiler>>> = LazyLock::new(ThreadLocal::new);

/// Implementation of the profile macro, use [`profile`](crate::profile) instead
#[doc(hidden)]
#[macro_export]
macro_rules! profile_impl {
    ($name:expr) => {
        let _profiling_scope_guard = $crate::profiling::PROFILER
            .get_or(Default::default)
            .write()
            .enter($name);
    };
}

/// A scope guard recording the elapsed time of the scope when dropped
pub struct Guard {
    enter_time: Instant,
}

impl Drop for Guard {
    fn drop(&mut self) {
        let duration = self.enter_time.elapsed();
        if let Some(profiler) = PROFILER.get() {
            profiler.write().leave(duration);
        }
    }
}

#[derive(Clone, Debug)]
struct ScopeStats {
    num_calls: usize,
    duration_sum: Duration,
    first_call: Instant,
}

/// Profiler storing the timings of all scopes entered on one thread
#[derive(Default)]
pub struct Profiler {
    scopes: HashMap<Vec<&'static str>, ScopeStats>,
    stack: Vec<&'static str>,
}

impl Profiler {
    /// Enters a scope nested into the current scope of this thread
    pub fn enter(&mut self, name: &'static str) -> Guard {
        self.stack.push(name);
        let now = Instant::now();
        self.scopes
            .entry(self.stack.clone())
            .or_insert_with(|| ScopeStats {
                num_calls: 0,
                duration_sum: Duration::default(),
                first_call: now,
            });
        Guard { enter_time: now }
    }

    fn leave(&mut self, duration: Duration) {
        if let Some(stats) = self.scopes.get_mut(&self.stack) {
            stats.num_calls += 1;
            stats.duration_sum += duration;
        }
        self.stack.pop();
    }

    /// Resets all profiling data of this profiler
    pub fn reset(&mut self) {
        self.scopes.clear();
        self.stack.clear();
    }
}

/// Pretty prints the collected profiling data of all threads to the given writer
///
/// Scopes are printed in the order of their first call, nested scopes are indented below their
/// parent together with their share of the parent's runtime.
pub fn write<W: io::Write>(out: &mut W) -> io::Result<()> {
    let mut merged: HashMap<Vec<&'static str>, ScopeStats> = HashMap::new();
    for profiler in PROFILER.iter() {
        let profiler = profiler.read();
        for (path, stats) in &profiler.scopes {
            merged
                .entry(path.clone())
                .and_modify(|s| {
                    s.num_calls += stats.num_calls;
                    s.duration_sum += stats.duration_sum;
                    s.first_call = s.first_call.min(stats.first_call);
                })
                .or_insert_with(|| stats.clone());
        }
    }

    // The key of a parent is a prefix of the keys of its children
    let sort_key = |path: &Vec<&'static str>, stats: &ScopeStats| {
        (1..=path.len())
            .map(|len| {
                let first_call = merged
                    .get(&path[..len].to_vec())
                    .map(|s| s.first_call)
                    .unwrap_or(stats.first_call);
                (first_call, path[len - 1])
            })
            .collect::<Vec<_>>()
    };
    let mut sorted = merged
        .iter()
        .map(|(path, stats)| (sort_key(path, stats), path, stats))
        .collect::<Vec<_>>();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let sorted = sorted.into_iter().map(|(_, path, stats)| (path, stats));

    for (path, stats) in sorted {
        let depth = path.len() - 1;
        let total_secs = stats.duration_sum.as_secs_f64();
        let parent_secs = if depth > 0 {
            merged
                .get(&path[..depth].to_vec())
                .map(|p| p.duration_sum.as_secs_f64())
                .unwrap_or(total_secs)
        } else {
            total_secs
        };
        let percent = if parent_secs > 0.0 {
            total_secs / parent_secs * 100.0
        } else {
            100.0
        };

        writeln!(
            out,
            "{}{}: {:3.2}%, {:>4.2}ms avg, {} {} (total: {:.3}s)",
            "  ".repeat(depth),
            path[depth],
            percent,
            total_secs * 1000.0 / (stats.num_calls.max(1) as f64),
            stats.num_calls,
            if stats.num_calls == 1 { "call" } else { "calls" },
            total_secs
        )?;
    }

    Ok(())
}

/// Returns the pretty printed output of the collected profiling data as a `String`
pub fn write_to_string() -> Result<String, Box<dyn Error>> {
    let mut buffer = Vec::new();
    write(&mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Resets the profiling data of all threads, should be called outside of any scope
pub fn reset() {
    for profiler in PROFILER.iter() {
        profiler.write().reset();
    }
}
