pub mod bench_decomposition;
pub mod bench_transport;
