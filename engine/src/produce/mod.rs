pub mod filter;
pub mod limiter;
pub mod multiplex;

pub use filter::{limit, skip};
pub use limiter::rate_limit;
pub use multiplex::{Multiplexer, NamedSource};

// default capacity of the tuple channel between the producer subtree and the
// worker pool, large enough to smooth bursty sources
pub const TUPLE_BUFFER: usize = 100_000;
