//! Scheduling primitives: request coalescing and rate limiting.

pub mod coalescer;
pub mod rate_limiter;

pub use coalescer::{Batch, BatchHandler, Coalescer, Deferral, Entry};
pub use rate_limiter::{RateLimiter, RatePermit};
