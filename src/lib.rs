//! # redfill
//!
//! Redis-backed rate limiting with continuously refilling buckets.
//!
//! This crate meters work against named buckets that refill over time:
//! - Atomic server-side state transitions (refill and drain in one step)
//! - Fractional levels with whole-token drains
//! - Overdraft instead of rejection: large drains push the level negative
//! - Self-cleaning storage: full buckets occupy no keys
//!
//! ## Features
//!
//! - **Atomicity**: every operation is one scripted round trip, safe under
//!   arbitrary process concurrency
//! - **Server time**: refill math uses the store's clock, so mutually
//!   unsynchronized clients agree on every level
//! - **Retry hints**: throttle signals carry a whole-second wait estimate
//!   biased toward overestimation
//! - **Timed drains**: charge an operation by how long it actually took
//! - **Pooling**: optional `deadpool-redis` support behind the `pool` feature
//!
//! ## Quick Start
//!
//! ```no_run
//! use redfill::{RateLimiter, ThrottleError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let limiter = RateLimiter::connect("redis://127.0.0.1:6379").await?;
//!
//!     // 50 tokens back per second, bursting up to 1_000
//!     let bucket = limiter.setup_bucket("user-42", 50, 1_000)?;
//!
//!     match bucket.throttle_check().await {
//!         Ok(state) => {
//!             // Admitted: do the work, then charge for it
//!             bucket.drain(25).await?;
//!             println!("level now {:.1}", state.level);
//!         }
//!         Err(ThrottleError::Throttled(signal)) => {
//!             println!("over the limit, retry in {}s", signal.retry_in_seconds);
//!         }
//!         Err(other) => return Err(other.into()),
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Module Structure
//!
//! - [`limiter`] - Entry point tying a connection source to bucket handles
//! - [`bucket`] - Bucket handles, identities and key derivation
//! - [`state`] - Post-transition snapshots and retry estimation
//! - [`connection`] - Connection acquisition seam (client, manager, pool)
//! - [`error`] - Error types and the throttle signal

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod bucket;
pub mod connection;
pub mod error;
pub mod limiter;
pub mod state;

mod script;

// Re-export main types
pub use bucket::{Bucket, BucketKey};
pub use connection::ConnectionProvider;
pub use error::{Throttled, ThrottleError, ThrottleResult};
pub use limiter::RateLimiter;
pub use state::BucketState;
