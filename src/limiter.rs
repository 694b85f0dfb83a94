//! The limiter: bucket factory and transition dispatch.
//!
//! A [`RateLimiter`] owns nothing but a connection provider. Buckets borrow
//! it per call site, and every one of their operations flows through
//! [`RateLimiter`]'s single dispatch point, which checks a connection out of
//! the provider for exactly the duration of one atomic call.

use redis::aio::ConnectionManager;
use tracing::trace;

use crate::bucket::{Bucket, BucketKey};
use crate::connection::ConnectionProvider;
use crate::error::ThrottleResult;
use crate::script;
use crate::state::BucketState;

/// Factory for [`Bucket`]s sharing one connection provider.
///
/// The limiter is stateless apart from the provider: all durable bucket
/// state lives in the store, so any number of tasks may hold references to
/// one limiter and call through it concurrently without coordination.
/// Cloning costs what cloning the provider costs.
#[derive(Clone)]
pub struct RateLimiter<P: ConnectionProvider> {
	provider: P,
}

impl<P: ConnectionProvider> RateLimiter<P> {
	/// Creates a limiter on top of any [`ConnectionProvider`].
	///
	/// # Examples
	///
	/// ```
	/// use redfill::RateLimiter;
	///
	/// let client = redis::Client::open("redis://127.0.0.1:6379").unwrap();
	/// let limiter = RateLimiter::new(client);
	/// let bucket = limiter.setup_bucket("user-42", 50, 1_000).unwrap();
	/// assert_eq!(bucket.capacity(), 1_000);
	/// ```
	pub fn new(provider: P) -> Self {
		Self { provider }
	}

	/// Builds a bucket handle for one named limit.
	///
	/// The handle is cheap and carries no state; building it fresh at every
	/// call site is the intended usage. `fill_rate` is tokens restored per
	/// second, `capacity` the ceiling the bucket refills toward.
	///
	/// # Errors
	///
	/// Returns [`ThrottleError::InvalidArgument`](crate::ThrottleError::InvalidArgument)
	/// if `fill_rate` or `capacity` is zero, or if the key is empty, longer
	/// than 256 bytes, or contains control characters.
	pub fn setup_bucket(
		&self,
		key: impl Into<BucketKey>,
		fill_rate: u64,
		capacity: u64,
	) -> ThrottleResult<Bucket<'_, P>> {
		Bucket::new(self, key.into(), fill_rate, capacity)
	}

	/// Runs one atomic state transition for `bucket`, draining `amount`.
	///
	/// The connection is held for this call only and released on every path.
	pub(crate) async fn run_transition(
		&self,
		bucket: &Bucket<'_, P>,
		amount: u64,
	) -> ThrottleResult<BucketState> {
		trace!(key = %bucket.key(), amount, "running bucket state transition");
		let mut conn = self.provider.acquire().await?;
		script::invoke_with_reload(
			&mut conn,
			&bucket.level_key(),
			&bucket.last_updated_key(),
			bucket.capacity(),
			bucket.fill_rate(),
			amount,
		)
		.await
	}
}

impl RateLimiter<ConnectionManager> {
	/// Connects to a store URL with an auto-reconnecting shared connection.
	///
	/// Convenience for the common case; use [`RateLimiter::new`] to supply a
	/// bare client or a pool instead.
	///
	/// # Examples
	///
	/// ```no_run
	/// use redfill::RateLimiter;
	///
	/// # async fn demo() -> redfill::ThrottleResult<()> {
	/// let limiter = RateLimiter::connect("redis://127.0.0.1:6379").await?;
	/// let state = limiter.setup_bucket("user-42", 50, 1_000)?.state().await?;
	/// assert_eq!(state.level, 1_000.0);
	/// # Ok(())
	/// # }
	/// ```
	pub async fn connect(url: &str) -> ThrottleResult<Self> {
		let client = redis::Client::open(url)?;
		let manager = ConnectionManager::new(client).await?;
		Ok(Self::new(manager))
	}
}
