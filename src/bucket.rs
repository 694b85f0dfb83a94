//! Bucket handles and key derivation.
//!
//! A [`Bucket`] is a per-call-site handle for one named limit: a key, a fill
//! rate, and a capacity. It holds no durable state; every operation is one
//! atomic round trip through the limiter that built it, and dropping a
//! handle discards nothing.

use std::future::Future;

use sha1::{Digest, Sha1};
use tokio::time::Instant;

use crate::connection::ConnectionProvider;
use crate::error::{Throttled, ThrottleError, ThrottleResult};
use crate::limiter::RateLimiter;
use crate::state::BucketState;

/// Longest accepted bucket identity, in bytes.
const MAX_IDENTITY_LEN: usize = 256;

/// Identity of a bucket, before store-key derivation.
///
/// Single values pass through as-is. Multi-part identities are combined by
/// hashing the parts in order, so distinct part lists can never collide the
/// way plain concatenation would (`["ab", "c"]` vs `["a", "bc"]`); part
/// order changes the computed key and nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketKey(String);

impl BucketKey {
	/// Combines several discriminators into one identity.
	///
	/// # Examples
	///
	/// ```
	/// use redfill::BucketKey;
	///
	/// let by_user_and_route = BucketKey::composite(["user-42", "POST /uploads"]);
	/// assert_ne!(by_user_and_route, BucketKey::composite(["POST /uploads", "user-42"]));
	/// ```
	pub fn composite<I, S>(parts: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let mut hasher = Sha1::new();
		for part in parts {
			let bytes = part.as_ref().as_bytes();
			// Length prefix keeps part boundaries part of the digest
			hasher.update((bytes.len() as u64).to_be_bytes());
			hasher.update(bytes);
		}
		Self(hex::encode(hasher.finalize()))
	}

	pub(crate) fn as_str(&self) -> &str {
		&self.0
	}
}

impl From<&str> for BucketKey {
	fn from(key: &str) -> Self {
		Self(key.to_string())
	}
}

impl From<String> for BucketKey {
	fn from(key: String) -> Self {
		Self(key)
	}
}

impl From<u64> for BucketKey {
	fn from(key: u64) -> Self {
		Self(key.to_string())
	}
}

impl From<i64> for BucketKey {
	fn from(key: i64) -> Self {
		Self(key.to_string())
	}
}

impl From<&[&str]> for BucketKey {
	fn from(parts: &[&str]) -> Self {
		Self::composite(parts)
	}
}

impl<const N: usize> From<[&str; N]> for BucketKey {
	fn from(parts: [&str; N]) -> Self {
		Self::composite(parts)
	}
}

/// One named, parameterized rate limit.
///
/// Built by [`RateLimiter::setup_bucket`] and meant to be rebuilt at every
/// call site: the handle is three words of parameters plus a borrow of the
/// limiter, and all durable state lives in the store under the two keys
/// reported by [`level_key`](Self::level_key) and
/// [`last_updated_key`](Self::last_updated_key).
///
/// The level refills continuously at `fill_rate` tokens per second up to
/// `capacity` and is drained in whole tokens per call. Draining past zero is
/// allowed; the overdraft is carried as a negative level until refill pays
/// it back.
pub struct Bucket<'a, P: ConnectionProvider> {
	limiter: &'a RateLimiter<P>,
	key: BucketKey,
	fill_rate: u64,
	capacity: u64,
}

impl<'a, P: ConnectionProvider> Bucket<'a, P> {
	pub(crate) fn new(
		limiter: &'a RateLimiter<P>,
		key: BucketKey,
		fill_rate: u64,
		capacity: u64,
	) -> ThrottleResult<Self> {
		validate_identity(key.as_str())?;
		if fill_rate == 0 {
			return Err(ThrottleError::InvalidArgument(
				"fill_rate must be positive".to_string(),
			));
		}
		if capacity == 0 {
			return Err(ThrottleError::InvalidArgument(
				"capacity must be positive".to_string(),
			));
		}
		Ok(Self {
			limiter,
			key,
			fill_rate,
			capacity,
		})
	}

	/// The bucket identity this handle was built with.
	pub fn key(&self) -> &str {
		self.key.as_str()
	}

	/// Tokens restored per second.
	pub fn fill_rate(&self) -> u64 {
		self.fill_rate
	}

	/// Ceiling the level refills toward.
	pub fn capacity(&self) -> u64 {
		self.capacity
	}

	/// Store key holding the last computed level.
	pub fn level_key(&self) -> String {
		format!("bucket.{}.level", self.key.as_str())
	}

	/// Store key holding the timestamp of the last write.
	pub fn last_updated_key(&self) -> String {
		format!("bucket.{}.last_updated", self.key.as_str())
	}

	/// Reads the current state without draining.
	///
	/// A bucket nobody has drained reports a level equal to its capacity,
	/// and inspecting it leaves the store keyless.
	pub async fn state(&self) -> ThrottleResult<BucketState> {
		self.limiter.run_transition(self, 0).await
	}

	/// Removes `amount` tokens and returns the resulting state.
	///
	/// The refill owed for the time since the last write is applied first,
	/// then the drain, in one atomic step. Draining more than is available
	/// drives the level negative.
	///
	/// # Examples
	///
	/// ```no_run
	/// use redfill::RateLimiter;
	///
	/// # async fn demo() -> redfill::ThrottleResult<()> {
	/// let limiter = RateLimiter::connect("redis://127.0.0.1:6379").await?;
	/// let bucket = limiter.setup_bucket("user-42", 1, 10)?;
	///
	/// let state = bucket.drain(20).await?;
	/// assert_eq!(state.level, -10.0);
	/// assert_eq!(state.drained, 20);
	/// # Ok(())
	/// # }
	/// ```
	pub async fn drain(&self, amount: u64) -> ThrottleResult<BucketState> {
		self.limiter.run_transition(self, amount).await
	}

	/// Runs `work`, then drains one token per millisecond it took.
	///
	/// Duration is measured on a monotonic clock around the awaited closure
	/// and truncated to whole milliseconds. The drain happens exactly once,
	/// after `work` completes, regardless of its semantic outcome: the
	/// closure's output (which may itself be a `Result`) is returned next to
	/// the post-drain state, and a failed operation still consumes the time
	/// it took. A panic unwinds without draining.
	pub async fn drain_timed<F, Fut, T>(&self, work: F) -> ThrottleResult<(T, BucketState)>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = T>,
	{
		let started = Instant::now();
		let output = work().await;
		let spent_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
		let state = self.drain(spent_ms).await?;
		Ok((output, state))
	}

	/// Admission gate: returns the state if the bucket still has tokens,
	/// or the throttle signal if it is empty.
	///
	/// Call before doing protected work; draining is a separate decision.
	///
	/// # Errors
	///
	/// [`ThrottleError::Throttled`] carrying the observed state and a
	/// whole-second retry hint, when the level is at or below zero.
	pub async fn throttle_check(&self) -> ThrottleResult<BucketState> {
		let state = self.state().await?;
		if state.is_empty() {
			return Err(ThrottleError::Throttled(Throttled::new(state)));
		}
		Ok(state)
	}

	/// Whether the bucket is currently empty. One full round trip.
	pub async fn is_empty(&self) -> ThrottleResult<bool> {
		Ok(self.state().await?.is_empty())
	}

	/// Whether the bucket is currently at capacity. One full round trip.
	pub async fn is_full(&self) -> ThrottleResult<bool> {
		Ok(self.state().await?.is_full())
	}
}

impl<P: ConnectionProvider> std::fmt::Debug for Bucket<'_, P> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Bucket")
			.field("key", &self.key)
			.field("fill_rate", &self.fill_rate)
			.field("capacity", &self.capacity)
			.finish_non_exhaustive()
	}
}

fn validate_identity(key: &str) -> ThrottleResult<()> {
	if key.is_empty() {
		return Err(ThrottleError::InvalidArgument(
			"bucket key must not be empty".to_string(),
		));
	}
	if key.len() > MAX_IDENTITY_LEN {
		return Err(ThrottleError::InvalidArgument(format!(
			"bucket key must not exceed {} bytes",
			MAX_IDENTITY_LEN
		)));
	}
	if key.chars().any(char::is_control) {
		return Err(ThrottleError::InvalidArgument(
			"bucket key must not contain control characters".to_string(),
		));
	}
	Ok(())
}
