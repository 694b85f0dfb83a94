//! Bucket state snapshots.
//!
//! Every store round trip returns a [`BucketState`]: the level the atomic
//! routine computed, the bucket parameters it was computed under, and how
//! many tokens that particular call removed. Snapshots are plain values;
//! nothing about them is cached or shared between calls.

/// Safety margin added to every retry hint, in seconds.
///
/// Biases the hint toward overestimating so a caller that retries exactly on
/// schedule finds a bucket that has actually recovered.
const RETRY_SAFETY_MARGIN_SECS: u64 = 3;

/// Point-in-time state of one bucket, as computed by the store.
///
/// The level ranges over all of `(-inf, capacity]`: draining past zero is
/// permitted and the overdraft is carried until refill pays it back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
	/// Tokens currently available. Negative values are accumulated overdraft.
	pub level: f64,
	/// Ceiling the level refills toward and never exceeds.
	pub capacity: u64,
	/// Tokens restored per second.
	pub fill_rate: u64,
	/// Tokens removed by the call that produced this snapshot; 0 for a pure
	/// inspection.
	pub drained: u64,
}

impl BucketState {
	/// Reassembles a state from the wire reply.
	///
	/// The store cannot carry fractional numbers in script replies (they get
	/// truncated to integers), so the level travels as a `(whole, micro)`
	/// pair with `whole = floor(level)` and `micro` the non-negative
	/// microtoken remainder, the same scheme the store's own clock query
	/// uses for seconds and microseconds.
	pub(crate) fn from_wire(
		whole: i64,
		micro: i64,
		capacity: u64,
		fill_rate: u64,
		drained: u64,
	) -> Self {
		Self {
			level: whole as f64 + micro as f64 / 1_000_000.0,
			capacity,
			fill_rate,
			drained,
		}
	}

	/// Whether the bucket has nothing left to drain.
	///
	/// # Examples
	///
	/// ```
	/// use redfill::BucketState;
	///
	/// let state = BucketState { level: -2.5, capacity: 10, fill_rate: 1, drained: 0 };
	/// assert!(state.is_empty());
	/// ```
	pub fn is_empty(&self) -> bool {
		self.level <= 0.0
	}

	/// Whether the bucket is at capacity.
	pub fn is_full(&self) -> bool {
		self.level >= self.capacity as f64
	}

	/// Whole seconds until a caller blocked on this state can expect the
	/// bucket to have fully refilled, biased to overestimate.
	///
	/// This is the value a throttled caller should surface as a
	/// `Retry-After`-style hint. It is computed from the distance between
	/// the current level and capacity, so it is meaningful for any state
	/// but primarily useful when [`is_empty`](Self::is_empty) holds.
	///
	/// # Examples
	///
	/// ```
	/// use redfill::BucketState;
	///
	/// let state = BucketState { level: -10.0, capacity: 10, fill_rate: 1, drained: 20 };
	/// assert_eq!(state.retry_in_seconds(), 23);
	/// ```
	pub fn retry_in_seconds(&self) -> u64 {
		let deficit = (self.capacity as f64 - self.level).abs();
		(deficit / self.fill_rate as f64).ceil() as u64 + RETRY_SAFETY_MARGIN_SECS
	}
}
