//! Error and signal types.
//!
//! One enum covers the whole surface: local argument rejection, the fatal
//! script fingerprint mismatch, transport failures passed through from the
//! store, and the throttle signal itself. The throttle signal is expected
//! control flow, not a defect; it is an error variant so that admission
//! checks compose with `?` at call sites.

use thiserror::Error;

use crate::state::BucketState;

/// Result type for limiter operations.
pub type ThrottleResult<T> = Result<T, ThrottleError>;

/// Admission denied: the payload of [`ThrottleError::Throttled`].
///
/// Carries everything a caller needs for telemetry or for building a
/// `Retry-After`-style response: the state that triggered the denial and a
/// whole-second retry hint biased to overestimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throttled {
	/// The state observed at the moment admission was denied.
	pub bucket_state: BucketState,
	/// Seconds after which a retry is expected to succeed.
	pub retry_in_seconds: u64,
}

impl Throttled {
	pub(crate) fn new(bucket_state: BucketState) -> Self {
		Self {
			bucket_state,
			retry_in_seconds: bucket_state.retry_in_seconds(),
		}
	}
}

impl std::fmt::Display for Throttled {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"throttled, retry in {} seconds (level {}, capacity {})",
			self.retry_in_seconds, self.bucket_state.level, self.bucket_state.capacity
		)
	}
}

/// Limiter errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ThrottleError {
	/// A construction parameter was rejected before any network call.
	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	/// The store registered the bucket routine under a different fingerprint
	/// than the one computed locally. Results produced under a mismatched
	/// routine cannot be trusted, so this is never retried.
	#[error("bucket script registered under unexpected hash: expected {expected}, got {actual}")]
	ScriptHashMismatch {
		/// Fingerprint computed from the local routine source.
		expected: String,
		/// Fingerprint the store reported after registration.
		actual: String,
	},

	/// The bucket is empty and admission was denied.
	#[error("{0}")]
	Throttled(Throttled),

	/// Transport or protocol failure, surfaced as-is. The limiter never
	/// retries these itself: the atomic drain may already have been applied,
	/// and a blind retry would risk draining twice.
	#[error("redis error: {0}")]
	Redis(#[from] redis::RedisError),

	/// Checking a connection out of the pool failed before any network call.
	#[cfg(feature = "pool")]
	#[error("connection pool error: {0}")]
	Pool(String),
}

impl ThrottleError {
	/// Returns the throttle payload when this error is the admission signal.
	///
	/// Convenience for call sites that treat throttling as data and
	/// everything else as failure.
	pub fn as_throttled(&self) -> Option<&Throttled> {
		match self {
			Self::Throttled(signal) => Some(signal),
			_ => None,
		}
	}
}
