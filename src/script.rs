//! The atomic bucket routine and its registration protocol.
//!
//! One Lua script owns every read and write of a bucket's stored record, so
//! two callers racing on the same key can never interleave a stale read with
//! a write. The script is referenced by its SHA-1 fingerprint; when the
//! server does not know the fingerprint (fresh server, SCRIPT FLUSH) it is
//! registered once and the call is retried exactly once.

use once_cell::sync::Lazy;
use redis::aio::ConnectionLike;
use redis::{ErrorKind, RedisResult};
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::error::{ThrottleError, ThrottleResult};
use crate::state::BucketState;

/// Refill-then-drain state transition, executed server-side in one step.
///
/// KEYS[1] is the level key, KEYS[2] the last-updated key; ARGV carries
/// capacity, fill rate per second, and the amount to drain (0 inspects).
/// Replies `{level_whole, level_micro, capacity, fill_rate, drained}`: the
/// reply protocol truncates Lua numbers to integers, so the fractional
/// level travels as a floor/microtoken pair the way TIME reports seconds
/// and microseconds.
pub(crate) const BUCKET_SCRIPT: &str = r#"
	redis.replicate_commands()

	local capacity = tonumber(ARGV[1])
	local fill_rate = tonumber(ARGV[2])
	local amount = tonumber(ARGV[3])

	-- Elapsed time is measured on the server clock only; caller clocks
	-- never participate, so racing callers agree on it.
	local time = redis.call('TIME')
	local now = tonumber(time[1]) + tonumber(time[2]) / 1000000

	-- Missing keys mean a full, never-touched bucket.
	local level = tonumber(redis.call('GET', KEYS[1])) or capacity
	local last_updated = tonumber(redis.call('GET', KEYS[2])) or now

	local refilled = math.min(capacity, level + (now - last_updated) * fill_rate)
	local new_level = refilled - amount

	-- A full bucket nobody drained carries no information: keep it keyless.
	if amount > 0 or new_level < capacity then
		-- Expire once the bucket would have refilled completely; a record
		-- missing by expiry reads as full again. Reset on every write.
		local ttl = math.floor((capacity - new_level) / fill_rate) + 1
		redis.call('SETEX', KEYS[1], ttl, tostring(new_level))
		redis.call('SETEX', KEYS[2], ttl, tostring(now))
	end

	local whole = math.floor(new_level)
	local micro = math.floor((new_level - whole) * 1000000 + 0.5)

	return {whole, micro, capacity, fill_rate, amount}
"#;

/// Fingerprint the store will know the routine by, computed once.
pub(crate) static BUCKET_SCRIPT_SHA: Lazy<String> =
	Lazy::new(|| hex::encode(Sha1::digest(BUCKET_SCRIPT.as_bytes())));

/// Runs the transition, registering the routine if the server has forgotten
/// it. Exactly one retry: a second unknown-fingerprint failure after a
/// successful registration is surfaced, not retried, so a persistently
/// broken server cannot cause a retry loop.
pub(crate) async fn invoke_with_reload<C>(
	conn: &mut C,
	level_key: &str,
	last_updated_key: &str,
	capacity: u64,
	fill_rate: u64,
	amount: u64,
) -> ThrottleResult<BucketState>
where
	C: ConnectionLike + Send,
{
	let first = eval_by_sha(conn, level_key, last_updated_key, capacity, fill_rate, amount).await;
	let (whole, micro, capacity, fill_rate, drained) = match first {
		Err(err) if err.kind() == ErrorKind::NoScriptError => {
			debug!(
				sha = %BUCKET_SCRIPT_SHA.as_str(),
				"bucket routine unknown to server, registering"
			);
			let registered: String = redis::cmd("SCRIPT")
				.arg("LOAD")
				.arg(BUCKET_SCRIPT)
				.query_async(conn)
				.await?;
			if !registered.eq_ignore_ascii_case(BUCKET_SCRIPT_SHA.as_str()) {
				return Err(ThrottleError::ScriptHashMismatch {
					expected: BUCKET_SCRIPT_SHA.clone(),
					actual: registered,
				});
			}
			eval_by_sha(conn, level_key, last_updated_key, capacity, fill_rate, amount).await?
		}
		other => other?,
	};
	Ok(BucketState::from_wire(whole, micro, capacity, fill_rate, drained))
}

async fn eval_by_sha<C>(
	conn: &mut C,
	level_key: &str,
	last_updated_key: &str,
	capacity: u64,
	fill_rate: u64,
	amount: u64,
) -> RedisResult<(i64, i64, u64, u64, u64)>
where
	C: ConnectionLike + Send,
{
	redis::cmd("EVALSHA")
		.arg(BUCKET_SCRIPT_SHA.as_str())
		.arg(2)
		.arg(level_key)
		.arg(last_updated_key)
		.arg(capacity)
		.arg(fill_rate)
		.arg(amount)
		.query_async(conn)
		.await
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::connection::mock::{no_script_error, wire_reply, MockConnection};
	use redis::{RedisError, Value};
	use rstest::rstest;

	#[rstest]
	fn test_fingerprint_is_stable_lowercase_sha1() {
		// Assert - 40 hex chars, deterministic
		assert_eq!(BUCKET_SCRIPT_SHA.len(), 40);
		assert!(
			BUCKET_SCRIPT_SHA
				.chars()
				.all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
		);
		assert_eq!(*BUCKET_SCRIPT_SHA, hex::encode(Sha1::digest(BUCKET_SCRIPT)));
	}

	#[rstest]
	#[tokio::test]
	async fn test_invoke_decodes_wire_reply() {
		// Arrange
		let mut conn = MockConnection::new();
		conn.push_reply(Ok(wire_reply(18, 500_000, 20, 1, 2)));

		// Act
		let state = invoke_with_reload(&mut conn, "bucket.k.level", "bucket.k.last_updated", 20, 1, 2)
			.await
			.unwrap();

		// Assert
		assert_eq!(state.level, 18.5);
		assert_eq!(state.capacity, 20);
		assert_eq!(state.fill_rate, 1);
		assert_eq!(state.drained, 2);
	}

	#[rstest]
	#[tokio::test]
	async fn test_invoke_sends_keys_and_argv_in_wire_order() {
		// Arrange
		let mut conn = MockConnection::new();
		conn.push_reply(Ok(wire_reply(5, 0, 20, 3, 15)));

		// Act
		invoke_with_reload(&mut conn, "bucket.k.level", "bucket.k.last_updated", 20, 3, 15)
			.await
			.unwrap();

		// Assert
		let calls = conn.calls();
		assert_eq!(calls.len(), 1);
		assert_eq!(
			calls[0],
			vec![
				"EVALSHA".to_string(),
				BUCKET_SCRIPT_SHA.clone(),
				"2".to_string(),
				"bucket.k.level".to_string(),
				"bucket.k.last_updated".to_string(),
				"20".to_string(),
				"3".to_string(),
				"15".to_string(),
			]
		);
	}

	#[rstest]
	#[tokio::test]
	async fn test_unknown_fingerprint_registers_and_retries_once() {
		// Arrange - server has never seen the routine
		let mut conn = MockConnection::new();
		conn.push_reply(Err(no_script_error()));
		conn.push_reply(Ok(Value::BulkString(BUCKET_SCRIPT_SHA.clone().into_bytes())));
		conn.push_reply(Ok(wire_reply(9, 0, 10, 1, 1)));

		// Act
		let state = invoke_with_reload(&mut conn, "bucket.k.level", "bucket.k.last_updated", 10, 1, 1)
			.await
			.unwrap();

		// Assert - EVALSHA, SCRIPT LOAD, EVALSHA, and the reply decodes
		assert_eq!(conn.command_names(), vec!["EVALSHA", "SCRIPT", "EVALSHA"]);
		assert_eq!(conn.calls()[1][1], "LOAD");
		assert_eq!(state.level, 9.0);
		assert_eq!(state.drained, 1);
	}

	#[rstest]
	#[tokio::test]
	async fn test_second_unknown_fingerprint_is_surfaced_not_retried() {
		// Arrange - server forgets the routine even after registration
		let mut conn = MockConnection::new();
		conn.push_reply(Err(no_script_error()));
		conn.push_reply(Ok(Value::BulkString(BUCKET_SCRIPT_SHA.clone().into_bytes())));
		conn.push_reply(Err(no_script_error()));

		// Act
		let result =
			invoke_with_reload(&mut conn, "bucket.k.level", "bucket.k.last_updated", 10, 1, 1).await;

		// Assert - surfaced as a store error after exactly three commands
		assert!(matches!(result, Err(ThrottleError::Redis(_))));
		assert_eq!(conn.command_names(), vec!["EVALSHA", "SCRIPT", "EVALSHA"]);
	}

	#[rstest]
	#[tokio::test]
	async fn test_registration_hash_mismatch_is_fatal() {
		// Arrange - the store reports a different fingerprint than computed
		let mut conn = MockConnection::new();
		conn.push_reply(Err(no_script_error()));
		conn.push_reply(Ok(Value::BulkString(b"deadbeef".to_vec())));

		// Act
		let result =
			invoke_with_reload(&mut conn, "bucket.k.level", "bucket.k.last_updated", 10, 1, 1).await;

		// Assert - fatal, and no retry is attempted after the mismatch
		match result {
			Err(ThrottleError::ScriptHashMismatch { expected, actual }) => {
				assert_eq!(expected, *BUCKET_SCRIPT_SHA);
				assert_eq!(actual, "deadbeef");
			}
			other => panic!("expected ScriptHashMismatch, got {:?}", other),
		}
		assert_eq!(conn.command_names(), vec!["EVALSHA", "SCRIPT"]);
	}

	#[rstest]
	#[tokio::test]
	async fn test_other_store_errors_pass_through_without_reload() {
		// Arrange
		let mut conn = MockConnection::new();
		conn.push_reply(Err(RedisError::from((
			redis::ErrorKind::TypeError,
			"WRONGTYPE",
			"Operation against a key holding the wrong kind of value".to_string(),
		))));

		// Act
		let result =
			invoke_with_reload(&mut conn, "bucket.k.level", "bucket.k.last_updated", 10, 1, 0).await;

		// Assert - no SCRIPT LOAD was attempted
		assert!(matches!(result, Err(ThrottleError::Redis(_))));
		assert_eq!(conn.command_names(), vec!["EVALSHA"]);
	}

	#[rstest]
	fn test_routine_skips_write_only_for_full_untouched_buckets() {
		// Assert - the write guard covers both store keys and the keyless
		// fast path for inspects of full buckets
		assert!(BUCKET_SCRIPT.contains("if amount > 0 or new_level < capacity then"));
		assert!(BUCKET_SCRIPT.contains("SETEX"));
		assert!(BUCKET_SCRIPT.contains("redis.call('TIME')"));
	}
}
