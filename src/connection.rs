//! Connection acquisition.
//!
//! The limiter never owns connections; it checks one out of a
//! [`ConnectionProvider`] for the scope of a single atomic call and drops it
//! when the call finishes, error paths included. A bare client, an
//! auto-reconnecting manager, and a pool all satisfy the same seam, so the
//! choice of connection strategy stays with the application.

use async_trait::async_trait;
use redis::aio::{ConnectionLike, ConnectionManager, MultiplexedConnection};

#[cfg(feature = "pool")]
use crate::error::ThrottleError;
use crate::error::ThrottleResult;

/// Source of store connections, checked out per atomic call.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
	/// Connection handed out for the scope of one call.
	type Conn: ConnectionLike + Send;

	/// Checks out a connection. Dropping the returned value releases it.
	async fn acquire(&self) -> ThrottleResult<Self::Conn>;
}

/// Opens a fresh multiplexed connection per call.
#[async_trait]
impl ConnectionProvider for redis::Client {
	type Conn = MultiplexedConnection;

	async fn acquire(&self) -> ThrottleResult<Self::Conn> {
		Ok(self.get_multiplexed_async_connection().await?)
	}
}

/// Hands out clones of one shared, auto-reconnecting connection.
#[async_trait]
impl ConnectionProvider for ConnectionManager {
	type Conn = ConnectionManager;

	async fn acquire(&self) -> ThrottleResult<Self::Conn> {
		Ok(self.clone())
	}
}

/// Checks a connection out of the pool; dropping it returns it to the pool.
#[cfg(feature = "pool")]
#[async_trait]
impl ConnectionProvider for deadpool_redis::Pool {
	type Conn = deadpool_redis::Connection;

	async fn acquire(&self) -> ThrottleResult<Self::Conn> {
		self.get()
			.await
			.map_err(|e| ThrottleError::Pool(format!("failed to get connection from pool: {}", e)))
	}
}
