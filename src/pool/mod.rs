//! The pool seam the engine drives.
//!
//! The engine never inspects pool internals: it constructs a pool through
//! [`ConnectionPool::create`], hands it an [`EventSink`] to publish lifecycle
//! events into, and then calls the four pool actions from as many concurrent
//! tasks as the script asks for.

pub mod error;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::event::EventSink;
use crate::options::PoolOptions;

pub use error::PoolError;
pub use memory::{MemoryConnection, MemoryPool};

/// A connection pool under test.
///
/// Implementations must be safe to share across tasks; all internal locking is
/// the pool's own business.
#[async_trait]
pub trait ConnectionPool: Send + Sync + Sized + 'static {
    /// Handle returned by a checkout and given back on checkin.
    type Connection: Send + 'static;

    /// Build a pool for `address`, publishing its events into `events`.
    ///
    /// # Errors
    /// Returns [`PoolError`] if the options cannot be honored.
    fn create(
        address: &str,
        options: PoolOptions,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, PoolError>;

    fn address(&self) -> &str;

    /// Check a connection out, waiting in the wait queue if the pool is at capacity.
    ///
    /// # Errors
    /// [`PoolError::Closed`] if the pool is closed, [`PoolError::WaitQueueTimeout`] if no
    /// connection became available in time.
    async fn check_out(&self) -> Result<Self::Connection, PoolError>;

    /// Return a connection to the pool.
    ///
    /// # Errors
    /// Implementation specific.
    async fn check_in(&self, connection: Self::Connection) -> Result<(), PoolError>;

    /// Invalidate existing connections.
    ///
    /// # Errors
    /// Implementation specific.
    async fn clear(&self) -> Result<(), PoolError>;

    /// Close the pool. Closing twice is not an error.
    ///
    /// # Errors
    /// Implementation specific.
    async fn close(&self) -> Result<(), PoolError>;
}
