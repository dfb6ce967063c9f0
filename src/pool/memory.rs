//! In-process pool that follows the CMAP event contract without any network
//! I/O. Connections are plain ids; "establishing" one is instantaneous.

use std::collections::VecDeque;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::event::{CheckOutFailedReason, ConnectionClosedReason, EventSink, PoolEvent};
use crate::options::PoolOptions;

use super::{ConnectionPool, PoolError};

const DEFAULT_MAX_POOL_SIZE: u64 = 100;

/// Connection handed out by [`MemoryPool`].
#[derive(Debug)]
pub struct MemoryConnection {
    id: u64,
    generation: u64,
    last_checked_in: Instant,
}

impl MemoryConnection {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Default)]
struct PoolState {
    // Most recently checked-in connection is reused first.
    available: Vec<MemoryConnection>,
    total: u64,
    next_id: u64,
    generation: u64,
    closed: bool,
    // Tickets of in-flight checkouts, oldest first. Only the front may take a connection.
    wait_queue: VecDeque<u64>,
    next_ticket: u64,
}

enum Attempt {
    Acquired(MemoryConnection),
    Closed,
    Full,
}

pub struct MemoryPool {
    address: String,
    options: PoolOptions,
    events: Arc<dyn EventSink>,
    state: Mutex<PoolState>,
    returned: Notify,
}

impl std::fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPool")
            .field("address", &self.address)
            .field("options", &self.options)
            .field("state", &*self.lock())
            .finish_non_exhaustive()
    }
}

impl MemoryPool {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn max_size(&self) -> Option<u64> {
        match self.options.max_pool_size {
            Some(0) => None,
            Some(size) => Some(size),
            None => Some(DEFAULT_MAX_POOL_SIZE),
        }
    }

    /// Connections currently owned by the pool, idle or checked out.
    #[must_use]
    pub fn total_connections(&self) -> u64 {
        self.lock().total
    }

    #[must_use]
    pub fn available_connections(&self) -> usize {
        self.lock().available.len()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    // Events are published while the state lock is held so that the captured
    // order matches the order state changes happened in.
    fn establish(&self, state: &mut PoolState) -> MemoryConnection {
        state.next_id += 1;
        state.total += 1;
        let id = state.next_id;
        self.events.publish(PoolEvent::ConnectionCreated {
            address: self.address.clone(),
            connection_id: id,
        });
        self.events.publish(PoolEvent::ConnectionReady {
            address: self.address.clone(),
            connection_id: id,
        });
        MemoryConnection {
            id,
            generation: state.generation,
            last_checked_in: Instant::now(),
        }
    }

    fn discard(
        &self,
        state: &mut PoolState,
        connection: &MemoryConnection,
        reason: ConnectionClosedReason,
    ) {
        state.total = state.total.saturating_sub(1);
        self.events.publish(PoolEvent::ConnectionClosed {
            address: self.address.clone(),
            connection_id: connection.id,
            reason,
        });
    }

    fn is_idle_expired(&self, connection: &MemoryConnection) -> bool {
        self.options
            .max_idle_time
            .is_some_and(|max_idle| connection.last_checked_in.elapsed() >= max_idle)
    }

    fn enqueue(&self) -> QueueTicket<'_> {
        let mut state = self.lock();
        state.next_ticket += 1;
        let ticket = state.next_ticket;
        state.wait_queue.push_back(ticket);
        QueueTicket { pool: self, ticket }
    }

    fn try_acquire(&self, ticket: u64) -> Attempt {
        let mut state = self.lock();
        if state.closed {
            return Attempt::Closed;
        }
        if state.wait_queue.front() != Some(&ticket) {
            return Attempt::Full;
        }
        while let Some(connection) = state.available.pop() {
            if connection.generation < state.generation {
                self.discard(&mut state, &connection, ConnectionClosedReason::Stale);
            } else if self.is_idle_expired(&connection) {
                self.discard(&mut state, &connection, ConnectionClosedReason::Idle);
            } else {
                state.wait_queue.pop_front();
                return Attempt::Acquired(connection);
            }
        }
        if self.max_size().is_none_or(|max| state.total < max) {
            state.wait_queue.pop_front();
            return Attempt::Acquired(self.establish(&mut state));
        }
        Attempt::Full
    }

    fn fail_checkout(&self, reason: CheckOutFailedReason) {
        self.events.publish(PoolEvent::CheckOutFailed {
            address: self.address.clone(),
            reason,
        });
    }
}

/// Place in the wait queue, released when the checkout finishes for any
/// reason, including the caller dropping the future.
struct QueueTicket<'a> {
    pool: &'a MemoryPool,
    ticket: u64,
}

impl Drop for QueueTicket<'_> {
    fn drop(&mut self) {
        self.pool
            .lock()
            .wait_queue
            .retain(|queued| *queued != self.ticket);
        // The next checkout in line may now be at the front.
        self.pool.returned.notify_waiters();
    }
}

#[async_trait]
impl ConnectionPool for MemoryPool {
    type Connection = MemoryConnection;

    fn create(
        address: &str,
        options: PoolOptions,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, PoolError> {
        let pool = MemoryPool {
            address: address.to_string(),
            options,
            events,
            state: Mutex::new(PoolState::default()),
            returned: Notify::new(),
        };
        let min = pool.options.min_pool_size.unwrap_or(0);
        if let Some(max) = pool.max_size() {
            if min > max {
                return Err(PoolError::Unsupported(format!(
                    "minPoolSize {min} exceeds maxPoolSize {max}"
                )));
            }
        }

        pool.events.publish(PoolEvent::PoolCreated {
            address: pool.address.clone(),
            options: pool.options.clone(),
        });
        {
            let mut state = pool.lock();
            for _ in 0..min {
                let connection = pool.establish(&mut state);
                state.available.push(connection);
            }
        }
        pool.events.publish(PoolEvent::PoolReady {
            address: pool.address.clone(),
        });
        tracing::debug!(address = %pool.address, min, "memory pool created");
        Ok(pool)
    }

    fn address(&self) -> &str {
        &self.address
    }

    /// Checkouts are served in arrival order: a connection returned while
    /// several tasks wait goes to the one that started waiting first.
    async fn check_out(&self) -> Result<MemoryConnection, PoolError> {
        // A closed pool refuses before any checkout event is published.
        if self.lock().closed {
            return Err(PoolError::Closed {
                address: self.address.clone(),
            });
        }
        self.events.publish(PoolEvent::CheckOutStarted {
            address: self.address.clone(),
        });

        let ticket = self.enqueue();
        let started = Instant::now();
        let deadline = self.options.wait_queue_timeout.map(|timeout| started + timeout);
        loop {
            let mut returned = pin!(self.returned.notified());
            returned.as_mut().enable();

            match self.try_acquire(ticket.ticket) {
                Attempt::Acquired(connection) => {
                    self.events.publish(PoolEvent::CheckedOut {
                        address: self.address.clone(),
                        connection_id: connection.id,
                    });
                    return Ok(connection);
                }
                Attempt::Closed => {
                    self.fail_checkout(CheckOutFailedReason::PoolClosed);
                    return Err(PoolError::Closed {
                        address: self.address.clone(),
                    });
                }
                Attempt::Full => {}
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, returned).await.is_err() {
                        self.fail_checkout(CheckOutFailedReason::Timeout);
                        return Err(PoolError::WaitQueueTimeout {
                            address: self.address.clone(),
                            waited: started.elapsed(),
                        });
                    }
                }
                None => returned.await,
            }
        }
    }

    async fn check_in(&self, mut connection: MemoryConnection) -> Result<(), PoolError> {
        {
            let mut state = self.lock();
            self.events.publish(PoolEvent::CheckedIn {
                address: self.address.clone(),
                connection_id: connection.id,
            });
            if state.closed {
                self.discard(&mut state, &connection, ConnectionClosedReason::PoolClosed);
            } else if connection.generation < state.generation {
                self.discard(&mut state, &connection, ConnectionClosedReason::Stale);
            } else {
                connection.last_checked_in = Instant::now();
                state.available.push(connection);
            }
        }
        self.returned.notify_waiters();
        Ok(())
    }

    async fn clear(&self) -> Result<(), PoolError> {
        let mut state = self.lock();
        state.generation += 1;
        self.events.publish(PoolEvent::PoolCleared {
            address: self.address.clone(),
        });
        for connection in std::mem::take(&mut state.available) {
            self.discard(&mut state, &connection, ConnectionClosedReason::Stale);
        }
        drop(state);
        self.returned.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> Result<(), PoolError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            for connection in std::mem::take(&mut state.available) {
                self.discard(&mut state, &connection, ConnectionClosedReason::PoolClosed);
            }
            self.events.publish(PoolEvent::PoolClosed {
                address: self.address.clone(),
            });
        }
        self.returned.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventRecorder;
    use std::time::Duration;

    fn pool_with(options: PoolOptions) -> (MemoryPool, Arc<EventRecorder>) {
        let recorder = Arc::new(EventRecorder::new());
        let pool = MemoryPool::create("localhost:27017", options, recorder.clone()).unwrap();
        (pool, recorder)
    }

    #[tokio::test]
    async fn min_pool_size_is_populated_up_front() {
        let (pool, recorder) = pool_with(PoolOptions {
            min_pool_size: Some(2),
            ..PoolOptions::default()
        });
        assert_eq!(pool.available_connections(), 2);
        assert_eq!(recorder.count_of("ConnectionReady"), 2);
    }

    #[tokio::test]
    async fn min_above_max_is_rejected() {
        let recorder = Arc::new(EventRecorder::new());
        let options = PoolOptions {
            min_pool_size: Some(3),
            max_pool_size: Some(1),
            ..PoolOptions::default()
        };
        let err = MemoryPool::create("localhost:27017", options, recorder).unwrap_err();
        assert!(matches!(err, PoolError::Unsupported(_)));
    }

    #[tokio::test]
    async fn checked_in_connection_is_reused() {
        let (pool, recorder) = pool_with(PoolOptions::default());
        let first = pool.check_out().await.unwrap();
        let id = first.id();
        pool.check_in(first).await.unwrap();
        let second = pool.check_out().await.unwrap();
        assert_eq!(second.id(), id);
        assert_eq!(recorder.count_of("ConnectionCreated"), 1);
    }

    #[tokio::test]
    async fn full_pool_times_out() {
        let (pool, recorder) = pool_with(PoolOptions {
            max_pool_size: Some(1),
            wait_queue_timeout: Some(Duration::from_millis(20)),
            ..PoolOptions::default()
        });
        let _held = pool.check_out().await.unwrap();
        let err = pool.check_out().await.unwrap_err();
        assert!(matches!(err, PoolError::WaitQueueTimeout { .. }));
        assert_eq!(recorder.count_of("ConnectionCheckOutFailed"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn waiters_are_served_in_arrival_order() {
        let (pool, _recorder) = pool_with(PoolOptions {
            max_pool_size: Some(1),
            ..PoolOptions::default()
        });
        let pool = Arc::new(pool);
        let held = pool.check_out().await.unwrap();

        let first = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.check_out().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.check_out().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        pool.check_in(held).await.unwrap();
        let first_conn = tokio::time::timeout(Duration::from_secs(1), first)
            .await
            .expect("first waiter served")
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());

        pool.check_in(first_conn).await.unwrap();
        let second_conn = tokio::time::timeout(Duration::from_secs(1), second)
            .await
            .expect("second waiter served")
            .unwrap()
            .unwrap();
        assert_eq!(second_conn.id(), 1);
    }

    #[tokio::test]
    async fn timed_out_waiter_leaves_the_queue() {
        let (pool, _recorder) = pool_with(PoolOptions {
            max_pool_size: Some(1),
            wait_queue_timeout: Some(Duration::from_millis(10)),
            ..PoolOptions::default()
        });
        let held = pool.check_out().await.unwrap();
        assert!(pool.check_out().await.is_err());
        pool.check_in(held).await.unwrap();
        // Nobody is left in front of a fresh checkout.
        assert_eq!(pool.check_out().await.unwrap().id(), 1);
    }

    #[tokio::test]
    async fn clear_marks_checked_out_connections_stale() {
        let (pool, recorder) = pool_with(PoolOptions::default());
        let conn = pool.check_out().await.unwrap();
        pool.clear().await.unwrap();
        pool.check_in(conn).await.unwrap();
        assert_eq!(pool.total_connections(), 0);
        let closed = recorder
            .snapshot()
            .into_iter()
            .filter(|event| {
                matches!(
                    event,
                    PoolEvent::ConnectionClosed {
                        reason: ConnectionClosedReason::Stale,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(closed, 1);
    }

    #[tokio::test]
    async fn idle_connections_are_closed_on_checkout() {
        let (pool, recorder) = pool_with(PoolOptions {
            max_idle_time: Some(Duration::from_millis(5)),
            ..PoolOptions::default()
        });
        let conn = pool.check_out().await.unwrap();
        pool.check_in(conn).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let conn = pool.check_out().await.unwrap();
        assert_eq!(conn.id(), 2);
        assert!(recorder.snapshot().contains(&PoolEvent::ConnectionClosed {
            address: "localhost:27017".to_string(),
            connection_id: 1,
            reason: ConnectionClosedReason::Idle,
        }));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_refuses_checkouts() {
        let (pool, recorder) = pool_with(PoolOptions::default());
        pool.close().await.unwrap();
        pool.close().await.unwrap();
        assert_eq!(recorder.count_of("ConnectionPoolClosed"), 1);
        let err = pool.check_out().await.unwrap_err();
        assert!(matches!(err, PoolError::Closed { .. }));
        assert_eq!(recorder.count_of("ConnectionCheckOutStarted"), 0);
    }
}
