//! Notification delivery
//!
//! Display notifications produced by on-device decisions are shipped to
//! the remote service off the request path through an elastic worker pool:
//!
//! - `core_workers` long-lived workers drain a bounded queue
//! - when the queue is full, an overflow worker (up to `max_workers` in
//!   total) runs the notification directly and then helps drain the queue
//!   until it has been idle for `keep_alive`
//! - when the queue is full and the pool is at `max_workers`, the
//!   notification is rejected with `NotificationQueueFull`
//!
//! `stop` lets in-flight deliveries finish (bounded by the shutdown
//! timeout) and discards queued ones.

use crate::config::NotificationPoolConfig;
use crate::error::{DecisioningError, Result};
use crate::transport::{report, ExceptionHandler, Transport};
use crate::types::TargetDeliveryRequest;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

type Queue = Arc<AsyncMutex<mpsc::Receiver<TargetDeliveryRequest>>>;

struct Shared {
    config: NotificationPoolConfig,
    transport: Arc<dyn Transport>,
    exception_handler: Option<Arc<dyn ExceptionHandler>>,
    workers: AtomicUsize,
    delivered: AtomicU64,
}

impl Shared {
    /// Claim a worker slot if the pool is below `max_workers`
    fn try_reserve_worker(&self) -> bool {
        self.workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.config.max_workers).then_some(n + 1)
            })
            .is_ok()
    }

    async fn deliver(&self, request: TargetDeliveryRequest) {
        let request_id = request.request.request_id.clone().unwrap_or_default();
        match self.transport.execute_notification(&request).await {
            Ok(status) if (200..300).contains(&status) => {
                self.delivered.fetch_add(1, Ordering::SeqCst);
                debug!(request_id = %request_id, status, "Notification delivered");
            }
            Ok(status) => {
                warn!(request_id = %request_id, status, "Notification rejected by remote service");
            }
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Notification delivery failed");
                report(self.exception_handler.as_ref(), &e);
            }
        }
    }
}

struct Pool {
    queue_tx: mpsc::Sender<TargetDeliveryRequest>,
    queue_rx: Queue,
    shutdown_tx: broadcast::Sender<()>,
    runtime: Handle,
    workers: Vec<JoinHandle<()>>,
}

impl Pool {
    fn spawn_worker(&mut self, shared: &Arc<Shared>, first: Option<TargetDeliveryRequest>, idle: Option<Duration>) {
        self.workers.retain(|handle| !handle.is_finished());
        let shared = Arc::clone(shared);
        let queue = Arc::clone(&self.queue_rx);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = self
            .runtime
            .spawn(run_worker(shared, queue, first, idle, shutdown_rx));
        self.workers.push(handle);
    }
}

/// Bounded asynchronous notification sender
pub struct NotificationDeliveryService {
    shared: Arc<Shared>,
    running: AtomicBool,
    pool: Mutex<Option<Pool>>,
}

impl NotificationDeliveryService {
    pub fn new(
        config: NotificationPoolConfig,
        transport: Arc<dyn Transport>,
        exception_handler: Option<Arc<dyn ExceptionHandler>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                transport,
                exception_handler,
                workers: AtomicUsize::new(0),
                delivered: AtomicU64::new(0),
            }),
            running: AtomicBool::new(false),
            pool: Mutex::new(None),
        }
    }

    /// Spawn the core workers on the current Tokio runtime. No-op while running.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Notification service already running");
            return Ok(());
        }
        let runtime = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(DecisioningError::Other(format!(
                    "notification service needs a Tokio runtime: {}",
                    e
                )));
            }
        };

        let config = &self.shared.config;
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut pool = Pool {
            queue_tx,
            queue_rx: Arc::new(AsyncMutex::new(queue_rx)),
            shutdown_tx,
            runtime,
            workers: Vec::with_capacity(config.core_workers),
        };

        self.shared.workers.store(config.core_workers, Ordering::SeqCst);
        for _ in 0..config.core_workers {
            pool.spawn_worker(&self.shared, None, None);
        }

        if let Ok(mut slot) = self.pool.lock() {
            *slot = Some(pool);
        }
        info!(
            core_workers = config.core_workers,
            max_workers = config.max_workers,
            queue_capacity = config.queue_capacity,
            "Notification service started"
        );
        Ok(())
    }

    /// Queue a notification batch for delivery.
    ///
    /// Fails with `NotificationQueueFull` when the queue is full and no
    /// more workers may be added, and with `NotificationServiceStopped`
    /// when the service is not running.
    pub fn send_notification(&self, request: TargetDeliveryRequest) -> Result<()> {
        let mut slot = self
            .pool
            .lock()
            .map_err(|_| DecisioningError::NotificationServiceStopped)?;
        let Some(pool) = slot.as_mut() else {
            return Err(DecisioningError::NotificationServiceStopped);
        };

        match pool.queue_tx.try_send(request) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(DecisioningError::NotificationServiceStopped),
            Err(TrySendError::Full(request)) => {
                if self.shared.try_reserve_worker() {
                    debug!("Notification queue full, adding overflow worker");
                    pool.spawn_worker(&self.shared, Some(request), Some(self.shared.config.keep_alive()));
                    return Ok(());
                }
                let error = DecisioningError::NotificationQueueFull;
                warn!(
                    queue_capacity = self.shared.config.queue_capacity,
                    max_workers = self.shared.config.max_workers,
                    "Notification rejected"
                );
                report(self.shared.exception_handler.as_ref(), &error);
                Err(error)
            }
        }
    }

    /// Shut the pool down. Safe to call repeatedly or without a prior `start`.
    pub async fn stop(&self) {
        let pool = self.pool.lock().ok().and_then(|mut slot| slot.take());
        self.running.store(false, Ordering::SeqCst);
        let Some(pool) = pool else {
            return;
        };

        let Pool {
            queue_tx,
            queue_rx,
            shutdown_tx,
            mut workers,
            ..
        } = pool;
        let _ = shutdown_tx.send(());
        drop(queue_tx);

        let shutdown_timeout = self.shared.config.shutdown_timeout();
        let joined = timeout(shutdown_timeout, async {
            for handle in workers.iter_mut() {
                let _ = handle.await;
            }
        })
        .await;
        if joined.is_err() {
            warn!(timeout = ?shutdown_timeout, "Notification workers did not finish in time, aborting");
            for handle in &workers {
                handle.abort();
            }
        }

        let mut queue = queue_rx.lock().await;
        queue.close();
        let mut discarded = 0usize;
        while queue.try_recv().is_ok() {
            discarded += 1;
        }
        self.shared.workers.store(0, Ordering::SeqCst);
        info!(discarded, "Notification service stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Live workers, core and overflow
    pub fn active_workers(&self) -> usize {
        self.shared.workers.load(Ordering::SeqCst)
    }

    /// Batches acknowledged with a 2xx status
    pub fn delivered_count(&self) -> u64 {
        self.shared.delivered.load(Ordering::SeqCst)
    }
}

/// Worker loop. Core workers (`idle == None`) wait for work until shutdown;
/// overflow workers start with the notification that spawned them and exit
/// after `idle` without work.
async fn run_worker(
    shared: Arc<Shared>,
    queue: Queue,
    first: Option<TargetDeliveryRequest>,
    idle: Option<Duration>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    if let Some(request) = first {
        shared.deliver(request).await;
    }

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            next = next_request(&queue, idle) => next,
        };
        match next {
            Some(request) => shared.deliver(request).await,
            None => break,
        }
    }

    if idle.is_some() {
        shared.workers.fetch_sub(1, Ordering::SeqCst);
        debug!("Overflow notification worker retired");
    }
}

async fn next_request(queue: &Queue, idle: Option<Duration>) -> Option<TargetDeliveryRequest> {
    let receive = async { queue.lock().await.recv().await };
    match idle {
        Some(idle) => timeout(idle, receive).await.ok().flatten(),
        None => receive.await,
    }
}
