//! Evidence transfer worker.
//!
//! A single supervisor task wakes every second, snapshots the set of
//! instances with queued evidence, and spawns one dispatch task per
//! instance. Each dispatch brackets its uploads in a `sync_start` /
//! `sync_end` session and drains its queue FIFO. Dispatch failures are
//! contained: the task logs and dies, the queue survives, the next tick
//! retries.
//!
//! Concurrency contract: the queue map is guarded by one mutex with short
//! critical sections (seed, enqueue, snapshot, single pop). Because the
//! supervisor spawns at most one dispatch task per instance per tick and
//! waits for all of them before the next tick, no two drainers for the
//! same instance are ever in flight.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use relaygrid_protocol::TRANSFER_TICK_SECS;

use crate::db::{Db, TransferSession};
use crate::error::ControllerError;
use crate::evidence::EvidenceStore;

struct Inner {
    db:          Arc<dyn Db>,
    store:       Arc<dyn EvidenceStore>,
    queue:       Mutex<HashMap<String, VecDeque<String>>>,
    shutdown_tx: watch::Sender<bool>,
    handle:      Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn lock_queue(&self) -> MutexGuard<'_, HashMap<String, VecDeque<String>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the process-wide transfer service. Cheap to clone; lifecycle
/// is bound to the process via [`start`](Self::start) and
/// [`shutdown`](Self::shutdown).
#[derive(Clone)]
pub struct TransferWorker {
    inner: Arc<Inner>,
}

impl TransferWorker {
    pub fn new(db: Arc<dyn Db>, store: Arc<dyn EvidenceStore>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                db,
                store,
                queue: Mutex::new(HashMap::new()),
                shutdown_tx,
                handle: Mutex::new(None),
            }),
        }
    }

    /// Seed the queue with every cached evidence the local store knows.
    /// Called once at startup; also the recovery path that reintroduces
    /// blobs whose upload failed in a previous life.
    pub fn send_cached(&self) -> usize {
        let mut seeded = 0;
        for instance in self.inner.store.instances() {
            for id in self.inner.store.evidence_ids(&instance) {
                if self.enqueue(&instance, &id) {
                    seeded += 1;
                }
            }
        }
        tracing::info!("[ET] seeded {seeded} cached evidence blobs");
        seeded
    }

    /// Append an evidence id for an instance. Ids already queued for that
    /// instance are not queued twice; returns whether the id was added.
    pub fn enqueue(&self, instance: &str, id: &str) -> bool {
        let mut queues = self.inner.lock_queue();
        let queue = queues.entry(instance.to_owned()).or_default();
        if queue.iter().any(|queued| queued == id) {
            return false;
        }
        queue.push_back(id.to_owned());
        true
    }

    /// Queued ids for one instance (drained entries excluded).
    pub fn queued(&self, instance: &str) -> usize {
        self.inner.lock_queue().get(instance).map_or(0, VecDeque::len)
    }

    /// Spawn the supervisor loop.
    pub fn start(&self) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(supervise(inner));
        *self
            .inner
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        tracing::info!("[ET] evidence transfer worker started");
    }

    /// Stop new ticks and wait up to `timeout` for in-flight dispatches.
    /// Queue entries that remain are picked up by the next process start.
    pub async fn shutdown(&self, timeout: Duration) {
        let _ = self.inner.shutdown_tx.send(true);
        let handle = self
            .inner
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if tokio::time::timeout(timeout, handle).await.is_err() {
                tracing::warn!("[ET] transfer worker did not stop within {timeout:?}");
            } else {
                tracing::info!("[ET] evidence transfer worker stopped");
            }
        }
    }
}

async fn supervise(inner: Arc<Inner>) {
    let mut shutdown_rx = inner.shutdown_tx.subscribe();
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = tokio::time::sleep(Duration::from_secs(TRANSFER_TICK_SECS)) => {}
        }
        if *shutdown_rx.borrow() {
            break;
        }

        if !inner.db.connected().await {
            tracing::debug!("[ET] upstream unavailable, skipping tick");
            continue;
        }

        // Snapshot under the lock, dispatch outside it: one task per
        // instance, all awaited before the next tick.
        let instances: Vec<String> = inner.lock_queue().keys().cloned().collect();
        let tasks: Vec<_> = instances
            .into_iter()
            .map(|instance| {
                let inner = inner.clone();
                tokio::spawn(async move {
                    if let Err(e) = dispatch(&inner, &instance).await {
                        tracing::warn!("[ET] transfer for {instance} failed: {e}");
                    }
                })
            })
            .collect();
        for joined in join_all(tasks).await {
            if let Err(e) = joined {
                tracing::error!("[ET] dispatch task crashed: {e}");
            }
        }
    }
}

/// Upload everything queued for one instance inside a sync session.
async fn dispatch(inner: &Inner, instance: &str) -> Result<(), ControllerError> {
    if inner.lock_queue().get(instance).map_or(true, VecDeque::is_empty) {
        return Ok(());
    }

    let meta = inner.store.meta(instance)?;
    let mut session = TransferSession {
        bid:       meta.bid,
        ident:     meta.ident,
        subtype:   meta.subtype,
        instance:  instance.to_owned(),
        version:   meta.version,
        user:      meta.user,
        device:    meta.device,
        source:    meta.source,
        sync_time: meta.sync_time,
    };

    if session.bid == 0 {
        let (status, bid) = inner
            .db
            .agent_status(&session.ident, instance, &session.subtype)
            .await?;
        if bid == 0 {
            return Err(ControllerError::ZeroBid {
                ident: session.ident,
                instance: instance.to_owned(),
            });
        }
        tracing::debug!("[ET] resolved {} to bid {bid} ({status})", session.ident);
        session.bid = bid;
    }

    inner.db.sync_start(&session).await?;

    loop {
        let next = {
            let mut queues = inner.lock_queue();
            queues
                .get_mut(instance)
                .and_then(|q| q.pop_front().map(|id| (id, q.len())))
        };
        let Some((id, left)) = next else { break };
        transfer(inner, instance, &id, left).await;
    }

    inner.db.sync_end(&session).await?;
    Ok(())
}

/// Ship one evidence blob. Success deletes the local copy; failure keeps
/// it (the next cold-start seed reintroduces it) and moves on.
async fn transfer(inner: &Inner, instance: &str, id: &str, left: usize) {
    let blob = match inner.store.read(instance, id) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!("[ET] cannot read evidence {id} for {instance}: {e}");
            return;
        }
    };

    match inner.db.send_evidence(instance, &blob).await {
        Ok(()) => {
            if let Err(e) = inner.store.delete(instance, id) {
                tracing::warn!("[ET] evidence {id} sent but not deleted: {e}");
            }
            tracing::info!("[ET] evidence {id} sent for {instance} ({left} left)");
        }
        Err(e) => {
            tracing::warn!("[ET] evidence {id} for {instance} not sent, kept locally: {e}");
        }
    }
}
