//! Controller - decides when each record gets reconciled.
//!
//! Triggers are store change events, a periodic resync of every record and
//! requeues after failed or unfinished passes. At most one pass per record
//! is in flight; a trigger that arrives meanwhile marks the record dirty and
//! it runs again once the current pass ends.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::reconciler::{Context, Kind, ReconcileAction, Reconciler};
use crate::store::Event;
use crate::types::ObjectKey;

/// Passes per record allowed by [`Controller::sync_all`] before it gives up
/// on a record that keeps asking to be requeued.
const MAX_PASSES_PER_SYNC: usize = 4;

const MIN_RESYNC_INTERVAL: Duration = Duration::from_secs(1);

/// One record to reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkItem {
    pub kind: Kind,
    pub key: ObjectKey,
}

impl WorkItem {
    pub fn new(kind: Kind, key: ObjectKey) -> Self {
        Self { kind, key }
    }

    /// Work triggered by a store event. Purged records need none.
    pub fn from_event(event: &Event) -> Option<Self> {
        let kind = match event {
            Event::HostChanged(_) => Kind::Host,
            Event::DatabaseChanged(_) => Kind::Database,
            Event::UserChanged(_) => Kind::User,
            Event::HostDeleted(_) | Event::DatabaseDeleted(_) | Event::UserDeleted(_) => {
                return None
            }
        };
        Some(Self::new(kind, event.key().clone()))
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.key)
    }
}

/// Result of [`Controller::sync_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassResult {
    Done,
    Requeue,
    Failed,
}

enum Message {
    /// A backoff timer fired; stale if the item no longer waits on `id`.
    Retry(WorkItem, u64),
    Finished(WorkItem, PassResult),
}

struct PendingRetry {
    id: u64,
    timer: AbortHandle,
}

#[derive(Default)]
struct ItemState {
    running: bool,
    dirty: bool,
    failures: u32,
    retry: Option<PendingRetry>,
}

impl ItemState {
    fn cancel_retry(&mut self) {
        if let Some(retry) = self.retry.take() {
            retry.timer.abort();
        }
    }
}

/// Run-loop bookkeeping: per-item state, in-flight passes and retry timers.
struct Queue {
    states: HashMap<WorkItem, ItemState>,
    passes: JoinSet<()>,
    retries: JoinSet<()>,
    semaphore: Arc<Semaphore>,
    tx: mpsc::UnboundedSender<Message>,
    next_retry: u64,
}

impl Queue {
    fn new(max_concurrent: usize, tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            states: HashMap::new(),
            passes: JoinSet::new(),
            retries: JoinSet::new(),
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tx,
            next_retry: 0,
        }
    }

    /// Whether `id` is still the retry `item` waits for. Consumes it if so.
    fn take_retry(&mut self, item: &WorkItem, id: u64) -> bool {
        match self.states.get_mut(item) {
            Some(state) if state.retry.as_ref().is_some_and(|r| r.id == id) => {
                state.retry = None;
                true
            }
            _ => false,
        }
    }
}

pub struct Controller {
    ctx: Context,
    reconcilers: HashMap<Kind, Arc<dyn Reconciler>>,
}

impl Controller {
    pub fn new(ctx: Context) -> Self {
        let reconcilers = ctx
            .reconcilers()
            .into_iter()
            .map(|r| (r.kind(), r))
            .collect();
        Self { ctx, reconcilers }
    }

    /// Every record in the store, in dependency order: hosts, databases, users.
    pub async fn list_all(&self) -> Vec<WorkItem> {
        let store = &self.ctx.store;
        let mut items = Vec::new();

        match store.list_hosts().await {
            Ok(hosts) => {
                items.extend(hosts.iter().map(|h| WorkItem::new(Kind::Host, h.meta.key())))
            }
            Err(e) => warn!("Failed to list hosts: {}", e),
        }
        match store.list_databases().await {
            Ok(dbs) => {
                items.extend(dbs.iter().map(|d| WorkItem::new(Kind::Database, d.meta.key())))
            }
            Err(e) => warn!("Failed to list databases: {}", e),
        }
        match store.list_users().await {
            Ok(users) => {
                items.extend(users.iter().map(|u| WorkItem::new(Kind::User, u.meta.key())))
            }
            Err(e) => warn!("Failed to list users: {}", e),
        }
        items
    }

    /// Reconcile every record once, sequentially, following requeues.
    pub async fn sync_all(&self) -> SyncSummary {
        let mut summary = SyncSummary::default();
        for item in self.list_all().await {
            let Some(reconciler) = self.reconcilers.get(&item.kind) else {
                continue;
            };
            let mut converged = false;
            for _ in 0..MAX_PASSES_PER_SYNC {
                match reconciler.reconcile(&item.key).await {
                    Ok(ReconcileAction::Done) => {
                        converged = true;
                        break;
                    }
                    Ok(ReconcileAction::Requeue) => continue,
                    Err(e) => {
                        debug!("Pass for {} failed: {}", item, e);
                        break;
                    }
                }
            }
            if converged {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
        }
        info!(
            "Sync finished: {} succeeded, {} failed",
            summary.succeeded, summary.failed
        );
        summary
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    /// In-flight passes are allowed to finish; pending retries are dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let settings = self.ctx.settings.clone();
        let mut events = self.ctx.store.subscribe();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let mut queue = Queue::new(settings.max_concurrent, tx);

        // The first tick fires immediately and performs the initial sync
        let mut resync = interval(settings.resync_interval.max(MIN_RESYNC_INTERVAL));
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Controller started (resync every {:?}, {} concurrent)",
            settings.resync_interval, settings.max_concurrent
        );

        if *shutdown.borrow() {
            return;
        }

        loop {
            let mut triggered = Vec::new();
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = resync.tick() => {
                    let items = self.list_all().await;
                    debug!("Resync: {} records", items.len());
                    triggered.extend(items);
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        debug!("Store event: {} {}", event.resource_type(), event.key());
                        triggered.extend(WorkItem::from_event(&event));
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Missed {} store events, resyncing", missed);
                        triggered.extend(self.list_all().await);
                    }
                    Err(RecvError::Closed) => {
                        warn!("Store event stream closed, stopping");
                        break;
                    }
                },
                Some(message) = rx.recv() => match message {
                    Message::Retry(item, id) => {
                        if queue.take_retry(&item, id) {
                            triggered.push(item);
                        }
                    }
                    Message::Finished(item, result) => {
                        if let Some(next) = self.finish(&mut queue, item, result) {
                            triggered.push(next);
                        }
                    }
                },
                Some(joined) = queue.passes.join_next() => {
                    if let Err(e) = joined {
                        error!("Reconciliation task failed: {}", e);
                    }
                }
                Some(_) = queue.retries.join_next() => {}
            }

            for item in triggered {
                self.trigger(&mut queue, item);
            }
        }

        info!("Controller stopping, waiting for {} passes", queue.passes.len());
        queue.retries.shutdown().await;
        while let Some(joined) = queue.passes.join_next().await {
            if let Err(e) = joined {
                error!("Reconciliation task failed: {}", e);
            }
        }
        info!("Controller stopped");
    }

    /// Start a pass for `item`, or mark it dirty if one is in flight.
    fn trigger(&self, queue: &mut Queue, item: WorkItem) {
        let state = queue.states.entry(item.clone()).or_default();
        if state.running {
            state.dirty = true;
            return;
        }
        let Some(reconciler) = self.reconcilers.get(&item.kind).cloned() else {
            warn!("No reconciler for {}", item);
            return;
        };
        state.running = true;

        let semaphore = Arc::clone(&queue.semaphore);
        let tx = queue.tx.clone();
        queue.passes.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            let result = match reconciler.reconcile(&item.key).await {
                Ok(ReconcileAction::Done) => PassResult::Done,
                Ok(ReconcileAction::Requeue) => PassResult::Requeue,
                Err(_) => PassResult::Failed,
            };
            let _ = tx.send(Message::Finished(item, result));
        });
    }

    /// Bookkeeping after a pass. Returns the item if it must run again now.
    fn finish(&self, queue: &mut Queue, item: WorkItem, result: PassResult) -> Option<WorkItem> {
        let state = queue.states.get_mut(&item)?;
        state.running = false;
        let dirty = std::mem::take(&mut state.dirty);

        match result {
            PassResult::Done => {
                state.failures = 0;
                state.cancel_retry();
                if dirty {
                    return Some(item);
                }
                queue.states.remove(&item);
                None
            }
            PassResult::Requeue => {
                state.failures = 0;
                state.cancel_retry();
                Some(item)
            }
            PassResult::Failed => {
                state.failures = state.failures.saturating_add(1);
                if dirty {
                    return Some(item);
                }
                if state.retry.is_some() {
                    debug!("Retry for {} already pending", item);
                    return None;
                }

                let delay = self.ctx.settings.backoff_delay(state.failures);
                info!("Retrying {} in {:?} (failure {})", item, delay, state.failures);
                queue.next_retry += 1;
                let id = queue.next_retry;
                let tx = queue.tx.clone();
                let timer = queue.retries.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Message::Retry(item, id));
                });
                state.retry = Some(PendingRetry { id, timer });
                None
            }
        }
    }
}
