//! Routes inbound messages to one worker task per user
//!
//! Each user gets an unbounded queue drained by its own task, so a user's
//! messages are handled strictly in arrival order while different users
//! are handled concurrently. A slow search for one user never delays
//! anyone else.
//!
//! With an idle TTL, a worker whose queue stays empty that long removes its
//! own map entry and exits; the user's next message starts a fresh one.
//! Sends happen under the map entry, so a retiring worker either sees the
//! message in its queue or the sender sees the entry gone.

use crate::engine::SharedConversationEngine;
use crate::types::{InboundMessage, UserId};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct Worker {
    id: u64,
    queue: mpsc::UnboundedSender<String>,
    handle: JoinHandle<()>,
}

type WorkerMap = Arc<DashMap<UserId, Worker>>;

pub struct Dispatcher {
    engine: SharedConversationEngine,
    workers: WorkerMap,
    idle_ttl: Option<Duration>,
    next_id: AtomicU64,
}

impl Dispatcher {
    /// `idle_ttl: None` keeps workers until shutdown
    pub fn new(engine: SharedConversationEngine, idle_ttl: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            workers: Arc::new(DashMap::new()),
            idle_ttl,
            next_id: AtomicU64::new(0),
        })
    }

    pub fn engine(&self) -> &SharedConversationEngine {
        &self.engine
    }

    /// Queue a message for its user's worker. Must be called inside a Tokio runtime.
    pub fn dispatch(&self, message: InboundMessage) {
        let InboundMessage { user_id, text } = message;

        let mut worker = self
            .workers
            .entry(user_id)
            .or_insert_with(|| self.spawn_worker(user_id));

        if let Err(mpsc::error::SendError(text)) = worker.queue.send(text) {
            // worker died (panicked handler); replace it and resend
            warn!("Worker for user {} is gone, restarting it", user_id);
            *worker = self.spawn_worker(user_id);
            if worker.queue.send(text).is_err() {
                error!("Dropping message for user {}: worker unavailable", user_id);
            }
        }
    }

    fn spawn_worker(&self, user_id: UserId) -> Worker {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (queue, mut inbox) = mpsc::unbounded_channel::<String>();
        let engine = self.engine.clone();
        let workers = self.workers.clone();
        let idle_ttl = self.idle_ttl;

        let handle = tokio::spawn(async move {
            debug!("Worker started for user {}", user_id);
            loop {
                let next = match idle_ttl {
                    None => inbox.recv().await,
                    Some(ttl) => match tokio::time::timeout(ttl, inbox.recv()).await {
                        Ok(next) => next,
                        Err(_) => {
                            let mut pending = None;
                            let retired = workers
                                .remove_if(&user_id, |_, worker| {
                                    if worker.id != id {
                                        return false;
                                    }
                                    match inbox.try_recv() {
                                        Ok(text) => {
                                            pending = Some(text);
                                            false
                                        }
                                        Err(_) => true,
                                    }
                                })
                                .is_some();
                            if retired {
                                debug!("Worker for user {} idle, retiring", user_id);
                            }
                            pending
                        }
                    },
                };

                let Some(text) = next else { break };
                if let Err(e) = engine.handle_message(user_id, &text).await {
                    error!("Failed to handle message from user {}: {}", user_id, e);
                }
            }
            debug!("Worker stopped for user {}", user_id);
        });

        Worker { id, queue, handle }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Close every queue and wait for queued messages to be handled
    pub async fn shutdown(&self) {
        let users: Vec<UserId> = self.workers.iter().map(|entry| *entry.key()).collect();

        let handles: Vec<JoinHandle<()>> = users
            .into_iter()
            .filter_map(|user_id| self.workers.remove(&user_id))
            .map(|(_, worker)| worker.handle) // dropping the sender closes the queue
            .collect();

        info!("Waiting for {} workers to drain", handles.len());
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!("Worker ended abnormally: {}", e);
            }
        }
    }
}
