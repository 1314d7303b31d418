//! Per-user session state and the process-wide store that owns it
//!
//! `SessionStore` maps a user id to `Arc<Mutex<Option<Session>>>`. The
//! `DashMap` guard is only held long enough to clone the `Arc` out; the
//! per-user `Mutex` is what serializes handlers for one user, so unrelated
//! users never wait on each other. The slot starts empty and the first
//! handler to lock it loads the shown set, which makes the gateway read
//! happen exactly once per session.

use crate::error::StoreError;
use crate::persistence::PersistenceGateway;
use crate::types::*;
use dashmap::DashMap;
use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMappedMutexGuard, OwnedMutexGuard};
use tracing::{debug, info};

/// Dialog state and search progress of one user
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: UserId,
    pub state: DialogState,
    pub criteria: CriteriaDraft,
    pub page_offset: usize,
    /// `page_offset` when the current round began; searches are relative to it
    pub round_start: usize,
    /// Fetched but not yet shown; consumed from the end
    pub candidate_buffer: Vec<Candidate>,
    /// Every candidate ever shown to this user, mirrored from the gateway
    pub shown_ids: HashSet<CandidateId>,
    pub last_shown_link: Option<String>,
    pub favorites: Vec<String>,
    /// User had shown history when the session was created
    pub returning: bool,
    last_active: Instant,
}

/// Everything a failed step may have touched, except `shown_ids`
/// which only grows after a successful durable write.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    state: DialogState,
    criteria: CriteriaDraft,
    page_offset: usize,
    round_start: usize,
    candidate_buffer: Vec<Candidate>,
    last_shown_link: Option<String>,
    favorites: Vec<String>,
}

impl Session {
    pub fn new(user_id: UserId, shown_ids: HashSet<CandidateId>) -> Self {
        Self {
            user_id,
            state: DialogState::AwaitingAge,
            criteria: CriteriaDraft::default(),
            page_offset: 0,
            round_start: 0,
            candidate_buffer: Vec::new(),
            returning: !shown_ids.is_empty(),
            shown_ids,
            last_shown_link: None,
            favorites: Vec::new(),
            last_active: Instant::now(),
        }
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            state: self.state,
            criteria: self.criteria.clone(),
            page_offset: self.page_offset,
            round_start: self.round_start,
            candidate_buffer: self.candidate_buffer.clone(),
            last_shown_link: self.last_shown_link.clone(),
            favorites: self.favorites.clone(),
        }
    }

    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.state = checkpoint.state;
        self.criteria = checkpoint.criteria;
        self.page_offset = checkpoint.page_offset;
        self.round_start = checkpoint.round_start;
        self.candidate_buffer = checkpoint.candidate_buffer;
        self.last_shown_link = checkpoint.last_shown_link;
        self.favorites = checkpoint.favorites;
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }

    fn touch(&mut self) {
        self.last_active = Instant::now();
    }
}

type SessionSlot = Arc<Mutex<Option<Session>>>;

/// Exclusive access to one user's session for the duration of an event
#[derive(Debug)]
pub struct SessionHandle {
    guard: OwnedMappedMutexGuard<Option<Session>, Session>,
    created: bool,
}

impl SessionHandle {
    /// Session was created by this acquisition (first contact)
    pub fn is_new(&self) -> bool {
        self.created
    }
}

impl Deref for SessionHandle {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.guard
    }
}

impl DerefMut for SessionHandle {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.guard
    }
}

/// Process-scoped session map, created at startup and passed explicitly
pub struct SessionStore {
    sessions: DashMap<UserId, SessionSlot>,
    gateway: Arc<dyn PersistenceGateway>,
}

impl SessionStore {
    pub fn new(gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self {
            sessions: DashMap::new(),
            gateway,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn PersistenceGateway> {
        &self.gateway
    }

    /// Lock the user's session, creating it on first contact.
    ///
    /// A failed gateway read leaves the slot empty so the next event retries.
    pub async fn acquire(&self, user_id: UserId) -> Result<SessionHandle, StoreError> {
        let slot: SessionSlot = self
            .sessions
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        let mut guard: OwnedMutexGuard<Option<Session>> = slot.lock_owned().await;

        let created = if guard.is_none() {
            let shown_ids = self.gateway.load(user_id).await?;
            info!(
                "New session for user {} ({} previously shown candidates)",
                user_id,
                shown_ids.len()
            );
            *guard = Some(Session::new(user_id, shown_ids));
            true
        } else {
            false
        };

        let mut guard = OwnedMutexGuard::try_map(guard, |slot| slot.as_mut()).map_err(|_| {
            StoreError::Unavailable(format!("session slot for user {} is empty", user_id))
        })?;
        guard.touch();

        Ok(SessionHandle { guard, created })
    }

    /// Read a session without creating it
    pub async fn view<R>(&self, user_id: UserId, f: impl FnOnce(&Session) -> R) -> Option<R> {
        let slot = self.sessions.get(&user_id).map(|entry| entry.value().clone())?;
        let guard = slot.lock().await;
        guard.as_ref().map(f)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop sessions idle for at least `max_idle`.
    ///
    /// Busy sessions (locked, or with a handler holding a reference) are kept.
    /// Evicted users keep their shown history, which lives in the gateway.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut evicted = 0;
        self.sessions.retain(|user_id, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            let keep = match slot.try_lock() {
                Ok(guard) => match guard.as_ref() {
                    Some(session) => session.idle_for() < max_idle,
                    None => false,
                },
                Err(_) => true,
            };
            if !keep {
                debug!("Evicting idle session for user {}", user_id);
                evicted += 1;
            }
            keep
        });
        evicted
    }
}
