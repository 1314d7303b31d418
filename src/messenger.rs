//! Outbound messaging collaborator

use crate::error::DeliveryError;
use crate::types::{Reply, UserId};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, user_id: UserId, reply: &Reply) -> Result<(), DeliveryError>;
}

/// Messenger that keeps everything it was asked to send (for tests)
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(UserId, Reply)>>,
    suppress: AtomicBool,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every send as suppressed, as flood control would
    pub fn set_suppressed(&self, suppress: bool) {
        self.suppress.store(suppress, Ordering::SeqCst);
    }

    pub fn sent_to(&self, user_id: UserId) -> Vec<Reply> {
        self.sent
            .lock()
            .map(|sent| {
                sent.iter()
                    .filter(|(to, _)| *to == user_id)
                    .map(|(_, reply)| reply.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn last_text(&self, user_id: UserId) -> Option<String> {
        self.sent_to(user_id).pop().map(|reply| reply.text)
    }

    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send(&self, user_id: UserId, reply: &Reply) -> Result<(), DeliveryError> {
        if self.suppress.load(Ordering::SeqCst) {
            return Err(DeliveryError::Suppressed("flood control".to_string()));
        }
        self.sent
            .lock()
            .map_err(|_| DeliveryError::Failed("recorder lock poisoned".to_string()))?
            .push((user_id, reply.clone()));
        Ok(())
    }
}
