//! VKinder - matchmaking chat bot for VK
//!
//! Walks a user through a short questionnaire (age, gender, city, marital
//! status), then pages through matching profiles one at a time:
//! - Per-user finite-state dialog with transactional steps
//! - Durable history so no profile is ever shown twice to the same user
//! - Top photos per profile ranked by likes + comments
//! - Bots Long Poll or Callback API for inbound messages

pub mod types;
pub mod error;
pub mod config;
pub mod source;
pub mod vk;
pub mod ranking;
pub mod provider;
pub mod persistence;
pub mod session;
pub mod messenger;
pub mod messages;
pub mod engine;
pub mod dispatcher;
pub mod longpoll;
pub mod server;

pub use types::*;
pub use error::{DeliveryError, EngineError, SourceError, StoreError, VkError};
pub use config::BotConfig;
pub use source::{CandidateSource, MockCandidateSource};
pub use vk::{VkCandidateSource, VkClient, VkMessenger};
pub use ranking::ProfileRanker;
pub use provider::CandidateProvider;
pub use persistence::{MemoryGateway, PersistenceGateway, SqliteGateway};
pub use session::{Session, SessionStore};
pub use messenger::{Messenger, RecordingMessenger};
pub use engine::{ConversationEngine, SharedConversationEngine};
pub use dispatcher::Dispatcher;
pub use longpoll::LongPoll;

#[cfg(test)]
mod tests;
