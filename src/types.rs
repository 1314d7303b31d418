//! Core type definitions for the matchmaking dialog

use serde::{Deserialize, Serialize};

/// VK user identifier of the person talking to the bot
pub type UserId = i64;

/// VK user identifier of a prospective match
pub type CandidateId = i64;

/// Prospective match profile returned by the search endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub first_name: String,
    pub last_name: String,
    pub is_closed: bool, // private profile, photos not visible
}

impl Candidate {
    pub fn profile_link(&self) -> String {
        format!("https://vk.com/id{}", self.id)
    }
}

/// Photo of a candidate with its popularity metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub owner_id: i64,
    pub id: i64,
    pub likes: u32,
    pub comments: u32,
    pub tagged: bool, // candidate is tagged on this photo
}

impl Media {
    pub fn popularity(&self) -> u64 {
        u64::from(self.likes) + u64::from(self.comments)
    }

    /// (owner_id, id) pair identifying the photo
    pub fn key(&self) -> (i64, i64) {
        (self.owner_id, self.id)
    }

    /// Attachment reference understood by `messages.send`
    pub fn attachment(&self) -> String {
        format!("photo{}_{}", self.owner_id, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Female,
    Male,
}

impl Gender {
    /// Numeric `sex` code used by the search endpoint
    pub fn code(self) -> u8 {
        match self {
            Gender::Female => 1,
            Gender::Male => 2,
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "1" => Some(Gender::Female),
            "2" => Some(Gender::Male),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaritalStatus {
    Single,
    Dating,
    Engaged,
    Married,
    Complicated,
}

impl MaritalStatus {
    pub fn code(self) -> u8 {
        match self {
            MaritalStatus::Single => 1,
            MaritalStatus::Dating => 2,
            MaritalStatus::Engaged => 3,
            MaritalStatus::Married => 4,
            MaritalStatus::Complicated => 5,
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "1" => Some(MaritalStatus::Single),
            "2" => Some(MaritalStatus::Dating),
            "3" => Some(MaritalStatus::Engaged),
            "4" => Some(MaritalStatus::Married),
            "5" => Some(MaritalStatus::Complicated),
            _ => None,
        }
    }
}

/// Complete set of filters for one search round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub age: u8,
    pub gender: Gender,
    pub city: u64,
    pub status: MaritalStatus,
}

/// Filters collected so far, filled one dialog step at a time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CriteriaDraft {
    pub age: Option<u8>,
    pub gender: Option<Gender>,
    pub city: Option<u64>,
    pub status: Option<MaritalStatus>,
}

impl CriteriaDraft {
    /// Returns the criteria once all four filters are set
    pub fn complete(&self) -> Option<SearchCriteria> {
        Some(SearchCriteria {
            age: self.age?,
            gender: self.gender?,
            city: self.city?,
            status: self.status?,
        })
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Dialog position of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DialogState {
    AwaitingAge,
    AwaitingGender,
    AwaitingCity,
    AwaitingStatus,
    SearchResults,
    AwaitingRestart,
}

impl DialogState {
    pub fn as_str(self) -> &'static str {
        match self {
            DialogState::AwaitingAge => "awaiting_age",
            DialogState::AwaitingGender => "awaiting_gender",
            DialogState::AwaitingCity => "awaiting_city",
            DialogState::AwaitingStatus => "awaiting_status",
            DialogState::SearchResults => "search_results",
            DialogState::AwaitingRestart => "awaiting_restart",
        }
    }
}

impl std::fmt::Display for DialogState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound message: text plus optional photo attachments
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub text: String,
    pub attachments: Vec<String>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(text: impl Into<String>, attachments: Vec<String>) -> Self {
        Self {
            text: text.into(),
            attachments,
        }
    }
}

/// Inbound `{userId, text}` event delivered by the front-end
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundMessage {
    pub user_id: UserId,
    pub text: String,
}
