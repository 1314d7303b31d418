//! Finite-state dialog driver
//!
//! One call to [`ConversationEngine::handle_message`] handles one inbound
//! text for one user: validate it against the current state, run that
//! state's step, then commit the next state and send the replies. Input is
//! validated before any step runs, so invalid input never touches the
//! session. A step that fails is rolled back to a checkpoint taken before
//! the event.

use crate::config::SearchSettings;
use crate::error::{DeliveryError, EngineError, SourceError, StoreError};
use crate::messages;
use crate::messenger::Messenger;
use crate::persistence::PersistenceGateway;
use crate::provider::CandidateProvider;
use crate::ranking::ProfileRanker;
use crate::session::{Session, SessionStore};
use crate::source::CandidateSource;
use crate::types::*;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Validated input for the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Age(u8),
    Gender(Gender),
    City(u64),
    Status(MaritalStatus),
    More,
    Restart,
    Favorite,
}

/// Result of a successful step
#[derive(Debug)]
struct Transition {
    next: DialogState,
    replies: Vec<Reply>,
}

impl Transition {
    fn to(next: DialogState, text: &str) -> Self {
        Self {
            next,
            replies: vec![Reply::text(text)],
        }
    }
}

#[derive(Debug)]
enum StepError {
    Search(SourceError),
    Persistence {
        candidate_id: CandidateId,
        source: StoreError,
    },
}

impl From<SourceError> for StepError {
    fn from(err: SourceError) -> Self {
        StepError::Search(err)
    }
}

/// Main conversation engine (thread-safe via Arc)
pub struct ConversationEngine {
    sessions: Arc<SessionStore>,
    gateway: Arc<dyn PersistenceGateway>,
    source: Arc<dyn CandidateSource>,
    provider: CandidateProvider,
    ranker: ProfileRanker,
    messenger: Arc<dyn Messenger>,
}

pub type SharedConversationEngine = Arc<ConversationEngine>;

impl ConversationEngine {
    pub fn new(
        sessions: Arc<SessionStore>,
        source: Arc<dyn CandidateSource>,
        messenger: Arc<dyn Messenger>,
        settings: &SearchSettings,
    ) -> SharedConversationEngine {
        let gateway = sessions.gateway().clone();
        let provider =
            CandidateProvider::new(source.clone(), settings.page_size, settings.fetch_count);

        Arc::new(Self {
            sessions,
            gateway,
            source,
            provider,
            ranker: ProfileRanker::new(settings.top_photos),
            messenger,
        })
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Handle one inbound message from `user_id`
    pub async fn handle_message(&self, user_id: UserId, text: &str) -> Result<(), EngineError> {
        let mut session = self
            .sessions
            .acquire(user_id)
            .await
            .map_err(|source| EngineError::Bootstrap { user_id, source })?;

        if session.is_new() {
            let greeting = if session.returning {
                messages::GREET_AGAIN
            } else {
                messages::GREET_NEW
            };
            session.state = DialogState::AwaitingAge;
            self.deliver(user_id, &[Reply::text(greeting), Reply::text(messages::ASK_AGE)])
                .await;
            return Ok(());
        }

        if is_favorites_keyword(text) {
            let reply = list_favorites(&session);
            self.deliver(user_id, &[reply]).await;
            return Ok(());
        }

        let current = session.state;
        let Some(input) = parse_input(current, text) else {
            debug!("Invalid input from user {} in state {}", user_id, current);
            self.deliver(user_id, &[Reply::text(messages::INVALID_INPUT)])
                .await;
            return Ok(());
        };

        let checkpoint = session.checkpoint();
        match self.run_step(&mut session, input).await {
            Ok(transition) => {
                if transition.next != current {
                    info!("User {}: {} -> {}", user_id, current, transition.next);
                }
                session.state = transition.next;
                self.deliver(user_id, &transition.replies).await;
                Ok(())
            }
            Err(StepError::Search(e)) => {
                session.restore(checkpoint);
                warn!("Search failed for user {} in state {}: {}", user_id, current, e);
                self.deliver(user_id, &[Reply::text(messages::SEARCH_UNAVAILABLE)])
                    .await;
                Ok(())
            }
            Err(StepError::Persistence {
                candidate_id,
                source,
            }) => {
                session.restore(checkpoint);
                self.deliver(user_id, &[Reply::text(messages::TEMPORARY_ERROR)])
                    .await;
                Err(EngineError::Persistence {
                    user_id,
                    candidate_id,
                    source,
                })
            }
        }
    }

    /// Exhaustive dispatch: `parse_input` only yields inputs valid for the state
    async fn run_step(&self, session: &mut Session, input: Input) -> Result<Transition, StepError> {
        match input {
            Input::Age(age) => {
                session.criteria.age = Some(age);
                Ok(Transition::to(DialogState::AwaitingGender, messages::ASK_GENDER))
            }
            Input::Gender(gender) => {
                session.criteria.gender = Some(gender);
                Ok(Transition::to(DialogState::AwaitingCity, messages::ASK_CITY))
            }
            Input::City(city) => {
                session.criteria.city = Some(city);
                Ok(Transition::to(DialogState::AwaitingStatus, messages::ASK_STATUS))
            }
            Input::Status(status) => {
                session.criteria.status = Some(status);
                self.start_search(session).await
            }
            Input::More => self.show_more(session).await,
            Input::Restart => {
                session.criteria.clear();
                session.candidate_buffer.clear();
                let text = format!("{}\n{}", messages::RESTARTING, messages::ASK_AGE);
                Ok(Transition::to(DialogState::AwaitingAge, &text))
            }
            Input::Favorite => Ok(add_favorite(session)),
        }
    }

    async fn start_search(&self, session: &mut Session) -> Result<Transition, StepError> {
        if let Some(criteria) = session.criteria.complete() {
            info!("User {} searching with {:?}", session.user_id, criteria);
        }

        match self.provider.begin_round(session).await? {
            Some(candidate) => {
                let profile = self.present(session, candidate).await?;
                Ok(Transition {
                    next: DialogState::SearchResults,
                    replies: vec![profile, Reply::text(messages::RESULTS_HINT)],
                })
            }
            None => Ok(Transition::to(DialogState::AwaitingRestart, messages::NO_RESULTS)),
        }
    }

    async fn show_more(&self, session: &mut Session) -> Result<Transition, StepError> {
        match self.provider.next_candidate(session).await? {
            Some(candidate) => {
                let profile = self.present(session, candidate).await?;
                Ok(Transition {
                    next: DialogState::SearchResults,
                    replies: vec![profile],
                })
            }
            None => Ok(Transition::to(
                DialogState::AwaitingRestart,
                messages::NO_MORE_RESULTS,
            )),
        }
    }

    /// Record the candidate as shown, then build its profile reply.
    ///
    /// The durable write comes first: once it succeeds the candidate can
    /// never be offered again, even if the process dies before replying.
    async fn present(&self, session: &mut Session, candidate: Candidate) -> Result<Reply, StepError> {
        self.gateway
            .append(session.user_id, &[candidate.id])
            .await
            .map_err(|source| StepError::Persistence {
                candidate_id: candidate.id,
                source,
            })?;
        session.shown_ids.insert(candidate.id);

        let link = candidate.profile_link();
        session.last_shown_link = Some(link.clone());

        let media = match self.source.get_media(candidate.id).await {
            Ok(media) => media,
            Err(e) => {
                warn!("{}; sending profile without photos", e);
                Vec::new()
            }
        };
        let attachments = self
            .ranker
            .rank(&media)
            .iter()
            .map(Media::attachment)
            .collect();

        debug!(
            "Showing candidate {} to user {} ({} shown so far)",
            candidate.id,
            session.user_id,
            session.shown_ids.len()
        );

        Ok(Reply::with_attachments(link, attachments))
    }

    /// Send replies in order. Suppressed delivery is expected and ignored;
    /// other delivery failures are logged and do not fail the event.
    async fn deliver(&self, user_id: UserId, replies: &[Reply]) {
        for reply in replies {
            match self.messenger.send(user_id, reply).await {
                Ok(()) => {}
                Err(DeliveryError::Suppressed(reason)) => {
                    debug!("Delivery to {} suppressed: {}", user_id, reason);
                }
                Err(e) => {
                    error!("Failed to reply to user {}: {}", user_id, e);
                }
            }
        }
    }
}

fn add_favorite(session: &mut Session) -> Transition {
    match session.last_shown_link.clone() {
        Some(link) => {
            session.favorites.push(link);
            Transition::to(DialogState::SearchResults, messages::ADDED_TO_FAVORITES)
        }
        None => Transition::to(DialogState::SearchResults, messages::NOTHING_TO_FAVORITE),
    }
}

fn list_favorites(session: &Session) -> Reply {
    if session.favorites.is_empty() {
        return Reply::text(messages::NO_FAVORITES);
    }
    let mut lines = vec![messages::FAVORITES_HEADER.to_string()];
    lines.extend(session.favorites.iter().cloned());
    Reply::text(lines.join("\n"))
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

pub fn is_favorites_keyword(text: &str) -> bool {
    matches!(normalize(text).as_str(), "избранное" | "favorites")
}

fn is_more(command: &str) -> bool {
    matches!(command, "еще" | "ещё" | "more")
}

fn is_restart(command: &str) -> bool {
    matches!(command, "заново" | "restart")
}

fn is_favorite(command: &str) -> bool {
    matches!(command, "в избранное" | "favorite")
}

fn parse_digits<T: std::str::FromStr>(text: &str) -> Option<T> {
    let text = text.trim();
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

/// Validate `text` for `state`; `None` means invalid input
pub fn parse_input(state: DialogState, text: &str) -> Option<Input> {
    let command = normalize(text);
    match state {
        DialogState::AwaitingAge => parse_digits::<u32>(text)
            .filter(|age| 12 < *age && *age < 100)
            .and_then(|age| u8::try_from(age).ok())
            .map(Input::Age),
        DialogState::AwaitingGender => Gender::from_code(text.trim()).map(Input::Gender),
        DialogState::AwaitingCity => parse_digits::<u64>(text).map(Input::City),
        DialogState::AwaitingStatus => MaritalStatus::from_code(text.trim()).map(Input::Status),
        DialogState::SearchResults => {
            if is_more(&command) {
                Some(Input::More)
            } else if is_restart(&command) {
                Some(Input::Restart)
            } else if is_favorite(&command) {
                Some(Input::Favorite)
            } else {
                None
            }
        }
        DialogState::AwaitingRestart => is_restart(&command).then_some(Input::Restart),
    }
}
