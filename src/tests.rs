//! End-to-end tests for the conversation engine

use crate::config::SearchSettings;
use crate::engine::{ConversationEngine, SharedConversationEngine};
use crate::error::EngineError;
use crate::messages;
use crate::messenger::RecordingMessenger;
use crate::persistence::MemoryGateway;
use crate::session::SessionStore;
use crate::source::MockCandidateSource;
use crate::*;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

const USER: UserId = 42;

/// Answers that take a fresh session to its first search
const QUESTIONNAIRE: [&str; 5] = ["привет", "25", "1", "100500", "2"];

struct Harness {
    engine: SharedConversationEngine,
    sessions: Arc<SessionStore>,
    source: Arc<MockCandidateSource>,
    gateway: Arc<MemoryGateway>,
    messenger: Arc<RecordingMessenger>,
}

impl Harness {
    fn new(source: MockCandidateSource) -> Self {
        Self::with_gateway(source, Arc::new(MemoryGateway::new()), SearchSettings::default())
    }

    fn with_gateway(
        source: MockCandidateSource,
        gateway: Arc<MemoryGateway>,
        settings: SearchSettings,
    ) -> Self {
        let source = Arc::new(source);
        let sessions = Arc::new(SessionStore::new(gateway.clone()));
        let messenger = Arc::new(RecordingMessenger::new());
        let engine = ConversationEngine::new(
            sessions.clone(),
            source.clone(),
            messenger.clone(),
            &settings,
        );
        Self {
            engine,
            sessions,
            source,
            gateway,
            messenger,
        }
    }

    async fn send(&self, text: &str) -> Result<(), EngineError> {
        self.engine.handle_message(USER, text).await
    }

    async fn send_all(&self, texts: &[&str]) {
        for text in texts {
            assert_ok!(self.send(text).await);
        }
    }

    async fn state(&self) -> Option<DialogState> {
        self.sessions.view(USER, |s| s.state).await
    }

    async fn shown(&self) -> HashSet<CandidateId> {
        self.sessions
            .view(USER, |s| s.shown_ids.clone())
            .await
            .unwrap_or_default()
    }

    fn last_text(&self) -> String {
        self.messenger.last_text(USER).unwrap_or_default()
    }

    /// Candidate ids presented to the user so far, in order
    fn presented(&self) -> Vec<CandidateId> {
        self.messenger
            .sent_to(USER)
            .iter()
            .filter_map(|reply| reply.text.strip_prefix("https://vk.com/id"))
            .filter_map(|id| id.parse().ok())
            .collect()
    }
}

fn photo(id: i64, likes: u32, comments: u32) -> Media {
    Media {
        owner_id: 5,
        id,
        likes,
        comments,
        tagged: false,
    }
}

#[tokio::test]
async fn test_questionnaire_to_first_profile() {
    let source = MockCandidateSource::with_open_profiles(1, 20)
        .with_media(5, vec![photo(3, 1, 0), photo(1, 10, 2), photo(2, 5, 5)]);
    let h = Harness::with_gateway(
        source,
        Arc::new(MemoryGateway::new()),
        SearchSettings {
            top_photos: 2,
            ..Default::default()
        },
    );

    assert_ok!(h.send("привет").await);
    let greeting = h.messenger.sent_to(USER);
    assert_eq!(greeting.len(), 2);
    assert_eq!(greeting[0].text, messages::GREET_NEW);
    assert_eq!(greeting[1].text, messages::ASK_AGE);

    assert_ok!(h.send("not-an-age").await);
    assert_eq!(h.last_text(), messages::INVALID_INPUT);
    assert_eq!(h.state().await, Some(DialogState::AwaitingAge));

    assert_ok!(h.send("25").await);
    assert_eq!(h.state().await, Some(DialogState::AwaitingGender));
    assert_eq!(h.last_text(), messages::ASK_GENDER);

    assert_ok!(h.send("1").await);
    assert_eq!(h.state().await, Some(DialogState::AwaitingCity));

    assert_ok!(h.send("100500").await);
    assert_eq!(h.state().await, Some(DialogState::AwaitingStatus));

    assert_ok!(h.send("2").await);
    assert_eq!(h.state().await, Some(DialogState::SearchResults));

    let replies = h.messenger.sent_to(USER);
    let profile = &replies[replies.len() - 2];
    assert_eq!(profile.text, "https://vk.com/id5");
    assert_eq!(profile.attachments, vec!["photo5_1", "photo5_2"]);
    assert_eq!(replies[replies.len() - 1].text, messages::RESULTS_HINT);

    let calls = h.source.search_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0],
        (
            SearchCriteria {
                age: 25,
                gender: Gender::Female,
                city: 100500,
                status: MaritalStatus::Dating,
            },
            0
        )
    );
    assert_eq!(h.gateway.appended(USER), vec![5]);
    assert_eq!(h.shown().await, HashSet::from([5]));
}

#[tokio::test]
async fn test_empty_first_search_awaits_restart() {
    let h = Harness::new(MockCandidateSource::new(vec![]));

    h.send_all(&QUESTIONNAIRE).await;

    assert_eq!(h.state().await, Some(DialogState::AwaitingRestart));
    assert_eq!(h.last_text(), messages::NO_RESULTS);
    assert!(h.gateway.appended(USER).is_empty());
}

#[tokio::test]
async fn test_closed_profiles_never_shown() {
    let candidates = (1..=8)
        .map(|id| Candidate {
            id,
            first_name: "A".to_string(),
            last_name: "B".to_string(),
            is_closed: id % 2 == 0,
        })
        .collect();
    let h = Harness::new(MockCandidateSource::new(candidates));

    h.send_all(&QUESTIONNAIRE).await;
    for _ in 0..4 {
        assert_ok!(h.send("еще").await);
    }

    assert_eq!(h.presented(), vec![7, 5, 3, 1]);
    assert_eq!(h.state().await, Some(DialogState::AwaitingRestart));
    assert_eq!(h.last_text(), messages::NO_MORE_RESULTS);
}

#[tokio::test]
async fn test_pagination_is_monotonic_and_never_repeats() {
    let h = Harness::new(MockCandidateSource::with_open_profiles(1, 20));

    h.send_all(&QUESTIONNAIRE).await;
    for _ in 0..20 {
        assert_ok!(h.send("еще").await);
    }

    assert_eq!(h.source.search_offsets(), vec![0, 5, 10, 15, 20]);

    let presented = h.presented();
    assert_eq!(presented.len(), 20);
    assert_eq!(presented.iter().collect::<HashSet<_>>().len(), 20);
    assert_eq!(&presented[..5], &[5, 4, 3, 2, 1]);
    assert_eq!(h.gateway.appended(USER), presented);

    assert_eq!(h.state().await, Some(DialogState::AwaitingRestart));
    assert_eq!(
        h.sessions.view(USER, |s| s.page_offset).await,
        Some(20)
    );
}

#[tokio::test]
async fn test_exhausted_round_only_accepts_restart() {
    let h = Harness::new(MockCandidateSource::with_open_profiles(1, 3));

    h.send_all(&QUESTIONNAIRE).await;
    h.send_all(&["еще", "еще", "еще"]).await;
    assert_eq!(h.state().await, Some(DialogState::AwaitingRestart));

    assert_ok!(h.send("еще").await);
    assert_eq!(h.last_text(), messages::INVALID_INPUT);
    assert_ok!(h.send("в избранное").await);
    assert_eq!(h.last_text(), messages::INVALID_INPUT);
    assert_eq!(h.state().await, Some(DialogState::AwaitingRestart));

    assert_ok!(h.send("заново").await);
    assert_eq!(h.state().await, Some(DialogState::AwaitingAge));
}

#[tokio::test]
async fn test_restart_keeps_shown_ids() {
    let h = Harness::new(MockCandidateSource::with_open_profiles(1, 20));

    h.send_all(&QUESTIONNAIRE).await;
    h.send_all(&["еще", "еще"]).await;
    assert_eq!(h.presented(), vec![5, 4, 3]);

    assert_ok!(h.send("Заново").await);
    assert_eq!(h.state().await, Some(DialogState::AwaitingAge));
    assert!(h.last_text().contains(messages::ASK_AGE));
    assert_eq!(
        h.sessions.view(USER, |s| s.criteria.clone()).await,
        Some(CriteriaDraft::default())
    );
    assert_eq!(h.shown().await, HashSet::from([3, 4, 5]));

    h.send_all(&["30", "2", "1", "1"]).await;
    assert_eq!(h.state().await, Some(DialogState::SearchResults));
    for _ in 0..4 {
        assert_ok!(h.send("еще").await);
    }

    let presented = h.presented();
    assert_eq!(&presented[3..], &[8, 7, 6, 2, 1]);
    assert_eq!(presented.iter().collect::<HashSet<_>>().len(), presented.len());
}

#[tokio::test]
async fn test_second_round_starts_at_first_page() {
    let h = Harness::new(MockCandidateSource::with_open_profiles(1, 30));

    h.send_all(&QUESTIONNAIRE).await;
    for _ in 0..10 {
        assert_ok!(h.send("еще").await);
    }
    assert_eq!(h.sessions.view(USER, |s| s.page_offset).await, Some(10));

    h.send_all(&["заново", "30", "2", "1", "1"]).await;

    let second_round = SearchCriteria {
        age: 30,
        gender: Gender::Male,
        city: 1,
        status: MaritalStatus::Single,
    };
    assert_eq!(h.source.search_calls().last(), Some(&(second_round, 0)));
    assert_eq!(h.presented().last(), Some(&16));

    for _ in 0..5 {
        assert_ok!(h.send("еще").await);
    }

    assert_eq!(h.source.search_calls().last(), Some(&(second_round, 5)));
    assert_eq!(h.sessions.view(USER, |s| s.page_offset).await, Some(15));

    let presented = h.presented();
    assert_eq!(&presented[11..], &[16, 14, 13, 12, 11, 21]);
    assert_eq!(presented.iter().collect::<HashSet<_>>().len(), presented.len());
}

#[tokio::test]
async fn test_history_survives_process_restart() {
    let gateway = Arc::new(MemoryGateway::new());

    let first = Harness::with_gateway(
        MockCandidateSource::with_open_profiles(1, 10),
        gateway.clone(),
        SearchSettings::default(),
    );
    first.send_all(&QUESTIONNAIRE).await;
    first.send_all(&["еще", "еще"]).await;
    let before = first.presented();
    drop(first);

    let second = Harness::with_gateway(
        MockCandidateSource::with_open_profiles(1, 10),
        gateway.clone(),
        SearchSettings::default(),
    );
    assert_ok!(second.send("привет").await);
    assert_eq!(
        second.messenger.sent_to(USER)[0].text,
        messages::GREET_AGAIN
    );
    assert_eq!(
        second.shown().await,
        before.iter().copied().collect::<HashSet<_>>()
    );

    second.send_all(&QUESTIONNAIRE[1..]).await;
    for _ in 0..7 {
        assert_ok!(second.send("еще").await);
    }

    let after = second.presented();
    assert_eq!(after.len(), 7);
    assert!(after.iter().all(|id| !before.contains(id)));
    assert_eq!(second.state().await, Some(DialogState::AwaitingRestart));
}

#[tokio::test]
async fn test_invalid_input_leaves_session_untouched() {
    let h = Harness::new(MockCandidateSource::with_open_profiles(1, 20));
    assert_ok!(h.send("привет").await);

    let garbage = ["", "abc", "-1", "1.5", "дальше"];
    let steps = ["25", "1", "100500", "2", "заново"];

    for step in steps {
        for text in garbage {
            let before = h
                .sessions
                .view(USER, |s| {
                    (
                        s.state,
                        s.criteria.clone(),
                        s.page_offset,
                        s.candidate_buffer.clone(),
                        s.shown_ids.clone(),
                    )
                })
                .await;

            assert_ok!(h.send(text).await);
            assert_eq!(h.last_text(), messages::INVALID_INPUT);

            let after = h
                .sessions
                .view(USER, |s| {
                    (
                        s.state,
                        s.criteria.clone(),
                        s.page_offset,
                        s.candidate_buffer.clone(),
                        s.shown_ids.clone(),
                    )
                })
                .await;
            assert_eq!(before, after, "'{}' changed the session", text);
        }
        assert_ok!(h.send(step).await);
    }

    assert_eq!(h.state().await, Some(DialogState::AwaitingAge));
}

#[tokio::test]
async fn test_search_failure_rolls_back_status_step() {
    let h = Harness::new(MockCandidateSource::with_open_profiles(1, 20));
    h.send_all(&QUESTIONNAIRE[..4]).await;

    h.source.set_search_failure(true);
    assert_ok!(h.send("2").await);

    assert_eq!(h.last_text(), messages::SEARCH_UNAVAILABLE);
    assert_eq!(h.state().await, Some(DialogState::AwaitingStatus));
    assert_eq!(
        h.sessions
            .view(USER, |s| (s.criteria.status, s.page_offset))
            .await,
        Some((None, 0))
    );

    h.source.set_search_failure(false);
    assert_ok!(h.send("2").await);
    assert_eq!(h.state().await, Some(DialogState::SearchResults));
    assert_eq!(h.presented(), vec![5]);
}

#[tokio::test]
async fn test_search_failure_on_refill_keeps_offset() {
    let h = Harness::new(MockCandidateSource::with_open_profiles(1, 20));
    h.send_all(&QUESTIONNAIRE).await;
    h.send_all(&["еще", "еще", "еще", "еще"]).await;
    assert_eq!(h.presented(), vec![5, 4, 3, 2, 1]);

    h.source.set_search_failure(true);
    assert_ok!(h.send("еще").await);

    assert_eq!(h.last_text(), messages::SEARCH_UNAVAILABLE);
    assert_eq!(h.state().await, Some(DialogState::SearchResults));
    assert_eq!(h.sessions.view(USER, |s| s.page_offset).await, Some(0));

    h.source.set_search_failure(false);
    assert_ok!(h.send("еще").await);
    assert_eq!(h.presented().last(), Some(&10));
    assert_eq!(h.source.search_offsets(), vec![0, 5]);
}

#[tokio::test]
async fn test_persistence_failure_is_not_shown() {
    let h = Harness::new(MockCandidateSource::with_open_profiles(1, 20));
    h.send_all(&QUESTIONNAIRE).await;
    assert_eq!(h.presented(), vec![5]);

    h.gateway.set_append_failure(true);
    let err = assert_err!(h.send("еще").await);
    assert!(matches!(
        err,
        EngineError::Persistence {
            user_id: USER,
            candidate_id: 4,
            ..
        }
    ));
    assert_eq!(h.last_text(), messages::TEMPORARY_ERROR);
    assert_eq!(h.shown().await, HashSet::from([5]));
    assert_eq!(h.state().await, Some(DialogState::SearchResults));
    assert_eq!(
        h.sessions.view(USER, |s| s.candidate_buffer.len()).await,
        Some(4)
    );

    h.gateway.set_append_failure(false);
    assert_ok!(h.send("еще").await);
    assert_eq!(h.presented(), vec![5, 4]);
    assert_eq!(h.gateway.appended(USER), vec![5, 4]);
}

#[tokio::test]
async fn test_persistence_failure_on_first_profile() {
    let h = Harness::new(MockCandidateSource::with_open_profiles(1, 20));
    h.send_all(&QUESTIONNAIRE[..4]).await;

    h.gateway.set_append_failure(true);
    assert_err!(h.send("2").await);
    assert_eq!(h.state().await, Some(DialogState::AwaitingStatus));
    assert!(h.shown().await.is_empty());

    h.gateway.set_append_failure(false);
    assert_ok!(h.send("2").await);
    assert_eq!(h.presented(), vec![5]);
}

#[tokio::test]
async fn test_bootstrap_failure_retried_on_next_message() {
    let gateway = Arc::new(MemoryGateway::new().with_history(USER, &[1]));
    let h = Harness::with_gateway(
        MockCandidateSource::with_open_profiles(1, 20),
        gateway,
        SearchSettings::default(),
    );

    h.gateway.set_load_failure(true);
    let err = assert_err!(h.send("привет").await);
    assert!(matches!(err, EngineError::Bootstrap { user_id: USER, .. }));
    assert_eq!(h.state().await, None);
    assert!(h.messenger.sent_to(USER).is_empty());

    h.gateway.set_load_failure(false);
    assert_ok!(h.send("привет").await);
    assert_eq!(h.state().await, Some(DialogState::AwaitingAge));
    assert_eq!(h.shown().await, HashSet::from([1]));
}

#[tokio::test]
async fn test_favorites() {
    let h = Harness::new(MockCandidateSource::with_open_profiles(1, 20));
    assert_ok!(h.send("привет").await);

    assert_ok!(h.send("избранное").await);
    assert_eq!(h.last_text(), messages::NO_FAVORITES);
    assert_eq!(h.state().await, Some(DialogState::AwaitingAge));

    h.send_all(&QUESTIONNAIRE[1..]).await;
    assert_ok!(h.send("в избранное").await);
    assert_eq!(h.last_text(), messages::ADDED_TO_FAVORITES);
    assert_ok!(h.send("в избранное").await);
    assert_eq!(h.state().await, Some(DialogState::SearchResults));

    assert_ok!(h.send("Избранное").await);
    let listing = h.last_text();
    assert!(listing.starts_with(messages::FAVORITES_HEADER));
    assert_eq!(listing.matches("https://vk.com/id5").count(), 2);
    assert_eq!(h.state().await, Some(DialogState::SearchResults));

    // favorites only list, they never affect what is shown next
    assert_ok!(h.send("еще").await);
    assert_eq!(h.presented(), vec![5, 4]);
}

#[tokio::test]
async fn test_media_failure_sends_profile_without_photos() {
    let source = MockCandidateSource::with_open_profiles(1, 5)
        .with_media(5, vec![photo(1, 10, 0)]);
    let h = Harness::new(source);
    h.source.set_media_failure(true);

    h.send_all(&QUESTIONNAIRE).await;

    let replies = h.messenger.sent_to(USER);
    let profile = &replies[replies.len() - 2];
    assert_eq!(profile.text, "https://vk.com/id5");
    assert!(profile.attachments.is_empty());
    assert_eq!(h.state().await, Some(DialogState::SearchResults));
}

#[tokio::test]
async fn test_suppressed_delivery_does_not_fail_event() {
    let h = Harness::new(MockCandidateSource::with_open_profiles(1, 20));
    h.messenger.set_suppressed(true);

    h.send_all(&QUESTIONNAIRE).await;

    assert!(h.messenger.sent_to(USER).is_empty());
    assert_eq!(h.state().await, Some(DialogState::SearchResults));
    assert_eq!(h.gateway.appended(USER), vec![5]);
}

#[tokio::test]
async fn test_concurrent_users_are_independent() {
    let h = Harness::new(MockCandidateSource::with_open_profiles(1, 20));
    let users: Vec<UserId> = (1..=10).collect();

    let conversations = users.iter().map(|&user_id| {
        let engine = h.engine.clone();
        async move {
            for text in QUESTIONNAIRE.iter().chain(["еще", "еще"].iter()) {
                engine.handle_message(user_id, text).await?;
            }
            Ok::<(), EngineError>(())
        }
    });

    for result in futures::future::join_all(conversations).await {
        assert_ok!(result);
    }

    assert_eq!(h.sessions.len(), 10);
    for user_id in users {
        assert_eq!(
            h.sessions.view(user_id, |s| s.state).await,
            Some(DialogState::SearchResults)
        );
        assert_eq!(h.gateway.appended(user_id), vec![5, 4, 3]);
    }
}
