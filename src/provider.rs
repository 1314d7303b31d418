//! Paginated, deduplicated candidate supply for one session
//!
//! `page_offset` only moves forward over the life of a session. Each round
//! remembers where it started and queries the source relative to that, so a
//! round's first search is always at source offset 0 and every refill
//! advances by `page_size`. Offsets are committed only after the source
//! answered, so a failed search leaves the session exactly as it was.

use crate::error::SourceError;
use crate::session::Session;
use crate::source::CandidateSource;
use crate::types::*;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_PAGE_SIZE: usize = 5;
pub const DEFAULT_FETCH_COUNT: usize = 50;

pub struct CandidateProvider {
    source: Arc<dyn CandidateSource>,
    page_size: usize,
    fetch_count: usize, // items requested per search call
}

impl CandidateProvider {
    pub fn new(source: Arc<dyn CandidateSource>, page_size: usize, fetch_count: usize) -> Self {
        let page_size = page_size.max(1);
        Self {
            source,
            page_size,
            fetch_count: fetch_count.max(page_size),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Run the first search for the session's (complete) criteria and
    /// return its first candidate. `None` means the round has no results.
    pub async fn begin_round(&self, session: &mut Session) -> Result<Option<Candidate>, SourceError> {
        let Some(criteria) = session.criteria.complete() else {
            warn!("User {} started a search with incomplete criteria", session.user_id);
            return Ok(None);
        };

        let page = self.fetch_page(&criteria, 0, &session.shown_ids).await?;

        session.round_start = session.page_offset;
        session.candidate_buffer = page;
        Ok(session.candidate_buffer.pop())
    }

    /// Next unseen candidate, refilling the buffer from the following page
    /// when it runs dry. `None` means the round is exhausted.
    pub async fn next_candidate(&self, session: &mut Session) -> Result<Option<Candidate>, SourceError> {
        if let Some(candidate) = session.candidate_buffer.pop() {
            return Ok(Some(candidate));
        }

        let Some(criteria) = session.criteria.complete() else {
            warn!("User {} asked for more with incomplete criteria", session.user_id);
            return Ok(None);
        };

        let next_offset = session.page_offset + self.page_size;
        let search_offset = next_offset.saturating_sub(session.round_start);
        let page = self
            .fetch_page(&criteria, search_offset, &session.shown_ids)
            .await?;
        session.page_offset = next_offset;

        if page.is_empty() {
            debug!(
                "No unseen candidates for user {} at offset {}; round exhausted",
                session.user_id, search_offset
            );
            return Ok(None);
        }

        session.candidate_buffer = page;
        Ok(session.candidate_buffer.pop())
    }

    async fn fetch_page(
        &self,
        criteria: &SearchCriteria,
        offset: usize,
        shown: &HashSet<CandidateId>,
    ) -> Result<Vec<Candidate>, SourceError> {
        let raw = self.source.search(criteria, offset, self.fetch_count).await?;
        let fetched = raw.len();
        let page = filter_page(raw, shown, self.page_size);

        debug!(
            "Source '{}' returned {} candidates at offset {}, {} kept",
            self.source.name(),
            fetched,
            offset,
            page.len()
        );

        Ok(page)
    }
}

/// Drop closed profiles, already shown ids and in-page repeats, then
/// truncate to `page_size` keeping source order.
pub fn filter_page(
    candidates: Vec<Candidate>,
    shown: &HashSet<CandidateId>,
    page_size: usize,
) -> Vec<Candidate> {
    let mut seen: HashSet<CandidateId> = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| !c.is_closed)
        .filter(|c| !shown.contains(&c.id))
        .filter(|c| seen.insert(c.id))
        .take(page_size)
        .collect()
}
