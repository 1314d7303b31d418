//! Candidate sources: the search and photo endpoints behind the provider

use crate::error::SourceError;
use crate::types::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Trait for pluggable candidate sources
#[async_trait]
pub trait CandidateSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// One page of raw search results, unfiltered
    async fn search(
        &self,
        criteria: &SearchCriteria,
        offset: usize,
        count: usize,
    ) -> Result<Vec<Candidate>, SourceError>;

    /// All photos of a candidate, tagged ones flagged
    async fn get_media(&self, candidate_id: CandidateId) -> Result<Vec<Media>, SourceError>;
}

/// In-memory source for testing
///
/// Serves `candidates` as one long result list regardless of criteria and
/// records every `(criteria, offset)` it was asked for.
pub struct MockCandidateSource {
    candidates: Vec<Candidate>,
    media: HashMap<CandidateId, Vec<Media>>,
    fail_search: AtomicBool,
    fail_media: AtomicBool,
    searches: Mutex<Vec<(SearchCriteria, usize)>>,
}

impl MockCandidateSource {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self {
            candidates,
            media: HashMap::new(),
            fail_search: AtomicBool::new(false),
            fail_media: AtomicBool::new(false),
            searches: Mutex::new(Vec::new()),
        }
    }

    /// Open profiles with ids `first..=last`
    pub fn with_open_profiles(first: CandidateId, last: CandidateId) -> Self {
        Self::new(
            (first..=last)
                .map(|id| Candidate {
                    id,
                    first_name: format!("Name{}", id),
                    last_name: format!("Surname{}", id),
                    is_closed: false,
                })
                .collect(),
        )
    }

    pub fn with_media(mut self, candidate_id: CandidateId, media: Vec<Media>) -> Self {
        self.media.insert(candidate_id, media);
        self
    }

    pub fn set_search_failure(&self, fail: bool) {
        self.fail_search.store(fail, Ordering::SeqCst);
    }

    pub fn set_media_failure(&self, fail: bool) {
        self.fail_media.store(fail, Ordering::SeqCst);
    }

    /// Offsets requested so far, in call order
    pub fn search_offsets(&self) -> Vec<usize> {
        self.searches
            .lock()
            .map(|calls| calls.iter().map(|(_, offset)| *offset).collect())
            .unwrap_or_default()
    }

    pub fn search_calls(&self) -> Vec<(SearchCriteria, usize)> {
        self.searches
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CandidateSource for MockCandidateSource {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn search(
        &self,
        criteria: &SearchCriteria,
        offset: usize,
        count: usize,
    ) -> Result<Vec<Candidate>, SourceError> {
        if self.fail_search.load(Ordering::SeqCst) {
            return Err(SourceError::SearchUnavailable(
                "mock search disabled".to_string(),
            ));
        }

        if let Ok(mut calls) = self.searches.lock() {
            calls.push((*criteria, offset));
        }

        Ok(self
            .candidates
            .iter()
            .skip(offset)
            .take(count)
            .cloned()
            .collect())
    }

    async fn get_media(&self, candidate_id: CandidateId) -> Result<Vec<Media>, SourceError> {
        if self.fail_media.load(Ordering::SeqCst) {
            return Err(SourceError::MediaUnavailable {
                candidate_id,
                reason: "mock media disabled".to_string(),
            });
        }

        Ok(self.media.get(&candidate_id).cloned().unwrap_or_default())
    }
}
