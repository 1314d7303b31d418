//! Popularity ranking of a candidate's photos

use crate::types::Media;

/// Picks the photos worth attaching to a candidate's profile link
#[derive(Debug, Clone, Copy)]
pub struct ProfileRanker {
    pub k: usize,
}

impl ProfileRanker {
    pub fn new(k: usize) -> Self {
        Self { k }
    }

    pub fn rank(&self, media: &[Media]) -> Vec<Media> {
        top_media(media, self.k)
    }
}

/// Sort by `likes + comments` descending, keeping source order on ties
pub fn rank_by_popularity(media: &[Media]) -> Vec<&Media> {
    let mut ranked: Vec<&Media> = media.iter().collect();
    // sort_by is stable
    ranked.sort_by(|a, b| b.popularity().cmp(&a.popularity()));
    ranked
}

/// Top `k` photos overall, then up to `k` more photos the candidate is tagged on.
///
/// Tagged photos already among the top `k` are not repeated, so the result
/// holds at most `2k` distinct photos.
pub fn top_media(media: &[Media], k: usize) -> Vec<Media> {
    if media.is_empty() || k == 0 {
        return vec![];
    }

    let ranked = rank_by_popularity(media);

    let mut selected: Vec<Media> = ranked.iter().take(k).map(|m| (*m).clone()).collect();

    let tagged_fill: Vec<Media> = ranked
        .iter()
        .filter(|m| m.tagged)
        .filter(|m| !selected.iter().any(|s| s.key() == m.key()))
        .take(k)
        .map(|m| (*m).clone())
        .collect();

    selected.extend(tagged_fill);
    selected
}
