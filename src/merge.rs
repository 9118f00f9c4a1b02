//! Context assembly — merge the recency window with retrieved snippets.
//!
//! Ordering: scored snippets first in descending score (ties keep backend
//! rank), then the recent-only turns chronologically. A retrieved snippet
//! whose text matches a recent turn collapses into one snippet tagged
//! `recent+retrieved`, keeping both the score and the turn's sequence number.

use crate::backend::ScoredSnippet;
use crate::types::{Provenance, Snippet, Turn};

/// Merge recent turns and retrieved snippets into an ordered snippet list.
///
/// `recent` may arrive in any order; snippets scoring below `min_score` are
/// dropped before merging. Dedup identity is rendered-text equality, since
/// the backend indexes exactly [`Turn::rendered`] output.
pub fn assemble(recent: &[Turn], retrieved: Vec<ScoredSnippet>, min_score: f32) -> Vec<Snippet> {
    let mut window: Vec<(&Turn, bool)> = recent.iter().map(|t| (t, false)).collect();

    let mut scored: Vec<Snippet> = Vec::with_capacity(retrieved.len());
    for snippet in retrieved {
        if snippet.score < min_score {
            continue;
        }
        // A retrieved snippet that is also in the recency window appears once.
        let matched = window
            .iter_mut()
            .find(|(turn, consumed)| !consumed && turn.rendered() == snippet.text);
        match matched {
            Some((turn, consumed)) => {
                *consumed = true;
                scored.push(Snippet {
                    text: snippet.text,
                    provenance: Provenance::RecentRetrieved,
                    score: Some(snippet.score),
                    seq: Some(turn.seq),
                });
            }
            None => scored.push(Snippet {
                text: snippet.text,
                provenance: Provenance::Retrieved,
                score: Some(snippet.score),
                seq: None,
            }),
        }
    }

    // Stable sort: equal scores keep backend rank.
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut tail: Vec<&Turn> = window
        .into_iter()
        .filter(|(_, consumed)| !consumed)
        .map(|(turn, _)| turn)
        .collect();
    tail.sort_by_key(|turn| turn.seq);

    scored.extend(tail.into_iter().map(|turn| Snippet {
        text: turn.rendered(),
        provenance: Provenance::Recent,
        score: None,
        seq: Some(turn.seq),
    }));

    scored
}
