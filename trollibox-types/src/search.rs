//! Local keyword search over an in-memory track library.
//!
//! Large libraries are cut into fixed-size chunks that a bounded pool of
//! scoped worker threads scores independently. Partial results arrive in
//! completion order, not input order; use [`sort_by_matches`] afterwards.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use crate::Track;

/// Number of tracks handed to one worker at a time.
pub const SEARCH_CHUNK_SIZE: usize = 5000;

const SEARCH_ATTRS: [&str; 3] = ["artist", "title", "album"];

/// A track that matched every keyword of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchHit<'a> {
    pub track: &'a Track,
    /// Number of (keyword, attribute) pairs that matched.
    pub matches: usize,
}

/// Find every track in which each whitespace-separated keyword of `query`
/// occurs (case-insensitively) in the artist, title or album.
pub fn search_library<'a>(query: &str, tracks: &'a [Track]) -> Vec<SearchHit<'a>> {
    let keywords: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
    if keywords.is_empty() || tracks.is_empty() {
        return Vec::new();
    }
    if tracks.len() <= SEARCH_CHUNK_SIZE {
        return search_chunk(&keywords, tracks);
    }

    let chunks: Vec<&'a [Track]> = tracks.chunks(SEARCH_CHUNK_SIZE).collect();
    let workers = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(chunks.len());
    let next_chunk = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel();

    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let chunks = &chunks;
            let keywords = &keywords;
            let next_chunk = &next_chunk;
            scope.spawn(move || loop {
                let i = next_chunk.fetch_add(1, Ordering::Relaxed);
                let Some(&chunk) = chunks.get(i) else { break };
                if tx.send(search_chunk(keywords, chunk)).is_err() {
                    break;
                }
            });
        }
        drop(tx);

        let mut results = Vec::new();
        for partial in rx {
            results.extend(partial);
        }
        results
    })
}

fn search_chunk<'a>(keywords: &[String], tracks: &'a [Track]) -> Vec<SearchHit<'a>> {
    tracks
        .iter()
        .filter_map(|track| {
            let values: Vec<String> = SEARCH_ATTRS
                .iter()
                .filter_map(|attr| track.attr(attr))
                .filter(|v| !v.is_empty())
                .map(str::to_lowercase)
                .collect();

            let mut matches = 0;
            for keyword in keywords {
                let hits = values.iter().filter(|v| v.contains(keyword.as_str())).count();
                if hits == 0 {
                    return None;
                }
                matches += hits;
            }
            Some(SearchHit { track, matches })
        })
        .collect()
}

/// Best matches first; ties keep their relative order.
pub fn sort_by_matches(hits: &mut [SearchHit<'_>]) {
    hits.sort_by(|a, b| b.matches.cmp(&a.matches));
}
