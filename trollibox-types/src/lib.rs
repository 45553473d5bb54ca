//! # trollibox-types
//!
//! Shared data model for the trollibox remote control.
//! This crate contains the track/playlist/stream types exchanged with the
//! player service, plus the pure helpers the client models build on:
//! highlight span merging, duration formatting and local library search.

pub mod duration;
pub mod highlight;
pub mod search;
mod track;

pub use duration::{format_duration, parse_duration};
pub use highlight::{merge_spans, escape_markup, highlight_html, MatchSpan, Segment, Segments};
pub use search::{search_library, sort_by_matches, SearchHit, SEARCH_CHUNK_SIZE};
pub use track::{PlayState, PlaylistEntry, QueuedBy, Stream, Track};
