//! Wire protocol types for talking to the player service.
//!
//! Defines the push-event vocabulary, the request description handed to the
//! gateway, and the JSON bodies exchanged with the data API.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use trollibox_types::{highlight_html, MatchSpan, PlayState, PlaylistEntry, Stream, Track};

use crate::gateway::CancelToken;

/// Kind of a server push notification.
///
/// Each kind maps onto the reloader(s) that refresh the matching slice of
/// model state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Playlist,
    PlayState,
    Time,
    Volume,
    /// The set of players changed.
    List,
    Availability,
    /// The player's track library changed.
    Tracks,
    /// A filter changed, as announced on a player's event stream.
    FilterUpdate,
    /// `filter:<name>` on the filter database's own stream.
    Filter,
    Streams,
    QueuerUpdate,
    Unknown,
}

impl EventKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "playlist" => EventKind::Playlist,
            "playstate" => EventKind::PlayState,
            "time" => EventKind::Time,
            "volume" => EventKind::Volume,
            "list" => EventKind::List,
            "availability" => EventKind::Availability,
            "library:tracks" | "tracks" => EventKind::Tracks,
            "filter:update" | "update" => EventKind::FilterUpdate,
            "streams" | "streams-update" => EventKind::Streams,
            "queuer-update" => EventKind::QueuerUpdate,
            n if n.starts_with("filter:") => EventKind::Filter,
            _ => EventKind::Unknown,
        }
    }
}

/// One notification received over the push channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerEvent {
    pub kind: EventKind,
    /// Raw event name as sent by the server.
    pub name: String,
    /// Decoded `data` field; `Null` when absent, a JSON string when the data
    /// was not JSON.
    pub payload: Value,
}

impl ServerEvent {
    pub fn new(name: &str, data: &str) -> Self {
        let payload = if data.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(data).unwrap_or_else(|_| Value::String(data.to_string()))
        };
        Self {
            kind: EventKind::from_name(name),
            name: name.to_string(),
            payload,
        }
    }
}

/// HTTP method of a data API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one submitted request until its completion is collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(pub u64);

/// A data API call, relative to the API root.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub cancel: Option<CancelToken>,
    /// Only the status matters; a successful response body is not read.
    pub discard_response: bool,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            cancel: None,
            discard_response: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn with_body(mut self, body: impl Serialize) -> Self {
        // Serializing our own body types cannot fail; a Null body is sent as none.
        self.body = serde_json::to_value(body).ok().filter(|v| !v.is_null());
        self
    }

    pub fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn discard_response(mut self) -> Self {
        self.discard_response = true;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

/// Where to put tracks inserted into the playlist.
///
/// Chosen by the caller at the UI boundary (e.g. a held modifier key selects
/// `Next`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertAt {
    Index(usize),
    /// Right after the track that is currently playing.
    Next,
    End,
}

// =============================================================================
// Request bodies
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistInsert {
    pub at: Option<&'static str>,
    pub position: i64,
    pub tracks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistRemove {
    pub positions: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistMove {
    pub from: usize,
    pub to: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetCurrent {
    pub current: i64,
    pub relative: bool,
}

// =============================================================================
// Response bodies
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct PlayStateBody {
    pub playstate: PlayState,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeBody {
    pub volume: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeBody {
    pub time: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistBody {
    #[serde(default)]
    pub time: u32,
    /// Index of the playing track, negative when nothing is playing.
    pub current: i64,
    #[serde(default)]
    pub tracks: Vec<PlaylistEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TracksBody {
    #[serde(default)]
    pub tracks: Vec<Track>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchBody {
    #[serde(default)]
    pub tracks: Vec<SearchResult>,
}

/// A library track matching a search query, with the matched spans per
/// attribute name.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchResult {
    pub track: Track,
    #[serde(default)]
    pub matches: HashMap<String, Vec<MatchSpan>>,
}

impl SearchResult {
    pub fn num_matches(&self) -> usize {
        self.matches.values().map(Vec::len).sum()
    }

    /// The attribute's value as HTML, matches wrapped in `<em>`.
    pub fn highlight(&self, attr: &str) -> String {
        let value = self.track.attr(attr).unwrap_or_default();
        let spans = self.matches.get(attr).map(Vec::as_slice).unwrap_or_default();
        highlight_html(value, spans)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterListBody {
    #[serde(default)]
    pub filters: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterBody {
    #[serde(default)]
    pub filter: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamsBody {
    #[serde(default)]
    pub streams: Vec<Stream>,
}

/// Structured failure body: `{"error": "...", "data": {"index": 3}}`.
///
/// `data` is whatever the server could serialize about the error, usually an
/// empty object.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default)]
    pub data: Value,
}

impl ErrorBody {
    pub fn index(&self) -> Option<usize> {
        self.data
            .get("index")
            .and_then(Value::as_u64)
            .and_then(|i| usize::try_from(i).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_names_map_to_kinds() {
        assert_eq!(EventKind::from_name("playlist"), EventKind::Playlist);
        assert_eq!(EventKind::from_name("library:tracks"), EventKind::Tracks);
        assert_eq!(EventKind::from_name("filter:update"), EventKind::FilterUpdate);
        assert_eq!(EventKind::from_name("filter:queuer"), EventKind::Filter);
        assert_eq!(EventKind::from_name("streams"), EventKind::Streams);
        assert_eq!(EventKind::from_name("nonsense"), EventKind::Unknown);
    }

    #[test]
    fn event_payload_decoding() {
        let ev = ServerEvent::new("volume", r#"{"volume":0.5}"#);
        assert_eq!(ev.kind, EventKind::Volume);
        assert_eq!(ev.payload, json!({"volume": 0.5}));

        assert_eq!(ServerEvent::new("list", "").payload, Value::Null);
        assert_eq!(ServerEvent::new("list", "hi").payload, json!("hi"));
    }

    #[test]
    fn insert_body_shape() {
        let body = PlaylistInsert {
            at: Some("End"),
            position: -1,
            tracks: vec!["test://1".into()],
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"at": "End", "position": -1, "tracks": ["test://1"]})
        );
        let body = PlaylistInsert { at: None, position: 2, tracks: vec![] };
        assert_eq!(serde_json::to_value(&body).unwrap()["at"], Value::Null);
    }

    #[test]
    fn playlist_body_normalizes_tracks() {
        let body: PlaylistBody = serde_json::from_value(json!({
            "time": 12,
            "current": -1,
            "tracks": [{"uri": "a", "title": "A", "queuedby": "user"}, {"uri": "b"}],
        }))
        .unwrap();
        assert_eq!(body.current, -1);
        assert_eq!(body.tracks.len(), 2);
        assert_eq!(body.tracks[1].track.album, "");
    }

    #[test]
    fn search_result_highlights_merged_matches() {
        let result: SearchResult = serde_json::from_value(json!({
            "track": {"uri": "x", "artist": "Foo & Bar"},
            "matches": {"artist": [{"start": 0, "end": 3}, {"start": 1, "end": 5}]},
        }))
        .unwrap();
        assert_eq!(result.num_matches(), 2);
        assert_eq!(result.highlight("artist"), "<em>Foo &amp;</em> Bar");
        assert_eq!(result.highlight("album"), "");
    }

    #[test]
    fn error_body_with_index() {
        let body: ErrorBody =
            serde_json::from_value(json!({"error": "bad", "data": {"index": 1}})).unwrap();
        assert_eq!(body.index(), Some(1));
        let body: ErrorBody = serde_json::from_value(json!({"error": "bad", "data": {}})).unwrap();
        assert_eq!(body.index(), None);
        let body: ErrorBody = serde_json::from_value(json!({"error": "bad"})).unwrap();
        assert_eq!(body.index(), None);
    }
}
