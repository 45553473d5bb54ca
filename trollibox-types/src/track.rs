use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A single piece of music as known to the player's library.
///
/// Optional text fields are normalized to the empty string when the server
/// omits them or sends `null`, so downstream code never has to null-check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub uri: String,
    #[serde(default, deserialize_with = "empty_if_null")]
    pub artist: String,
    #[serde(default, deserialize_with = "empty_if_null")]
    pub title: String,
    #[serde(default, deserialize_with = "empty_if_null")]
    pub genre: String,
    #[serde(default, deserialize_with = "empty_if_null")]
    pub album: String,
    #[serde(default, rename = "albumartist", deserialize_with = "empty_if_null")]
    pub album_artist: String,
    #[serde(default, rename = "albumtrack", deserialize_with = "empty_if_null")]
    pub album_track: String,
    #[serde(default, rename = "albumdisc", deserialize_with = "empty_if_null")]
    pub album_disc: String,
    /// Length in whole seconds, 0 when unknown (e.g. streams).
    #[serde(default, deserialize_with = "zero_if_null")]
    pub duration: u32,
}

impl Track {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    /// Look up a text attribute by its wire name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        let value = match name {
            "uri" => &self.uri,
            "artist" => &self.artist,
            "title" => &self.title,
            "genre" => &self.genre,
            "album" => &self.album,
            "albumartist" => &self.album_artist,
            "albumtrack" => &self.album_track,
            "albumdisc" => &self.album_disc,
            _ => return None,
        };
        Some(value.as_str())
    }

    /// `"3. Artist - Title (04:00)"`, leaving out whatever is unknown.
    pub fn display_title(&self) -> String {
        let mut s = String::new();
        if !self.album_track.is_empty() {
            s.push_str(&self.album_track);
            s.push_str(". ");
        }
        if !self.artist.is_empty() {
            s.push_str(&self.artist);
            s.push_str(" - ");
        }
        s.push_str(&self.title);
        if self.duration > 0 {
            s.push_str(&format!(" ({})", crate::format_duration(self.duration)));
        }
        s
    }
}

fn empty_if_null<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

fn zero_if_null<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    Ok(Option::<u32>::deserialize(d)?.unwrap_or_default())
}

/// Who put an entry in the playlist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum QueuedBy {
    /// The auto-queuer (or anything that is not a user).
    #[default]
    System,
    User,
}

impl QueuedBy {
    pub fn as_str(self) -> &'static str {
        match self {
            QueuedBy::System => "system",
            QueuedBy::User => "user",
        }
    }
}

impl Serialize for QueuedBy {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for QueuedBy {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(match Option::<String>::deserialize(d)?.as_deref() {
            Some("user") => QueuedBy::User,
            _ => QueuedBy::System,
        })
    }
}

/// One row of the play queue. Ordering is owned by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    #[serde(flatten)]
    pub track: Track,
    #[serde(default, rename = "queuedby")]
    pub queued_by: QueuedBy,
}

impl PlaylistEntry {
    pub fn new(track: Track, queued_by: QueuedBy) -> Self {
        Self { track, queued_by }
    }

    pub fn uri(&self) -> &str {
        &self.track.uri
    }
}

/// Playback state of a player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayState {
    Playing,
    Paused,
    #[default]
    Stopped,
}

impl PlayState {
    pub fn as_str(self) -> &'static str {
        match self {
            PlayState::Playing => "playing",
            PlayState::Paused => "paused",
            PlayState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for PlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlayState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "playing" => Ok(PlayState::Playing),
            "paused" => Ok(PlayState::Paused),
            "stopped" => Ok(PlayState::Stopped),
            other => Err(format!("unknown play state {:?}", other)),
        }
    }
}

/// A network radio stream stored by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    #[serde(default, deserialize_with = "empty_if_null")]
    pub filename: String,
    pub url: String,
    #[serde(default, deserialize_with = "empty_if_null")]
    pub title: String,
    #[serde(
        default,
        rename = "arturi",
        deserialize_with = "empty_if_null",
        skip_serializing_if = "String::is_empty"
    )]
    pub art_uri: String,
}

impl Stream {
    /// Streams are queued like tracks; the stream URL doubles as the URI.
    pub fn to_track(&self) -> Track {
        Track {
            uri: self.url.clone(),
            title: self.title.clone(),
            ..Track::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_become_empty() {
        let track: Track = serde_json::from_str(r#"{"uri":"file://a.mp3","title":"A"}"#).unwrap();
        assert_eq!(track.title, "A");
        assert_eq!(track.album, "");
        assert_eq!(track.genre, "");
        assert_eq!(track.album_artist, "");
        assert_eq!(track.duration, 0);
    }

    #[test]
    fn null_fields_become_empty() {
        let track: Track = serde_json::from_str(
            r#"{"uri":"x","artist":null,"album":null,"genre":null,"duration":null}"#,
        )
        .unwrap();
        assert_eq!(track.artist, "");
        assert_eq!(track.album, "");
        assert_eq!(track.genre, "");
        assert_eq!(track.duration, 0);
    }

    #[test]
    fn playlist_entry_reads_queuedby() {
        let entry: PlaylistEntry =
            serde_json::from_str(r#"{"uri":"x","title":"T","duration":12,"queuedby":"user"}"#)
                .unwrap();
        assert_eq!(entry.queued_by, QueuedBy::User);
        assert_eq!(entry.track.title, "T");
        assert_eq!(entry.track.duration, 12);

        let entry: PlaylistEntry = serde_json::from_str(r#"{"uri":"y"}"#).unwrap();
        assert_eq!(entry.queued_by, QueuedBy::System);
        assert_eq!(entry.track.album, "");
    }

    #[test]
    fn play_state_wire_names() {
        let state: PlayState = serde_json::from_str(r#""paused""#).unwrap();
        assert_eq!(state, PlayState::Paused);
        assert_eq!(serde_json::to_string(&PlayState::Playing).unwrap(), r#""playing""#);
        assert!("bogus".parse::<PlayState>().is_err());
    }

    #[test]
    fn display_title_skips_unknowns() {
        let mut track = Track::new("x");
        track.title = "Song".into();
        assert_eq!(track.display_title(), "Song");

        track.artist = "Band".into();
        track.album_track = "3".into();
        track.duration = 240;
        assert_eq!(track.display_title(), "3. Band - Song (04:00)");
    }

    #[test]
    fn stream_as_track_uses_url() {
        let stream: Stream = serde_json::from_str(
            r#"{"filename":"radio.m3u","url":"http://radio/live","title":"Radio"}"#,
        )
        .unwrap();
        let track = stream.to_track();
        assert_eq!(track.uri, "http://radio/live");
        assert_eq!(track.title, "Radio");
        assert_eq!(track.artist, "");
    }
}
