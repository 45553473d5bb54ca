//! Remote player: playback state, playlist, library and search.
//!
//! Scalar fields (play state, volume, time) are synced with one reloader and
//! one updater each. The playlist is only ever reloaded as a whole and is
//! edited optimistically. A local progress clock advances `time` between
//! server pushes while something is playing.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use log::{debug, info};
use serde_json::json;

use trollibox_types::{parse_duration, search_library, sort_by_matches, PlayState, PlaylistEntry, QueuedBy, SearchHit, Track};

use crate::config::Config;
use crate::error::ApiError;
use crate::gateway::{CancelToken, Gateway, HttpGateway};
use crate::model::{EntityState, ModelEvent, NetModel, NetModelBuilder};
use crate::protocol::{
    EventKind, InsertAt, Method, PlayStateBody, PlaylistBody, PlaylistInsert, PlaylistMove, PlaylistRemove, Request,
    SearchBody, SearchResult, SetCurrent, Ticket, TimeBody, TracksBody, VolumeBody,
};
use crate::sync::{Reloader, Updater};
use crate::transport::{ConnectionState, EventStream, PushChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerField {
    State,
    Volume,
    Time,
    Current,
    Playlist,
    Tracks,
    Search,
    Art,
}

#[derive(Debug, Clone, Default)]
pub struct SearchState {
    pub query: String,
    pub results: Vec<SearchResult>,
    generation: u64,
}

#[derive(Debug, Default)]
pub struct PlayerState {
    pub state: PlayState,
    /// 0.0 ..= 1.0
    pub volume: f32,
    /// Seconds into the current track.
    pub time: u32,
    pub current: Option<usize>,
    pub playlist: Vec<PlaylistEntry>,
    /// The player's library.
    pub tracks: Vec<Track>,
    pub search: SearchState,
    /// Track uri to whether the server has art for it.
    pub art: HashMap<String, bool>,
    art_pending: HashSet<String>,
}

impl EntityState for PlayerState {
    type Field = PlayerField;
}

impl PlayerState {
    pub fn current_track(&self) -> Option<&PlaylistEntry> {
        self.current.and_then(|i| self.playlist.get(i))
    }
}

fn playlist_of(state: &mut PlayerState) -> &mut Vec<PlaylistEntry> {
    &mut state.playlist
}

pub struct Player {
    name: String,
    model: NetModel<PlayerState>,
    untagged: Vec<String>,
    max_results: usize,
    search_cancel: Option<CancelToken>,
    /// Start of the current progress second, while the clock runs.
    clock: Option<Instant>,
}

impl Player {
    /// Connect to the player named in `config`.
    pub fn connect(config: &Config) -> Result<Self, ApiError> {
        let events = EventStream::connect(
            config.server_url(),
            &player_path(config.player(), "events"),
            config.reconnect_delay(),
        )?;
        let gateway = HttpGateway::new(config.server_url())?;
        info!("Connecting to player {:?} at {}", config.player(), config.server_url());
        Ok(Self::with_transport(config, Box::new(events), Box::new(gateway)))
    }

    pub fn with_transport(config: &Config, channel: Box<dyn PushChannel>, gateway: Box<dyn Gateway>) -> Self {
        let name = config.player().to_string();
        let path = |suffix: &str| player_path(&name, suffix);

        let model = NetModelBuilder::new(PlayerState::default())
            .settle_delay(config.settle_delay())
            .reloader(Reloader::json(EventKind::PlayState, path("playstate"), |s: &mut PlayerState, b: PlayStateBody| {
                s.state = b.playstate;
                vec![PlayerField::State]
            }))
            .reloader(Reloader::json(EventKind::Volume, path("volume"), |s: &mut PlayerState, b: VolumeBody| {
                s.volume = b.volume.clamp(0.0, 1.0);
                vec![PlayerField::Volume]
            }))
            .reloader(Reloader::json(EventKind::Time, path("time"), |s: &mut PlayerState, b: TimeBody| {
                s.time = b.time;
                vec![PlayerField::Time]
            }))
            .reloader(Reloader::json(EventKind::Playlist, path("playlist"), |s: &mut PlayerState, b: PlaylistBody| {
                s.current = usize::try_from(b.current).ok().filter(|&i| i < b.tracks.len());
                s.playlist = b.tracks;
                s.time = b.time;
                // The track at an unchanged index may still be a different one.
                vec![PlayerField::Playlist, PlayerField::Current, PlayerField::Time]
            }))
            .reloader(Reloader::json(EventKind::Tracks, path("tracks"), |s: &mut PlayerState, b: TracksBody| {
                s.tracks = b.tracks;
                vec![PlayerField::Tracks]
            }))
            .updater(Updater::post(PlayerField::Time, path("time"), |s: &PlayerState| json!({ "time": s.time })))
            .updater(Updater::post(PlayerField::State, path("playstate"), |s: &PlayerState| {
                json!({ "playstate": s.state })
            }))
            .updater(Updater::post(PlayerField::Volume, path("volume"), |s: &PlayerState| {
                json!({ "volume": s.volume })
            }))
            .build(channel, gateway);

        Self {
            name,
            model,
            untagged: config.untagged_attributes(),
            max_results: config.max_search_results(),
            search_cancel: None,
            clock: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &PlayerState {
        self.model.state()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.model.connection_state()
    }

    pub fn current_track(&self) -> Option<&PlaylistEntry> {
        self.state().current_track()
    }

    /// Requests submitted but not yet handled.
    pub fn outstanding(&self) -> usize {
        self.model.outstanding()
    }

    fn path(&self, suffix: &str) -> String {
        player_path(&self.name, suffix)
    }

    // =========================================================================
    // Playback
    // =========================================================================

    pub fn set_state(&mut self, state: PlayState) {
        self.model.set_local(PlayerField::State, |s| s.state = state);
    }

    /// Set the volume, 0.0 ..= 1.0.
    pub fn set_volume(&mut self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        self.model.set_local(PlayerField::Volume, |s| s.volume = volume);
    }

    /// Set the volume from a typed percentage such as `"40"` or `"40%"`.
    pub fn set_volume_input(&mut self, input: &str) {
        match parse_percent(input) {
            Ok(percent) => self.set_volume(f32::from(percent) / 100.0),
            Err(reason) => self.reject(PlayerField::Volume, input, reason),
        }
    }

    pub fn seek(&mut self, time: u32) {
        self.model.set_local(PlayerField::Time, |s| s.time = time);
    }

    /// Seek to a typed position: `ss`, `mm:ss` or `hh:mm:ss`.
    pub fn seek_input(&mut self, input: &str) {
        match parse_duration(input) {
            Ok(time) => self.seek(time),
            Err(reason) => self.reject(PlayerField::Time, input, reason),
        }
    }

    fn reject(&mut self, field: PlayerField, input: &str, reason: String) {
        let error = ApiError::Parse {
            input: input.to_string(),
            reason,
        };
        self.model.report(Some(field), error);
    }

    /// Jump to a playlist position, or by an offset when `relative`.
    pub fn set_current(&mut self, index: i64, relative: bool) -> Ticket {
        let request = Request::new(Method::Post, self.path("current")).with_body(SetCurrent {
            current: index,
            relative,
        });
        self.model.send(request, Some(PlayerField::Current))
    }

    pub fn next(&mut self) -> Ticket {
        self.set_current(1, true)
    }

    pub fn previous(&mut self) -> Ticket {
        self.set_current(-1, true)
    }

    /// Let the server keep the playlist filled from the named filter. `None`
    /// turns the auto queuer off.
    pub fn set_auto_queuer_filter(&mut self, filter: Option<&str>) -> Ticket {
        let request = Request::new(Method::Post, self.path("autoqueuer"))
            .with_body(json!({ "filter": filter.unwrap_or_default() }));
        self.model.send(request, None)
    }

    // =========================================================================
    // Playlist
    // =========================================================================

    /// Queue `tracks` at `at`. Nothing is sent for an empty list.
    pub fn insert(&mut self, tracks: &[Track], at: InsertAt) -> Option<Ticket> {
        if tracks.is_empty() {
            return None;
        }
        let state = self.model.state();
        let len = state.playlist.len();
        let after_current = state.current.map_or(0, |c| c + 1);
        let (index, body) = match at {
            InsertAt::Index(i) => (i.min(len), PlaylistInsert { at: None, position: to_i64(i), tracks: Vec::new() }),
            InsertAt::Next => (
                after_current.min(len),
                PlaylistInsert {
                    at: Some("Next"),
                    position: to_i64(after_current),
                    tracks: Vec::new(),
                },
            ),
            InsertAt::End => (len, PlaylistInsert { at: Some("End"), position: -1, tracks: Vec::new() }),
        };
        let body = PlaylistInsert {
            tracks: tracks.iter().map(|t| t.uri.clone()).collect(),
            ..body
        };

        let entries: Vec<PlaylistEntry> = tracks
            .iter()
            .map(|t| PlaylistEntry::new(t.clone(), QueuedBy::User))
            .collect();
        let request = Request::new(Method::Put, self.path("playlist")).with_body(body);
        Some(self.model.optimistic(
            PlayerField::Playlist,
            playlist_of,
            move |playlist| {
                playlist.splice(index..index, entries);
            },
            request,
        ))
    }

    pub fn append(&mut self, tracks: &[Track]) -> Option<Ticket> {
        self.insert(tracks, InsertAt::End)
    }

    /// Remove the entries at `indices`. Out of range indices are still sent;
    /// the server decides.
    pub fn remove(&mut self, indices: &[usize]) -> Option<Ticket> {
        if indices.is_empty() {
            return None;
        }
        let mut local: Vec<usize> = indices.to_vec();
        local.sort_unstable_by(|a, b| b.cmp(a));
        local.dedup();

        let request = Request::new(Method::Delete, self.path("playlist")).with_body(PlaylistRemove {
            positions: indices.to_vec(),
        });
        Some(self.model.optimistic(
            PlayerField::Playlist,
            playlist_of,
            move |playlist| {
                for i in local {
                    if i < playlist.len() {
                        playlist.remove(i);
                    }
                }
            },
            request,
        ))
    }

    pub fn move_track(&mut self, from: usize, to: usize) -> Ticket {
        let request = Request::new(Method::Patch, self.path("playlist")).with_body(PlaylistMove { from, to });
        self.model.optimistic(
            PlayerField::Playlist,
            playlist_of,
            move |playlist| {
                if from < playlist.len() && to < playlist.len() {
                    let entry = playlist.remove(from);
                    playlist.insert(to, entry);
                }
            },
            request,
        )
    }

    /// Remove everything queued after the current track. With nothing
    /// playing the whole playlist is upcoming.
    pub fn clear_upcoming(&mut self) -> Option<Ticket> {
        let state = self.model.state();
        let first = state.current.map_or(0, |c| c + 1);
        let upcoming: Vec<usize> = (first..state.playlist.len()).collect();
        self.remove(&upcoming)
    }

    // =========================================================================
    // Library
    // =========================================================================

    /// Search the server's library. Supersedes any search still running; a
    /// blank query just clears the results.
    pub fn search(&mut self, query: &str) -> Option<Ticket> {
        if let Some(token) = self.search_cancel.take() {
            token.cancel();
        }
        let search = &mut self.model.state_mut().search;
        search.generation += 1;
        search.query = query.to_string();
        let generation = search.generation;

        if query.trim().is_empty() {
            self.model.set_remote(PlayerField::Search, |s| s.search.results.clear());
            return None;
        }

        let token = CancelToken::new();
        self.search_cancel = Some(token.clone());
        let request = Request::get(self.path("tracks/search"))
            .with_query("query", query)
            .with_query("untagged", self.untagged.join(","))
            .with_cancel(token);
        let max_results = self.max_results;

        Some(self.model.fetch(request, move |model, result| {
            if model.state().search.generation != generation {
                debug!("Dropping results of superseded search");
                return;
            }
            let body = result.and_then(|value| Ok(serde_json::from_value::<SearchBody>(value)?));
            match body {
                Ok(body) => {
                    let mut results = body.tracks;
                    results.truncate(max_results);
                    model.set_remote(PlayerField::Search, |s| s.search.results = results);
                }
                Err(e) => model.report(Some(PlayerField::Search), e),
            }
        }))
    }

    /// Keyword search over the locally loaded library, best matches first.
    pub fn search_local(&self, query: &str) -> Vec<SearchHit<'_>> {
        let mut hits = search_library(query, &self.state().tracks);
        sort_by_matches(&mut hits);
        hits.truncate(self.max_results);
        hits
    }

    /// Ask whether the server has art for `uri`. Answers are cached; a
    /// missing image is an answer, not an error.
    pub fn check_art(&mut self, uri: &str) -> Option<Ticket> {
        let state = self.model.state_mut();
        if state.art.contains_key(uri) || !state.art_pending.insert(uri.to_string()) {
            return None;
        }
        let request = Request::get(self.path("tracks/art"))
            .with_query("track", uri)
            .discard_response();
        let uri = uri.to_string();
        Some(self.model.fetch(request, move |model, result| {
            model.state_mut().art_pending.remove(&uri);
            match result {
                Ok(_) => model.set_remote(PlayerField::Art, |s| {
                    s.art.insert(uri, true);
                }),
                Err(e) if e.is_not_found() => model.set_remote(PlayerField::Art, |s| {
                    s.art.insert(uri, false);
                }),
                Err(e) => model.report(Some(PlayerField::Art), e),
            }
        }))
    }

    pub fn has_art(&self, uri: &str) -> Option<bool> {
        self.state().art.get(uri).copied()
    }

    // =========================================================================
    // Event loop
    // =========================================================================

    pub fn poll(&mut self) -> Vec<ModelEvent<PlayerField>> {
        self.poll_at(Instant::now())
    }

    pub fn poll_at(&mut self, now: Instant) -> Vec<ModelEvent<PlayerField>> {
        let mut events = self.model.poll_at(now);
        if events.iter().any(restarts_clock) {
            self.clock = Some(now);
        }
        self.tick(now);
        events.extend(self.model.take_events());
        events
    }

    /// Advance `time` by whole elapsed seconds while playing. Reaching the end
    /// of the track reloads the playlist to pick up the next one.
    fn tick(&mut self, now: Instant) {
        let state = self.model.state();
        let duration = match state.current_track() {
            Some(entry) if state.state == PlayState::Playing => entry.track.duration,
            _ => {
                self.clock = None;
                return;
            }
        };
        let Some(since) = self.clock else {
            self.clock = Some(now);
            return;
        };
        let elapsed = now.saturating_duration_since(since).as_secs();
        if elapsed == 0 {
            return;
        }
        self.clock = Some(since + Duration::from_secs(elapsed));

        let before = state.time;
        if duration > 0 && before >= duration {
            return;
        }
        let mut time = before.saturating_add(u32::try_from(elapsed).unwrap_or(u32::MAX));
        let ended = duration > 0 && time >= duration;
        if ended {
            time = duration;
        }
        self.model.set_remote(PlayerField::Time, |s| s.time = time);
        if ended {
            debug!("Track ended locally, reloading playlist");
            self.model.reload(EventKind::Playlist);
        }
    }
}

fn restarts_clock(event: &ModelEvent<PlayerField>) -> bool {
    matches!(
        event,
        ModelEvent::Changed {
            field: PlayerField::Current | PlayerField::State | PlayerField::Time,
            ..
        }
    )
}

fn player_path(name: &str, suffix: &str) -> String {
    format!("/player/{}/{}", name, suffix)
}

fn to_i64(i: usize) -> i64 {
    i64::try_from(i).unwrap_or(i64::MAX)
}

fn parse_percent(input: &str) -> Result<u8, String> {
    let digits = input.trim().trim_end_matches('%').trim_end();
    let value: u8 = digits.parse().map_err(|_| "expected a whole number".to_string())?;
    if value > 100 {
        return Err("volume is a percentage between 0 and 100".to_string());
    }
    Ok(value)
}
