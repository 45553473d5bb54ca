//! Internet radio streams known to the server.

use std::time::Instant;

use serde_json::json;

use trollibox_types::{Stream, Track};

use crate::config::Config;
use crate::error::ApiError;
use crate::gateway::{Gateway, HttpGateway};
use crate::model::{EntityState, ModelEvent, NetModel, NetModelBuilder};
use crate::protocol::{EventKind, Method, Request, StreamsBody, Ticket};
use crate::sync::Reloader;
use crate::transport::{ConnectionState, EventStream, PushChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamField {
    Streams,
}

#[derive(Debug, Default)]
pub struct StreamState {
    pub streams: Vec<Stream>,
    /// The streams as playable tracks, in the same order.
    pub tracks: Vec<Track>,
}

impl EntityState for StreamState {
    type Field = StreamField;
}

pub struct StreamDb {
    model: NetModel<StreamState>,
}

impl StreamDb {
    pub fn connect(config: &Config) -> Result<Self, ApiError> {
        let events = EventStream::connect(config.server_url(), "/streams/events", config.reconnect_delay())?;
        let gateway = HttpGateway::new(config.server_url())?;
        Ok(Self::with_transport(config, Box::new(events), Box::new(gateway)))
    }

    pub fn with_transport(config: &Config, channel: Box<dyn PushChannel>, gateway: Box<dyn Gateway>) -> Self {
        let model = NetModelBuilder::new(StreamState::default())
            .settle_delay(config.settle_delay())
            .reloader(Reloader::json(EventKind::Streams, "/streams", |s: &mut StreamState, b: StreamsBody| {
                s.tracks = b.streams.iter().map(Stream::to_track).collect();
                s.streams = b.streams;
                vec![StreamField::Streams]
            }))
            .build(channel, gateway);
        Self { model }
    }

    pub fn streams(&self) -> &[Stream] {
        &self.model.state().streams
    }

    pub fn tracks(&self) -> &[Track] {
        &self.model.state().tracks
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.model.connection_state()
    }

    pub fn add(&mut self, stream: &Stream) -> Ticket {
        let request = Request::new(Method::Post, "/streams").with_body(json!({ "stream": stream }));
        self.model.send(request, Some(StreamField::Streams))
    }

    pub fn remove(&mut self, stream: &Stream) -> Ticket {
        let request = Request::new(Method::Delete, "/streams").with_query("filename", stream.filename.as_str());
        self.model.send(request, Some(StreamField::Streams))
    }

    pub fn poll(&mut self) -> Vec<ModelEvent<StreamField>> {
        self.model.poll()
    }

    pub fn poll_at(&mut self, now: Instant) -> Vec<ModelEvent<StreamField>> {
        self.model.poll_at(now)
    }
}
