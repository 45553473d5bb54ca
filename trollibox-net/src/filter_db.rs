//! Named filter database.
//!
//! Filters are opaque JSON documents. A reload lists the names and then
//! fetches every filter; the local map is only replaced once the whole batch
//! is in, so readers never see a half-loaded database. A `filter:<name>`
//! push carries the filter itself and only touches that entry.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use log::{debug, info};
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::ApiError;
use crate::gateway::{Gateway, HttpGateway};
use crate::model::{EntityState, ModelEvent, NetModel, NetModelBuilder, Origin};
use crate::protocol::{EventKind, FilterBody, FilterListBody, Method, Request, ServerEvent, Ticket};
use crate::sync::Reloader;
use crate::transport::{ConnectionState, EventStream, PushChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterField {
    /// The name to filter map.
    Filters,
    /// Result of a store or remove.
    Edit,
}

#[derive(Debug)]
struct Batch {
    id: u64,
    remaining: usize,
    collected: BTreeMap<String, Value>,
}

#[derive(Debug, Default)]
pub struct FilterState {
    pub filters: BTreeMap<String, Value>,
    /// Last failed store or remove per filter name.
    pub errors: HashMap<String, ApiError>,
    batch: Option<Batch>,
    next_batch: u64,
}

impl EntityState for FilterState {
    type Field = FilterField;
}

pub struct FilterDb {
    model: NetModel<FilterState>,
}

impl FilterDb {
    pub fn connect(config: &Config) -> Result<Self, ApiError> {
        let events = EventStream::connect(config.server_url(), "/filters/events", config.reconnect_delay())?;
        let gateway = HttpGateway::new(config.server_url())?;
        Ok(Self::with_transport(config, Box::new(events), Box::new(gateway)))
    }

    pub fn with_transport(config: &Config, channel: Box<dyn PushChannel>, gateway: Box<dyn Gateway>) -> Self {
        let names = Reloader::new(EventKind::FilterUpdate, "/filters/", |model: &mut NetModel<FilterState>, value| {
            let body: FilterListBody = serde_json::from_value(value)?;
            start_batch(model, body.filters);
            Ok(())
        });

        let model = NetModelBuilder::new(FilterState::default())
            .settle_delay(config.settle_delay())
            .reloader(names)
            .on_push(EventKind::Filter, apply_pushed)
            .build(channel, gateway);
        Self { model }
    }

    pub fn filters(&self) -> &BTreeMap<String, Value> {
        &self.model.state().filters
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.model.state().filters.get(name)
    }

    /// Why the last store or remove of `name` failed, if it did.
    pub fn error(&self, name: &str) -> Option<&ApiError> {
        self.model.state().errors.get(name)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.model.connection_state()
    }

    /// Create or replace a filter. The server announces the change as a
    /// `filter:<name>` push.
    pub fn store(&mut self, name: &str, filter: Value) -> Ticket {
        let request = Request::new(Method::Put, filter_path(name)).with_body(json!({ "filter": filter }));
        self.edit(name, request)
    }

    pub fn remove(&mut self, name: &str) -> Ticket {
        self.edit(name, Request::new(Method::Delete, filter_path(name)))
    }

    fn edit(&mut self, name: &str, request: Request) -> Ticket {
        let name = name.to_string();
        self.model.fetch(request, move |model, result| match result {
            Ok(_) => {
                info!("Filter {:?} saved", name);
                if model.state_mut().errors.remove(&name).is_some() {
                    model.mark_changed(&[FilterField::Edit], Origin::Remote);
                }
            }
            Err(e) => {
                model.state_mut().errors.insert(name, e.clone());
                model.report(Some(FilterField::Edit), e);
            }
        })
    }

    pub fn poll(&mut self) -> Vec<ModelEvent<FilterField>> {
        self.model.poll()
    }

    pub fn poll_at(&mut self, now: Instant) -> Vec<ModelEvent<FilterField>> {
        self.model.poll_at(now)
    }
}

fn filter_path(name: &str) -> String {
    format!("/filters/{}/", name)
}

/// Fetch every listed filter. Supersedes a batch still in progress.
fn start_batch(model: &mut NetModel<FilterState>, names: Vec<String>) {
    let state = model.state_mut();
    state.next_batch += 1;
    let id = state.next_batch;

    if names.is_empty() {
        state.batch = None;
        state.filters.clear();
        model.mark_changed(&[FilterField::Filters], Origin::Remote);
        return;
    }

    state.batch = Some(Batch {
        id,
        remaining: names.len(),
        collected: BTreeMap::new(),
    });
    for name in names {
        let request = Request::get(filter_path(&name));
        model.fetch(request, move |model, result| collect(model, id, name, result));
    }
}

/// Apply a single filter announced as `filter:<name>`. A null filter means
/// it was deleted.
fn apply_pushed(model: &mut NetModel<FilterState>, event: &ServerEvent) -> Result<(), ApiError> {
    let Some(name) = event.name.strip_prefix("filter:") else {
        return Ok(());
    };
    let body: FilterBody = serde_json::from_value(event.payload.clone())?;
    let state = model.state_mut();
    if let Some(batch) = state.batch.as_mut() {
        // A batch may already have fetched the older version.
        match &body.filter {
            Value::Null => batch.collected.remove(name),
            filter => batch.collected.insert(name.to_string(), filter.clone()),
        };
    }
    let changed = match body.filter {
        Value::Null => state.filters.remove(name).is_some(),
        filter => state.filters.insert(name.to_string(), filter.clone()).as_ref() != Some(&filter),
    };
    if changed {
        model.mark_changed(&[FilterField::Filters], Origin::Remote);
    }
    Ok(())
}

fn collect(model: &mut NetModel<FilterState>, id: u64, name: String, result: Result<Value, ApiError>) {
    let state = model.state_mut();
    let Some(batch) = state.batch.as_mut().filter(|b| b.id == id) else {
        debug!("Dropping filter {:?} from superseded reload", name);
        return;
    };
    batch.remaining = batch.remaining.saturating_sub(1);

    match result.and_then(|value| Ok(serde_json::from_value::<FilterBody>(value)?)) {
        Ok(body) => {
            batch.collected.insert(name, body.filter);
        }
        // Deleted between listing and fetching.
        Err(e) if e.is_not_found() => {}
        Err(e) => {
            state.batch = None;
            model.report(Some(FilterField::Filters), e);
            return;
        }
    }

    if batch.remaining == 0 {
        if let Some(done) = state.batch.take() {
            state.filters = done.collected;
        }
        model.mark_changed(&[FilterField::Filters], Origin::Remote);
    }
}
