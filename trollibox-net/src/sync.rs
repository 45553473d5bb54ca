//! Sync fields: the two halves that keep one slice of model state in step
//! with the server.
//!
//! A [`Reloader`] pulls: it is bound to push-event kinds and refetches a
//! resource whenever one of them fires. An [`Updater`] pushes: it sends local
//! edits of one field, with at most one request in flight and the newest
//! unsent value parked until the previous request has settled.

use std::rc::Rc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ApiError;
use crate::model::{EntityState, NetModel, Origin};
use crate::protocol::{EventKind, Method, Request};

/// Writes a reloaded resource into the model.
pub type ApplyFn<S> = Rc<dyn Fn(&mut NetModel<S>, Value) -> Result<(), ApiError>>;

/// Builds the request body for an updater from the current state.
pub type BuildFn<S> = Box<dyn Fn(&S) -> Value>;

pub struct Reloader<S: EntityState> {
    kinds: Vec<EventKind>,
    path: String,
    apply: ApplyFn<S>,
    generation: u64,
}

impl<S: EntityState> Reloader<S> {
    /// Reloader whose `apply` gets the raw response and full model access.
    pub fn new(
        kind: EventKind,
        path: impl Into<String>,
        apply: impl Fn(&mut NetModel<S>, Value) -> Result<(), ApiError> + 'static,
    ) -> Self {
        Self {
            kinds: vec![kind],
            path: path.into(),
            apply: Rc::new(apply),
            generation: 0,
        }
    }

    /// Reloader that decodes the response as `T`, hands it to `apply` and
    /// reports the fields `apply` says it changed as remote changes.
    pub fn json<T, F>(kind: EventKind, path: impl Into<String>, apply: F) -> Self
    where
        T: DeserializeOwned,
        F: Fn(&mut S, T) -> Vec<S::Field> + 'static,
    {
        Self::new(kind, path, move |model, value| {
            let body: T = serde_json::from_value(value)?;
            let changed = apply(model.state_mut(), body);
            model.mark_changed(&changed, Origin::Remote);
            Ok(())
        })
    }

    /// Also trigger on `kind`.
    pub fn also_on(mut self, kind: EventKind) -> Self {
        if !self.kinds.contains(&kind) {
            self.kinds.push(kind);
        }
        self
    }

    pub fn kinds(&self) -> &[EventKind] {
        &self.kinds
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Start a new reload; responses to older generations become stale.
    pub(crate) fn issue(&mut self) -> (Request, u64) {
        self.generation += 1;
        (Request::get(self.path.clone()), self.generation)
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    pub(crate) fn apply_fn(&self) -> ApplyFn<S> {
        Rc::clone(&self.apply)
    }
}

pub struct Updater<S: EntityState> {
    field: S::Field,
    method: Method,
    path: String,
    build: BuildFn<S>,
    in_flight: bool,
    settle_until: Option<Instant>,
    /// Body for the newest value not sent yet.
    pending: Option<Value>,
}

impl<S: EntityState> Updater<S> {
    pub fn new(
        field: S::Field,
        method: Method,
        path: impl Into<String>,
        build: impl Fn(&S) -> Value + 'static,
    ) -> Self {
        Self {
            field,
            method,
            path: path.into(),
            build: Box::new(build),
            in_flight: false,
            settle_until: None,
            pending: None,
        }
    }

    /// `POST` updater, the common case.
    pub fn post(field: S::Field, path: impl Into<String>, build: impl Fn(&S) -> Value + 'static) -> Self {
        Self::new(field, Method::Post, path, build)
    }

    pub fn field(&self) -> S::Field {
        self.field
    }

    /// True from submission until the settle delay after completion ran out.
    pub fn is_busy(&self) -> bool {
        self.in_flight || self.settle_until.is_some()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// The field changed locally. Returns the request to send now, or parks
    /// the value when a request is already under way.
    pub(crate) fn on_local_change(&mut self, state: &S) -> Option<Request> {
        let body = (self.build)(state);
        if self.is_busy() {
            self.pending = Some(body);
            return None;
        }
        Some(self.start(body))
    }

    /// The in-flight request finished, successfully or not.
    pub(crate) fn complete(&mut self, now: Instant, settle: Duration) {
        self.in_flight = false;
        self.settle_until = Some(now + settle);
    }

    /// Ends the settle window once due and releases the parked value, if any.
    pub(crate) fn poll_at(&mut self, now: Instant) -> Option<Request> {
        match self.settle_until {
            Some(until) if now >= until => {
                self.settle_until = None;
                self.pending.take().map(|body| self.start(body))
            }
            _ => None,
        }
    }

    fn start(&mut self, body: Value) -> Request {
        self.in_flight = true;
        Request::new(self.method, self.path.clone()).with_body(body)
    }
}
