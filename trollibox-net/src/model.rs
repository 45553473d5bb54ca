//! Generic network-backed entity model.
//!
//! A `NetModel` owns one entity's local state and is its only writer. It is
//! assembled from reloaders and updaters, listens to one push channel and
//! drives requests through a gateway. Nothing blocks: the owner calls
//! `poll_at` regularly and gets back what changed.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::hash::Hash;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde_json::Value;

use crate::error::ApiError;
use crate::gateway::{Completion, Gateway};
use crate::protocol::{EventKind, Request, ServerEvent, Ticket};
use crate::sync::{Reloader, Updater};
use crate::transport::{ConnectionState, PushChannel, TransportEvent};

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(200);

/// Local state of one entity.
pub trait EntityState: Default + 'static {
    /// Names the independently synced slices of the state.
    type Field: Copy + Eq + Hash + fmt::Debug + 'static;
}

/// Who caused a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A view wrote the value; updaters push these to the server.
    Local,
    /// Reloads, rollbacks and other internal writes. Never pushed back.
    Remote,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent<F> {
    Connection(ConnectionState),
    Changed { field: F, origin: Origin },
    Error(ApiError),
    /// Same failure as the accompanying `Error`, attributed to one field.
    FieldError { field: F, error: ApiError },
}

/// Completion callback for ad-hoc requests.
pub type FetchFn<S> = Box<dyn FnOnce(&mut NetModel<S>, Result<Value, ApiError>)>;

/// Applies a push event's payload in place of a reload.
pub type PushFn<S> = Rc<dyn Fn(&mut NetModel<S>, &ServerEvent) -> Result<(), ApiError>>;

enum Pending<S: EntityState> {
    Reload { reloader: usize, generation: u64 },
    Update { field: S::Field },
    Optimistic { field: S::Field, restore: Box<dyn FnOnce(&mut S)> },
    Fetch { on_done: FetchFn<S> },
    Command { field: Option<S::Field> },
}

pub struct NetModelBuilder<S: EntityState> {
    state: S,
    reloaders: Vec<Reloader<S>>,
    updaters: Vec<Updater<S>>,
    push_handlers: HashMap<EventKind, PushFn<S>>,
    settle_delay: Duration,
}

impl<S: EntityState> NetModelBuilder<S> {
    pub fn new(state: S) -> Self {
        Self {
            state,
            reloaders: Vec::new(),
            updaters: Vec::new(),
            push_handlers: HashMap::new(),
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    pub fn reloader(mut self, reloader: Reloader<S>) -> Self {
        self.reloaders.push(reloader);
        self
    }

    pub fn updater(mut self, updater: Updater<S>) -> Self {
        self.updaters.push(updater);
        self
    }

    /// Handle `kind` events from their payload. Takes precedence over any
    /// reloader bound to the same kind.
    pub fn on_push<F>(mut self, kind: EventKind, handler: F) -> Self
    where
        F: Fn(&mut NetModel<S>, &ServerEvent) -> Result<(), ApiError> + 'static,
    {
        self.push_handlers.insert(kind, Rc::new(handler));
        self
    }

    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Assemble the model and issue the initial reload of every field.
    pub fn build(self, channel: Box<dyn PushChannel>, gateway: Box<dyn Gateway>) -> NetModel<S> {
        let mut dispatch: HashMap<EventKind, Vec<usize>> = HashMap::new();
        for (index, reloader) in self.reloaders.iter().enumerate() {
            for kind in reloader.kinds() {
                dispatch.entry(*kind).or_default().push(index);
            }
        }
        let updaters = self.updaters.into_iter().map(|u| (u.field(), u)).collect();

        let mut model = NetModel {
            state: self.state,
            connection: ConnectionState::Disconnected,
            channel,
            gateway,
            reloaders: self.reloaders,
            dispatch,
            push_handlers: self.push_handlers,
            updaters,
            requests: HashMap::new(),
            next_ticket: 0,
            settle_delay: self.settle_delay,
            events: Vec::new(),
        };
        model.reload_all();
        model
    }
}

pub struct NetModel<S: EntityState> {
    state: S,
    connection: ConnectionState,
    channel: Box<dyn PushChannel>,
    gateway: Box<dyn Gateway>,
    reloaders: Vec<Reloader<S>>,
    dispatch: HashMap<EventKind, Vec<usize>>,
    push_handlers: HashMap<EventKind, PushFn<S>>,
    updaters: HashMap<S::Field, Updater<S>>,
    requests: HashMap<Ticket, Pending<S>>,
    next_ticket: u64,
    settle_delay: Duration,
    events: Vec<ModelEvent<S::Field>>,
}

impl<S: EntityState> NetModel<S> {
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Direct access for reload and fetch callbacks. Changes made through it
    /// must be announced with `mark_changed`.
    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    /// Number of submitted requests whose completion has not been handled.
    pub fn outstanding(&self) -> usize {
        self.requests.len()
    }

    /// True while `field`'s updater has a request in flight or settling.
    pub fn is_updating(&self, field: S::Field) -> bool {
        self.updaters.get(&field).is_some_and(Updater::is_busy)
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// A view changed `field`. Pushed to the server if an updater is bound.
    pub fn set_local(&mut self, field: S::Field, mutate: impl FnOnce(&mut S)) {
        mutate(&mut self.state);
        self.events.push(ModelEvent::Changed {
            field,
            origin: Origin::Local,
        });
        let request = match self.updaters.get_mut(&field) {
            Some(updater) => updater.on_local_change(&self.state),
            None => None,
        };
        if let Some(request) = request {
            self.submit(request, Pending::Update { field });
        }
    }

    /// Internal write; announced but never pushed to the server.
    pub fn set_remote(&mut self, field: S::Field, mutate: impl FnOnce(&mut S)) {
        mutate(&mut self.state);
        self.mark_changed(&[field], Origin::Remote);
    }

    pub fn mark_changed(&mut self, fields: &[S::Field], origin: Origin) {
        for &field in fields {
            self.events.push(ModelEvent::Changed { field, origin });
        }
    }

    /// Apply `mutate` to the slice of state selected by `lens` right away and
    /// send `request`. If the request fails the slice is restored to what it
    /// was before and an error is raised.
    pub fn optimistic<T>(
        &mut self,
        field: S::Field,
        lens: fn(&mut S) -> &mut T,
        mutate: impl FnOnce(&mut T),
        request: Request,
    ) -> Ticket
    where
        T: Clone + 'static,
    {
        let snapshot = lens(&mut self.state).clone();
        mutate(lens(&mut self.state));
        self.events.push(ModelEvent::Changed {
            field,
            origin: Origin::Local,
        });
        let restore = Box::new(move |state: &mut S| *lens(state) = snapshot);
        self.submit(request, Pending::Optimistic { field, restore })
    }

    /// Send `request` and hand its outcome to `on_done`.
    pub fn fetch(
        &mut self,
        request: Request,
        on_done: impl FnOnce(&mut NetModel<S>, Result<Value, ApiError>) + 'static,
    ) -> Ticket {
        self.submit(
            request,
            Pending::Fetch {
                on_done: Box::new(on_done),
            },
        )
    }

    /// Fire-and-forget command. A failure is reported, scoped to `field` if
    /// given.
    pub fn send(&mut self, request: Request, field: Option<S::Field>) -> Ticket {
        self.submit(request, Pending::Command { field })
    }

    /// Raise `error` as a model event. Cancellations are dropped.
    pub fn report(&mut self, field: Option<S::Field>, error: ApiError) {
        if error.is_cancelled() {
            debug!("Request cancelled");
            return;
        }
        warn!("Request failed: {}", error);
        if let Some(field) = field {
            self.events.push(ModelEvent::FieldError {
                field,
                error: error.clone(),
            });
        }
        self.events.push(ModelEvent::Error(error));
    }

    // =========================================================================
    // Reloading
    // =========================================================================

    /// Refetch everything bound to `kind`.
    pub fn reload(&mut self, kind: EventKind) {
        let indices = self.dispatch.get(&kind).cloned().unwrap_or_default();
        for index in indices {
            self.reload_one(index);
        }
    }

    /// Refetch every bound resource.
    pub fn reload_all(&mut self) {
        for index in 0..self.reloaders.len() {
            self.reload_one(index);
        }
    }

    fn reload_one(&mut self, index: usize) {
        let Some(reloader) = self.reloaders.get_mut(index) else {
            return;
        };
        let (request, generation) = reloader.issue();
        self.submit(
            request,
            Pending::Reload {
                reloader: index,
                generation,
            },
        );
    }

    // =========================================================================
    // Event loop
    // =========================================================================

    pub fn poll(&mut self) -> Vec<ModelEvent<S::Field>> {
        self.poll_at(Instant::now())
    }

    /// Process push events, completed requests and due updater flushes, and
    /// drain the resulting model events.
    pub fn poll_at(&mut self, now: Instant) -> Vec<ModelEvent<S::Field>> {
        for event in self.channel.poll() {
            match event {
                TransportEvent::State(state) => self.on_connection(state),
                TransportEvent::Event(event) => self.on_server_event(event),
            }
        }

        for completion in self.gateway.completions() {
            self.on_completion(completion, now);
        }

        let due: Vec<_> = self
            .updaters
            .iter_mut()
            .filter_map(|(field, updater)| updater.poll_at(now).map(|request| (*field, request)))
            .collect();
        for (field, request) in due {
            self.submit(request, Pending::Update { field });
        }

        self.take_events()
    }

    /// Drain queued events without polling.
    pub fn take_events(&mut self) -> Vec<ModelEvent<S::Field>> {
        std::mem::take(&mut self.events)
    }

    fn on_connection(&mut self, state: ConnectionState) {
        if state == self.connection {
            return;
        }
        info!("Connection {:?} -> {:?}", self.connection, state);
        self.connection = state;
        self.events.push(ModelEvent::Connection(state));
        if state == ConnectionState::Connected {
            // Pushes missed while disconnected are not replayed.
            self.reload_all();
        }
    }

    fn on_server_event(&mut self, event: ServerEvent) {
        if let Some(handler) = self.push_handlers.get(&event.kind).cloned() {
            if let Err(e) = handler(self, &event) {
                self.report(None, e);
            }
        } else if self.dispatch.contains_key(&event.kind) {
            self.reload(event.kind);
        } else {
            debug!("Ignoring server event {:?}", event.name);
        }
    }

    fn on_completion(&mut self, completion: Completion, now: Instant) {
        let Completion { ticket, result } = completion;
        let Some(pending) = self.requests.remove(&ticket) else {
            warn!("Completion for unknown request {:?}", ticket);
            return;
        };

        match pending {
            Pending::Reload { reloader, generation } => {
                let apply = self
                    .reloaders
                    .get(reloader)
                    .filter(|r| r.is_current(generation))
                    .map(Reloader::apply_fn);
                let Some(apply) = apply else {
                    debug!("Dropping stale reload response {:?}", ticket);
                    return;
                };
                if let Err(e) = result.and_then(|value| apply(self, value)) {
                    self.report(None, e);
                }
            }
            Pending::Update { field } => {
                if let Some(updater) = self.updaters.get_mut(&field) {
                    updater.complete(now, self.settle_delay);
                }
                if let Err(e) = result {
                    self.report(Some(field), e);
                }
            }
            Pending::Optimistic { field, restore } => {
                if let Err(e) = result {
                    restore(&mut self.state);
                    self.events.push(ModelEvent::Changed {
                        field,
                        origin: Origin::Remote,
                    });
                    self.report(None, e);
                }
            }
            Pending::Fetch { on_done } => on_done(self, result),
            Pending::Command { field } => {
                if let Err(e) = result {
                    self.report(field, e);
                }
            }
        }
    }

    fn submit(&mut self, request: Request, pending: Pending<S>) -> Ticket {
        self.next_ticket += 1;
        let ticket = Ticket(self.next_ticket);
        self.requests.insert(ticket, pending);
        self.gateway.submit(ticket, request);
        ticket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Counter {
        count: i64,
        items: Vec<u32>,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum CounterField {
        Count,
        Items,
    }

    impl EntityState for Counter {
        type Field = CounterField;
    }

    #[derive(Default)]
    struct Wire {
        sent: Vec<(Ticket, Request)>,
        done: Vec<Completion>,
        pushed: Vec<TransportEvent>,
    }

    struct TestGateway(Rc<RefCell<Wire>>);
    struct TestChannel(Rc<RefCell<Wire>>);

    impl Gateway for TestGateway {
        fn submit(&mut self, ticket: Ticket, request: Request) {
            self.0.borrow_mut().sent.push((ticket, request));
        }
        fn completions(&mut self) -> Vec<Completion> {
            std::mem::take(&mut self.0.borrow_mut().done)
        }
    }

    impl PushChannel for TestChannel {
        fn poll(&mut self) -> Vec<TransportEvent> {
            std::mem::take(&mut self.0.borrow_mut().pushed)
        }
    }

    fn counter_model() -> (NetModel<Counter>, Rc<RefCell<Wire>>) {
        let wire = Rc::new(RefCell::new(Wire::default()));
        let model = NetModelBuilder::new(Counter::default())
            .reloader(Reloader::json(EventKind::Volume, "/count", |s: &mut Counter, v: i64| {
                s.count = v;
                vec![CounterField::Count]
            }))
            .updater(Updater::post(CounterField::Count, "/count", |s: &Counter| json!(s.count)))
            .build(Box::new(TestChannel(wire.clone())), Box::new(TestGateway(wire.clone())));
        (model, wire)
    }

    fn complete(wire: &Rc<RefCell<Wire>>, ticket: Ticket, result: Result<Value, ApiError>) {
        wire.borrow_mut().done.push(Completion { ticket, result });
    }

    #[test]
    fn build_reloads_every_field() {
        let (model, wire) = counter_model();
        assert_eq!(wire.borrow().sent.len(), 1);
        assert_eq!(wire.borrow().sent[0].1.path, "/count");
        assert_eq!(model.outstanding(), 1);
    }

    #[test]
    fn reload_response_is_applied_as_remote_change() {
        let (mut model, wire) = counter_model();
        let ticket = wire.borrow().sent[0].0;
        complete(&wire, ticket, Ok(json!(7)));
        let events = model.poll_at(Instant::now());
        assert_eq!(model.state().count, 7);
        assert_eq!(
            events,
            vec![ModelEvent::Changed {
                field: CounterField::Count,
                origin: Origin::Remote
            }]
        );
        // Remote changes are never echoed back.
        assert_eq!(wire.borrow().sent.len(), 1);
    }

    #[test]
    fn stale_reload_is_dropped() {
        let (mut model, wire) = counter_model();
        model.reload(EventKind::Volume);
        let (old, new) = {
            let w = wire.borrow();
            (w.sent[0].0, w.sent[1].0)
        };
        complete(&wire, new, Ok(json!(2)));
        complete(&wire, old, Ok(json!(1)));
        model.poll_at(Instant::now());
        assert_eq!(model.state().count, 2);
    }

    #[test]
    fn push_handler_replaces_reload() {
        let wire = Rc::new(RefCell::new(Wire::default()));
        let mut model = NetModelBuilder::new(Counter::default())
            .reloader(Reloader::json(EventKind::Volume, "/count", |s: &mut Counter, v: i64| {
                s.count = v;
                vec![CounterField::Count]
            }))
            .on_push(EventKind::Volume, |model: &mut NetModel<Counter>, event| {
                let count = event.payload.as_i64().ok_or_else(|| ApiError::Parse {
                    input: event.payload.to_string(),
                    reason: "not a count".into(),
                })?;
                model.set_remote(CounterField::Count, |s| s.count = count);
                Ok(())
            })
            .build(Box::new(TestChannel(wire.clone())), Box::new(TestGateway(wire.clone())));
        assert_eq!(wire.borrow().sent.len(), 1);

        wire.borrow_mut()
            .pushed
            .push(TransportEvent::Event(ServerEvent::new("volume", "5")));
        model.poll_at(Instant::now());
        assert_eq!(model.state().count, 5);
        assert_eq!(wire.borrow().sent.len(), 1);
    }

    #[test]
    fn optimistic_failure_restores_snapshot() {
        let (mut model, wire) = counter_model();
        model.set_remote(CounterField::Items, |s| s.items = vec![1, 2, 3]);
        model.take_events();

        fn items(s: &mut Counter) -> &mut Vec<u32> {
            &mut s.items
        }
        let ticket = model.optimistic(
            CounterField::Items,
            items,
            |items| {
                items.remove(1);
            },
            Request::get("/items"),
        );
        assert_eq!(model.state().items, vec![1, 3]);

        complete(&wire, ticket, Err(ApiError::Transport("reset".into())));
        let events = model.poll_at(Instant::now());
        assert_eq!(model.state().items, vec![1, 2, 3]);
        assert!(matches!(events.last(), Some(ModelEvent::Error(_))));
    }

    #[test]
    fn cancelled_fetch_raises_nothing() {
        let (mut model, wire) = counter_model();
        let ticket = model.send(Request::get("/slow"), Some(CounterField::Count));
        complete(&wire, ticket, Err(ApiError::Cancelled));
        assert!(model.poll_at(Instant::now()).is_empty());
    }

    #[test]
    fn failed_command_raises_field_and_generic_error() {
        let (mut model, wire) = counter_model();
        let ticket = model.send(Request::get("/x"), Some(CounterField::Count));
        let err = ApiError::Status {
            status: 500,
            text: "Internal Server Error".into(),
        };
        complete(&wire, ticket, Err(err.clone()));
        let events = model.poll_at(Instant::now());
        assert_eq!(
            events,
            vec![
                ModelEvent::FieldError {
                    field: CounterField::Count,
                    error: err.clone()
                },
                ModelEvent::Error(err),
            ]
        );
    }

    #[test]
    fn unbound_events_are_ignored() {
        let (mut model, wire) = counter_model();
        wire.borrow_mut()
            .pushed
            .push(TransportEvent::Event(ServerEvent::new("playlist", "")));
        model.poll_at(Instant::now());
        assert_eq!(wire.borrow().sent.len(), 1);
    }
}
