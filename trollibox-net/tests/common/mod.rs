#![allow(dead_code)]
//! Test harness utilities for trollibox-net integration tests.

use std::cell::RefCell;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::rc::Rc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use trollibox_net::{
    ApiError, Completion, Config, ConnectionState, Gateway, Method, Player, PushChannel, Request, ServerEvent, Ticket,
    TransportEvent,
};

#[derive(Default)]
pub struct Wire {
    pub sent: Vec<(Ticket, Request)>,
    pub done: Vec<Completion>,
    pub pushed: Vec<TransportEvent>,
}

/// In-memory push channel and gateway sharing one wire, so a test can play
/// the server: inspect what was sent, answer it, and push events.
#[derive(Clone, Default)]
pub struct MockNet(Rc<RefCell<Wire>>);

struct MockChannel(Rc<RefCell<Wire>>);
struct MockGateway(Rc<RefCell<Wire>>);

impl PushChannel for MockChannel {
    fn poll(&mut self) -> Vec<TransportEvent> {
        std::mem::take(&mut self.0.borrow_mut().pushed)
    }
}

impl Gateway for MockGateway {
    fn submit(&mut self, ticket: Ticket, request: Request) {
        self.0.borrow_mut().sent.push((ticket, request));
    }

    fn completions(&mut self) -> Vec<Completion> {
        std::mem::take(&mut self.0.borrow_mut().done)
    }
}

impl MockNet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel(&self) -> Box<dyn PushChannel> {
        Box::new(MockChannel(self.0.clone()))
    }

    pub fn gateway(&self) -> Box<dyn Gateway> {
        Box::new(MockGateway(self.0.clone()))
    }

    pub fn connect(&self) {
        let mut wire = self.0.borrow_mut();
        wire.pushed.push(TransportEvent::State(ConnectionState::Connecting));
        wire.pushed.push(TransportEvent::State(ConnectionState::Connected));
    }

    pub fn disconnect(&self) {
        self.0
            .borrow_mut()
            .pushed
            .push(TransportEvent::State(ConnectionState::Disconnected));
    }

    /// Push a server event named `name` with raw `data`.
    pub fn event(&self, name: &str, data: &str) {
        self.0
            .borrow_mut()
            .pushed
            .push(TransportEvent::Event(ServerEvent::new(name, data)));
    }

    /// Every request sent so far, oldest first.
    pub fn sent(&self) -> Vec<(Ticket, Request)> {
        self.0.borrow().sent.clone()
    }

    /// Forget the requests sent so far.
    pub fn clear_sent(&self) {
        self.0.borrow_mut().sent.clear();
    }

    /// Requests matching `method` and `path`, oldest first.
    pub fn requests(&self, method: Method, path: &str) -> Vec<(Ticket, Request)> {
        self.sent()
            .into_iter()
            .filter(|(_, r)| r.method == method && r.path == path)
            .collect()
    }

    /// The newest request matching `method` and `path`.
    pub fn last(&self, method: Method, path: &str) -> (Ticket, Request) {
        self.requests(method, path)
            .pop()
            .unwrap_or_else(|| panic!("no {} {} was sent", method, path))
    }

    pub fn respond(&self, ticket: Ticket, result: Result<Value, ApiError>) {
        self.0.borrow_mut().done.push(Completion { ticket, result });
    }

    pub fn ok(&self, ticket: Ticket, body: Value) {
        self.respond(ticket, Ok(body));
    }

    pub fn fail(&self, ticket: Ticket, status: u16, message: &str) {
        self.respond(
            ticket,
            Err(ApiError::Server {
                status,
                message: message.to_string(),
                index: None,
            }),
        );
    }
}

pub fn track(uri: &str, title: &str, duration: u32) -> Value {
    json!({
        "uri": uri,
        "artist": "Artist",
        "title": title,
        "album": "Album",
        "duration": duration,
    })
}

pub fn player(net: &MockNet) -> Player {
    Player::with_transport(&Config::default(), net.channel(), net.gateway())
}

/// A player whose initial reloads were all answered: paused, half volume and
/// a three track playlist `a, b, c` with `a` current.
pub fn loaded_player(net: &MockNet) -> Player {
    let mut player = player(net);
    answer_initial_reloads(net);
    player.poll_at(Instant::now());
    net.clear_sent();
    player
}

pub fn answer_initial_reloads(net: &MockNet) {
    let p = |s: &str| format!("/player/default/{}", s);
    net.ok(net.last(Method::Get, &p("playstate")).0, json!({ "playstate": "paused" }));
    net.ok(net.last(Method::Get, &p("volume")).0, json!({ "volume": 0.5 }));
    net.ok(net.last(Method::Get, &p("time")).0, json!({ "time": 0 }));
    net.ok(
        net.last(Method::Get, &p("playlist")).0,
        json!({
            "time": 0,
            "current": 0,
            "tracks": [track("a", "A", 180), track("b", "B", 200), track("c", "C", 220)],
        }),
    );
    net.ok(net.last(Method::Get, &p("tracks")).0, json!({ "tracks": [] }));
}

pub fn playlist_uris(player: &Player) -> Vec<String> {
    player.state().playlist.iter().map(|e| e.track.uri.clone()).collect()
}

// =============================================================================
// Loopback HTTP
// =============================================================================

/// A request as seen by a [`LoopbackServer`].
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl SeenRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Minimal HTTP/1.1 server: answers each accepted connection with the next
/// canned response, verbatim, then closes it. `start_with` builds the
/// response from the request instead.
pub struct LoopbackServer {
    pub url: String,
    handle: JoinHandle<Vec<SeenRequest>>,
}

impl LoopbackServer {
    pub fn start(responses: Vec<String>) -> Self {
        let count = responses.len();
        let mut responses = responses.into_iter();
        Self::start_with(count, move |_| responses.next().unwrap_or_default())
    }

    /// Serve `count` connections, answering each with `respond(request)`.
    pub fn start_with<F>(count: usize, mut respond: F) -> Self
    where
        F: FnMut(&SeenRequest) -> String + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            for _ in 0..count {
                let Ok((stream, _)) = listener.accept() else {
                    break;
                };
                if let Some(request) = serve(stream, &mut respond) {
                    seen.push(request);
                }
            }
            seen
        });
        Self { url, handle }
    }

    /// Wait for every canned response to have been served.
    pub fn finish(self) -> Vec<SeenRequest> {
        self.handle.join().unwrap()
    }
}

fn serve(stream: TcpStream, respond: &mut dyn FnMut(&SeenRequest) -> String) -> Option<SeenRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(5))).ok()?;
    let mut reader = BufReader::new(stream.try_clone().ok()?);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).ok()?;
    let mut content_length = 0;
    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).ok()?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }
    let mut body = vec![0; content_length];
    reader.read_exact(&mut body).ok()?;

    let request = SeenRequest {
        request_line: request_line.trim_end().to_string(),
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    };
    let response = respond(&request);
    let mut writer = stream;
    writer.write_all(response.as_bytes()).ok()?;
    writer.flush().ok()?;
    Some(request)
}

/// A complete JSON response with the given status line.
pub fn json_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    )
}

/// An event stream response that ends after `events`.
pub fn sse_response(events: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n{}",
        events
    )
}

/// Poll `f` until it returns true, or panic after `timeout`.
pub fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) {
    let start = Instant::now();
    while Instant::now().duration_since(start) < timeout {
        if f() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("Timed out after {:?}", timeout);
}
