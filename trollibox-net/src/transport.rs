//! Push channel to the player service.
//!
//! Holds one Server-Sent-Events connection open on a background thread and
//! reports connection state changes and server events through a channel that
//! the owning model drains with `poll`. Any error or close tears the
//! connection down and schedules exactly one reconnect attempt after a fixed
//! delay, forever. Missed events are never replayed: the owner is expected
//! to resynchronize everything when it sees `Connected` again.

use std::io::{self, BufReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use reqwest::blocking::{Client, Response};
use reqwest::header::ACCEPT;

use crate::error::ApiError;
use crate::gateway::api_root;
use crate::protocol::ServerEvent;
use crate::sse::{read_event, SseDecoder};

/// Connection state of a push channel. Never terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Something that happened on a push channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    State(ConnectionState),
    Event(ServerEvent),
}

/// Source of push notifications for one model.
pub trait PushChannel {
    /// Drain everything that happened since the last call, in order.
    fn poll(&mut self) -> Vec<TransportEvent>;
}

/// Granularity at which a sleeping reconnect loop notices shutdown.
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// A self-reconnecting `text/event-stream` connection.
pub struct EventStream {
    url: String,
    update_rx: Receiver<TransportEvent>,
    shutdown: Arc<AtomicBool>,
}

impl EventStream {
    /// Start connecting to `path` under the service's data API.
    pub fn connect(server_url: &str, path: &str, reconnect_delay: Duration) -> Result<Self, ApiError> {
        // A stream stays open indefinitely; no overall request timeout.
        let client = Client::builder().timeout(None).build()?;
        let url = format!("{}{}", api_root(server_url), path);
        let shutdown = Arc::new(AtomicBool::new(false));
        let (update_tx, update_rx) = mpsc::channel();

        let thread_url = url.clone();
        let thread_shutdown = Arc::clone(&shutdown);
        thread::spawn(move || {
            stream_thread(client, thread_url, reconnect_delay, update_tx, thread_shutdown);
        });

        Ok(Self {
            url,
            update_rx,
            shutdown,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl PushChannel for EventStream {
    fn poll(&mut self) -> Vec<TransportEvent> {
        self.update_rx.try_iter().collect()
    }
}

/// Stops reconnecting. A stream that is currently connected is only released
/// once the server sends its next event or closes the connection, since the
/// reader blocks without a timeout; an idle stream can hold its socket until
/// then. No further events are delivered either way.
impl Drop for EventStream {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

/// Background thread: connect, forward events, reconnect after `delay`.
fn stream_thread(
    client: Client,
    url: String,
    delay: Duration,
    update_tx: Sender<TransportEvent>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::SeqCst) {
        if update_tx.send(TransportEvent::State(ConnectionState::Connecting)).is_err() {
            break;
        }

        match open(&client, &url) {
            Ok(response) => {
                info!("Event stream connected: {}", url);
                if update_tx.send(TransportEvent::State(ConnectionState::Connected)).is_err() {
                    break;
                }
                if !forward_events(response, &update_tx, &shutdown) {
                    break;
                }
            }
            Err(e) => {
                warn!("Could not open event stream {}: {}", url, e);
            }
        }

        if update_tx.send(TransportEvent::State(ConnectionState::Disconnected)).is_err() {
            break;
        }
        sleep_unless_shutdown(delay, &shutdown);
    }

    info!("Event stream thread exiting: {}", url);
}

fn open(client: &Client, url: &str) -> Result<Response, ApiError> {
    let response = client.get(url).header(ACCEPT, "text/event-stream").send()?;
    let status = response.status();
    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            text: status.canonical_reason().unwrap_or("event stream refused").to_string(),
        });
    }
    Ok(response)
}

/// Pump events until the stream ends. Returns false when the owner is gone
/// and the thread should stop altogether.
fn forward_events(response: Response, update_tx: &Sender<TransportEvent>, shutdown: &AtomicBool) -> bool {
    let mut reader = BufReader::new(response);
    let mut decoder = SseDecoder::new();
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        match read_event(&mut reader, &mut decoder) {
            Ok(Some(event)) => {
                if update_tx.send(TransportEvent::Event(event)).is_err() {
                    return false;
                }
            }
            Ok(None) => {
                info!("Event stream closed by server");
                return true;
            }
            Err(e) => {
                if e.kind() != io::ErrorKind::UnexpectedEof {
                    error!("Event stream read error: {}", e);
                }
                return true;
            }
        }
    }
}

fn sleep_unless_shutdown(delay: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + delay;
    loop {
        let now = Instant::now();
        if now >= deadline || shutdown.load(Ordering::SeqCst) {
            return;
        }
        thread::sleep((deadline - now).min(SHUTDOWN_POLL));
    }
}
