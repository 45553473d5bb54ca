//! Request gateway for the player service's data API.
//!
//! `HttpGateway::call` performs one blocking request and normalizes the
//! outcome into a JSON value or an [`ApiError`]. Models never block on it:
//! they `submit` requests, which run on worker threads, and collect the
//! finished ones with `completions`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use log::debug;
use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde_json::Value;

use crate::error::ApiError;
use crate::protocol::{ErrorBody, Method, Request, Ticket};

/// The server only answers failures with a structured JSON body when this
/// header is present.
const REQUESTED_WITH: &str = "X-Requested-With";

/// Shared flag that aborts a request that has not completed yet.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a submitted request.
#[derive(Debug, Clone)]
pub struct Completion {
    pub ticket: Ticket,
    pub result: Result<Value, ApiError>,
}

/// Asynchronous request execution as seen by a model.
pub trait Gateway {
    /// Start `request`; its outcome is later reported under `ticket`.
    fn submit(&mut self, ticket: Ticket, request: Request);

    /// Drain every request that finished since the last call.
    fn completions(&mut self) -> Vec<Completion>;
}

/// Gateway backed by HTTP, one worker thread per in-flight request.
pub struct HttpGateway {
    client: Client,
    api_root: String,
    done_tx: Sender<Completion>,
    done_rx: Receiver<Completion>,
}

impl HttpGateway {
    /// `server_url` is the service root, e.g. `http://jukebox:3000`; the data
    /// API lives under `/data`.
    pub fn new(server_url: &str) -> Result<Self, ApiError> {
        let client = Client::builder().build()?;
        let (done_tx, done_rx) = mpsc::channel();
        Ok(Self {
            client,
            api_root: api_root(server_url),
            done_tx,
            done_rx,
        })
    }

    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    /// Perform `request` on the calling thread.
    pub fn call(&self, request: &Request) -> Result<Value, ApiError> {
        call(&self.client, &self.api_root, request)
    }
}

impl Gateway for HttpGateway {
    fn submit(&mut self, ticket: Ticket, request: Request) {
        let client = self.client.clone();
        let root = self.api_root.clone();
        let done_tx = self.done_tx.clone();
        thread::spawn(move || {
            let result = call(&client, &root, &request);
            // The model may already be gone.
            let _ = done_tx.send(Completion { ticket, result });
        });
    }

    fn completions(&mut self) -> Vec<Completion> {
        self.done_rx.try_iter().collect()
    }
}

pub(crate) fn api_root(server_url: &str) -> String {
    format!("{}/data", server_url.trim_end_matches('/'))
}

fn call(client: &Client, root: &str, request: &Request) -> Result<Value, ApiError> {
    if request.is_cancelled() {
        return Err(ApiError::Cancelled);
    }
    debug!("{} {}{}", request.method, root, request.path);

    let mut builder = client
        .request(http_method(request.method), format!("{}{}", root, request.path))
        .header(ACCEPT, "application/json")
        .header(REQUESTED_WITH, "fetch");
    if !request.query.is_empty() {
        builder = builder.query(&request.query);
    }
    if let Some(body) = &request.body {
        builder = builder.json(body);
    }

    let response = builder.send()?;
    let status = response.status();
    let text = if request.discard_response && status.is_success() {
        String::new()
    } else {
        response.text()?
    };
    if request.is_cancelled() {
        return Err(ApiError::Cancelled);
    }
    if !status.is_success() {
        return Err(status_error(status, &text));
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
}

fn http_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

/// Map a failed response onto an error, preferring the server's own message.
fn status_error(status: StatusCode, body: &str) -> ApiError {
    if let Ok(err) = serde_json::from_str::<ErrorBody>(body) {
        return ApiError::Server {
            status: status.as_u16(),
            index: err.index(),
            message: err.error,
        };
    }
    let body = body.trim();
    let text = match status.canonical_reason() {
        Some(reason) if body.is_empty() => reason.to_string(),
        None if body.is_empty() => status.as_str().to_string(),
        _ => body.to_string(),
    };
    ApiError::Status {
        status: status.as_u16(),
        text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_root_joins_cleanly() {
        assert_eq!(api_root("http://host:3000"), "http://host:3000/data");
        assert_eq!(api_root("http://host:3000/"), "http://host:3000/data");
    }

    #[test]
    fn structured_errors_keep_message_and_index() {
        let err = status_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid regex","data":{"index":3}}"#,
        );
        assert_eq!(
            err,
            ApiError::Server {
                status: 400,
                message: "invalid regex".into(),
                index: Some(3),
            }
        );
    }

    #[test]
    fn plain_text_errors_keep_the_body() {
        let err = status_error(StatusCode::BAD_REQUEST, "invalid regex\n");
        assert_eq!(
            err,
            ApiError::Status {
                status: 400,
                text: "invalid regex".into(),
            }
        );
    }

    #[test]
    fn empty_errors_use_status_text() {
        let err = status_error(StatusCode::METHOD_NOT_ALLOWED, "");
        assert_eq!(
            err,
            ApiError::Status {
                status: 405,
                text: "Method Not Allowed".into(),
            }
        );
    }

    #[test]
    fn cancelled_requests_are_not_sent() {
        let gateway = HttpGateway::new("http://127.0.0.1:9").unwrap();
        let token = CancelToken::new();
        token.cancel();
        let request = Request::get("/player/x/tracks").with_cancel(token);
        assert_eq!(gateway.call(&request), Err(ApiError::Cancelled));
    }
}
