// HTTP transport seam
//
// Adapters describe requests as plain data; a `TransportClient` executes them and
// reports progress and completion through an event channel.

pub mod http_client;

#[cfg(test)]
pub(crate) mod mock;

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::errors::{AppError, AppResult, ErrorInfo};

pub use http_client::HttpTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub field_name: String,
    pub file_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Empty,
    /// `application/x-www-form-urlencoded`
    Form(Vec<(String, String)>),
    Multipart {
        fields: Vec<(String, String)>,
        file: FilePart,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn post(url: impl Into<String>, body: RequestBody) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn form_value(&self, name: &str) -> Option<&str> {
        let fields = match &self.body {
            RequestBody::Form(fields) => fields,
            RequestBody::Multipart { fields, .. } => fields,
            RequestBody::Empty => return None,
        };
        fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Progress {
        id: RequestId,
        sent: u64,
        total: u64,
    },
    Complete {
        id: RequestId,
        status: u16,
        body: Vec<u8>,
    },
    Error {
        id: RequestId,
        error: ErrorInfo,
    },
}

impl TransportEvent {
    pub fn id(&self) -> RequestId {
        match self {
            TransportEvent::Progress { id, .. }
            | TransportEvent::Complete { id, .. }
            | TransportEvent::Error { id, .. } => *id,
        }
    }
}

pub type TransportEvents = mpsc::UnboundedSender<TransportEvent>;

/// Executes requests; every accepted request ends with exactly one
/// `Complete` or `Error` unless it is aborted.
pub trait TransportClient: Send + Sync {
    fn is_ready(&self) -> bool;

    fn send(&self, request: HttpRequest, events: TransportEvents) -> AppResult<RequestId>;

    fn abort(&self, id: RequestId);
}

/// Send one request and wait for its terminal event.
pub async fn round_trip(
    transport: &dyn TransportClient,
    request: HttpRequest,
) -> AppResult<HttpResponse> {
    if !transport.is_ready() {
        return Err(AppError::TransportUnavailable);
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = transport.send(request, tx)?;

    while let Some(event) = rx.recv().await {
        match event {
            TransportEvent::Progress { .. } => continue,
            TransportEvent::Complete { status, body, .. } => {
                return Ok(HttpResponse { status, body })
            }
            TransportEvent::Error { error, .. } => return Err(error.into()),
        }
    }

    log::warn!("Request {} ended without a response", id);
    Err(AppError::transport("request ended without a response"))
}
