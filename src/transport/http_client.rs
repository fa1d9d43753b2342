use bytes::Bytes;
use futures::stream;
use reqwest::{multipart, Body, Client};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use super::{HttpRequest, Method, RequestBody, RequestId, TransportClient, TransportEvent, TransportEvents};
use crate::config::UploaderConfig;
use crate::errors::{AppError, AppResult, ErrorInfo, ErrorKind};

/// Upload bodies are streamed in slices of this size so progress can be reported.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

type InFlight = Arc<Mutex<HashMap<RequestId, JoinHandle<()>>>>;

/// reqwest-backed transport; one tokio task per request.
pub struct HttpTransport {
    client: Client,
    in_flight: InFlight,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("screenshot-uploader/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn from_config(config: &UploaderConfig) -> AppResult<Self> {
        Self::new(Duration::from_secs(config.request_timeout_secs))
    }
}

impl TransportClient for HttpTransport {
    fn is_ready(&self) -> bool {
        tokio::runtime::Handle::try_current().is_ok()
    }

    fn send(&self, request: HttpRequest, events: TransportEvents) -> AppResult<RequestId> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| AppError::TransportUnavailable)?;

        let id = RequestId::new();
        let client = self.client.clone();
        let in_flight = self.in_flight.clone();

        // Hold the lock across spawn so the task cannot deregister before it is registered
        let mut guard = self
            .in_flight
            .lock()
            .map_err(|e| AppError::transport(format!("in-flight table poisoned: {}", e)))?;

        let handle = runtime.spawn(async move {
            let event = match execute(&client, id, request, &events).await {
                Ok((status, body)) => TransportEvent::Complete { id, status, body },
                Err(error) => TransportEvent::Error { id, error },
            };
            let _ = events.send(event);

            match in_flight.lock() {
                Ok(mut map) => {
                    map.remove(&id);
                }
                Err(e) => log::warn!("Failed to deregister request {} (non-critical): {}", id, e),
            }
        });
        guard.insert(id, handle);

        log::debug!("Dispatched request {}", id);
        Ok(id)
    }

    fn abort(&self, id: RequestId) {
        let handle = match self.in_flight.lock() {
            Ok(mut map) => map.remove(&id),
            Err(e) => {
                log::warn!("Failed to acquire in-flight table for abort (non-critical): {}", e);
                None
            }
        };

        if let Some(handle) = handle {
            handle.abort();
            log::info!("Aborted request {}", id);
        }
    }
}

async fn execute(
    client: &Client,
    id: RequestId,
    request: HttpRequest,
    events: &TransportEvents,
) -> Result<(u16, Vec<u8>), ErrorInfo> {
    let mut builder = match request.method {
        Method::Get => client.get(&request.url),
        Method::Post => client.post(&request.url),
    };

    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    builder = match request.body {
        RequestBody::Empty => builder,
        RequestBody::Form(fields) => builder.form(&fields),
        RequestBody::Multipart { fields, file } => {
            let total = file.data.len() as u64;
            let part = multipart::Part::stream_with_length(progress_body(id, file.data, events), total)
                .file_name(file.file_name)
                .mime_str(&file.mime_type)
                .map_err(|e| network_error(&e))?;

            let mut form = multipart::Form::new();
            for (key, value) in fields {
                form = form.text(key, value);
            }
            builder.multipart(form.part(file.field_name, part))
        }
    };

    let response = builder.send().await.map_err(|e| network_error(&e))?;
    let status = response.status().as_u16();
    let body = response.bytes().await.map_err(|e| network_error(&e))?;

    log::debug!(
        "Request {} finished with HTTP {} ({} bytes)",
        id,
        status,
        body.len()
    );
    Ok((status, body.to_vec()))
}

/// Slices the payload and reports bytes as each slice is handed to the connection.
fn progress_chunks(
    id: RequestId,
    data: Vec<u8>,
    events: &TransportEvents,
) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> + Send + Sync + 'static {
    let total = data.len() as u64;
    let events = events.clone();
    let chunks: Vec<Bytes> = data
        .chunks(UPLOAD_CHUNK_SIZE)
        .map(Bytes::copy_from_slice)
        .collect();

    let mut sent = 0u64;
    stream::iter(chunks.into_iter().map(move |chunk| {
        sent += chunk.len() as u64;
        let _ = events.send(TransportEvent::Progress { id, sent, total });
        Ok(chunk)
    }))
}

fn progress_body(id: RequestId, data: Vec<u8>, events: &TransportEvents) -> Body {
    Body::wrap_stream(progress_chunks(id, data, events))
}

fn network_error(error: &reqwest::Error) -> ErrorInfo {
    let message = if error.is_timeout() {
        format!("request timed out: {}", error)
    } else {
        error.to_string()
    };
    let info = ErrorInfo::new(ErrorKind::Transport, message);
    match error.status() {
        Some(status) => info.with_status(status.as_u16()),
        None => info,
    }
}
