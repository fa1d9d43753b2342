// Scripted transport for unit tests: records requests, lets tests push events.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

use super::{HttpRequest, HttpResponse, RequestId, TransportClient, TransportEvent, TransportEvents};
use crate::errors::{AppError, AppResult, ErrorInfo};

#[derive(Default)]
struct MockState {
    ready: bool,
    sent: Vec<(RequestId, HttpRequest)>,
    senders: HashMap<RequestId, TransportEvents>,
    aborted: Vec<RequestId>,
    /// Canned responses keyed by URL substring, answered immediately on send.
    canned: Vec<(String, HttpResponse)>,
}

pub(crate) struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                ready: true,
                ..Default::default()
            }),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.lock().unwrap().ready = ready;
    }

    pub fn respond_to(&self, url_fragment: &str, status: u16, body: &str) {
        self.state.lock().unwrap().canned.push((
            url_fragment.to_string(),
            HttpResponse {
                status,
                body: body.as_bytes().to_vec(),
            },
        ));
    }

    pub fn requests(&self) -> Vec<(RequestId, HttpRequest)> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn aborted(&self) -> Vec<RequestId> {
        self.state.lock().unwrap().aborted.clone()
    }

    pub async fn wait_for_requests(&self, count: usize) -> Vec<(RequestId, HttpRequest)> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let requests = self.requests();
            if requests.len() >= count {
                return requests;
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {} requests, saw {}",
                count,
                requests.len()
            );
            sleep(Duration::from_millis(5)).await;
        }
    }

    fn emit(&self, event: TransportEvent) {
        let sender = self.state.lock().unwrap().senders.get(&event.id()).cloned();
        if let Some(sender) = sender {
            let _ = sender.send(event);
        }
    }

    pub fn progress(&self, id: RequestId, sent: u64, total: u64) {
        self.emit(TransportEvent::Progress { id, sent, total });
    }

    pub fn complete(&self, id: RequestId, status: u16, body: &str) {
        self.emit(TransportEvent::Complete {
            id,
            status,
            body: body.as_bytes().to_vec(),
        });
    }

    pub fn fail(&self, id: RequestId, error: ErrorInfo) {
        self.emit(TransportEvent::Error { id, error });
    }
}

impl TransportClient for MockTransport {
    fn is_ready(&self) -> bool {
        self.state.lock().unwrap().ready
    }

    fn send(&self, request: HttpRequest, events: TransportEvents) -> AppResult<RequestId> {
        let mut state = self.state.lock().unwrap();
        if !state.ready {
            return Err(AppError::TransportUnavailable);
        }

        let id = RequestId::new();
        let canned = state
            .canned
            .iter()
            .find(|(fragment, _)| request.url.contains(fragment.as_str()))
            .map(|(_, response)| response.clone());

        state.sent.push((id, request));
        if let Some(response) = canned {
            let _ = events.send(TransportEvent::Complete {
                id,
                status: response.status,
                body: response.body,
            });
        }
        state.senders.insert(id, events);
        Ok(id)
    }

    fn abort(&self, id: RequestId) {
        let mut state = self.state.lock().unwrap();
        state.aborted.push(id);
    }
}
