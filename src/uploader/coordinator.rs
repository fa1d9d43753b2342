use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

use super::events::{TaskSummary, UploaderEvent};
use super::progress_tracker::ProgressTracker;
use super::task::{TaskId, TaskOutcome, UploadRequest, UploadTask};
use crate::auth::{AuthRefresher, Authenticator, Credentials, OAuthConfig};
use crate::config::UploaderConfig;
use crate::errors::{is_auth_status, AppError, AppResult, ErrorInfo};
use crate::services::{
    imgur, Album, ImgurAdapter, PomfAdapter, ServiceDescriptor, ServiceRegistry, UploadResult,
};
use crate::settings::SettingsStore;
use crate::transport::{
    round_trip, HttpRequest, HttpTransport, RequestId, TransportClient, TransportEvent,
};

enum Command {
    Upload {
        task_id: TaskId,
        request: UploadRequest,
    },
    CancelAll {
        ack: oneshot::Sender<()>,
    },
    ActiveTasks {
        reply: oneshot::Sender<Vec<TaskSummary>>,
    },
    AuthFailure {
        service_id: String,
    },
    AuthResolved {
        service_id: String,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Completions of work the loop spawned off itself.
enum Internal {
    RequestBuilt {
        task_id: TaskId,
        result: AppResult<HttpRequest>,
    },
    RefreshFinished {
        service_id: String,
        result: Result<(), String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthEpisode {
    Refreshing,
    /// Refresh failed; waiting for the caller to re-authorize.
    Unresolved,
}

#[derive(Debug, Default, Clone)]
struct Snapshot {
    progress: u8,
    last_result: Option<UploadResult>,
    active: usize,
}

type SharedSnapshot = Arc<Mutex<Snapshot>>;
type AuthenticatorMap = HashMap<String, Arc<dyn Authenticator>>;

/// Accepts uploads, runs them concurrently and reports their outcome.
///
/// All task state lives in a single coordinating loop; this handle only sends
/// it commands. Handles are cheap to clone; the loop stops after `shutdown` or
/// once every handle is dropped.
#[derive(Clone)]
pub struct UploadCoordinator {
    commands: mpsc::UnboundedSender<Command>,
    registry: Arc<ServiceRegistry>,
    transport: Arc<dyn TransportClient>,
    authenticators: Arc<AuthenticatorMap>,
    snapshot: SharedSnapshot,
}

impl UploadCoordinator {
    /// Start the coordinating loop. Must be called from within a tokio runtime.
    pub fn new(
        registry: ServiceRegistry,
        transport: Arc<dyn TransportClient>,
        authenticators: Vec<Arc<dyn Authenticator>>,
    ) -> AppResult<(Self, mpsc::UnboundedReceiver<UploaderEvent>)> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            AppError::Config("Upload coordinator must be started inside a tokio runtime".into())
        })?;

        let registry = Arc::new(registry);
        let authenticators: Arc<AuthenticatorMap> = Arc::new(
            authenticators
                .into_iter()
                .map(|a| (a.service_id().to_string(), a))
                .collect(),
        );
        let snapshot = SharedSnapshot::default();

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let coordinating_loop = CoordinatorLoop {
            registry: registry.clone(),
            transport: transport.clone(),
            authenticators: authenticators.clone(),
            tasks: Vec::new(),
            requests: HashMap::new(),
            progress: ProgressTracker::new(),
            last_result: None,
            episodes: HashMap::new(),
            events: event_tx,
            transport_tx,
            internal_tx,
            snapshot: snapshot.clone(),
        };
        runtime.spawn(coordinating_loop.run(command_rx, transport_rx, internal_rx));

        log::info!(
            "Upload coordinator started with {} service(s)",
            registry.len()
        );

        Ok((
            Self {
                commands: command_tx,
                registry,
                transport,
                authenticators,
                snapshot,
            },
            event_rx,
        ))
    }

    /// Coordinator with the built-in services, an HTTP transport and an Imgur account session.
    pub fn from_config(
        config: &UploaderConfig,
        settings: Arc<dyn SettingsStore>,
    ) -> AppResult<(Self, mpsc::UnboundedReceiver<UploaderEvent>)> {
        let transport: Arc<dyn TransportClient> = Arc::new(HttpTransport::from_config(config)?);

        let mut registry = ServiceRegistry::new();
        registry.register(Arc::new(ImgurAdapter::new(&config.imgur, settings.clone())))?;
        registry.register(Arc::new(PomfAdapter::new(&config.pomf)))?;

        let imgur_session: Arc<dyn Authenticator> = Arc::new(AuthRefresher::new(
            imgur::SERVICE_ID,
            OAuthConfig::from(&config.imgur),
            transport.clone(),
            settings,
        ));

        Self::new(registry, transport, vec![imgur_session])
    }

    /// Queue `file_path` for upload to `service_id`; returns without waiting for the transfer.
    pub fn upload(&self, file_path: impl Into<PathBuf>, service_id: &str) -> AppResult<TaskId> {
        let request = UploadRequest::new(file_path, service_id)?;
        self.registry.resolve(service_id)?;

        if !self.transport.is_ready() {
            return Err(AppError::TransportUnavailable);
        }

        let task_id = TaskId::new();
        log::info!(
            "Queueing upload {} of {} to {}",
            task_id,
            request.file_path().display(),
            service_id
        );

        self.send(Command::Upload { task_id, request })?;
        Ok(task_id)
    }

    /// Cancel every active upload. Cancelled uploads report nothing further.
    pub async fn cancel_all(&self) {
        let (ack, done) = oneshot::channel();
        if self.send(Command::CancelAll { ack }).is_ok() {
            let _ = done.await;
        }
    }

    pub fn current_progress(&self) -> u8 {
        self.read_snapshot(|s| s.progress).unwrap_or(0)
    }

    pub fn last_result(&self) -> Option<UploadResult> {
        self.read_snapshot(|s| s.last_result.clone()).flatten()
    }

    /// Number of uploads that have not reached a terminal state.
    pub fn uploading(&self) -> usize {
        self.read_snapshot(|s| s.active).unwrap_or(0)
    }

    pub async fn active_tasks(&self) -> AppResult<Vec<TaskSummary>> {
        let (reply, response) = oneshot::channel();
        self.send(Command::ActiveTasks { reply })?;
        response.await.map_err(|_| AppError::CoordinatorStopped)
    }

    pub fn services(&self) -> Vec<ServiceDescriptor> {
        self.registry.descriptors()
    }

    pub fn credentials(&self, service_id: &str) -> Option<Credentials> {
        self.authenticators
            .get(service_id)
            .and_then(|a| a.credentials())
    }

    pub fn authorize_url(&self, service_id: &str) -> AppResult<String> {
        Ok(self.authenticator(service_id)?.authorize_url())
    }

    /// Albums of the signed-in account. An authentication failure starts the refresh path.
    pub async fn list_albums(&self, service_id: &str) -> AppResult<Vec<Album>> {
        let adapter = self.registry.resolve(service_id)?;
        if !adapter.supports_albums() {
            return Err(AppError::validation(
                "service_id",
                &format!("{} does not support albums", service_id),
            ));
        }

        let request = adapter.album_list_request(self.credentials(service_id).as_ref())?;

        let response = match round_trip(self.transport.as_ref(), request).await {
            Ok(response) if is_auth_status(response.status) => {
                Err(AppError::authentication_required(service_id))
            }
            Ok(response) => adapter.parse_album_list(&response.body, response.status),
            Err(AppError::Transport {
                status: Some(status),
                ..
            }) if is_auth_status(status) => Err(AppError::authentication_required(service_id)),
            Err(e) => Err(e),
        };

        if let Err(e) = &response {
            if e.is_auth_failure() {
                log::info!("Album listing for {} needs re-authentication", service_id);
                let _ = self.send(Command::AuthFailure {
                    service_id: service_id.to_string(),
                });
            }
        }

        response
    }

    /// Exchange an authorization PIN for a session; ends any open authentication episode.
    pub async fn authorize_with_pin(&self, service_id: &str, pin: &str) -> AppResult<Credentials> {
        let authenticator = self.authenticator(service_id)?;
        let credentials = authenticator.exchange_pin(pin).await?;

        self.send(Command::AuthResolved {
            service_id: service_id.to_string(),
        })?;
        Ok(credentials)
    }

    pub fn deauthorize(&self, service_id: &str) -> AppResult<()> {
        self.authenticator(service_id)?.clear()?;

        self.send(Command::AuthResolved {
            service_id: service_id.to_string(),
        })
    }

    /// Cancel everything and stop the coordinating loop.
    pub async fn shutdown(self) {
        let (ack, done) = oneshot::channel();
        if self.send(Command::Shutdown { ack }).is_ok() {
            let _ = done.await;
        }
        log::info!("Upload coordinator shut down");
    }

    fn authenticator(&self, service_id: &str) -> AppResult<Arc<dyn Authenticator>> {
        self.registry.resolve(service_id)?;
        self.authenticators.get(service_id).cloned().ok_or_else(|| {
            AppError::validation(
                "service_id",
                &format!("{} does not support accounts", service_id),
            )
        })
    }

    fn send(&self, command: Command) -> AppResult<()> {
        self.commands
            .send(command)
            .map_err(|_| AppError::CoordinatorStopped)
    }

    fn read_snapshot<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&Snapshot) -> R,
    {
        match self.snapshot.lock() {
            Ok(snapshot) => Some(f(&snapshot)),
            Err(e) => {
                log::error!("Failed to read coordinator snapshot (non-critical): {}", e);
                None
            }
        }
    }
}

struct CoordinatorLoop {
    registry: Arc<ServiceRegistry>,
    transport: Arc<dyn TransportClient>,
    authenticators: Arc<AuthenticatorMap>,
    tasks: Vec<UploadTask>,
    requests: HashMap<RequestId, TaskId>,
    progress: ProgressTracker,
    last_result: Option<UploadResult>,
    episodes: HashMap<String, AuthEpisode>,
    events: mpsc::UnboundedSender<UploaderEvent>,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    snapshot: SharedSnapshot,
}

impl CoordinatorLoop {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        loop {
            // Transport events first: one sent before a command must be seen before it
            tokio::select! {
                biased;
                Some(event) = transport_events.recv() => self.on_transport_event(event),
                Some(message) = internal.recv() => self.on_internal(message),
                command = commands.recv() => match command {
                    Some(command) => {
                        if let Some(ack) = self.on_command(command) {
                            commands.close();
                            let _ = ack.send(());
                            break;
                        }
                    }
                    None => {
                        self.cancel_all();
                        break;
                    }
                },
            }
        }

        log::debug!("Upload coordinator loop exited");
    }

    /// Returns the shutdown acknowledgement once the loop should stop.
    fn on_command(&mut self, command: Command) -> Option<oneshot::Sender<()>> {
        match command {
            Command::Upload { task_id, request } => self.start_upload(task_id, request),
            Command::CancelAll { ack } => {
                self.cancel_all();
                let _ = ack.send(());
            }
            Command::ActiveTasks { reply } => {
                let _ = reply.send(self.summaries());
            }
            Command::AuthFailure { service_id } => self.on_auth_failure(&service_id),
            Command::AuthResolved { service_id } => {
                if self.episodes.remove(&service_id).is_some() {
                    log::info!("Authentication episode for {} resolved", service_id);
                }
            }
            Command::Shutdown { ack } => {
                self.cancel_all();
                return Some(ack);
            }
        }
        None
    }

    fn on_internal(&mut self, message: Internal) {
        match message {
            Internal::RequestBuilt { task_id, result } => self.dispatch(task_id, result),
            Internal::RefreshFinished { service_id, result } => match result {
                Ok(()) => {
                    self.episodes.remove(&service_id);
                    log::info!("Refreshed {} session", service_id);
                    self.emit(UploaderEvent::AuthRefreshed { service_id });
                }
                Err(e) => {
                    log::warn!("Refreshing {} session failed: {}", service_id, e);
                    // Only an episode that is still open waits for re-authorization
                    if let Some(episode) = self.episodes.get_mut(&service_id) {
                        *episode = AuthEpisode::Unresolved;
                    }
                }
            },
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        let request_id = event.id();
        let Some(task_id) = self.requests.get(&request_id).copied() else {
            log::debug!("Discarding event for inactive request {}", request_id);
            return;
        };
        let Some(index) = self.position(task_id) else {
            self.requests.remove(&request_id);
            return;
        };

        match event {
            TransportEvent::Progress { sent, total, .. } => {
                if self.tasks[index].on_progress(sent, total) {
                    self.recompute_progress();
                    self.publish();
                }
            }
            TransportEvent::Complete { status, body, .. } => {
                self.requests.remove(&request_id);
                let outcome = match self.registry.resolve(self.tasks[index].request().service_id()) {
                    Ok(adapter) => self.tasks[index].on_complete(adapter.as_ref(), status, &body),
                    Err(e) => self.tasks[index].on_error(ErrorInfo::from(&e)),
                };
                if let Some(outcome) = outcome {
                    self.finish(index, outcome);
                }
            }
            TransportEvent::Error { error, .. } => {
                self.requests.remove(&request_id);
                if let Some(outcome) = self.tasks[index].on_error(error) {
                    self.finish(index, outcome);
                }
            }
        }
    }

    fn start_upload(&mut self, task_id: TaskId, request: UploadRequest) {
        let service_id = request.service_id().to_string();
        let file_path = request.file_path().to_path_buf();
        self.tasks.push(UploadTask::new(task_id, request));
        self.recompute_progress();
        self.publish();

        let adapter = match self.registry.resolve(&service_id) {
            Ok(adapter) => adapter,
            Err(e) => {
                self.dispatch(task_id, Err(e));
                return;
            }
        };
        let credentials = self
            .authenticators
            .get(&service_id)
            .and_then(|a| a.credentials());

        // Reading and encoding the file happens off the loop
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = adapter.build_request(&file_path, credentials.as_ref()).await;
            let _ = internal.send(Internal::RequestBuilt { task_id, result });
        });
    }

    fn dispatch(&mut self, task_id: TaskId, built: AppResult<HttpRequest>) {
        let Some(index) = self.position(task_id) else {
            log::debug!("Discarding request for inactive task {}", task_id);
            return;
        };

        let sent = built.and_then(|request| self.transport.send(request, self.transport_tx.clone()));

        match sent {
            Ok(request_id) => {
                if self.tasks[index].start(request_id) {
                    self.requests.insert(request_id, task_id);
                    log::debug!("Task {} sending as request {}", task_id, request_id);
                    self.publish();
                }
            }
            Err(e) => {
                log::warn!("Could not start upload {}: {}", task_id, e);
                if let Some(outcome) = self.tasks[index].on_dispatch_failed(ErrorInfo::from(&e)) {
                    self.finish(index, outcome);
                }
            }
        }
    }

    /// Report a terminal outcome and drop the task from the active set.
    fn finish(&mut self, index: usize, outcome: TaskOutcome) {
        let task = self.tasks.remove(index);
        if let Some(request_id) = task.request_id() {
            self.requests.remove(&request_id);
        }
        let file_path = task.request().file_path().to_path_buf();

        match outcome {
            TaskOutcome::Succeeded(result) => {
                log::info!("Uploaded {} -> {}", file_path.display(), result.url);
                self.last_result = Some(result.clone());
                self.emit(UploaderEvent::Completed {
                    task_id: task.id(),
                    file_path,
                    url: result.url,
                    delete_token: result.delete_token,
                });
            }
            TaskOutcome::Failed(error) => {
                log::warn!("Upload of {} failed: {}", file_path.display(), error);
                let auth_failure = error.is_auth_failure();
                self.emit(UploaderEvent::Failed {
                    task_id: task.id(),
                    file_path,
                    error,
                });
                if auth_failure {
                    self.on_auth_failure(task.request().service_id());
                }
            }
        }

        self.recompute_progress();
        self.publish();
    }

    fn cancel_all(&mut self) {
        let mut cancelled = 0;
        for task in self.tasks.iter_mut() {
            if task.cancel() {
                cancelled += 1;
                if let Some(request_id) = task.request_id() {
                    self.transport.abort(request_id);
                }
            }
        }

        self.tasks.clear();
        self.requests.clear();
        self.progress.reset();
        self.emit(UploaderEvent::Progress { aggregate: 0 });
        self.publish();

        if cancelled > 0 {
            log::info!("Cancelled {} upload(s)", cancelled);
        }
    }

    /// Refresh at most once per episode; further failures wait for its resolution.
    fn on_auth_failure(&mut self, service_id: &str) {
        let Some(authenticator) = self.authenticators.get(service_id).cloned() else {
            log::debug!("{} has no account session to refresh", service_id);
            return;
        };

        if let Some(episode) = self.episodes.get(service_id) {
            log::debug!(
                "Authentication episode for {} already open ({:?}); not refreshing again",
                service_id,
                episode
            );
            return;
        }

        log::info!("Attempting {} session refresh", service_id);
        self.episodes
            .insert(service_id.to_string(), AuthEpisode::Refreshing);

        let internal = self.internal_tx.clone();
        let service_id = service_id.to_string();
        tokio::spawn(async move {
            let result = authenticator
                .refresh_session()
                .await
                .map(|_| ())
                .map_err(|e| e.to_string());
            let _ = internal.send(Internal::RefreshFinished { service_id, result });
        });
    }

    /// Aggregate over the current active set; notifies only when it moved.
    fn recompute_progress(&mut self) {
        if let Some(aggregate) = self.progress.recompute(self.tasks.iter()) {
            self.emit(UploaderEvent::Progress { aggregate });
        }
    }

    fn position(&self, task_id: TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.id() == task_id)
    }

    fn summaries(&self) -> Vec<TaskSummary> {
        self.tasks
            .iter()
            .map(|task| TaskSummary {
                task_id: task.id(),
                file_path: task.request().file_path().to_path_buf(),
                service_id: task.request().service_id().to_string(),
                state: task.state(),
                bytes_sent: task.bytes_sent(),
                bytes_total: task.bytes_total(),
            })
            .collect()
    }

    fn emit(&self, event: UploaderEvent) {
        if self.events.send(event).is_err() {
            log::debug!("No listener for uploader events");
        }
    }

    fn publish(&self) {
        match self.snapshot.lock() {
            Ok(mut snapshot) => {
                snapshot.progress = self.progress.current();
                snapshot.last_result = self.last_result.clone();
                snapshot.active = self.tasks.len();
            }
            Err(e) => {
                log::error!("Failed to publish coordinator snapshot (non-critical): {}", e);
            }
        }
    }
}
