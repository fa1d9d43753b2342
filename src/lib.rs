pub mod auth;
pub mod config;
pub mod errors;
pub mod logging;
pub mod security;
pub mod services;
pub mod settings;
pub mod transport;
pub mod uploader;

pub use auth::{AuthRefresher, Authenticator, Credentials};
pub use config::UploaderConfig;
pub use errors::{AppError, AppResult, ErrorInfo, ErrorKind};
pub use services::{ServiceAdapter, ServiceRegistry, UploadResult};
pub use settings::{JsonFileSettings, MemorySettings, SettingsStore};
pub use transport::{HttpTransport, TransportClient};
pub use uploader::{UploadCoordinator, UploaderEvent};
