// Hosting service adapters
//
// Each adapter turns a local file into a request for its service and decides
// whether the service's answer is a usable (url, delete token) pair.

pub mod imgur;
pub mod pomf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::auth::Credentials;
use crate::errors::{AppError, AppResult};
use crate::security::{mime_type_for, InputValidator};
use crate::settings::SettingsStore;
use crate::transport::{FilePart, HttpRequest};

pub use imgur::ImgurAdapter;
pub use pomf::PomfAdapter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub url: String,
    pub delete_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub service_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub title: String,
}

impl Album {
    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            "untitled"
        } else {
            &self.title
        }
    }
}

#[async_trait]
pub trait ServiceAdapter: Send + Sync {
    fn descriptor(&self) -> ServiceDescriptor;

    async fn build_request(
        &self,
        file_path: &Path,
        credentials: Option<&Credentials>,
    ) -> AppResult<HttpRequest>;

    fn parse_response(&self, body: &[u8], status: u16) -> AppResult<UploadResult>;

    fn supports_albums(&self) -> bool {
        false
    }

    fn album_list_request(&self, _credentials: Option<&Credentials>) -> AppResult<HttpRequest> {
        Err(AppError::validation(
            "service_id",
            "This service does not support albums",
        ))
    }

    fn parse_album_list(&self, _body: &[u8], _status: u16) -> AppResult<Vec<Album>> {
        Err(AppError::validation(
            "service_id",
            "This service does not support albums",
        ))
    }
}

/// Static set of adapters, keyed by service id.
#[derive(Default, Clone)]
pub struct ServiceRegistry {
    adapters: BTreeMap<String, Arc<dyn ServiceAdapter>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ServiceAdapter>) -> AppResult<()> {
        let descriptor = adapter.descriptor();
        InputValidator::validate_service_id(&descriptor.service_id)?;

        if self.adapters.contains_key(&descriptor.service_id) {
            return Err(AppError::validation(
                "service_id",
                &format!("{} is already registered", descriptor.service_id),
            ));
        }

        log::debug!(
            "Registered upload service {} ({})",
            descriptor.service_id,
            descriptor.display_name
        );
        self.adapters.insert(descriptor.service_id, adapter);
        Ok(())
    }

    pub fn resolve(&self, service_id: &str) -> AppResult<Arc<dyn ServiceAdapter>> {
        self.adapters
            .get(service_id)
            .cloned()
            .ok_or_else(|| AppError::unknown_service(service_id))
    }

    pub fn descriptors(&self) -> Vec<ServiceDescriptor> {
        self.adapters.values().map(|a| a.descriptor()).collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

pub(crate) fn album_key(service_id: &str) -> String {
    format!("{}/album", service_id)
}

/// Album new uploads should land in, if the user picked one.
pub fn remembered_album(settings: &dyn SettingsStore, service_id: &str) -> Option<String> {
    settings
        .get(&album_key(service_id))
        .filter(|album| !album.is_empty())
}

pub fn remember_album(
    settings: &dyn SettingsStore,
    service_id: &str,
    album_id: &str,
) -> AppResult<()> {
    settings.set(&album_key(service_id), album_id)?;
    settings.sync()
}

/// Reads the file into a multipart file part.
pub(crate) async fn read_file_part(file_path: &Path, field_name: &str) -> AppResult<FilePart> {
    let display = file_path.to_string_lossy();

    let metadata = tokio::fs::metadata(file_path)
        .await
        .map_err(|e| AppError::unsupported_file(&display, e))?;
    if !metadata.is_file() {
        return Err(AppError::unsupported_file(&display, "not a regular file"));
    }

    let data = tokio::fs::read(file_path)
        .await
        .map_err(|e| AppError::unsupported_file(&display, e))?;
    if data.is_empty() {
        return Err(AppError::unsupported_file(&display, "file is empty"));
    }

    Ok(FilePart {
        field_name: field_name.to_string(),
        file_name: InputValidator::file_name(file_path),
        mime_type: mime_type_for(file_path).to_string(),
        data,
    })
}

/// Short prefix of a response body for log messages.
pub(crate) fn body_preview(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    text.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettings;

    #[test]
    fn test_registry_resolves_registered_services() {
        let settings = Arc::new(MemorySettings::new());
        let mut registry = ServiceRegistry::new();
        registry
            .register(Arc::new(ImgurAdapter::new(&Default::default(), settings)))
            .unwrap();
        registry
            .register(Arc::new(PomfAdapter::new(&Default::default())))
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.resolve("imgur").is_ok());
        assert!(matches!(
            registry.resolve("flickr"),
            Err(AppError::UnknownService { .. })
        ));

        let ids: Vec<String> = registry
            .descriptors()
            .into_iter()
            .map(|d| d.service_id)
            .collect();
        assert_eq!(ids, vec!["imgur".to_string(), "pomf".to_string()]);
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = ServiceRegistry::new();
        registry
            .register(Arc::new(PomfAdapter::new(&Default::default())))
            .unwrap();
        assert!(registry
            .register(Arc::new(PomfAdapter::new(&Default::default())))
            .is_err());
    }

    #[test]
    fn test_remembered_album() {
        let settings = MemorySettings::new();
        assert_eq!(remembered_album(&settings, "imgur"), None);

        remember_album(&settings, "imgur", "abc").unwrap();
        assert_eq!(remembered_album(&settings, "imgur").as_deref(), Some("abc"));

        remember_album(&settings, "imgur", "").unwrap();
        assert_eq!(remembered_album(&settings, "imgur"), None);
    }

    #[test]
    fn test_album_display_title() {
        let album = Album {
            id: "x".to_string(),
            title: String::new(),
        };
        assert_eq!(album.display_title(), "untitled");
    }

    #[tokio::test]
    async fn test_read_file_part_rejects_missing_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();

        let missing = read_file_part(&dir.path().join("missing.png"), "image").await;
        assert!(matches!(missing, Err(AppError::UnsupportedFile { .. })));

        let empty = dir.path().join("empty.png");
        std::fs::write(&empty, b"").unwrap();
        let result = read_file_part(&empty, "image").await;
        assert!(matches!(result, Err(AppError::UnsupportedFile { .. })));

        let shot = dir.path().join("shot.png");
        std::fs::write(&shot, b"png-bytes").unwrap();
        let part = read_file_part(&shot, "image").await.unwrap();
        assert_eq!(part.file_name, "shot.png");
        assert_eq!(part.mime_type, "image/png");
        assert_eq!(part.data, b"png-bytes");
    }
}
