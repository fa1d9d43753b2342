use std::sync::Arc;

use screenshot_uploader::{
    auth::Credentials,
    config::{self, ImgurConfig, PomfConfig, UploaderConfig},
    errors::{AppError, ErrorInfo, ErrorKind},
    security::InputValidator,
    services::{remember_album, remembered_album, ImgurAdapter, PomfAdapter},
    transport::RequestBody,
    JsonFileSettings, MemorySettings, ServiceAdapter, ServiceRegistry, SettingsStore,
    UploadCoordinator,
};

/// Integration tests for the screenshot uploader library.
/// These exercise several modules together through the public API.

fn registry(settings: Arc<dyn SettingsStore>) -> ServiceRegistry {
    let mut registry = ServiceRegistry::new();
    registry
        .register(Arc::new(ImgurAdapter::new(&ImgurConfig::default(), settings)))
        .unwrap();
    registry
        .register(Arc::new(PomfAdapter::new(&PomfConfig::default())))
        .unwrap();
    registry
}

fn signed_in() -> Credentials {
    Credentials {
        access_token: "access".to_string(),
        refresh_token: "refresh".to_string(),
        account_username: "someone".to_string(),
        expires_at_epoch_seconds: 1_700_000_000,
    }
}

#[test]
fn test_registry_resolves_builtin_services() {
    let registry = registry(Arc::new(MemorySettings::new()));

    assert_eq!(registry.len(), 2);
    assert!(registry.resolve("imgur").is_ok());
    assert!(registry.resolve("pomf").is_ok());
    assert!(matches!(
        registry.resolve("dropbox"),
        Err(AppError::UnknownService { .. })
    ));

    let mut registry = registry;
    let duplicate = registry.register(Arc::new(PomfAdapter::new(&PomfConfig::default())));
    assert!(matches!(duplicate, Err(AppError::Validation { .. })));
}

#[test]
fn test_adapters_agree_on_failure_classification() {
    let registry = registry(Arc::new(MemorySettings::new()));

    for service in ["imgur", "pomf"] {
        let adapter = registry.resolve(service).unwrap();
        let error = adapter.parse_response(b"not json", 200).unwrap_err();
        assert_eq!(ErrorInfo::from(&error).kind, ErrorKind::AdapterParse);
    }

    let imgur = registry.resolve("imgur").unwrap();
    let error = imgur.parse_response(b"", 403).unwrap_err();
    assert!(error.is_auth_failure());
}

#[tokio::test]
async fn test_account_upload_targets_remembered_album() {
    let dir = tempfile::tempdir().unwrap();
    let settings: Arc<dyn SettingsStore> =
        Arc::new(JsonFileSettings::open(dir.path().join("settings.json")).unwrap());
    remember_album(settings.as_ref(), "imgur", "album-1").unwrap();

    let image = dir.path().join("shot.png");
    std::fs::write(&image, b"not really a png").unwrap();
    let adapter = ImgurAdapter::new(&ImgurConfig::default(), settings.clone());

    let anonymous = adapter.build_request(&image, None).await.unwrap();
    assert_eq!(
        anonymous.header_value("authorization"),
        Some("Client-ID 3ebe94c791445c1")
    );
    match &anonymous.body {
        RequestBody::Multipart { fields, file } => {
            assert!(fields.is_empty());
            assert_eq!(file.field_name, "image");
            assert_eq!(file.file_name, "shot.png");
            assert_eq!(file.mime_type, "image/png");
        }
        other => panic!("unexpected body: {:?}", other),
    }

    let account = signed_in();
    let request = adapter.build_request(&image, Some(&account)).await.unwrap();
    assert_eq!(request.header_value("Authorization"), Some("Bearer access"));
    assert!(request.url.ends_with("/3/image"));
    match &request.body {
        RequestBody::Multipart { fields, .. } => {
            assert_eq!(fields, &vec![("album".to_string(), "album-1".to_string())]);
        }
        other => panic!("unexpected body: {:?}", other),
    }
}

#[test]
fn test_session_survives_reopening_settings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");

    {
        let settings = JsonFileSettings::open(&path).unwrap();
        signed_in().store(&settings, "imgur").unwrap();
        remember_album(&settings, "imgur", "album-1").unwrap();
    }

    let reopened = JsonFileSettings::open(&path).unwrap();
    assert_eq!(Credentials::load(&reopened, "imgur"), Some(signed_in()));
    assert_eq!(
        remembered_album(&reopened, "imgur"),
        Some("album-1".to_string())
    );
    assert_eq!(Credentials::load(&reopened, "pomf"), None);
}

#[test]
fn test_clearing_session_blanks_every_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    let settings = JsonFileSettings::open(&path).unwrap();

    signed_in().store(&settings, "imgur").unwrap();
    Credentials::clear(&settings, "imgur").unwrap();

    let reopened = JsonFileSettings::open(&path).unwrap();
    assert_eq!(reopened.get("imgur/access_token"), Some(String::new()));
    assert_eq!(reopened.get("imgur/refresh_token"), Some(String::new()));
    assert_eq!(reopened.get("imgur/account_username"), Some(String::new()));
    assert_eq!(reopened.get("imgur/expires_in"), Some("0".to_string()));
    assert_eq!(Credentials::load(&reopened, "imgur"), None);
}

#[test]
fn test_config_round_trip_with_backup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");

    // First load writes defaults
    let loaded = config::load_config_from(&path).unwrap();
    assert_eq!(loaded, UploaderConfig::default());
    assert!(path.exists());

    let mut changed = loaded.clone();
    changed.default_service = "pomf".to_string();
    changed.request_timeout_secs = 30;
    config::save_config_to(&changed, &path).unwrap();

    assert!(path.with_extension("json.bak").exists());
    assert_eq!(config::load_config_from(&path).unwrap(), changed);

    let mut broken = changed;
    broken.log_level = "loud".to_string();
    assert!(config::save_config_to(&broken, &path).is_err());
}

#[test]
fn test_partial_config_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"default_service":"pomf"}"#).unwrap();

    let loaded = config::load_config_from(&path).unwrap();

    assert_eq!(loaded.default_service, "pomf");
    assert_eq!(loaded.request_timeout_secs, 120);
    assert_eq!(loaded.imgur, ImgurConfig::default());
}

#[test]
fn test_input_validation() {
    assert!(InputValidator::validate_service_id("imgur").is_ok());
    assert!(InputValidator::validate_service_id("Imgur!").is_err());
    assert!(InputValidator::validate_pin(" 1a2b3c ").is_ok());
    assert!(InputValidator::validate_pin("   ").is_err());
    assert!(InputValidator::validate_upload_path(std::path::Path::new("")).is_err());
}

#[tokio::test]
async fn test_coordinator_from_config_lists_services() {
    let settings: Arc<dyn SettingsStore> = Arc::new(MemorySettings::new());
    let (coordinator, _events) =
        UploadCoordinator::from_config(&UploaderConfig::default(), settings).unwrap();

    let ids: Vec<String> = coordinator
        .services()
        .into_iter()
        .map(|d| d.service_id)
        .collect();
    assert_eq!(ids, vec!["imgur".to_string(), "pomf".to_string()]);

    assert!(coordinator.credentials("imgur").is_none());
    assert!(coordinator
        .authorize_url("imgur")
        .unwrap()
        .contains("response_type=pin"));
    assert!(coordinator.authorize_url("pomf").is_err());
    assert!(matches!(
        coordinator.upload("missing.png", "dropbox"),
        Err(AppError::UnknownService { .. })
    ));

    coordinator.cancel_all().await;
    assert_eq!(coordinator.current_progress(), 0);
    coordinator.shutdown().await;
}
