use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use crate::errors::{AppError, AppResult};

fn service_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_\-]{0,31}$").expect("valid regex"))
}

fn pin_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9]{1,64}$").expect("valid regex"))
}

pub struct InputValidator;

impl InputValidator {
    pub fn validate_upload_path(path: &Path) -> AppResult<()> {
        let raw = path.to_string_lossy();

        if raw.trim().is_empty() {
            return Err(AppError::validation("file_path", "File path cannot be empty"));
        }

        if raw.contains('\0') {
            return Err(AppError::validation("file_path", "Invalid file path detected"));
        }

        Ok(())
    }

    pub fn validate_service_id(service_id: &str) -> AppResult<()> {
        if !service_id_pattern().is_match(service_id) {
            return Err(AppError::unknown_service(service_id));
        }

        Ok(())
    }

    pub fn validate_pin(pin: &str) -> AppResult<()> {
        let trimmed = pin.trim();

        if trimmed.is_empty() {
            return Err(AppError::validation("pin", "PIN cannot be empty"));
        }

        if !pin_pattern().is_match(trimmed) {
            return Err(AppError::validation("pin", "PIN contains invalid characters"));
        }

        Ok(())
    }

    pub fn file_name(path: &Path) -> String {
        path.file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string()
    }
}

/// Detect MIME type based on file extension
pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}
