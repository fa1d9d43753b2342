use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;

use super::{body_preview, read_file_part, ServiceAdapter, ServiceDescriptor, UploadResult};
use crate::auth::Credentials;
use crate::config::PomfConfig;
use crate::errors::{AppError, AppResult};
use crate::transport::{HttpRequest, RequestBody};

pub const SERVICE_ID: &str = "pomf";

#[derive(Debug, Deserialize)]
struct PomfResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    files: Vec<PomfFile>,
}

#[derive(Debug, Deserialize)]
struct PomfFile {
    #[serde(default)]
    url: String,
}

/// Anonymous pomf-compatible host. These hosts issue no delete token.
pub struct PomfAdapter {
    upload_url: String,
}

impl PomfAdapter {
    pub fn new(config: &PomfConfig) -> Self {
        Self {
            upload_url: config.upload_url.clone(),
        }
    }
}

#[async_trait]
impl ServiceAdapter for PomfAdapter {
    fn descriptor(&self) -> ServiceDescriptor {
        ServiceDescriptor {
            service_id: SERVICE_ID.to_string(),
            display_name: "Pomf".to_string(),
        }
    }

    async fn build_request(
        &self,
        file_path: &Path,
        _credentials: Option<&Credentials>,
    ) -> AppResult<HttpRequest> {
        let file = read_file_part(file_path, "files[]").await?;

        Ok(HttpRequest::post(
            &self.upload_url,
            RequestBody::Multipart {
                fields: Vec::new(),
                file,
            },
        ))
    }

    fn parse_response(&self, body: &[u8], status: u16) -> AppResult<UploadResult> {
        if !(200..300).contains(&status) {
            log::debug!("Pomf response (HTTP {}): {}", status, body_preview(body));
            return Err(AppError::adapter_parse(
                SERVICE_ID,
                format!("upload rejected with HTTP {}", status),
            ));
        }

        let response: PomfResponse = serde_json::from_slice(body).map_err(|e| {
            AppError::adapter_parse(SERVICE_ID, format!("malformed response: {}", e))
        })?;

        if !response.success {
            return Err(AppError::adapter_parse(SERVICE_ID, "upload unsuccessful"));
        }

        let url = response
            .files
            .into_iter()
            .map(|f| f.url)
            .find(|url| !url.is_empty())
            .ok_or_else(|| AppError::adapter_parse(SERVICE_ID, "response has no file url"))?;

        Ok(UploadResult {
            url,
            delete_token: String::new(),
        })
    }
}
