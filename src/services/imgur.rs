use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

use super::{
    body_preview, read_file_part, remembered_album, Album, ServiceAdapter, ServiceDescriptor,
    UploadResult,
};
use crate::auth::Credentials;
use crate::config::ImgurConfig;
use crate::errors::{is_auth_status, AppError, AppResult};
use crate::settings::SettingsStore;
use crate::transport::{HttpRequest, RequestBody};

pub const SERVICE_ID: &str = "imgur";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    /// Absent on some upload responses; checked only when present.
    #[serde(default)]
    status: Option<u16>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    link: String,
    #[serde(default)]
    deletehash: String,
}

#[derive(Debug, Deserialize)]
struct AlbumData {
    id: String,
    #[serde(default)]
    title: Option<String>,
}

/// Anonymous or account uploads; account uploads go to the remembered album.
pub struct ImgurAdapter {
    client_id: String,
    api_base: String,
    settings: Arc<dyn SettingsStore>,
}

impl ImgurAdapter {
    pub fn new(config: &ImgurConfig, settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            client_id: config.client_id.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            settings,
        }
    }

    fn authorization(&self, credentials: Option<&Credentials>) -> String {
        match credentials.filter(|c| c.is_authenticated()) {
            Some(c) => format!("Bearer {}", c.access_token),
            None => format!("Client-ID {}", self.client_id),
        }
    }

    fn decode<T: for<'de> Deserialize<'de>>(&self, body: &[u8], status: u16) -> AppResult<T> {
        if is_auth_status(status) {
            return Err(AppError::authentication_required(SERVICE_ID));
        }

        let envelope: Envelope<T> = serde_json::from_slice(body).map_err(|e| {
            log::debug!("Imgur response (HTTP {}): {}", status, body_preview(body));
            AppError::adapter_parse(SERVICE_ID, format!("malformed response: {}", e))
        })?;

        let status_ok = envelope.status.map_or(true, |s| s == 200);
        if !(200..300).contains(&status) || !envelope.success || !status_ok {
            return Err(AppError::adapter_parse(
                SERVICE_ID,
                format!(
                    "request unsuccessful (HTTP {}, status {:?}, success {})",
                    status, envelope.status, envelope.success
                ),
            ));
        }

        envelope
            .data
            .ok_or_else(|| AppError::adapter_parse(SERVICE_ID, "response has no data"))
    }
}

#[async_trait]
impl ServiceAdapter for ImgurAdapter {
    fn descriptor(&self) -> ServiceDescriptor {
        ServiceDescriptor {
            service_id: SERVICE_ID.to_string(),
            display_name: "Imgur".to_string(),
        }
    }

    async fn build_request(
        &self,
        file_path: &Path,
        credentials: Option<&Credentials>,
    ) -> AppResult<HttpRequest> {
        let file = read_file_part(file_path, "image").await?;

        let mut fields = Vec::new();
        let authenticated = credentials.map(|c| c.is_authenticated()).unwrap_or(false);
        if authenticated {
            if let Some(album) = remembered_album(self.settings.as_ref(), SERVICE_ID) {
                fields.push(("album".to_string(), album));
            }
        }

        let request = HttpRequest::post(
            format!("{}/3/image", self.api_base),
            RequestBody::Multipart { fields, file },
        )
        .header("Authorization", self.authorization(credentials));

        Ok(request)
    }

    fn parse_response(&self, body: &[u8], status: u16) -> AppResult<UploadResult> {
        let image: ImageData = self.decode(body, status)?;

        if image.link.is_empty() {
            return Err(AppError::adapter_parse(SERVICE_ID, "response has no link"));
        }

        Ok(UploadResult {
            url: image.link,
            delete_token: image.deletehash,
        })
    }

    fn supports_albums(&self) -> bool {
        true
    }

    fn album_list_request(&self, credentials: Option<&Credentials>) -> AppResult<HttpRequest> {
        let credentials = credentials
            .filter(|c| c.is_authenticated() && !c.account_username.is_empty())
            .ok_or_else(|| AppError::authentication_required(SERVICE_ID))?;

        Ok(HttpRequest::get(format!(
            "{}/3/account/{}/albums/",
            self.api_base, credentials.account_username
        ))
        .header("Authorization", format!("Bearer {}", credentials.access_token)))
    }

    fn parse_album_list(&self, body: &[u8], status: u16) -> AppResult<Vec<Album>> {
        let albums: Vec<AlbumData> = self.decode(body, status)?;

        Ok(albums
            .into_iter()
            .map(|album| Album {
                id: album.id,
                title: album.title.unwrap_or_default(),
            })
            .collect())
    }
}
