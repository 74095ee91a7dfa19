use async_trait::async_trait;
use reqwest::{multipart, Client};
use serde::Deserialize;
use std::path::Path;
use tokio::time::Duration;

use crate::config::{Config, Credentials};
use crate::errors::{AppError, AppResult};

use super::media_groups::{FileCandidate, MediaKind};

/// Transmits one group to the remote chat.
///
/// Implementations report success or a `DeliveryFailed` error; the scheduler
/// decides whether to retry.
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    /// Send two or more files in a single message
    async fn send_group(&self, kind: MediaKind, items: &[FileCandidate]) -> AppResult<()>;

    async fn send_single(&self, kind: MediaKind, item: &FileCandidate) -> AppResult<()>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
}

/// Bot API client
pub struct TelegramClient {
    client: Client,
    base_url: String,
    token: String,
    chat_id: String,
}

impl TelegramClient {
    pub fn new(credentials: &Credentials, config: &Config) -> AppResult<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.request_timeout_secs))
                .build()?,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: credentials.token.clone(),
            chat_id: credentials.chat_id.clone(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    async fn file_part(item: &FileCandidate, kind: MediaKind) -> AppResult<multipart::Part> {
        let data = tokio::fs::read(&item.path).await?;
        // Keep the name of the source, not of a reduced temp copy
        let filename = item
            .source
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        Ok(multipart::Part::bytes(data)
            .file_name(filename)
            .mime_str(mime_type(&item.path, kind))?)
    }

    async fn post(&self, method: &str, form: multipart::Form) -> AppResult<()> {
        log::debug!("Calling {} for chat {}", method, self.chat_id);

        // Strip the URL: it embeds the bot token
        let response = self
            .client
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await
            .map_err(|e| AppError::delivery_failed(e.without_url()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::delivery_failed(e.without_url()))?;

        match serde_json::from_str::<ApiResponse>(&body) {
            Ok(api) if status.is_success() && api.ok => Ok(()),
            Ok(api) => Err(AppError::delivery_failed(format!(
                "Telegram API error {} for {}: {}",
                status,
                method,
                api.description.unwrap_or_else(|| "no description".to_string())
            ))),
            Err(_) => Err(AppError::delivery_failed(format!(
                "Telegram API error {} for {}: {}",
                status,
                method,
                body.chars().take(300).collect::<String>()
            ))),
        }
    }
}

#[async_trait]
impl DeliveryClient for TelegramClient {
    async fn send_group(&self, kind: MediaKind, items: &[FileCandidate]) -> AppResult<()> {
        let media_type = match kind {
            MediaKind::Photo => "photo",
            MediaKind::Document => "document",
        };

        let media: Vec<serde_json::Value> = (0..items.len())
            .map(|i| {
                serde_json::json!({
                    "type": media_type,
                    "media": format!("attach://file{}", i),
                })
            })
            .collect();

        let mut form = multipart::Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("media", serde_json::to_string(&media)?);

        for (i, item) in items.iter().enumerate() {
            form = form.part(format!("file{}", i), Self::file_part(item, kind).await?);
        }

        self.post("sendMediaGroup", form).await
    }

    async fn send_single(&self, kind: MediaKind, item: &FileCandidate) -> AppResult<()> {
        let (method, field) = match kind {
            MediaKind::Photo => ("sendPhoto", "photo"),
            MediaKind::Document => ("sendDocument", "document"),
        };

        let form = multipart::Form::new()
            .text("chat_id", self.chat_id.clone())
            .part(field, Self::file_part(item, kind).await?);

        self.post(method, form).await
    }
}

fn mime_type(path: &Path, kind: MediaKind) -> &'static str {
    if kind == MediaKind::Document {
        return "application/octet-stream";
    }

    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Logs what would be sent and reports success
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunClient;

#[async_trait]
impl DeliveryClient for DryRunClient {
    async fn send_group(&self, kind: MediaKind, items: &[FileCandidate]) -> AppResult<()> {
        log::info!("[dry run] Would send {} files as a {:?} group", items.len(), kind);
        for item in items {
            log::debug!("[dry run]   {}", item.path.display());
        }
        Ok(())
    }

    async fn send_single(&self, kind: MediaKind, item: &FileCandidate) -> AppResult<()> {
        log::info!("[dry run] Would send {} as a {:?}", item.path.display(), kind);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsawQ";

    fn client_for(server: &MockServer) -> TelegramClient {
        let config = Config {
            api_base_url: server.uri(),
            ..Config::default()
        };
        let credentials = Credentials {
            token: TOKEN.to_string(),
            chat_id: "-100123".to_string(),
        };
        TelegramClient::new(&credentials, &config).unwrap()
    }

    fn files(dir: &Path, names: &[&str]) -> Vec<FileCandidate> {
        names
            .iter()
            .map(|n| {
                let p = dir.join(n);
                std::fs::write(&p, b"payload").unwrap();
                FileCandidate::new(p, 7)
            })
            .collect()
    }

    #[test]
    fn test_mime_types() {
        assert_eq!(mime_type(Path::new("a.JPG"), MediaKind::Photo), "image/jpeg");
        assert_eq!(mime_type(Path::new("a.png"), MediaKind::Photo), "image/png");
        assert_eq!(
            mime_type(Path::new("a.png"), MediaKind::Document),
            "application/octet-stream"
        );
    }

    #[tokio::test]
    async fn test_send_group_uses_media_group_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{}/sendMediaGroup", TOKEN)))
            .and(body_string_contains("attach://file1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true, "result": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let items = files(dir.path(), &["a.jpg", "b.jpg"]);

        client_for(&server)
            .send_group(MediaKind::Photo, &items)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_single_document() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{}/sendDocument", TOKEN)))
            .and(body_string_contains("report.pdf"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true, "result": {}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let items = files(dir.path(), &["report.pdf"]);

        client_for(&server)
            .send_single(MediaKind::Document, &items[0])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reduced_copy_sent_under_source_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{}/sendPhoto", TOKEN)))
            .and(body_string_contains("holiday.jpg"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true, "result": {}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let reduced = dir.path().join("3f2a.jpg");
        std::fs::write(&reduced, b"small").unwrap();
        let item = FileCandidate {
            path: reduced,
            size: 5,
            source: PathBuf::from("/photos/holiday.jpg"),
        };

        client_for(&server)
            .send_single(MediaKind::Photo, &item)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_api_error_becomes_delivery_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "ok": false,
                "error_code": 429,
                "description": "Too Many Requests: retry after 5"
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let items = files(dir.path(), &["a.jpg"]);

        let err = client_for(&server)
            .send_single(MediaKind::Photo, &items[0])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DeliveryFailed { .. }));
        assert!(err.to_string().contains("Too Many Requests"));
        assert!(!err.to_string().contains(TOKEN));
    }

    #[tokio::test]
    async fn test_non_json_error_body_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let items = files(dir.path(), &["a.bin"]);

        let err = client_for(&server)
            .send_single(MediaKind::Document, &items[0])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Bad Gateway"));
    }

    #[tokio::test]
    async fn test_missing_file_fails_before_request() {
        let server = MockServer::start().await;
        let item = FileCandidate::new(PathBuf::from("/definitely/missing.jpg"), 1);

        let result = client_for(&server).send_single(MediaKind::Photo, &item).await;
        assert!(matches!(result, Err(AppError::Io(_))));
    }
}
