use async_trait::async_trait;
use image::{Rgb, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use telegram_directory_uploader::{
    config::{Config, Credentials},
    errors::{AppError, AppResult},
    uploader::{
        progress_tracker::{Disposition, FnSink},
        upload_directory, DeliveryClient, FileCandidate, MediaKind, ProgressSink, TelegramClient,
        UploadEvent,
    },
};
use wiremock::matchers::{body_string_contains, method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Integration tests for the directory uploader
/// These drive the real walk, size probe and image reducer end to end

#[derive(Default)]
struct RecordingClient {
    /// (source, uploaded path, uploaded bytes) per call
    calls: Mutex<Vec<Vec<(PathBuf, PathBuf, u64)>>>,
}

impl RecordingClient {
    fn record(&self, items: &[FileCandidate]) -> AppResult<()> {
        let mut call = Vec::new();
        for item in items {
            // Read while the upload is in flight: reduced copies go away afterwards
            let bytes = fs::metadata(&item.path)?.len();
            call.push((item.source.clone(), item.path.clone(), bytes));
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl DeliveryClient for RecordingClient {
    async fn send_group(&self, _kind: MediaKind, items: &[FileCandidate]) -> AppResult<()> {
        self.record(items)
    }

    async fn send_single(&self, _kind: MediaKind, item: &FileCandidate) -> AppResult<()> {
        self.record(std::slice::from_ref(item))
    }
}

fn quiet_sink() -> Arc<dyn ProgressSink> {
    Arc::new(FnSink(|_: &UploadEvent| {}))
}

/// Noise does not compress, so the encoded size tracks pixel count
fn write_noise_jpeg(path: &Path, side: u32) {
    let mut state: u32 = 0x2545_f491;
    let img = RgbImage::from_fn(side, side, |_, _| {
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state & 0xff) as u8
        };
        Rgb([next(), next(), next()])
    });

    let mut bytes = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, 100);
    image::DynamicImage::ImageRgb8(img)
        .write_with_encoder(encoder)
        .unwrap();
    fs::write(path, bytes).unwrap();
}

#[tokio::test]
async fn test_directory_upload_workflow() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("nested")).unwrap();
    fs::write(dir.path().join("a.txt"), vec![b'a'; 100]).unwrap();
    fs::write(dir.path().join("b.txt"), vec![b'b'; 100]).unwrap();
    fs::write(dir.path().join("nested").join("c.txt"), vec![b'c'; 100]).unwrap();
    fs::write(dir.path().join("huge.bin"), vec![0u8; 5000]).unwrap();

    let config = Config {
        max_filesize: 1000,
        ..Config::default()
    };
    let client = RecordingClient::default();

    let summary = upload_directory(
        dir.path(),
        MediaKind::Document,
        &config,
        &client,
        quiet_sink(),
        None,
    )
    .await
    .unwrap();

    assert_eq!(summary.sent, 3);
    assert_eq!(summary.rejected, 1);
    assert_eq!(
        summary.disposition_of(&dir.path().join("huge.bin")),
        Some(Disposition::Rejected)
    );

    let calls = client.calls.lock().unwrap();
    assert_eq!(calls.len(), 1, "Small files should travel in one group");
    let sources: Vec<PathBuf> = calls[0].iter().map(|(s, _, _)| s.clone()).collect();
    assert_eq!(
        sources,
        vec![
            dir.path().join("a.txt"),
            dir.path().join("b.txt"),
            dir.path().join("nested").join("c.txt"),
        ]
    );
}

#[tokio::test]
async fn test_oversized_photo_is_compressed_and_cleaned_up() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("noise.jpg");
    write_noise_jpeg(&source, 400);
    let original_size = fs::metadata(&source).unwrap().len();

    let config = Config {
        max_photo_bytes: 100_000,
        scale_factor: 0.3,
        ..Config::default()
    };
    assert!(original_size > config.max_photo_bytes);

    let client = RecordingClient::default();
    let events = Arc::new(Mutex::new(Vec::new()));
    let events_clone = events.clone();
    let sink: Arc<dyn ProgressSink> = Arc::new(FnSink(move |e: &UploadEvent| {
        events_clone.lock().unwrap().push(e.clone());
    }));

    let summary = upload_directory(dir.path(), MediaKind::Photo, &config, &client, sink, None)
        .await
        .unwrap();

    assert_eq!(summary.sent, 1);

    let calls = client.calls.lock().unwrap();
    let (sent_source, sent_path, sent_bytes) = calls[0][0].clone();
    assert_eq!(sent_source, source);
    assert_ne!(sent_path, source, "The reduced copy should be uploaded");
    assert!(sent_bytes <= config.max_photo_bytes);
    assert!(!sent_path.exists(), "Reduced copy should be removed after sending");

    // Original untouched
    assert_eq!(fs::metadata(&source).unwrap().len(), original_size);

    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, UploadEvent::CompressionSucceeded { .. })));
}

#[tokio::test]
async fn test_unreadable_image_is_skipped_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("fake.jpg"), vec![0u8; 2000]).unwrap();
    fs::write(dir.path().join("real.txt"), b"hello").unwrap();

    let config = Config {
        max_photo_bytes: 1000,
        ..Config::default()
    };
    let client = RecordingClient::default();

    let summary = upload_directory(dir.path(), MediaKind::Photo, &config, &client, quiet_sink(), None)
        .await
        .unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.sent, 1);
    assert_eq!(
        summary.disposition_of(&dir.path().join("fake.jpg")),
        Some(Disposition::Skipped)
    );
}

#[tokio::test]
async fn test_upload_through_bot_api() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/bot[^/]+/sendMediaGroup$"))
        .and(body_string_contains("attach://file0"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true, "result": []})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("one.log"), b"first").unwrap();
    fs::write(dir.path().join("two.log"), b"second").unwrap();

    let config = Config {
        api_base_url: server.uri(),
        ..Config::default()
    };
    let credentials = Credentials {
        token: "123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsawQ".to_string(),
        chat_id: "@uploads_channel".to_string(),
    };
    let client = TelegramClient::new(&credentials, &config).unwrap();

    let summary = upload_directory(dir.path(), MediaKind::Document, &config, &client, quiet_sink(), None)
        .await
        .unwrap();

    assert_eq!(summary.sent, 2);
    assert_eq!(summary.given_up, 0);
}

#[tokio::test]
async fn test_missing_directory_is_fatal() {
    let client = RecordingClient::default();
    let result = upload_directory(
        Path::new("/definitely/not/a/real/dir"),
        MediaKind::Document,
        &Config::default(),
        &client,
        quiet_sink(),
        None,
    )
    .await;

    match result {
        Err(e) => {
            assert!(e.is_fatal());
            assert!(matches!(e, AppError::InvalidDirectory { .. }));
        }
        Ok(_) => panic!("Expected a fatal setup error"),
    }
}
