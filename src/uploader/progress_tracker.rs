use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use super::media_groups::{GroupingPolicy, MediaGroup, MediaKind, PendingQueue, SkippedFile};
use super::admission::RejectedFile;

/// Structured progress events emitted while a job runs
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UploadEvent {
    Excluded {
        path: PathBuf,
        size: Option<u64>,
        limit: u64,
        reason: String,
    },
    JobStarted {
        files: usize,
        kind: MediaKind,
        policy: GroupingPolicy,
    },
    GroupBuilt {
        group_index: usize,
        files: usize,
        total_bytes: u64,
        scanned: usize,
        remaining: usize,
    },
    CompressionStarted {
        path: PathBuf,
        size: u64,
    },
    CompressionSucceeded {
        path: PathBuf,
        original_size: u64,
        reduced_size: u64,
    },
    CompressionFailed {
        path: PathBuf,
        reason: String,
    },
    StillTooLarge {
        path: PathBuf,
        size: u64,
        limit: u64,
    },
    Deferred {
        path: PathBuf,
        size: u64,
    },
    FileSkipped {
        path: PathBuf,
        reason: String,
    },
    RateLimitWait {
        wait_ms: u64,
    },
    SendAttempt {
        group_index: usize,
        attempt: u32,
        files: usize,
    },
    SendSucceeded {
        group_index: usize,
        attempt: u32,
    },
    SendFailed {
        group_index: usize,
        attempt: u32,
        cause: String,
    },
    GroupGivenUp {
        group_index: usize,
        attempts: u32,
        cause: String,
    },
    Cancelled {
        unsent: usize,
    },
    Finished {
        sent: usize,
        skipped: usize,
        given_up: usize,
        rejected: usize,
        unsent: usize,
    },
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &UploadEvent);
}

/// Writes every event to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn emit(&self, event: &UploadEvent) {
        match event {
            UploadEvent::Excluded { path, reason, .. } => {
                log::warn!("Ignoring {}: {}", path.display(), reason)
            }
            UploadEvent::JobStarted {
                files,
                kind,
                policy,
            } => {
                log::info!("Starting the upload of {} files as {:?}", files, kind);
                log::info!("Files will be sent in {:?} order", policy);
            }
            UploadEvent::GroupBuilt {
                group_index,
                files,
                total_bytes,
                scanned,
                remaining,
            } => log::info!(
                "Prepared group {} of {} files, {:.2} MB total ({} walked, {} left)",
                group_index + 1,
                files,
                *total_bytes as f64 / 1024.0 / 1024.0,
                scanned,
                remaining
            ),
            UploadEvent::CompressionStarted { path, size } => log::info!(
                "Compressing {} ({:.2} MB, too large for a photo)...",
                path.display(),
                *size as f64 / 1024.0 / 1024.0
            ),
            UploadEvent::CompressionSucceeded {
                path,
                original_size,
                reduced_size,
            } => log::info!(
                "Compressed {}: {:.2} MB -> {:.2} MB",
                path.display(),
                *original_size as f64 / 1024.0 / 1024.0,
                *reduced_size as f64 / 1024.0 / 1024.0
            ),
            UploadEvent::CompressionFailed { path, reason } => {
                log::warn!("Compression failed for {}: {}", path.display(), reason)
            }
            UploadEvent::StillTooLarge { path, size, limit } => log::warn!(
                "Compressed {}, but it's still too large ({} > {} bytes)",
                path.display(),
                size,
                limit
            ),
            UploadEvent::Deferred { path, size } => log::debug!(
                "No space left for {} ({} bytes) in current group, leaving it for the next one",
                path.display(),
                size
            ),
            UploadEvent::FileSkipped { path, reason } => {
                log::warn!("Skipping {}: {}", path.display(), reason)
            }
            UploadEvent::RateLimitWait { wait_ms } => {
                log::warn!("Message rate exceeded. Waiting for {} ms...", wait_ms)
            }
            UploadEvent::SendAttempt {
                group_index,
                attempt,
                files,
            } => {
                if *attempt > 1 {
                    log::info!(
                        "Retrying group {} ({} files), attempt {}",
                        group_index + 1,
                        files,
                        attempt
                    );
                } else {
                    log::info!("Sending group {} of {} files...", group_index + 1, files);
                }
            }
            UploadEvent::SendSucceeded {
                group_index,
                attempt,
            } => log::info!(
                "Group {} sent (attempt {})",
                group_index + 1,
                attempt
            ),
            UploadEvent::SendFailed {
                group_index,
                attempt,
                cause,
            } => log::warn!(
                "Group {} attempt {} failed: {}",
                group_index + 1,
                attempt,
                cause
            ),
            UploadEvent::GroupGivenUp {
                group_index,
                attempts,
                cause,
            } => log::error!(
                "Gave up on group {} after {} attempts: {}",
                group_index + 1,
                attempts,
                cause
            ),
            UploadEvent::Cancelled { unsent } => {
                log::warn!("Upload cancelled, {} files left unsent", unsent)
            }
            UploadEvent::Finished {
                sent,
                skipped,
                given_up,
                rejected,
                unsent,
            } => log::info!(
                "All uploads finished: {} sent, {} skipped, {} given up, {} rejected, {} unsent",
                sent,
                skipped,
                given_up,
                rejected,
                unsent
            ),
        }
    }
}

#[derive(Serialize)]
struct TimestampedEvent<'a> {
    at: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a UploadEvent,
}

/// Prints one JSON object per event on stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLinesSink;

impl ProgressSink for JsonLinesSink {
    fn emit(&self, event: &UploadEvent) {
        let line = TimestampedEvent {
            at: Utc::now(),
            event,
        };
        match serde_json::to_string(&line) {
            Ok(json) => println!("{}", json),
            Err(e) => log::warn!("Failed to serialize event (non-critical): {}", e),
        }
    }
}

/// Adapts a closure into a sink
pub struct FnSink<F>(pub F);

impl<F> ProgressSink for FnSink<F>
where
    F: Fn(&UploadEvent) + Send + Sync,
{
    fn emit(&self, event: &UploadEvent) {
        (self.0)(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Sent,
    Skipped,
    GivenUp,
    Rejected,
    Unsent,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub disposition: Disposition,
    pub detail: Option<String>,
}

/// Final per-job result. Individual failures never fail the job.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadSummary {
    pub sent: usize,
    pub skipped: usize,
    pub given_up: usize,
    pub rejected: usize,
    pub unsent: usize,
    pub cancelled: bool,
    pub files: Vec<FileReport>,
}

impl UploadSummary {
    fn record(&mut self, path: PathBuf, disposition: Disposition, detail: Option<String>) {
        match disposition {
            Disposition::Sent => self.sent += 1,
            Disposition::Skipped => self.skipped += 1,
            Disposition::GivenUp => self.given_up += 1,
            Disposition::Rejected => self.rejected += 1,
            Disposition::Unsent => self.unsent += 1,
        }
        self.files.push(FileReport {
            path,
            disposition,
            detail,
        });
    }

    pub fn disposition_of(&self, path: &std::path::Path) -> Option<Disposition> {
        self.files
            .iter()
            .find(|f| f.path == path)
            .map(|f| f.disposition)
    }

    pub fn record_rejected(&mut self, rejected: &[RejectedFile]) {
        for file in rejected {
            self.record(
                file.path.clone(),
                Disposition::Rejected,
                Some(file.reason.clone()),
            );
        }
    }
}

/// Collects per-file dispositions and forwards events to the sink
pub struct ProgressTracker {
    sink: Arc<dyn ProgressSink>,
    summary: UploadSummary,
}

impl ProgressTracker {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            sink,
            summary: UploadSummary::default(),
        }
    }

    pub fn emit(&self, event: UploadEvent) {
        self.sink.emit(&event);
    }

    /// Files turned away before the job started
    pub fn record_rejected(&mut self, rejected: &[RejectedFile]) {
        self.summary.record_rejected(rejected);
    }

    pub fn record_skipped(&mut self, skipped: SkippedFile) {
        let reason = skipped.reason.to_string();
        self.emit(UploadEvent::FileSkipped {
            path: skipped.path.clone(),
            reason: reason.clone(),
        });
        self.summary
            .record(skipped.path, Disposition::Skipped, Some(reason));
    }

    pub fn record_sent(&mut self, group: &MediaGroup) {
        for item in group.items() {
            self.summary
                .record(item.source.clone(), Disposition::Sent, None);
        }
    }

    pub fn record_given_up(&mut self, group: &MediaGroup, cause: &str) {
        for item in group.items() {
            self.summary.record(
                item.source.clone(),
                Disposition::GivenUp,
                Some(cause.to_string()),
            );
        }
    }

    pub fn record_cancelled(&mut self, queue: &PendingQueue) {
        self.summary.cancelled = true;
        for item in queue.iter() {
            self.summary
                .record(item.source.clone(), Disposition::Unsent, None);
        }
        self.emit(UploadEvent::Cancelled { unsent: queue.len() });
    }

    pub fn finish(self) -> UploadSummary {
        let summary = self.summary;
        self.sink.emit(&UploadEvent::Finished {
            sent: summary.sent,
            skipped: summary.skipped,
            given_up: summary.given_up,
            rejected: summary.rejected,
            unsent: summary.unsent,
        });
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::media_groups::{FileCandidate, SkipReason};
    use std::sync::Mutex;

    fn collecting_sink() -> (Arc<Mutex<Vec<UploadEvent>>>, Arc<dyn ProgressSink>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let sink: Arc<dyn ProgressSink> = Arc::new(FnSink(move |e: &UploadEvent| {
            events_clone.lock().unwrap().push(e.clone());
        }));
        (events, sink)
    }

    #[test]
    fn test_events_serialize_with_tag() {
        let json = serde_json::to_value(UploadEvent::RateLimitWait { wait_ms: 61000 }).unwrap();
        assert_eq!(json["event"], "rate_limit_wait");
        assert_eq!(json["wait_ms"], 61000);
    }

    #[test]
    fn test_timestamped_event_flattens() {
        let event = UploadEvent::Cancelled { unsent: 3 };
        let json = serde_json::to_value(TimestampedEvent {
            at: Utc::now(),
            event: &event,
        })
        .unwrap();
        assert_eq!(json["event"], "cancelled");
        assert_eq!(json["unsent"], 3);
        assert!(json["at"].is_string());
    }

    #[test]
    fn test_tracker_counts_dispositions() {
        let (events, sink) = collecting_sink();
        let mut tracker = ProgressTracker::new(sink);

        let group = MediaGroup::new(
            MediaKind::Document,
            vec![
                FileCandidate::new(PathBuf::from("a"), 1),
                FileCandidate::new(PathBuf::from("b"), 2),
            ],
        );
        tracker.record_sent(&group);
        tracker.record_skipped(SkippedFile {
            path: PathBuf::from("c"),
            reason: SkipReason::CompressionFailed("broken".to_string()),
        });

        let summary = tracker.finish();
        assert_eq!(summary.sent, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.disposition_of(std::path::Path::new("c")), Some(Disposition::Skipped));

        let events = events.lock().unwrap();
        assert!(matches!(events.last(), Some(UploadEvent::Finished { sent: 2, .. })));
    }

    #[test]
    fn test_cancelled_queue_reported_unsent() {
        let (_, sink) = collecting_sink();
        let mut tracker = ProgressTracker::new(sink);
        let queue = PendingQueue::from(vec![
            FileCandidate::new(PathBuf::from("x"), 1),
            FileCandidate::new(PathBuf::from("y"), 1),
        ]);

        tracker.record_cancelled(&queue);
        let summary = tracker.finish();
        assert!(summary.cancelled);
        assert_eq!(summary.unsent, 2);
    }
}
