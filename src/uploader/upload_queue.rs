use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};

use crate::config::Config;
use crate::errors::AppResult;
use crate::image_processor::{ImageReducer, ScalingReducer};

use super::admission::{collect_uploadable_files, FsSizeProbe, RejectedFile, SizeProbe};
use super::media_groups::{GroupBuilder, MediaGroup, MediaKind, PendingQueue};
use super::progress_tracker::{ProgressSink, ProgressTracker, UploadEvent, UploadSummary};
use super::rate_limit::RateWindow;
use super::retry::{RetryConfig, RetryDecision, RetryState};
use super::telegram_client::DeliveryClient;

/// Drains a pending queue one group at a time.
///
/// Groups are sent strictly in the order the builder produces them. The only
/// waits are the rate window pause and the backoff between retries, and no
/// other work runs while they last.
pub struct UploadScheduler<'a> {
    client: &'a dyn DeliveryClient,
    probe: &'a dyn SizeProbe,
    reducer: &'a dyn ImageReducer,
    config: &'a Config,
    kind: MediaKind,
    sink: Arc<dyn ProgressSink>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> UploadScheduler<'a> {
    pub fn new(
        client: &'a dyn DeliveryClient,
        probe: &'a dyn SizeProbe,
        reducer: &'a dyn ImageReducer,
        config: &'a Config,
        kind: MediaKind,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            client,
            probe,
            reducer,
            config,
            kind,
            sink,
            cancel: None,
        }
    }

    /// Stop before building the next group once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub async fn run(&self, queue: PendingQueue) -> UploadSummary {
        self.run_with_rejected(queue, &[]).await
    }

    /// Run the job, folding files rejected at admission into the summary.
    pub async fn run_with_rejected(
        &self,
        mut queue: PendingQueue,
        rejected: &[RejectedFile],
    ) -> UploadSummary {
        let mut tracker = ProgressTracker::new(self.sink.clone());
        tracker.record_rejected(rejected);
        tracker.emit(UploadEvent::JobStarted {
            files: queue.len(),
            kind: self.kind,
            policy: self.config.grouping,
        });

        let builder = GroupBuilder::from_config(
            self.config,
            self.kind,
            self.probe,
            self.reducer,
            self.sink.as_ref(),
        );
        let retry_config = RetryConfig::from(self.config);
        let mut window = RateWindow::new(
            self.config.msg_limit,
            Duration::from_millis(self.config.window_ms),
            Instant::now(),
        );

        let mut group_index = 0;
        loop {
            if self.is_cancelled() {
                tracker.record_cancelled(&queue);
                // Substituted copies still queued are never sent now
                for item in queue.iter().filter(|i| i.is_reduced()) {
                    self.reducer.discard(&item.path);
                }
                break;
            }

            let built = builder.next_group(&mut queue);
            for skipped in built.skipped {
                tracker.record_skipped(skipped);
            }

            // Candidates that fit nowhere are skipped, so an empty group
            // means the queue is drained
            if built.group.is_empty() {
                debug_assert!(queue.is_empty());
                break;
            }

            tracker.emit(UploadEvent::GroupBuilt {
                group_index,
                files: built.group.len(),
                total_bytes: built.group.total_size(),
                scanned: built.scanned,
                remaining: queue.len(),
            });

            self.deliver(
                &built.group,
                group_index,
                &mut window,
                &retry_config,
                &mut tracker,
            )
            .await;

            for item in built.group.items().iter().filter(|i| i.is_reduced()) {
                self.reducer.discard(&item.path);
            }

            group_index += 1;
        }

        tracker.finish()
    }

    /// Send one group until it succeeds or runs out of retries.
    async fn deliver(
        &self,
        group: &MediaGroup,
        group_index: usize,
        window: &mut RateWindow,
        retry_config: &RetryConfig,
        tracker: &mut ProgressTracker,
    ) {
        let mut retry_state = RetryState::default();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            // Retries count against the window too
            if let Some(wait) = window.reserve(group.len(), Instant::now()) {
                tracker.emit(UploadEvent::RateLimitWait {
                    wait_ms: wait.as_millis() as u64,
                });
                sleep(wait).await;
            }

            tracker.emit(UploadEvent::SendAttempt {
                group_index,
                attempt,
                files: group.len(),
            });

            let result = match group.items() {
                [single] => self.client.send_single(group.kind(), single).await,
                items => self.client.send_group(group.kind(), items).await,
            };

            let cause = match result {
                Ok(()) => {
                    retry_state.record_success();
                    tracker.emit(UploadEvent::SendSucceeded {
                        group_index,
                        attempt,
                    });
                    tracker.record_sent(group);
                    return;
                }
                Err(e) => e.to_string(),
            };

            tracker.emit(UploadEvent::SendFailed {
                group_index,
                attempt,
                cause: cause.clone(),
            });

            match retry_state.record_failure(retry_config) {
                RetryDecision::Retry { after } => {
                    if !after.is_zero() {
                        log::debug!("Backing off {:?} before retrying group {}", after, group_index + 1);
                        sleep(after).await;
                    }
                }
                RetryDecision::GiveUp => {
                    tracker.emit(UploadEvent::GroupGivenUp {
                        group_index,
                        attempts: attempt,
                        cause: cause.clone(),
                    });
                    tracker.record_given_up(group, &cause);
                    return;
                }
            }
        }
    }
}

/// Walk `root`, filter it and upload everything that passes.
///
/// Only setup problems such as an unreadable root are returned as errors;
/// per-file and per-group failures end up in the summary.
pub async fn upload_directory(
    root: &Path,
    kind: MediaKind,
    config: &Config,
    client: &dyn DeliveryClient,
    sink: Arc<dyn ProgressSink>,
    cancel: Option<Arc<AtomicBool>>,
) -> AppResult<UploadSummary> {
    let probe = FsSizeProbe;
    let reducer = ScalingReducer;

    let (queue, rejected) =
        collect_uploadable_files(root, &probe, config.max_filesize, sink.as_ref())?;

    let mut scheduler = UploadScheduler::new(client, &probe, &reducer, config, kind, sink);
    if let Some(flag) = cancel {
        scheduler = scheduler.with_cancel_flag(flag);
    }

    Ok(scheduler.run_with_rejected(queue, &rejected).await)
}
