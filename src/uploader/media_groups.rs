use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::config::Config;
use crate::image_processor::{ImageReducer, ReduceParams};

use super::admission::{measure, SizeProbe};
use super::progress_tracker::{ProgressSink, UploadEvent};

/// Delivery kind, chosen once per job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupingPolicy {
    /// Stop at the first candidate that does not fit, keeping input order.
    Sequential,
    /// Keep scanning past candidates that do not fit for denser groups.
    Exhaustive,
}

/// A file waiting in the queue or travelling in a group.
///
/// `path` is what gets uploaded and differs from `source` once the file has
/// been replaced by a reduced copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCandidate {
    pub path: PathBuf,
    pub size: u64,
    pub source: PathBuf,
}

impl FileCandidate {
    pub fn new(path: PathBuf, size: u64) -> Self {
        Self {
            source: path.clone(),
            path,
            size,
        }
    }

    pub fn is_reduced(&self) -> bool {
        self.path != self.source
    }

    fn reduced_to(&self, path: PathBuf, size: u64) -> Self {
        Self {
            path,
            size,
            source: self.source.clone(),
        }
    }
}

/// Files sent together in one remote call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaGroup {
    kind: MediaKind,
    items: Vec<FileCandidate>,
}

impl MediaGroup {
    pub fn new(kind: MediaKind, items: Vec<FileCandidate>) -> Self {
        Self { kind, items }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn items(&self) -> &[FileCandidate] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.items.iter().map(|i| i.size).sum()
    }
}

/// Remaining files, in upload order
#[derive(Debug, Clone, Default)]
pub struct PendingQueue {
    items: Vec<FileCandidate>,
}

impl PendingQueue {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileCandidate> {
        self.items.iter()
    }

    pub fn push(&mut self, candidate: FileCandidate) {
        self.items.push(candidate);
    }
}

impl From<Vec<FileCandidate>> for PendingQueue {
    fn from(items: Vec<FileCandidate>) -> Self {
        Self { items }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    CompressionFailed(String),
    StillTooLarge { size: u64, limit: u64 },
    TooLargeForGroup { size: u64, limit: u64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::CompressionFailed(reason) => write!(f, "compression failed: {}", reason),
            SkipReason::StillTooLarge { size, limit } => write!(
                f,
                "still too large after compression ({} > {} bytes)",
                size, limit
            ),
            SkipReason::TooLargeForGroup { size, limit } => {
                write!(f, "too large for any group ({} >= {} bytes)", size, limit)
            }
        }
    }
}

/// A file permanently removed from the queue while building a group
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: SkipReason,
}

#[derive(Debug)]
pub struct BuiltGroup {
    pub group: MediaGroup,
    pub skipped: Vec<SkippedFile>,
    /// Candidates examined while building this group
    pub scanned: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupLimits {
    pub files_per_message: usize,
    pub max_group_bytes: u64,
    pub max_photo_bytes: u64,
}

impl From<&Config> for GroupLimits {
    fn from(config: &Config) -> Self {
        Self {
            files_per_message: config.files_per_message,
            max_group_bytes: config.max_group_bytes,
            max_photo_bytes: config.max_photo_bytes,
        }
    }
}

/// Partitions the pending queue into admissible groups, one per call
pub struct GroupBuilder<'a> {
    kind: MediaKind,
    policy: GroupingPolicy,
    limits: GroupLimits,
    substitute_reduced: bool,
    params: ReduceParams,
    probe: &'a dyn SizeProbe,
    reducer: &'a dyn ImageReducer,
    sink: &'a dyn ProgressSink,
}

/// Outcome of checking one candidate against the photo ceiling
enum Prepared {
    Ready(FileCandidate),
    Reduced {
        original: FileCandidate,
        reduced: FileCandidate,
    },
    Skipped(SkippedFile),
}

impl<'a> GroupBuilder<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: MediaKind,
        policy: GroupingPolicy,
        limits: GroupLimits,
        substitute_reduced: bool,
        params: ReduceParams,
        probe: &'a dyn SizeProbe,
        reducer: &'a dyn ImageReducer,
        sink: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            kind,
            policy,
            limits,
            substitute_reduced,
            params,
            probe,
            reducer,
            sink,
        }
    }

    pub fn from_config(
        config: &Config,
        kind: MediaKind,
        probe: &'a dyn SizeProbe,
        reducer: &'a dyn ImageReducer,
        sink: &'a dyn ProgressSink,
    ) -> Self {
        Self::new(
            kind,
            config.grouping,
            GroupLimits::from(config),
            config.substitutes_reduced(),
            ReduceParams {
                scale_factor: config.scale_factor,
                quality: config.quality,
            },
            probe,
            reducer,
            sink,
        )
    }

    /// Build the next group, removing its files and any permanently skipped
    /// files from `queue`. The group is empty only when `queue` was empty or
    /// every remaining file had to be skipped.
    pub fn next_group(&self, queue: &mut PendingQueue) -> BuiltGroup {
        let mut items: Vec<FileCandidate> = Vec::new();
        let mut total_size: u64 = 0;
        let mut skipped = Vec::new();
        let mut scanned = 0;

        // Rebuilt instead of removing mid-scan
        let mut remaining = Vec::with_capacity(queue.len());
        let mut pending = std::mem::take(&mut queue.items).into_iter();

        while let Some(candidate) = pending.next() {
            if items.len() >= self.limits.files_per_message
                || total_size >= self.limits.max_group_bytes
            {
                remaining.push(candidate);
                break;
            }
            scanned += 1;

            let (chosen, original) = match self.prepare(candidate) {
                Prepared::Ready(c) => (c, None),
                Prepared::Reduced { original, reduced } => (reduced, Some(original)),
                Prepared::Skipped(s) => {
                    skipped.push(s);
                    continue;
                }
            };

            if chosen.size >= self.limits.max_group_bytes {
                self.discard(&chosen);
                skipped.push(SkippedFile {
                    path: chosen.source.clone(),
                    reason: SkipReason::TooLargeForGroup {
                        size: chosen.size,
                        limit: self.limits.max_group_bytes,
                    },
                });
                continue;
            }

            if total_size + chosen.size >= self.limits.max_group_bytes {
                self.sink.emit(&UploadEvent::Deferred {
                    path: chosen.source.clone(),
                    size: chosen.size,
                });
                remaining.push(self.leave_for_later(chosen, original));

                match self.policy {
                    GroupingPolicy::Sequential => break,
                    GroupingPolicy::Exhaustive => continue,
                }
            }

            total_size += chosen.size;
            items.push(chosen);
        }

        remaining.extend(pending);
        queue.items = remaining;

        BuiltGroup {
            group: MediaGroup::new(self.kind, items),
            skipped,
            scanned,
        }
    }

    /// Refresh the candidate's size and bring oversized photos under the
    /// photo ceiling.
    fn prepare(&self, mut candidate: FileCandidate) -> Prepared {
        candidate.size = measure(self.probe, &candidate.path);

        if self.kind != MediaKind::Photo || candidate.size <= self.limits.max_photo_bytes {
            return Prepared::Ready(candidate);
        }

        self.sink.emit(&UploadEvent::CompressionStarted {
            path: candidate.source.clone(),
            size: candidate.size,
        });

        let reduced_path = match self.reducer.reduce(&candidate.path, self.params) {
            Ok(path) => path,
            Err(e) => {
                let reason = e.to_string();
                self.sink.emit(&UploadEvent::CompressionFailed {
                    path: candidate.source.clone(),
                    reason: reason.clone(),
                });
                self.discard(&candidate);
                return Prepared::Skipped(SkippedFile {
                    path: candidate.source,
                    reason: SkipReason::CompressionFailed(reason),
                });
            }
        };

        let reduced_size = measure(self.probe, &reduced_path);
        let reduced = candidate.reduced_to(reduced_path, reduced_size);

        if reduced_size > self.limits.max_photo_bytes {
            self.sink.emit(&UploadEvent::StillTooLarge {
                path: candidate.source.clone(),
                size: reduced_size,
                limit: self.limits.max_photo_bytes,
            });
            self.discard(&reduced);
            self.discard(&candidate);
            return Prepared::Skipped(SkippedFile {
                path: candidate.source,
                reason: SkipReason::StillTooLarge {
                    size: reduced_size,
                    limit: self.limits.max_photo_bytes,
                },
            });
        }

        self.sink.emit(&UploadEvent::CompressionSucceeded {
            path: candidate.source.clone(),
            original_size: candidate.size,
            reduced_size,
        });

        Prepared::Reduced {
            original: candidate,
            reduced,
        }
    }

    /// Pick what goes back into the queue for a candidate that did not fit.
    fn leave_for_later(
        &self,
        chosen: FileCandidate,
        original: Option<FileCandidate>,
    ) -> FileCandidate {
        match original {
            Some(original) if !self.substitute_reduced => {
                self.discard(&chosen);
                original
            }
            Some(original) => {
                // Only an earlier reduction is dropped here, never a source file
                self.discard(&original);
                chosen
            }
            None => chosen,
        }
    }

    fn discard(&self, candidate: &FileCandidate) {
        if candidate.is_reduced() {
            self.reducer.discard(&candidate.path);
        }
    }
}
