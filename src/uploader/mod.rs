// Upload engine: admission, grouping, rate limiting, delivery and retries
//
// Files flow admission -> media_groups -> upload_queue, which drives the
// delivery client under the rate window and retry policy.

pub mod admission;
pub mod media_groups;
pub mod progress_tracker;
pub mod rate_limit;
pub mod retry;
pub mod telegram_client;
pub mod upload_queue;

pub use admission::{collect_uploadable_files, FsSizeProbe, SizeProbe};
pub use media_groups::{FileCandidate, GroupBuilder, GroupingPolicy, MediaGroup, MediaKind, PendingQueue};
pub use progress_tracker::{JsonLinesSink, LogSink, ProgressSink, UploadEvent, UploadSummary};
pub use telegram_client::{DeliveryClient, DryRunClient, TelegramClient};
pub use upload_queue::{upload_directory, UploadScheduler};
