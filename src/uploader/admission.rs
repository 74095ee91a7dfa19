use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::errors::{AppError, AppResult};
use crate::security::{FileSystemGuard, InputValidator};

use super::media_groups::{FileCandidate, PendingQueue};
use super::progress_tracker::{ProgressSink, UploadEvent};

/// Byte length of a file
pub trait SizeProbe {
    fn size_of(&self, path: &Path) -> AppResult<u64>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FsSizeProbe;

impl SizeProbe for FsSizeProbe {
    fn size_of(&self, path: &Path) -> AppResult<u64> {
        FileSystemGuard::get_file_size(path).map_err(|e| AppError::size_probe_failed(path, e))
    }
}

/// Probe a file, treating an unreadable one as infinitely large.
pub fn measure(probe: &dyn SizeProbe, path: &Path) -> u64 {
    match probe.size_of(path) {
        Ok(size) => size,
        Err(e) => {
            log::warn!("{}", e);
            u64::MAX
        }
    }
}

/// Whether a file of `size` bytes may enter the pipeline at all.
pub fn admit(size: u64, max_filesize: u64) -> bool {
    size < max_filesize
}

#[derive(Debug, Clone)]
pub struct RejectedFile {
    pub path: PathBuf,
    /// `None` when the size could not be read
    pub size: Option<u64>,
    pub reason: String,
}

/// Apply the admission filter to `paths`, keeping their order.
pub fn build_pending_queue(
    paths: Vec<PathBuf>,
    probe: &dyn SizeProbe,
    max_filesize: u64,
    sink: &dyn ProgressSink,
) -> (PendingQueue, Vec<RejectedFile>) {
    let mut queue = PendingQueue::default();
    let mut rejected = Vec::new();

    for path in paths {
        let (size, error) = match probe.size_of(&path) {
            Ok(size) if admit(size, max_filesize) => {
                queue.push(FileCandidate::new(path, size));
                continue;
            }
            Ok(size) => (Some(size), AppError::admission_rejected(&path, size, max_filesize)),
            Err(e) => (None, e),
        };

        sink.emit(&UploadEvent::Excluded {
            path: path.clone(),
            size,
            limit: max_filesize,
            reason: error.to_string(),
        });
        rejected.push(RejectedFile {
            path,
            size,
            reason: error.to_string(),
        });
    }

    log::info!(
        "{} files admitted, {} rejected",
        queue.len(),
        rejected.len()
    );

    (queue, rejected)
}

/// All regular files under `root`, sorted by name within each directory.
pub fn walk_directory(root: &Path) -> AppResult<Vec<PathBuf>> {
    InputValidator::validate_directory(root)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        match entry {
            Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
            Ok(_) => {}
            Err(e) => log::warn!("Skipping unreadable entry under {}: {}", root.display(), e),
        }
    }

    log::debug!("Found {} files under {}", files.len(), root.display());
    Ok(files)
}

pub fn collect_uploadable_files(
    root: &Path,
    probe: &dyn SizeProbe,
    max_filesize: u64,
    sink: &dyn ProgressSink,
) -> AppResult<(PendingQueue, Vec<RejectedFile>)> {
    log::info!("Preparing to upload all files in directory: {}", root.display());
    let files = walk_directory(root)?;
    Ok(build_pending_queue(files, probe, max_filesize, sink))
}
