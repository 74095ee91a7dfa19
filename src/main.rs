//! Uploads every file in a directory to a Telegram chat.
//!
//! Usage:
//!   telegram-directory-uploader photo <DIRECTORY>     - send images inline, compressing large ones
//!   telegram-directory-uploader document <DIRECTORY>  - send files untouched as documents
//!
//! Credentials come from `--token`/`--chat-id` or the `UPLOADER_BOT_TOKEN` and
//! `UPLOADER_CHAT_ID` environment variables.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use telegram_directory_uploader::config::{self, Config};
use telegram_directory_uploader::errors::AppError;
use telegram_directory_uploader::security::InputValidator;
use telegram_directory_uploader::uploader::progress_tracker::Disposition;
use telegram_directory_uploader::uploader::{
    upload_directory, DeliveryClient, DryRunClient, GroupingPolicy, JsonLinesSink, LogSink,
    MediaKind, ProgressSink, TelegramClient, UploadSummary,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Inline photos; images above the photo limit are compressed
    #[value(alias = "compressed")]
    Photo,
    /// Generic documents, sent byte for byte
    #[value(alias = "uncompressed")]
    Document,
}

impl From<Mode> for MediaKind {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Photo => MediaKind::Photo,
            Mode::Document => MediaKind::Document,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EventFormat {
    Log,
    Json,
}

#[derive(Parser)]
#[command(name = "telegram-directory-uploader")]
#[command(version)]
#[command(about = "Upload a directory to a Telegram chat in rate-limited batches")]
struct Cli {
    /// Delivery kind
    #[arg(value_enum)]
    mode: Mode,

    /// Directory to upload, walked recursively
    directory: PathBuf,

    /// Target chat id or @channel name
    #[arg(long)]
    chat_id: Option<String>,

    /// Bot token
    #[arg(long)]
    token: Option<String>,

    /// Scale factor applied to oversized photos
    #[arg(long)]
    scale: Option<f32>,

    /// Quality target for recompressed photos
    #[arg(long)]
    quality: Option<f32>,

    /// Fill groups by scanning past files that do not fit
    #[arg(long)]
    exhaustive: bool,

    /// Keep a deferred compressed photo queued in place of its original
    #[arg(long)]
    substitute_reduced: Option<bool>,

    #[arg(long)]
    max_retries: Option<u32>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// How progress events are reported
    #[arg(long, value_enum, default_value = "log")]
    events: EventFormat,

    /// Walk and group without contacting Telegram
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(scale) = self.scale {
            config.scale_factor = scale;
        }
        if let Some(quality) = self.quality {
            config.quality = quality;
        }
        if self.exhaustive {
            config.grouping = GroupingPolicy::Exhaustive;
        }
        if self.substitute_reduced.is_some() {
            config.substitute_reduced = self.substitute_reduced;
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG still wins over the default level
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            let fatal_setup = e
                .downcast_ref::<AppError>()
                .map(AppError::is_fatal)
                .unwrap_or(false);
            if fatal_setup {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = config::load_config(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    config::validate_config(&config)?;

    InputValidator::validate_directory(&cli.directory)?;

    let client: Box<dyn DeliveryClient> = if cli.dry_run {
        log::info!("Dry run: nothing will be sent");
        Box::new(DryRunClient)
    } else {
        let credentials = config::resolve_credentials(cli.token.clone(), cli.chat_id.clone())?;
        Box::new(TelegramClient::new(&credentials, &config)?)
    };

    let sink: Arc<dyn ProgressSink> = match cli.events {
        EventFormat::Log => Arc::new(LogSink),
        EventFormat::Json => Arc::new(JsonLinesSink),
    };

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            log::warn!("Second interrupt, aborting");
            std::process::exit(130);
        }
        log::warn!("Interrupt received, stopping after the current group (Ctrl+C again to abort)");
    })
    .context("Error setting Ctrl-C handler")?;

    let summary = upload_directory(
        &cli.directory,
        cli.mode.into(),
        &config,
        client.as_ref(),
        sink,
        Some(cancel),
    )
    .await?;

    report(&summary, cli.events)?;
    Ok(())
}

fn report(summary: &UploadSummary, format: EventFormat) -> Result<()> {
    match format {
        EventFormat::Json => {
            println!("{}", serde_json::to_string(summary)?);
        }
        EventFormat::Log => {
            for file in summary
                .files
                .iter()
                .filter(|f| f.disposition != Disposition::Sent)
            {
                log::warn!(
                    "{:?}: {}{}",
                    file.disposition,
                    file.path.display(),
                    file.detail
                        .as_deref()
                        .map(|d| format!(" ({})", d))
                        .unwrap_or_default()
                );
            }
            if summary.cancelled {
                log::warn!("Upload was cancelled before the queue was exhausted");
            }
        }
    }
    Ok(())
}
