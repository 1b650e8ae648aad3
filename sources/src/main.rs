use scan_resolve_common::config::Config;
use scan_resolve_common::source::SourceOpener;
use scan_resolve_sources::{ConfiguredSource, ReplayWriter};
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Record the configured live camera into a replay log.
///
/// Usage: `scan-record [config.toml] [frames.log] [max_frames]`
#[tokio::main]
async fn main() {
    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let output_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("frames.log"));
    let max_frames: Option<u64> = args.next().and_then(|n| n.parse().ok());

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let opener = ConfiguredSource::new(config.source.clone());
    if !opener.is_live() {
        error!("scan-record needs a live source, set source.mode to 'mjpeg' or 'polling'");
        std::process::exit(1);
    }

    info!(
        mode = config.source.mode,
        url = %config.source.url,
        output = %output_path.display(),
        max_frames,
        "starting frame recorder"
    );

    let mut source = match opener.open().await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to open camera source");
            std::process::exit(1);
        }
    };
    let mut writer = match ReplayWriter::create(&output_path).await {
        Ok(w) => w,
        Err(e) => {
            error!(error = %e, "failed to create replay log");
            std::process::exit(1);
        }
    };

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut recorded: u64 = 0;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted, finishing replay log");
                break;
            }
            next = source.next() => match next {
                Ok(Some(frame)) => {
                    if let Err(e) = writer.append(&frame).await {
                        error!(error = %e, "failed to append frame");
                        break;
                    }
                    recorded += 1;
                    if recorded % 100 == 0 {
                        info!(recorded, "frames recorded");
                    }
                    if max_frames.is_some_and(|max| recorded >= max) {
                        break;
                    }
                }
                Ok(None) => {
                    warn!("camera stream ended");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "camera source failed");
                    break;
                }
            }
        }
    }

    source.close().await;
    match writer.finish().await {
        Ok(frames) => info!(frames, output = %output_path.display(), "replay log written"),
        Err(e) => {
            error!(error = %e, "failed to flush replay log");
            std::process::exit(1);
        }
    }
}
