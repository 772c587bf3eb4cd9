//! Upload command implementation.

use std::fs;
use std::time::Duration;

use anyhow::{Context, Result};
use bleota::{
    CancelToken, LoopbackDevice, Progress, Transport, UploadConfig, UploadSession, UploadSummary,
    plan,
};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Config;
use crate::{Cli, UploadArgs, use_fancy_output};

/// Merge config-file settings with command-line overrides.
pub(crate) fn upload_config(config: &Config, args: &UploadArgs) -> bleota::Result<UploadConfig> {
    let mut upload = config.upload_config()?;
    if let Some(kind) = args.kind {
        upload = upload.with_kind(kind.into());
    }
    if let Some(ms) = args.timeout_ms {
        upload = upload.with_ack_timeout(Duration::from_millis(ms));
    }
    if let Some(size) = args.packet_size {
        upload = upload.with_packet_size(size);
    }
    if let Some(retries) = args.retries {
        upload = upload
            .with_command_retries(retries)
            .with_sector_retries(retries);
    }
    upload.validate()?;
    Ok(upload)
}

fn progress_bar(cli: &Cli, total: usize) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total as u64);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            )
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

async fn run_session<T: Transport>(
    cli: &Cli,
    transport: &mut T,
    upload: UploadConfig,
    image: &[u8],
    cancel: CancelToken,
) -> Result<UploadSummary> {
    let pb = progress_bar(cli, image.len());
    let mut session = UploadSession::new(transport, upload);
    let outcome = session
        .upload(
            image,
            |p: &Progress| {
                pb.set_position(p.written as u64);
                pb.set_message(format!("{}% {:.1} kB/s", p.percent, p.throughput / 1024.0));
            },
            cancel,
        )
        .await;

    match &outcome {
        Ok(_) => pb.finish_and_clear(),
        Err(_) => pb.abandon(),
    }
    Ok(outcome?)
}

/// Upload command implementation.
pub(crate) async fn cmd_upload(
    cli: &Cli,
    config: &mut Config,
    args: &UploadArgs,
    cancel: CancelToken,
) -> Result<()> {
    let image = fs::read(&args.file)
        .with_context(|| format!("failed to read image {}", args.file.display()))?;
    let upload = upload_config(config, args)?;
    let layout = plan(&image, upload.packet_size)?;

    if !cli.quiet {
        eprintln!(
            "{} {} ({} bytes, {} sectors, {} packets, {} image)",
            style("📦").cyan(),
            args.file.display(),
            layout.total,
            layout.sectors.len(),
            layout.packet_count(),
            upload.kind
        );
    }

    let summary = if args.dry_run {
        let mut device = LoopbackDevice::new();
        let summary = run_session(cli, &mut device, upload, &image, cancel).await?;
        if device.received() != image.as_slice() {
            anyhow::bail!("loopback receiver reassembled a different image");
        }
        summary
    } else {
        let mut device = super::connect(cli, config).await?;
        let outcome = run_session(cli, &mut device, upload, &image, cancel).await;
        if let Err(e) = device.disconnect().await {
            log::debug!("Disconnect failed: {e}");
        }
        outcome?
    };

    if !cli.quiet {
        let label = if args.dry_run {
            "Dry run complete"
        } else {
            "Upload complete"
        };
        eprintln!(
            "{} {label}: {} bytes, {} packets in {:.2}s ({:.1} kB/s)",
            style("✓").green(),
            summary.bytes,
            summary.packets,
            summary.elapsed.as_secs_f64(),
            summary.progress.throughput / 1024.0
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> UploadArgs {
        let mut argv = vec!["bleota", "upload", "fw.bin"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            crate::Commands::Upload(args) => args,
            _ => panic!("Expected Upload command"),
        }
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = Config::default();
        config.upload.timeout_ms = Some(9000);
        config.upload.packet_size = Some(128);

        let upload = upload_config(&config, &args(&["--packet-size", "244", "--retries", "1"])).unwrap();
        assert_eq!(upload.ack_timeout, Duration::from_millis(9000));
        assert_eq!(upload.packet_size, 244);
        assert_eq!(upload.command_retries, 1);
        assert_eq!(upload.sector_retries, 1);
    }

    #[test]
    fn test_invalid_packet_size_is_config_error() {
        let err = upload_config(&Config::default(), &args(&["--packet-size", "4"])).unwrap_err();
        assert!(matches!(err, bleota::Error::InvalidConfig(_)));
    }
}
