//! Battery telemetry monitor.

use anyhow::Result;
use bleota::transport::event_slot;
use bleota::{CancelToken, Channel, Event, NotificationSink, Transport};
use console::style;
use tokio::time::Instant;

use crate::Cli;
use crate::config::Config;

/// Monitor command implementation.
///
/// Prints one line per battery notification until Ctrl-C or `count` samples.
pub(crate) async fn cmd_monitor(
    cli: &Cli,
    config: &mut Config,
    count: Option<usize>,
    mut cancel: CancelToken,
) -> Result<()> {
    let mut device = super::connect(cli, config).await?;
    if !device.has_battery() {
        device.disconnect().await?;
        return Err(bleota::Error::Unsupported(
            "device does not expose the battery characteristic".into(),
        )
        .into());
    }

    let (tx, mut events) = event_slot();
    device
        .subscribe(NotificationSink::new(Channel::Battery, tx))
        .await?;
    if !cli.quiet {
        eprintln!(
            "{} Monitoring battery of {} (Ctrl-C to stop)",
            style("🔋").green(),
            device.name()
        );
    }

    let started = Instant::now();
    let mut samples = 0;
    while count.is_none_or(|limit| samples < limit) {
        tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(Event::Telemetry(status)) => {
                    samples += 1;
                    println!("{:>8.1}s  {status}", started.elapsed().as_secs_f64());
                },
                Some(_) => {},
                None => break,
            },
        }
    }

    device.disconnect().await?;
    if !cli.quiet {
        eprintln!("{} {samples} samples", style("✓").green());
    }
    Ok(())
}
