//! `babylog watch`: drive the background scheduler in the foreground.
//!
//! Events are printed one JSON object per line. Lines on stdin act as host
//! signals (`suspend`, `resume`, `quit`); end of input or Ctrl-C shuts down.

use babylog_core::{run as run_scheduler, BackgroundScheduler, Config, HostSignal, RunExit, SchedulerConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use super::{open_manager, CliResult};

pub fn run() -> CliResult {
    let config = Config::load_or_default();
    let mut manager = open_manager(&config)?;
    let mut scheduler = BackgroundScheduler::new(SchedulerConfig::from(&config.timers));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let exit = runtime.block_on(async {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let stdin_tx = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let signal = match line.trim() {
                    "suspend" => HostSignal::Suspend,
                    "resume" => HostSignal::Resume,
                    "quit" | "exit" => HostSignal::Shutdown,
                    "" => continue,
                    other => {
                        tracing::warn!("Ignoring unknown command: {other}");
                        continue;
                    }
                };
                if stdin_tx.send(signal).is_err() {
                    return;
                }
            }
            let _ = stdin_tx.send(HostSignal::Shutdown);
        });

        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(HostSignal::Shutdown);
            }
        });

        run_scheduler(&mut manager, &mut scheduler, &mut rx, |event| {
            match serde_json::to_string(event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::error!("Could not encode event: {e}"),
            }
        })
        .await
    });

    // The stdin reader may still be blocked on a read.
    runtime.shutdown_background();

    if exit == RunExit::Idle {
        tracing::info!("No active sessions left");
    }
    Ok(())
}
