use clap::Parser;
use cncpilot::{init_logging, vid_pid_matcher, Client, Controller, GrblDriver, PendantDriver};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// USB vendor/product IDs of the GRBL controller board.
const GRBL_VID_PID: (&str, &str) = ("2a03", "0043");
/// USB vendor/product IDs of the Arduino jog pendant.
const PENDANT_VID_PID: (&str, &str) = ("1a86", "7523");

#[derive(Parser)]
#[command(name = "cncpilot", about = "Host-side CNC controller over SPJS")]
struct Args {
    /// Set the SPJS connection URL.
    #[arg(long, default_value = "ws://localhost:8989/ws")]
    spjs: String,

    /// Run the shell in fullscreen.
    #[arg(long)]
    fullscreen: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging()?;
    debug!(spjs = %args.spjs, fullscreen = args.fullscreen, "starting");

    let client = Client::new(&args.spjs);

    let grbl = Arc::new(GrblDriver::new());
    let binding = client.register_driver(
        vid_pid_matcher(GRBL_VID_PID.0, GRBL_VID_PID.1),
        grbl.clone(),
    );
    let controller = Arc::new(Controller::new(binding));

    let pendant = Arc::new(PendantDriver::new(controller.clone()));
    client.register_driver(
        vid_pid_matcher(PENDANT_VID_PID.0, PENDANT_VID_PID.1),
        pendant,
    );

    // machine status to the log
    if let Some(mut status_rx) = controller.status() {
        tokio::spawn(async move {
            while status_rx.changed().await.is_ok() {
                let status = status_rx.borrow_and_update().clone();
                info!(
                    state = %status.status,
                    wpos = ?status.wpos,
                    mpos = ?status.mpos,
                    feed = status.feed,
                    spindle = status.spindle,
                    "machine status"
                );
            }
        });
    }

    // connection transitions to the log
    {
        let controller = controller.clone();
        tokio::spawn(async move {
            let mut connected = false;
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tick.tick().await;
                let now = controller.connected();
                if now != connected {
                    connected = now;
                    info!(connected, "GRBL link");
                }
            }
        });
    }

    info!("cncpilot running; Ctrl-C to exit");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
