//! Console monitor for a tracking device.
//!
//! ```text
//! cargo run --example monitor -- tcp://10.0.0.20:15245 1
//! cargo run --example monitor -- bridge.yaml
//! RUST_LOG=cranelink=debug cargo run --example monitor -- udp://0.0.0.0:15245?broadcast
//! ```
//!
//! The first argument is an endpoint or a YAML config file, the second the device
//! id to follow (default 1). Prints the adapted camera pose at 5 Hz and a status
//! line every two seconds until Ctrl-C.

use anyhow::{Context, Result};
use cranelink::adapters::{CameraPose, CameraPoseSettings};
use cranelink::{Bridge, BridgeConfig, DeviceId, Endpoint, UpdateRate};
use futures::StreamExt;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn load_config(arg: Option<String>) -> Result<BridgeConfig> {
    let Some(arg) = arg else {
        return Ok(BridgeConfig::default());
    };
    if arg.ends_with(".yaml") || arg.ends_with(".yml") {
        return BridgeConfig::from_file(&arg).with_context(|| format!("loading {arg}"));
    }
    let endpoint: Endpoint = arg.parse().with_context(|| format!("parsing endpoint {arg}"))?;
    Ok(BridgeConfig::for_endpoint(endpoint))
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cranelink=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = std::env::args().skip(1);
    let config = load_config(args.next())?;
    let device_id = args.next().map(|id| id.parse()).transpose().context("device id")?;
    let device = DeviceId(device_id.unwrap_or(1));

    let bridge = Bridge::start(config).await?;
    let mut poses = bridge
        .subscribe_device(device)?
        .adapt::<CameraPose>(CameraPoseSettings::default(), UpdateRate::Max(5));
    let mut states = bridge.state_updates();
    let mut report = tokio::time::interval(Duration::from_secs(2));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(pose) = poses.next() => {
                println!(
                    "#{:<8} tc={} loc={:?} rot={:?} focal={:?}",
                    pose.sequence,
                    pose.timecode.map(|tc| tc.to_string()).unwrap_or_else(|| "--".into()),
                    pose.location,
                    pose.rotator,
                    pose.focal_length,
                );
            }
            Some(state) = states.next() => println!("connection: {state}"),
            _ = report.tick() => {
                let status = bridge.status();
                println!(
                    "status: {} frames={} rejected={} errors={} reconnects={} age={:?}",
                    status.connection_state,
                    status.frames_decoded,
                    status.frames_rejected,
                    status.decode_errors,
                    status.reconnect_attempts,
                    status.last_frame_age(),
                );
            }
        }
    }

    bridge.stop().await;
    Ok(())
}
