//! Prints the display pipe a `KmsDisplay` would drive
//!
//! ```sh
//! cargo run --example kms_info -- --device /dev/dri/card0 --modes
//! ```

use std::{fs::OpenOptions, os::unix::io::OwnedFd, path::PathBuf};

use clap::Parser;
use smithay_kms_present::{
    backend::drm::{discover, find_kms_node, DrmDevice, DrmDeviceFd, KmsDevice},
    utils::DeviceFd,
};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(about = "Print the connector, crtc and planes used for presentation")]
struct Args {
    /// Device node to inspect, defaults to the first kms capable node
    #[arg(short, long)]
    device: Option<PathBuf>,
    /// List every mode advertised by the connector
    #[arg(short, long)]
    modes: bool,
}

fn main() {
    if let Ok(env_filter) = tracing_subscriber::EnvFilter::try_from_default_env() {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().init();
    }

    let args = Args::parse();
    if let Err(err) = run(args) {
        error!("{}", err);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let path = match args.device {
        Some(path) => path,
        None => find_kms_node()?,
    };
    let file = OpenOptions::new().read(true).write(true).open(&path)?;
    let mut device = DrmDevice::new(DrmDeviceFd::new(DeviceFd::from(OwnedFd::from(file))));

    let atomic = device.enable_atomic();
    info!(?path, atomic, async_flip = device.supports_async_page_flip(), "Opened device");

    let pipe = discover(&device)?;
    println!("device:    {}", path.display());
    println!("connector: {:?}", pipe.connector);
    println!("encoder:   {:?}", pipe.encoder);
    println!("crtc:      {:?}", pipe.crtc);
    let (width, height) = pipe.mode.size();
    println!("mode:      {}x{}@{}", width, height, pipe.mode.vrefresh());
    println!("primary:   {:?}", pipe.primary_plane);
    match device.cursor_size() {
        Ok((width, height)) => println!("cursor size: {}x{}", width, height),
        Err(err) => println!("cursor size: unknown ({})", err),
    }

    if args.modes {
        for mode in &pipe.connector_modes {
            let (width, height) = mode.size();
            println!("  {}x{}@{} {:?}", width, height, mode.vrefresh(), mode.mode_type());
        }
    }
    Ok(())
}
