use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use indoor_tracker::config::ImageConfig;
use indoor_tracker::image_prep::prepare_image;
use indoor_tracker::protocol::{
    read_calibration_reply, read_pose_reply, write_calibration_request, write_localization_request,
    write_termination,
};
use indoor_tracker::replay::load_image_dir;
use indoor_tracker::{parse_pose, LocalizationReply, TrackerConfig};

/// Send every frame in a directory to the localization server, one at a time
#[derive(Parser, Debug)]
struct Args {
    /// Directory of <timestamp_ns>.jpeg frames
    images: PathBuf,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Localization server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Localization server port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Fetch and save the floorplan calibration first
    #[arg(long)]
    calibrate: Option<PathBuf>,

    /// Send images as they are, without resizing
    #[arg(long, default_value_t = false)]
    raw: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TrackerConfig::load(path)?,
        None => TrackerConfig::default(),
    };
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    let image_config = ImageConfig {
        resize: !args.raw,
        ..config.image.clone()
    };
    let max_frame = config.server.max_frame_bytes;

    let frames = load_image_dir(&args.images)?;
    let mut stream = std::net::TcpStream::connect(config.server.address())
        .with_context(|| format!("connecting to {}", config.server.address()))?;
    stream.set_read_timeout(config.server.io_timeout())?;
    log::info!("Connected to {}", config.server.address());

    if let Some(path) = &args.calibrate {
        write_calibration_request(&mut stream)?;
        let calibration = read_calibration_reply(&mut stream, max_frame)?;
        std::fs::write(path, &calibration.floorplan_image)?;
        println!("calibration scale={} transform={:?}", calibration.floorplan_scale, calibration.transform);
    }

    let mut localized = 0;
    for frame in &frames {
        let jpeg = prepare_image(&frame.read()?, &image_config)?;
        write_localization_request(&mut stream, &jpeg)?;
        match read_pose_reply(&mut stream, max_frame)? {
            LocalizationReply::NoMatch => println!("{} None", frame.timestamp),
            LocalizationReply::Matched(text) => match parse_pose(&text) {
                Ok(pose) => {
                    localized += 1;
                    println!("{} {:?}", frame.timestamp, pose.values());
                }
                Err(e) => println!("{} unparseable: {}", frame.timestamp, e),
            },
        }
    }

    write_termination(&mut stream)?;
    log::info!("Localized {}/{} frames", localized, frames.len());
    Ok(())
}
