use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use indoor_tracker::recording::{RecordWriter, SessionExport};
use indoor_tracker::replay::{load_image_dir, load_sensor_log, merge_timeline, ReplayEvent};
use indoor_tracker::{LocalizationClient, OutputRecord, SubmitOutcome, TrackerConfig, TrackingSession};

#[derive(Parser, Debug)]
#[command(name = "indoor_tracker")]
#[command(about = "Replay a recorded session through the localization server and fuse the trajectory", long_about = None)]
struct Args {
    /// Sensor log (JSON lines, optionally .gz)
    #[arg(long)]
    sensors: PathBuf,

    /// Directory of <timestamp_ns>.jpeg frames
    #[arg(long)]
    images: PathBuf,

    /// JSON config file; defaults apply for anything it omits
    #[arg(long)]
    config: Option<PathBuf>,

    /// Localization server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Localization server port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Camera start timestamp for the latency line; defaults to the first frame
    #[arg(long)]
    video_start: Option<i64>,

    /// Fetch calibration (floorplan and initial transform) before replaying
    #[arg(long, default_value_t = false)]
    calibrate: bool,

    /// Pace events by their timestamps instead of replaying flat out
    #[arg(long, default_value_t = false)]
    realtime: bool,

    /// Output directory
    #[arg(long, default_value = "tracker_sessions")]
    output_dir: PathBuf,

    /// Also write a Rerun .rrd of the fused trajectory
    #[cfg(feature = "rerun")]
    #[arg(long, default_value_t = false)]
    rerun: bool,
}

fn main() -> Result<()> {
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
    config.validate()?;

    let samples = load_sensor_log(&args.sensors)?;
    let frames = load_image_dir(&args.images)?;
    let video_start = args.video_start.or_else(|| frames.first().map(|f| f.timestamp));
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;

    let session = TrackingSession::new(config.clone())?;
    let session_id = session.metadata()?.session_id;
    let client = LocalizationClient::connect(&config)
        .with_context(|| format!("connecting to {}", config.server.address()))?;
    session.start(Some(client))?;

    if args.calibrate {
        let calibration = session.fetch_calibration()?;
        let floorplan_path = args.output_dir.join(format!("{}_floorplan.png", session_id));
        fs::write(&floorplan_path, &calibration.floorplan_image)?;
        log::info!(
            "Floorplan saved to {} (scale {})",
            floorplan_path.display(),
            calibration.floorplan_scale
        );
    }

    let mut writer = RecordWriter::create(&args.output_dir.join(format!("{}_records.txt", session_id)))?;
    if let Some(ts) = video_start {
        if let Some(record) = session.notify_video_start(ts)? {
            writer.write(&record)?;
        }
    }

    #[cfg(feature = "rerun")]
    let mut rerun = if args.rerun {
        let rrd = args.output_dir.join(format!("{}.rrd", session_id));
        Some(indoor_tracker::rerun_logger::RerunLogger::new(&rrd.to_string_lossy())?)
    } else {
        None
    };

    let mut snapshots = Vec::new();
    let events = merge_timeline(samples, frames);
    let first_ts = events.first().map(|e| e.timestamp()).unwrap_or(0);
    let wall_start = Instant::now();

    for event in events {
        if args.realtime {
            let due = Duration::from_nanos((event.timestamp() - first_ts).max(0) as u64);
            if let Some(wait) = due.checked_sub(wall_start.elapsed()) {
                thread::sleep(wait);
            }
        }

        match event {
            ReplayEvent::Sample(sample) => {
                let records: Vec<OutputRecord> = session.push_sample(&sample)?;
                writer.write_all(&records)?;
                #[cfg(feature = "rerun")]
                if let Some(logger) = rerun.as_ref() {
                    for record in &records {
                        if let OutputRecord::Position(position) = record {
                            logger.log_position(position);
                        }
                    }
                }
            }
            ReplayEvent::Image(frame) => {
                if let Some(snapshot) = session.snapshot_at(frame.timestamp)? {
                    snapshots.push(snapshot);
                }
                match session.on_image(frame.timestamp, frame.read()?) {
                    Ok(Some(SubmitOutcome::Completed { localized_timestamp, pose, .. })) => {
                        log::debug!("Frame {} answered: {:?}", localized_timestamp, pose);
                    }
                    Ok(_) => {}
                    Err(e) if e.is_fatal() => return Err(e).context("localization session failed"),
                    Err(e) => log::warn!("Frame {}: {}", frame.timestamp, e),
                }
                let updates = session.drain_updates()?;
                #[cfg(feature = "rerun")]
                if let Some(logger) = rerun.as_mut() {
                    for update in &updates {
                        logger.log_segment(&update.segment);
                    }
                }
                if let Some(update) = updates.last() {
                    log::debug!("Fused up to image {}", update.segment.image_timestamp);
                }
            }
        }
    }
    writer.flush()?;

    let trajectory = session.stop()?;

    // Cycles fused after the last drain only reach the final trajectory
    #[cfg(feature = "rerun")]
    if let (Some(logger), Some(trajectory)) = (rerun.as_mut(), &trajectory) {
        for segment in trajectory.segments.iter().skip(logger.segments_logged()) {
            logger.log_segment(segment);
        }
    }

    let trajectory_len = trajectory.as_ref().map_or(0, |t| t.segments.len());
    let export = SessionExport::new(session.metadata()?, trajectory);
    export.write_json(&args.output_dir.join(format!("{}_session.json", session_id)))?;
    fs::write(
        args.output_dir.join(format!("{}_imu_snapshots.json", session_id)),
        serde_json::to_vec_pretty(&snapshots)?,
    )?;

    log::info!(
        "Done: {} records, {} images, {} fused, {:.0}% localized, {:.0}% dropped",
        writer.written(),
        export.stats.image_count,
        trajectory_len,
        export.stats.localization_rate * 100.0,
        export.stats.drop_rate * 100.0
    );
    Ok(())
}
