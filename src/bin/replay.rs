use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use serde_json::json;

use indoor_tracker::recording::RecordWriter;
use indoor_tracker::replay::load_sensor_log;
use indoor_tracker::{AlignmentMethod, ImuSession, OutputRecord, TrackerConfig};

/// Offline dead reckoning of a sensor log, without localization
#[derive(Parser, Debug)]
struct Args {
    /// Sensor log (JSON lines, optionally .gz)
    #[arg(long, conflicts_with = "log_dir")]
    log: Option<PathBuf>,

    /// Directory of sensor logs to batch replay (*.jsonl[.gz])
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Alignment method(s) to run
    #[arg(long, value_enum, default_value_t = Alignment::Both)]
    alignment: Alignment,

    /// Directory for <log>_<method>.txt position records; none written when omitted
    #[arg(long)]
    records_dir: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Alignment {
    Quaternion,
    Gravity,
    Both,
}

impl Alignment {
    fn methods(self) -> Vec<AlignmentMethod> {
        match self {
            Alignment::Quaternion => vec![AlignmentMethod::Quaternion],
            Alignment::Gravity => vec![AlignmentMethod::Gravity],
            Alignment::Both => vec![AlignmentMethod::Quaternion, AlignmentMethod::Gravity],
        }
    }
}

fn run_once(path: &Path, config: &TrackerConfig, args: &Args) -> anyhow::Result<serde_json::Value> {
    let samples = load_sensor_log(path)?;
    let stem = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.trim_end_matches(".gz").trim_end_matches(".jsonl"))
        .unwrap_or("log")
        .to_string();

    let mut runs = Vec::new();
    for method in args.alignment.methods() {
        let config = TrackerConfig {
            alignment: method,
            ..config.clone()
        };
        let mut imu = ImuSession::new(&config);
        let mut writer = match &args.records_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let name = format!("{}_{}.txt", stem, serde_json::to_value(method)?.as_str().unwrap_or("method"));
                Some(RecordWriter::create(&dir.join(name))?)
            }
            None => None,
        };

        let mut positions = 0usize;
        let mut path_length = 0.0;
        let mut last: Option<nalgebra::Vector3<f64>> = None;
        for sample in &samples {
            let records = imu.on_sample(sample);
            for record in &records {
                if let OutputRecord::Position(position) = record {
                    if let Some(prev) = last {
                        path_length += (position.vector() - prev).norm();
                    }
                    last = Some(position.vector());
                    positions += 1;
                }
            }
            if let Some(writer) = writer.as_mut() {
                writer.write_all(&records)?;
            }
        }
        if let Some(mut writer) = writer {
            writer.flush()?;
        }

        let final_position = imu.integrator().position().unwrap_or_default();
        let turned = imu.estimator().turned_angle();
        runs.push(json!({
            "alignment": method,
            "positions": positions,
            "path_length_m": path_length,
            "final_position": [final_position.x, final_position.y, final_position.z],
            "final_velocity": imu.integrator().velocity().map(|v| [v.x, v.y, v.z]),
            "turned_angle_deg": [turned.x, turned.y, turned.z],
        }));
    }

    Ok(json!({
        "log": path.display().to_string(),
        "samples": samples.len(),
        "duration_s": match (samples.first(), samples.last()) {
            (Some(first), Some(last)) => (last.timestamp - first.timestamp) as f64 / 1e9,
            _ => 0.0,
        },
        "runs": runs,
    }))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => TrackerConfig::load(path)?,
        None => TrackerConfig::default(),
    };
    let mut results = Vec::new();

    if let Some(dir) = args.log_dir.as_ref() {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .filter(|path| {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                name.ends_with(".jsonl") || name.ends_with(".jsonl.gz")
            })
            .collect();
        paths.sort();
        for path in paths {
            match run_once(&path, &config, &args) {
                Ok(res) => results.push(res),
                Err(e) => log::error!("Failed {}: {}", path.display(), e),
            }
        }
    } else if let Some(log) = args.log.as_ref() {
        results.push(run_once(log, &config, &args)?);
    } else {
        anyhow::bail!("Provide --log or --log-dir");
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_flag() {
        let args = Args::try_parse_from(["replay", "--log", "a.jsonl"]).unwrap();
        assert_eq!(args.alignment.methods(), vec![AlignmentMethod::Quaternion, AlignmentMethod::Gravity]);

        let args = Args::try_parse_from(["replay", "--log", "a.jsonl", "--alignment", "gravity"]).unwrap();
        assert_eq!(args.alignment.methods(), vec![AlignmentMethod::Gravity]);

        assert!(Args::try_parse_from(["replay", "--log", "a.jsonl", "--alignment", "magnetic"]).is_err());
    }
}
