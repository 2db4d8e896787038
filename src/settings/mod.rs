use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, value_parser};
use glam::Vec3;
use itertools::Itertools;

use crate::streaming::cache::DEFAULT_SWEEP_INTERVAL;
use crate::streaming::throttled_queue::QueueConfig;

#[derive(Parser, Debug)]
#[command(name = "Sargerust Streaming")]
#[command(version)]
#[command(about = "Streams world map objects, their groups and doodads from an extracted data directory")]
pub struct CliArgs {
    #[arg(long, env = "SARGERUST_DATA_DIR", default_value_t = default_data_dir())]
    pub data_dir: String,

    /// Number of decode workers, defaults to the available parallelism.
    #[arg(long, env = "SARGERUST_WORKERS")]
    pub workers: Option<usize>,

    #[arg(long, env = "SARGERUST_SWEEP_INTERVAL_MS", default_value_t = DEFAULT_SWEEP_INTERVAL.as_millis() as u64)]
    pub sweep_interval_ms: u64,

    #[arg(long, default_value_t = 0)]
    pub doodad_set: u16,

    #[arg(long, default_value = "(0, 0, 0)", value_parser = value_parser!(Vector3))]
    pub position: Vector3,

    /// Give up waiting for the streamer to settle after this many milliseconds.
    #[arg(long, default_value_t = 60_000)]
    pub timeout_ms: u64,

    #[arg(required = true, num_args = 1..)]
    pub wmo_paths: Vec<String>,
}

pub fn default_data_dir() -> String {
    std::env::current_dir()
        .unwrap_or_default()
        .join("_data")
        .to_string_lossy()
        .to_string()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl From<Vector3> for Vec3 {
    fn from(value: Vector3) -> Self {
        Vec3::new(value.x, value.y, value.z)
    }
}

fn trim_brackets(input: &str) -> &str {
    let mut chars = input.chars();
    chars.next(); // skip first
    chars.next_back(); // skip last
    chars.as_str()
}

impl FromStr for Vector3 {
    type Err = String;

    // (-a, b, c)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let string: String = s.chars().filter(|&c| !c.is_whitespace()).collect();
        if !string.starts_with('(') || !string.ends_with(')') {
            return Err("Missing start or end bracket".to_string());
        }

        let splits = trim_brackets(string.as_str()).split(',').collect_vec();
        if splits.len() != 3 {
            return Err(format!(
                "Comma splitting resulted in {} splits, not 3!",
                splits.len()
            ));
        }

        let components: Vec<f32> = splits
            .iter()
            .map(|&split| {
                split
                    .parse::<f32>()
                    .map_err(|err| format!("Failed to parse component {}: {}", split, err))
            })
            .collect::<Result<_, _>>()?;

        Ok(Vector3 {
            x: components[0],
            y: components[1],
            z: components[2],
        })
    }
}

/// Tunables of the streamer, the defaults are what the client runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingSettings {
    pub worker_count: usize,
    pub sweep_interval: Duration,
    pub group_queue: QueueConfig,
    pub doodad_queue: QueueConfig,
    /// Jobs running for longer than this are reported, they are never aborted.
    pub stall_warning_threshold: Duration,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            group_queue: QueueConfig::new(Duration::from_millis(1), 1.0 / 10.0, 2),
            doodad_queue: QueueConfig::new(Duration::from_millis(1), 1.0 / 20.0, 2),
            stall_warning_threshold: Duration::from_secs(30),
        }
    }
}

impl StreamingSettings {
    pub fn from_args(args: &CliArgs) -> anyhow::Result<Self> {
        let settings = Self {
            worker_count: args.workers.unwrap_or_else(default_worker_count),
            sweep_interval: Duration::from_millis(args.sweep_interval_ms),
            ..Default::default()
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_count == 0 {
            bail!("At least one streaming worker is required");
        }

        if self.sweep_interval.is_zero() {
            bail!("The sweep interval must not be zero");
        }

        self.group_queue
            .validate()
            .context("Invalid group queue configuration")?;
        self.doodad_queue
            .validate()
            .context("Invalid doodad queue configuration")?;
        Ok(())
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(4)
}
