//! Launch parameter parsing for the simulator.

use std::{fmt, path::PathBuf};

use clap::Parser;
use landmark::Config;

/// Default starting latitude (Agra).
const DEFAULT_LAT: f64 = 27.1751;
/// Default starting longitude (Agra).
const DEFAULT_LON: f64 = 78.0421;
/// Default number of frames to run.
const DEFAULT_FRAMES: u32 = 300;
/// Default simulated analysis latency in milliseconds.
const DEFAULT_MOCK_DELAY_MS: u64 = 250;
/// Default number of scattered places offered by the mock service.
const DEFAULT_PLACES: usize = 5;

#[derive(Parser, Debug)]
#[command(about = "Headless simulated landmark session")]
struct CliArgs {
    /// Device latitude in degrees.
    #[arg(long, default_value_t = DEFAULT_LAT)]
    lat: f64,

    /// Device longitude in degrees.
    #[arg(long, default_value_t = DEFAULT_LON)]
    lon: f64,

    /// Number of frames to simulate.
    #[arg(long, default_value_t = DEFAULT_FRAMES)]
    frames: u32,

    /// JSON file with configuration overrides.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Place categories to show as layer labels (comma-separated).
    #[arg(long, value_delimiter = ',')]
    categories: Vec<String>,

    /// Simulated analysis latency in milliseconds.
    #[arg(long, default_value_t = DEFAULT_MOCK_DELAY_MS)]
    mock_delay_ms: u64,

    /// Number of places the mock service scatters around the device.
    #[arg(long, default_value_t = DEFAULT_PLACES)]
    places: usize,

    /// Use the HTTP backend at this address instead of the mock service.
    #[arg(long)]
    backend: Option<String>,
}

/// Launch parameters for the simulator.
#[derive(Debug)]
pub struct LaunchParams {
    /// Device latitude in degrees.
    pub lat: f64,
    /// Device longitude in degrees.
    pub lon: f64,
    /// Number of frames to simulate.
    pub frames: u32,
    /// Session configuration.
    pub config: Config,
    /// Simulated analysis latency in milliseconds.
    pub mock_delay_ms: u64,
    /// Number of places the mock service scatters around the device.
    pub places: usize,
    /// HTTP backend address, if any.
    pub backend: Option<String>,
}

/// Errors from loading launch parameters.
#[derive(Debug)]
pub enum ParamsError {
    /// The config file could not be read.
    Io {
        /// The file that failed.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },
    /// The config file was not valid JSON.
    Json {
        /// The file that failed.
        path: PathBuf,
        /// The underlying error.
        source: serde_json::Error,
    },
}

impl fmt::Display for ParamsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamsError::Io { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            ParamsError::Json { path, source } => {
                write!(f, "failed to parse {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ParamsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParamsError::Io { source, .. } => Some(source),
            ParamsError::Json { source, .. } => Some(source),
        }
    }
}

/// Parse a JSON config document. Missing fields keep their defaults.
pub fn parse_config(json: &str) -> Result<Config, serde_json::Error> {
    serde_json::from_str(json)
}

fn load_config(path: Option<PathBuf>, categories: Vec<String>) -> Result<Config, ParamsError> {
    let mut config = match path {
        Some(path) => {
            let json = std::fs::read_to_string(&path).map_err(|source| ParamsError::Io {
                path: path.clone(),
                source,
            })?;
            parse_config(&json).map_err(|source| ParamsError::Json { path, source })?
        }
        None => Config::default(),
    };
    if !categories.is_empty() {
        config.categories = categories;
    }
    Ok(config)
}

/// Parse launch parameters from the command line.
pub fn parse() -> Result<LaunchParams, ParamsError> {
    let args = CliArgs::parse();
    Ok(LaunchParams {
        lat: args.lat,
        lon: args.lon,
        frames: args.frames,
        config: load_config(args.config, args.categories)?,
        mock_delay_ms: args.mock_delay_ms,
        places: args.places,
        backend: args.backend,
    })
}
