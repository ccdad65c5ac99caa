use std::{fs, path::Path};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::PideeError;

const DEFAULT_CHIP: &str = "/dev/gpiochip0";
const DEFAULT_POLL_INTERVAL_MS: u64 = 10;
const DEFAULT_BROADCAST_CAPACITY: usize = 64;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    pub unix_socket: Option<String>,
    pub host: Option<String>,
    pub path: String,
}

/// Which of the three pin numbers a feature exposes.
#[derive(Debug, Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum NumberingMode {
    Physical,
    #[default]
    Bcm,
    /// wiringPi numbering.
    Logical,
}

#[derive(Debug, Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FeatureType {
    Button,
    Dip,
    Led,
}

impl FeatureType {
    pub fn direction(&self) -> Direction {
        match self {
            FeatureType::Button | FeatureType::Dip => Direction::Input,
            FeatureType::Led => Direction::Output,
        }
    }
}

#[derive(Debug, Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    Input,
    Output,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeDetect {
    #[default]
    None,
    Rising,
    Falling,
    Both,
}

/// Pin numbers for a feature, keyed by name in [`DeviceConfig::pin_map`].
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct FeatureOverride {
    #[serde(rename = "type")]
    pub feature_type: FeatureType,
    pub physical: u32,
    pub bcm: u32,
    pub logical: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeviceConfig {
    #[serde(default)]
    pub numbering_mode: NumberingMode,
    #[serde(default)]
    pub pin_map: FxHashMap<String, FeatureOverride>,
    #[serde(default = "default_true")]
    pub enable_auto_setup: bool,
    #[serde(default = "default_true")]
    pub enable_events: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            numbering_mode: NumberingMode::default(),
            pin_map: FxHashMap::default(),
            enable_auto_setup: true,
            enable_events: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub http: HttpConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default = "default_chip")]
    pub chip: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, PideeError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| PideeError::Config(format!("Failed to read config: {e}")))?;
        serde_json::from_str(&contents)
            .map_err(|e| PideeError::Config(format!("Invalid config json: {e}")))
    }
}

fn default_true() -> bool {
    true
}

fn default_chip() -> String {
    DEFAULT_CHIP.to_string()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_broadcast_capacity() -> usize {
    DEFAULT_BROADCAST_CAPACITY
}
