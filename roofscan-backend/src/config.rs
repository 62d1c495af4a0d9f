use crate::assessor::SeverityPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Which service supplies the damage geometry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorBackend {
    /// Hosted object-detection model
    #[default]
    Roboflow,
    /// The vision model, prompted for boxes
    Vision,
}

impl FromStr for DetectorBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "roboflow" => Ok(DetectorBackend::Roboflow),
            "vision" => Ok(DetectorBackend::Vision),
            other => Err(format!("unknown detector backend: {}", other)),
        }
    }
}

impl fmt::Display for DetectorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DetectorBackend::Roboflow => "roboflow",
            DetectorBackend::Vision => "vision",
        })
    }
}

/// Timeouts and image limits for one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub detector: DetectorBackend,
    /// Upper bound on the detector call, in seconds
    #[serde(default = "default_detector_timeout_secs")]
    pub detector_timeout_secs: u64,
    /// Upper bound on each per-region reasoning call, in seconds
    #[serde(default = "default_region_timeout_secs")]
    pub region_timeout_secs: u64,
    /// Upper bound on the aggregate narrative call, in seconds
    #[serde(default = "default_narrative_timeout_secs")]
    pub narrative_timeout_secs: u64,
    /// Longest side of the copy sent to the reasoning model
    #[serde(default = "default_vision_max_dimension")]
    pub vision_max_dimension: u32,
    #[serde(default)]
    pub severity_policy: SeverityPolicy,
}

fn default_detector_timeout_secs() -> u64 {
    30
}

fn default_region_timeout_secs() -> u64 {
    45
}

fn default_narrative_timeout_secs() -> u64 {
    30
}

fn default_vision_max_dimension() -> u32 {
    1024
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detector: DetectorBackend::default(),
            detector_timeout_secs: default_detector_timeout_secs(),
            region_timeout_secs: default_region_timeout_secs(),
            narrative_timeout_secs: default_narrative_timeout_secs(),
            vision_max_dimension: default_vision_max_dimension(),
            severity_policy: SeverityPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            detector: env_or("DETECTOR_BACKEND", defaults.detector),
            detector_timeout_secs: env_or("DETECTOR_TIMEOUT_SECS", defaults.detector_timeout_secs),
            region_timeout_secs: env_or("REGION_TIMEOUT_SECS", defaults.region_timeout_secs),
            narrative_timeout_secs: env_or("NARRATIVE_TIMEOUT_SECS", defaults.narrative_timeout_secs),
            vision_max_dimension: env_or("VISION_MAX_DIMENSION", defaults.vision_max_dimension),
            severity_policy: SeverityPolicy {
                moderate_escalation_count: env_or(
                    "MODERATE_ESCALATION_COUNT",
                    defaults.severity_policy.moderate_escalation_count,
                ),
            },
        }
    }

    pub fn detector_timeout(&self) -> Duration {
        Duration::from_secs(self.detector_timeout_secs)
    }

    pub fn region_timeout(&self) -> Duration {
        Duration::from_secs(self.region_timeout_secs)
    }

    pub fn narrative_timeout(&self) -> Duration {
        Duration::from_secs(self.narrative_timeout_secs)
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// CORS origins; empty allows any origin
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// Largest decoded upload accepted
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    [
        "http://localhost:5173",
        "http://127.0.0.1:5173",
        "http://localhost:8080",
        "http://127.0.0.1:8080",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_image_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            allowed_origins: default_allowed_origins(),
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .map(|origins| parse_origins(&origins))
                .unwrap_or(defaults.allowed_origins),
            max_image_bytes: defaults.max_image_bytes,
        }
    }

    /// Request body limit: base64 inflates the image by 4/3, plus JSON framing
    pub fn body_limit(&self) -> usize {
        self.max_image_bytes / 3 * 4 + 64 * 1024
    }
}

fn parse_origins(origins: &str) -> Vec<String> {
    origins
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read and parse an env var, keeping the default (with a warning) when unparsable
fn env_or<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring invalid {}={:?}, using {}", key, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}
