//! 帧时钟配置。
//!
//! 三缓冲开关在进程范围内只读取一次环境变量，然后作为显式配置注入每个帧时钟，
//! 而不是在调度路径上读取全局状态。

use std::env;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Environment variable that forces double buffering on every output.
pub const DISABLE_TRIPLE_BUFFERING_ENV: &str = "FRAME_PACER_DISABLE_TRIPLE_BUFFERING";

/// Default safety margin added on top of the measured render time.
pub const DEFAULT_MAX_RENDER_TIME_CONSTANT_US: u64 = 1000;

/// Per-output frame clock configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FrameClockConfig {
    /// Never allow a second frame in flight.
    pub disable_triple_buffering: bool,
    /// Fixed safety constant added to the measured max render time, in microseconds.
    pub max_render_time_constant_us: u64,
    /// Variable refresh rate mode.
    pub vrr: bool,
    /// Ignore the previous presentation prediction once it is older than this, in microseconds.
    ///
    /// `None` always compares against the previous prediction.
    pub prediction_staleness_limit_us: Option<u64>,
}

impl Default for FrameClockConfig {
    fn default() -> Self {
        Self {
            disable_triple_buffering: false,
            max_render_time_constant_us: DEFAULT_MAX_RENDER_TIME_CONSTANT_US,
            vrr: false,
            prediction_staleness_limit_us: None,
        }
    }
}

impl FrameClockConfig {
    /// Default configuration with the process-wide environment toggle applied.
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Applies the process-wide environment toggle on top of this configuration.
    pub fn with_env(mut self) -> Self {
        if triple_buffering_disabled_by_env() {
            self.disable_triple_buffering = true;
        }
        self
    }

    /// Loads a JSON configuration file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("error reading {path:?}"))?;
        let config = serde_json::from_str(&contents)
            .with_context(|| format!("error parsing {path:?}"))?;
        Ok(config)
    }
}

/// Returns whether triple buffering is disabled via the environment.
///
/// Read once at first use.
pub fn triple_buffering_disabled_by_env() -> bool {
    static DISABLED: OnceLock<bool> = OnceLock::new();
    *DISABLED.get_or_init(|| {
        let value = env::var_os(DISABLE_TRIPLE_BUFFERING_ENV);
        let disabled = value.as_deref().is_some_and(parse_flag);
        if disabled {
            info!("triple buffering disabled via {DISABLE_TRIPLE_BUFFERING_ENV}");
        }
        disabled
    })
}

fn parse_flag(value: &std::ffi::OsStr) -> bool {
    matches!(value.to_str(), Some("1" | "true" | "yes"))
}
