//! Configuration Vault – reads/writes `~/.armos/config.toml`.

use armos_runtime::{DEFAULT_CONTROL_HZ, ExecutorTimings};
use armos_types::ArmGeometry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How servo commands travel over the serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
    /// Checksummed 4-byte packets, no reply.
    #[default]
    FireAndForget,
    /// Command packets answered with an `Executing:` line.
    Acknowledged,
}

impl std::fmt::Display for LinkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkMode::FireAndForget => write!(f, "fire_and_forget"),
            LinkMode::Acknowledged => write!(f, "acknowledged"),
        }
    }
}

/// Servo dwell times, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DwellConfig {
    pub grab_ms: u64,
    pub lift_ms: u64,
    pub place_settle_ms: u64,
    pub place_release_ms: u64,
    pub stop_per_joint_ms: u64,
}

impl Default for DwellConfig {
    fn default() -> Self {
        let t = ExecutorTimings::default();
        Self {
            grab_ms: t.grab.as_millis() as u64,
            lift_ms: t.lift.as_millis() as u64,
            place_settle_ms: t.place_settle.as_millis() as u64,
            place_release_ms: t.place_release.as_millis() as u64,
            stop_per_joint_ms: t.stop_per_joint.as_millis() as u64,
        }
    }
}

impl From<DwellConfig> for ExecutorTimings {
    fn from(d: DwellConfig) -> Self {
        Self {
            grab: Duration::from_millis(d.grab_ms),
            lift: Duration::from_millis(d.lift_ms),
            place_settle: Duration::from_millis(d.place_settle_ms),
            place_release: Duration::from_millis(d.place_release_ms),
            stop_per_joint: Duration::from_millis(d.stop_per_joint_ms),
        }
    }
}

/// Scene replayed when `simulate = true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Label of the single object the fake detector reports.
    pub object: String,
    /// Pixel position of that object.
    pub pixel: [f64; 2],
    /// Constant range reading (cm).
    pub range_cm: f32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            object: "apple".to_string(),
            // About (-12, 0, 0) cm in the arm frame with the default geometry.
            pixel: [493.0, 240.0],
            range_cm: 30.0,
        }
    }
}

/// Persisted operator configuration stored in `~/.armos/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial device of the actuator controller.
    pub serial_port: String,
    pub baud_rate: u32,
    pub link_mode: LinkMode,

    /// Pause after opening the port while the controller resets.
    pub handshake_settle_ms: u64,
    /// How long to wait for the `Ready.` banner.
    pub handshake_timeout_ms: u64,

    /// Reflex loop rate.
    pub control_hz: f64,
    pub range_poll_ms: u64,

    /// UDP port an external range sensor sends readings to.  Used with the
    /// fire-and-forget link, whose firmware cannot answer range requests.
    pub range_port: u16,
    /// Readings older than this count as a sensor fault.
    pub range_max_age_ms: u64,

    /// UDP port the external detector sends detection frames to.
    pub detection_port: u16,
    /// Frames older than this count as "nothing seen".
    pub detection_max_age_ms: u64,

    /// Base URL of an OpenAI-compatible server (Ollama by default).
    pub llm_url: String,
    pub model: String,
    /// Bearer key for hosted endpoints (stored as plain text – the file is
    /// created owner-only).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_key: String,

    /// Replace serial and UDP hardware with in-process fakes.
    pub simulate: bool,

    pub dwell: DwellConfig,
    pub sim: SimConfig,
    pub geometry: ArmGeometry,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("serial_port", &self.serial_port)
            .field("baud_rate", &self.baud_rate)
            .field("link_mode", &self.link_mode)
            .field("handshake_settle_ms", &self.handshake_settle_ms)
            .field("handshake_timeout_ms", &self.handshake_timeout_ms)
            .field("control_hz", &self.control_hz)
            .field("range_poll_ms", &self.range_poll_ms)
            .field("range_port", &self.range_port)
            .field("range_max_age_ms", &self.range_max_age_ms)
            .field("detection_port", &self.detection_port)
            .field("detection_max_age_ms", &self.detection_max_age_ms)
            .field("llm_url", &self.llm_url)
            .field("model", &self.model)
            .field(
                "api_key",
                if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("simulate", &self.simulate)
            .field("dwell", &self.dwell)
            .field("sim", &self.sim)
            .field("geometry", &self.geometry)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            link_mode: LinkMode::default(),
            handshake_settle_ms: 2_000,
            handshake_timeout_ms: 15_000,
            control_hz: DEFAULT_CONTROL_HZ,
            range_poll_ms: 200,
            range_port: 5006,
            range_max_age_ms: 500,
            detection_port: 5005,
            detection_max_age_ms: 500,
            llm_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            api_key: String::new(),
            simulate: false,
            dwell: DwellConfig::default(),
            sim: SimConfig::default(),
            geometry: ArmGeometry::default(),
        }
    }
}

impl Config {
    pub fn handshake_settle(&self) -> Duration {
        Duration::from_millis(self.handshake_settle_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn range_poll_period(&self) -> Duration {
        Duration::from_millis(self.range_poll_ms)
    }

    pub fn range_max_age(&self) -> Duration {
        Duration::from_millis(self.range_max_age_ms)
    }

    pub fn detection_max_age(&self) -> Duration {
        Duration::from_millis(self.detection_max_age_ms)
    }

    pub fn timings(&self) -> ExecutorTimings {
        self.dwell.into()
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.control_hz.is_finite() && self.control_hz > 0.0) {
            return Err(format!("control_hz must be positive, got {}", self.control_hz));
        }
        if self.range_poll_ms == 0 {
            return Err("range_poll_ms must be at least 1".to_string());
        }
        if self.baud_rate == 0 {
            return Err("baud_rate must be non-zero".to_string());
        }
        self.geometry.validate().map_err(|e| e.to_string())
    }
}

/// Return the path to `~/.armos/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".armos").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path, applying environment overrides.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `ARMOS_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ARMOS_SERIAL_PORT` | `serial_port` |
/// | `ARMOS_LLM_URL` | `llm_url` |
/// | `ARMOS_MODEL` | `model` |
/// | `ARMOS_API_KEY` | `api_key` |
/// | `ARMOS_SIMULATE` | `simulate` (`1`/`true`/`yes`) |
/// | `ARMOS_CONTROL_HZ` | `control_hz` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ARMOS_SERIAL_PORT") {
        cfg.serial_port = v;
    }
    if let Ok(v) = std::env::var("ARMOS_LLM_URL") {
        cfg.llm_url = v;
    }
    if let Ok(v) = std::env::var("ARMOS_MODEL") {
        cfg.model = v;
    }
    if let Ok(v) = std::env::var("ARMOS_API_KEY") {
        cfg.api_key = v;
    }
    if let Ok(v) = std::env::var("ARMOS_SIMULATE")
        && let Some(flag) = parse_flag(&v)
    {
        cfg.simulate = flag;
    }
    if let Ok(v) = std::env::var("ARMOS_CONTROL_HZ")
        && let Ok(hz) = v.trim().parse::<f64>()
        && hz.is_finite()
        && hz > 0.0
    {
        cfg.control_hz = hz;
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Save the config to disk, creating `~/.armos/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner only (rwx------).
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Owner read/write only (rw-------); the file may hold an API key.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
