//! Configuration file – reads/writes `~/.duobot/config.toml`.
//!
//! Every section falls back to the stock robot, so a missing file, an empty
//! file and a file with only `[server]` all produce a working setup.

use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use duobot_types::RoverError;
use duobot_types::config::{ArmConfig, AvoidanceConfig, DrivePinout, MotionTiming, SensorPinout};
use serde::{Deserialize, Serialize};

/// Which pin implementation drives the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-memory pins with a configurable obstacle distance.
    #[default]
    Sim,
    /// Raspberry Pi GPIO (requires the `rpi` feature).
    Rpi,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Sim => write!(f, "sim"),
            Backend::Rpi => write!(f, "rpi"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = RoverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sim" => Ok(Backend::Sim),
            "rpi" => Ok(Backend::Rpi),
            other => Err(RoverError::Config(format!("unknown backend '{other}'"))),
        }
    }
}

/// `[server]` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    #[serde(default = "default_arm_port")]
    pub arm_port: u16,
    #[serde(default = "default_chassis_port")]
    pub chassis_port: u16,
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_arm_port() -> u16 {
    duobot_server::DEFAULT_ARM_PORT
}
fn default_chassis_port() -> u16 {
    duobot_server::DEFAULT_CHASSIS_PORT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            arm_port: default_arm_port(),
            chassis_port: default_chassis_port(),
        }
    }
}

/// `[hardware]` table.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub backend: Backend,
    /// Obstacle distance reported by the `sim` backend.  Absent means
    /// nothing in range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sim_distance_cm: Option<f64>,
    pub drive: DrivePinout,
    pub sensors: SensorPinout,
}

/// Persisted configuration stored in `~/.duobot/config.toml`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub hardware: HardwareConfig,
    pub arm: ArmConfig,
    pub motion: MotionTiming,
    pub avoidance: AvoidanceConfig,
}

/// Return the config file path: `DUOBOT_CONFIG` if set, otherwise
/// `~/.duobot/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("DUOBOT_CONFIG")
        && !path.is_empty()
    {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".duobot").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, RoverError> {
    load_from(&config_path())
}

/// Load the config file if present, fall back to defaults otherwise, then
/// apply `DUOBOT_*` overrides.
pub fn load_or_default() -> Result<Config, RoverError> {
    let mut cfg = load()?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, RoverError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        RoverError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| RoverError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `DUOBOT_*` environment variable overrides to `cfg`.  Unparseable
/// values are ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `DUOBOT_BIND` | `server.bind` |
/// | `DUOBOT_ARM_PORT` | `server.arm_port` |
/// | `DUOBOT_CHASSIS_PORT` | `server.chassis_port` |
/// | `DUOBOT_BACKEND` | `hardware.backend` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("DUOBOT_BIND")
        && let Ok(addr) = v.parse::<IpAddr>()
    {
        cfg.server.bind = addr;
    }
    if let Ok(v) = std::env::var("DUOBOT_ARM_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.server.arm_port = port;
    }
    if let Ok(v) = std::env::var("DUOBOT_CHASSIS_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.server.chassis_port = port;
    }
    if let Ok(v) = std::env::var("DUOBOT_BACKEND")
        && let Ok(backend) = v.parse::<Backend>()
    {
        cfg.hardware.backend = backend;
    }
}

/// Save the config to disk, creating `~/.duobot/` if necessary.
pub fn save(cfg: &Config) -> Result<PathBuf, RoverError> {
    let path = config_path();
    save_to(cfg, &path)?;
    Ok(path)
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), RoverError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            RoverError::Config(format!("failed to create config directory: {e}"))
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                RoverError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| RoverError::Config(format!("failed to serialize config: {e}")))?;
    let write_error =
        |e: std::io::Error| RoverError::Config(format!("failed to write {}: {e}", path.display()));
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_error)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use duobot_types::config::BusyPolicy;

    #[test]
    fn missing_sections_use_stock_values() {
        let cfg: Config = toml::from_str("[server]\narm_port = 9000\n").unwrap();
        assert_eq!(cfg.server.arm_port, 9000);
        assert_eq!(cfg.server.chassis_port, 8081);
        assert_eq!(cfg.hardware.backend, Backend::Sim);
        assert_eq!(cfg.hardware.sim_distance_cm, None);
        assert_eq!(cfg.arm.shoulder.frequency_hz, 60);
        assert_eq!(cfg.avoidance.stop_distance_cm, 50.0);
    }

    #[test]
    fn nested_tables_parse() {
        let raw = r#"
            [hardware]
            backend = "rpi"
            sim_distance_cm = 42.5

            [hardware.drive.right]
            in1 = 5
            in2 = 6
            enable = 7

            [arm]
            busy_policy = "queue"

            [arm.gripper]
            pin = 18
            frequency_hz = 50
        "#;
        let cfg: Config = toml::from_str(raw).unwrap();
        assert_eq!(cfg.hardware.backend, Backend::Rpi);
        assert_eq!(cfg.hardware.sim_distance_cm, Some(42.5));
        assert_eq!(cfg.hardware.drive.right.enable, 7);
        assert_eq!(cfg.hardware.drive.left.enable, 14);
        assert_eq!(cfg.arm.busy_policy, BusyPolicy::Queue);
        assert_eq!(cfg.arm.gripper.pin, 18);
        assert_eq!(cfg.arm.gripper.duty.max, 115);
        assert_eq!(cfg.arm.elbow.pin, 22);
    }

    #[test]
    fn unknown_backend_is_a_config_error() {
        let err = "stepper".parse::<Backend>().unwrap_err();
        assert!(matches!(err, RoverError::Config(_)));
        assert_eq!("RPI".parse::<Backend>().unwrap(), Backend::Rpi);
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = Config::default();
        cfg.server.chassis_port = 9191;
        cfg.hardware.sim_distance_cm = Some(80.0);
        cfg.arm.busy_policy = BusyPolicy::Queue;
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn broken_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\narm_port = ").unwrap();
        let err = load_from(&path).unwrap_err();
        assert!(matches!(err, RoverError::Config(_)));
    }

    #[test]
    fn config_path_points_to_duobot_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".duobot"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn apply_env_overrides_changes_arm_port() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("DUOBOT_ARM_PORT", "9080") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.server.arm_port, 9080);
        unsafe { std::env::remove_var("DUOBOT_ARM_PORT") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_port() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("DUOBOT_CHASSIS_PORT", "not-a-port") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.server.chassis_port, 8081);
        unsafe { std::env::remove_var("DUOBOT_CHASSIS_PORT") };
    }

    #[test]
    fn apply_env_overrides_changes_bind_and_backend() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe {
            std::env::set_var("DUOBOT_BIND", "127.0.0.1");
            std::env::set_var("DUOBOT_BACKEND", "rpi");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.server.bind, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(cfg.hardware.backend, Backend::Rpi);
        unsafe {
            std::env::remove_var("DUOBOT_BIND");
            std::env::remove_var("DUOBOT_BACKEND");
        }
    }
}
