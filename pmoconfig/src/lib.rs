//! # pmocast configuration module
//!
//! This module provides configuration management for the pmocast device monitor:
//! - Loading configuration from YAML files
//! - Merging with the embedded default configuration
//! - Environment variable overrides
//! - Typed getters and setters for the monitor settings
//! - Thread-safe singleton access pattern
//!
//! ## Usage
//!
//! ```no_run
//! use pmoconfig::get_config;
//!
//! let config = get_config();
//! let name = config.get_device_name()?;
//! let timeout = config.get_idle_timeout_secs()?;
//! config.set_idle_timeout_secs(120)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{info, warn};

// Default configuration embedded in the binary
const DEFAULT_CONFIG: &str = include_str!("pmocast.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load pmocast configuration"));
}

const ENV_CONFIG_DIR: &str = "PMOCAST_CONFIG";
const ENV_PREFIX: &str = "PMOCAST_CONFIG__";
const CONFIG_DIR_NAME: &str = ".pmocast";

// Default values for configuration
const DEFAULT_PORT: u16 = 8009;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_BOOTSTRAP_DELAY_MS: u64 = 2000;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 5;
const DEFAULT_RECONNECT_BACKOFF_SECS: u64 = 5;
const DEFAULT_VOLUME_STEP: f64 = 0.05;
const DEFAULT_MEDIA_SENDER_ID: &str = "client-17558";
const DEFAULT_IDLE_APPLICATION: &str = "Backdrop";
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";

/// Macro to generate getter/setter for u64 values with default
macro_rules! impl_u64_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<u64> {
            match self.get_value($path) {
                Ok(Value::Number(n)) => Ok(n.as_u64().unwrap_or($default)),
                Ok(Value::String(s)) => Ok(s.trim().parse().unwrap_or($default)),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: u64) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Macro to generate getter/setter for string values with default
macro_rules! impl_string_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<String> {
            match self.get_value($path) {
                Ok(Value::String(s)) => Ok(s),
                _ => Ok($default.to_string()),
            }
        }

        pub fn $setter(&self, value: String) -> Result<()> {
            self.set_value($path, Value::String(value))
        }
    };
}

/// Configuration manager for pmocast
///
/// This structure manages the monitor configuration, including:
/// - Loading configuration from YAML files
/// - Merging with default configuration
/// - Handling environment variable overrides
/// - Providing typed getters/setters for configuration values
///
/// # Examples
///
/// ```no_run
/// use pmoconfig::get_config;
///
/// let config = get_config();
/// println!("Monitoring {}", config.get_device_name()?);
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug)]
pub struct Config {
    config_dir: Option<PathBuf>,
    path: Option<PathBuf>,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        let data = self.lock_data().clone();
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(data),
        }
    }
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> PathBuf {
        // 1. Try provided directory
        if !directory.is_empty() {
            return PathBuf::from(directory);
        }

        // 2. Try environment variable
        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return PathBuf::from(env_path);
        }

        // 3. Try current directory
        if Path::new(CONFIG_DIR_NAME).exists() {
            return PathBuf::from(CONFIG_DIR_NAME);
        }

        // 4. Try home directory
        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config;
            }
        }

        PathBuf::from(CONFIG_DIR_NAME)
    }

    /// Validates and prepares a config directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("{} is not a directory", path.display()));
        }

        // Test write permission
        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        fs::read_dir(path)?;

        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `PMOCAST_CONFIG` environment variable
    /// 3. `.pmocast` in the current directory
    /// 4. `.pmocast` in the user's home directory
    ///
    /// The directory is created if it doesn't exist, and validated for read/write permissions.
    pub fn config_dir(directory: &str) -> Result<PathBuf> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(&dir_path)?;
        Ok(dir_path)
    }

    /// Loads the configuration from the specified directory
    ///
    /// This method:
    /// 1. Determines the configuration directory
    /// 2. Loads the default embedded configuration
    /// 3. Merges it with the external config.yaml file if present
    /// 4. Applies environment variable overrides
    /// 5. Saves the merged configuration
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir = %config_dir.display(), "Using config directory");

        let path = config_dir.join("config.yaml");

        let mut config_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        match fs::read(&path) {
            Ok(data) => {
                info!(config_file = %path.display(), "Loaded config file");
                let external_value: Value = serde_yaml::from_slice(&data)?;
                merge_yaml(&mut config_value, &Self::lower_keys_value(external_value));
            }
            Err(_) => {
                info!(config_file = %path.display(), "Config file not found, using default embedded config");
            }
        }

        let mut config_value = Self::lower_keys_value(config_value);
        Self::apply_env_overrides(&mut config_value, env::vars());

        let config = Config {
            config_dir: Some(config_dir),
            path: Some(path),
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    /// Builds an in-memory configuration from a YAML document merged over the
    /// embedded defaults. Nothing is read from or written to disk.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut config_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        if !yaml.trim().is_empty() {
            let external_value: Value = serde_yaml::from_str(yaml)?;
            merge_yaml(&mut config_value, &Self::lower_keys_value(external_value));
        }

        Ok(Config {
            config_dir: None,
            path: None,
            data: Mutex::new(Self::lower_keys_value(config_value)),
        })
    }

    /// Returns the directory the configuration was loaded from, if any.
    pub fn directory(&self) -> Option<&Path> {
        self.config_dir.as_deref()
    }

    fn lock_data(&self) -> MutexGuard<'_, Value> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Saves the current configuration to the config.yaml file
    ///
    /// In-memory configurations have no backing file and are left untouched.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let yaml = serde_yaml::to_string(&*self.lock_data())?;
        fs::write(path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["monitor", "port"]`)
    /// * `value` - The YAML value to set
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.lock_data();
            Self::set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key_value = Value::String(path[0].to_lowercase());
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets a configuration value at the specified path
    ///
    /// Returns an error if the path doesn't exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.lock_data();
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                match map.get(Value::String(key.to_lowercase())) {
                    Some(next) => current = next,
                    None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
                }
            } else {
                return Err(anyhow!("Path {} is not a Config", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    /// Applies `PMOCAST_CONFIG__SECTION__KEY=value` overrides.
    fn apply_env_overrides<I>(config: &mut Value, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                let key_path = stripped.split("__").collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                if let Err(err) = Self::set_value_internal(config, &key_path, yaml_value) {
                    warn!(variable = %key, error = %err, "Ignoring config override");
                }
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
            return parsed;
        }
        Value::String(value.to_string())
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    let new_key = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    new_map.insert(new_key, Self::lower_keys_value(v));
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    impl_string_config!(
        get_device_name,
        set_device_name,
        &["monitor", "device_name"],
        ""
    );

    impl_string_config!(
        get_media_sender_id,
        set_media_sender_id,
        &["monitor", "media_sender_id"],
        DEFAULT_MEDIA_SENDER_ID
    );

    impl_string_config!(
        get_log_min_level,
        set_log_min_level,
        &["host", "logger", "min_level"],
        DEFAULT_LOG_MIN_LEVEL
    );

    impl_u64_config!(
        get_idle_timeout_secs,
        set_idle_timeout_secs,
        &["monitor", "idle_timeout_secs"],
        DEFAULT_IDLE_TIMEOUT_SECS
    );

    impl_u64_config!(
        get_bootstrap_delay_ms,
        set_bootstrap_delay_ms,
        &["monitor", "bootstrap_delay_ms"],
        DEFAULT_BOOTSTRAP_DELAY_MS
    );

    impl_u64_config!(
        get_heartbeat_interval_secs,
        set_heartbeat_interval_secs,
        &["monitor", "heartbeat_interval_secs"],
        DEFAULT_HEARTBEAT_INTERVAL_SECS
    );

    impl_u64_config!(
        get_reconnect_backoff_secs,
        set_reconnect_backoff_secs,
        &["monitor", "reconnect_backoff_secs"],
        DEFAULT_RECONNECT_BACKOFF_SECS
    );

    /// Gets the network interface the monitor is restricted to, if any.
    ///
    /// Empty strings and `null` both mean "any interface".
    pub fn get_interface(&self) -> Result<Option<String>> {
        match self.get_value(&["monitor", "interface"]) {
            Ok(Value::String(s)) if !s.trim().is_empty() => Ok(Some(s.trim().to_string())),
            _ => Ok(None),
        }
    }

    pub fn set_interface(&self, interface: Option<String>) -> Result<()> {
        let value = interface.map(Value::String).unwrap_or(Value::Null);
        self.set_value(&["monitor", "interface"], value)
    }

    /// Gets the Cast control port, falling back to 8009 for invalid values.
    pub fn get_port(&self) -> Result<u16> {
        match self.get_value(&["monitor", "port"]) {
            Ok(Value::Number(n)) => Ok(n
                .as_u64()
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(DEFAULT_PORT)),
            Ok(Value::String(s)) => match s.trim().parse::<u16>() {
                Ok(port) => Ok(port),
                Err(_) => {
                    warn!("Invalid port '{}', using default {}", s, DEFAULT_PORT);
                    Ok(DEFAULT_PORT)
                }
            },
            _ => Ok(DEFAULT_PORT),
        }
    }

    pub fn set_port(&self, port: u16) -> Result<()> {
        self.set_value(&["monitor", "port"], Value::Number(Number::from(port)))
    }

    /// Gets the relative volume step used by volume up/down.
    pub fn get_volume_step(&self) -> Result<f64> {
        match self.get_value(&["monitor", "volume_step"]) {
            Ok(Value::Number(n)) => Ok(n.as_f64().unwrap_or(DEFAULT_VOLUME_STEP)),
            Ok(Value::String(s)) => Ok(s.trim().parse().unwrap_or(DEFAULT_VOLUME_STEP)),
            _ => Ok(DEFAULT_VOLUME_STEP),
        }
    }

    pub fn set_volume_step(&self, step: f64) -> Result<()> {
        self.set_value(&["monitor", "volume_step"], Value::Number(Number::from(step)))
    }

    /// Gets the display names of the applications meaning "device idle".
    ///
    /// A single string is accepted as a one-element list.
    pub fn get_idle_applications(&self) -> Result<Vec<String>> {
        match self.get_value(&["monitor", "idle_applications"]) {
            Ok(Value::Sequence(seq)) => Ok(seq
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect()),
            Ok(Value::String(s)) => Ok(vec![s]),
            _ => Ok(vec![DEFAULT_IDLE_APPLICATION.to_string()]),
        }
    }

    pub fn set_idle_applications(&self, applications: Vec<String>) -> Result<()> {
        let seq = applications.into_iter().map(Value::String).collect();
        self.set_value(&["monitor", "idle_applications"], Value::Sequence(seq))
    }
}

/// Returns the global configuration instance
///
/// The instance is lazily loaded on first access.
///
/// # Examples
///
/// ```no_run
/// use pmoconfig::get_config;
///
/// let config = get_config();
/// let port = config.get_port()?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Merges external YAML configuration into default configuration
///
/// - For mappings, keys from external are merged into default
/// - For scalars and sequences, external values replace default values
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults() {
        let config = Config::from_yaml_str("").unwrap();
        assert_eq!(config.get_device_name().unwrap(), "");
        assert_eq!(config.get_interface().unwrap(), None);
        assert_eq!(config.get_port().unwrap(), 8009);
        assert_eq!(config.get_idle_timeout_secs().unwrap(), 60);
        assert_eq!(config.get_bootstrap_delay_ms().unwrap(), 2000);
        assert_eq!(config.get_heartbeat_interval_secs().unwrap(), 5);
        assert_eq!(config.get_reconnect_backoff_secs().unwrap(), 5);
        assert!((config.get_volume_step().unwrap() - 0.05).abs() < f64::EPSILON);
        assert_eq!(config.get_media_sender_id().unwrap(), "client-17558");
        assert_eq!(config.get_idle_applications().unwrap(), vec!["Backdrop"]);
        assert_eq!(config.get_log_min_level().unwrap(), "INFO");
    }

    #[test]
    fn test_user_yaml_is_merged_over_defaults() {
        let config = Config::from_yaml_str(
            "Monitor:\n  Device_Name: Garage\n  interface: en0\n  idle_timeout_secs: 30\n",
        )
        .unwrap();
        assert_eq!(config.get_device_name().unwrap(), "Garage");
        assert_eq!(config.get_interface().unwrap(), Some("en0".to_string()));
        assert_eq!(config.get_idle_timeout_secs().unwrap(), 30);
        // untouched keys keep their defaults
        assert_eq!(config.get_port().unwrap(), 8009);
    }

    #[test]
    fn test_env_overrides() {
        let mut value = Config::lower_keys_value(serde_yaml::from_str(DEFAULT_CONFIG).unwrap());
        Config::apply_env_overrides(
            &mut value,
            vec![
                ("PMOCAST_CONFIG__MONITOR__PORT".to_string(), "8010".to_string()),
                ("PMOCAST_CONFIG__MONITOR__DEVICE_NAME".to_string(), "Kitchen".to_string()),
                ("UNRELATED".to_string(), "1".to_string()),
            ],
        );
        let config = Config {
            config_dir: None,
            path: None,
            data: Mutex::new(value),
        };
        assert_eq!(config.get_port().unwrap(), 8010);
        assert_eq!(config.get_device_name().unwrap(), "Kitchen");
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = Config::from_yaml_str(
            "monitor:\n  port: 700000\n  idle_timeout_secs: soon\n  idle_applications: Screensaver\n",
        )
        .unwrap();
        assert_eq!(config.get_port().unwrap(), 8009);
        assert_eq!(config.get_idle_timeout_secs().unwrap(), 60);
        assert_eq!(config.get_idle_applications().unwrap(), vec!["Screensaver"]);
    }

    #[test]
    fn test_load_and_save_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let dir_str = dir.path().to_str().unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "monitor:\n  device_name: Living Room\n",
        )
        .unwrap();

        let config = Config::load_config(dir_str).unwrap();
        assert_eq!(config.get_device_name().unwrap(), "Living Room");

        config.set_reconnect_backoff_secs(9).unwrap();
        config.set_interface(Some("eth0".to_string())).unwrap();

        let reloaded = Config::load_config(dir_str).unwrap();
        assert_eq!(reloaded.get_reconnect_backoff_secs().unwrap(), 9);
        assert_eq!(reloaded.get_interface().unwrap(), Some("eth0".to_string()));
        assert_eq!(reloaded.directory(), Some(dir.path()));
    }

    #[test]
    fn test_set_value_creates_nested_maps() {
        let config = Config::from_yaml_str("").unwrap();
        config
            .set_value(&["devices", "garage", "alias"], Value::String("g".into()))
            .unwrap();
        assert_eq!(
            config.get_value(&["devices", "garage", "alias"]).unwrap(),
            Value::String("g".into())
        );
        assert!(config.get_value(&["devices", "kitchen"]).is_err());
    }
}
