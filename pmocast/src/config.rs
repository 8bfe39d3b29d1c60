use std::time::Duration;

use crate::errors::Result;

const DEFAULT_PORT: u16 = 8009;
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_BOOTSTRAP_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
const DEFAULT_VOLUME_STEP: f64 = 0.05;
const DEFAULT_MEDIA_SENDER_ID: &str = "client-17558";
const DEFAULT_IDLE_APPLICATION: &str = "Backdrop";

/// Settings of one device monitor.
#[derive(Clone, Debug, PartialEq)]
pub struct MonitorConfig {
    /// Advertised friendly name of the device to track.
    pub device_name: String,
    /// Only accept discovery events from this network interface.
    pub interface: Option<String>,
    /// Cast port used when an advertisement carries none.
    pub port: u16,
    /// Time without playback after which the device is considered off.
    pub idle_timeout: Duration,
    /// Time after start after which an unknown power state becomes off.
    pub bootstrap_delay: Duration,
    pub heartbeat_interval: Duration,
    pub reconnect_backoff: Duration,
    /// Increment used by relative volume commands.
    pub volume_step: f64,
    /// Sender id used on application-scoped channels.
    pub media_sender_id: String,
    /// Applications that mean the device is idle.
    pub idle_applications: Vec<String>,
}

impl MonitorConfig {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            interface: None,
            port: DEFAULT_PORT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            bootstrap_delay: DEFAULT_BOOTSTRAP_DELAY,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            volume_step: DEFAULT_VOLUME_STEP,
            media_sender_id: DEFAULT_MEDIA_SENDER_ID.to_string(),
            idle_applications: vec![DEFAULT_IDLE_APPLICATION.to_string()],
        }
    }

    /// Reads the `monitor` section of a pmoconfig configuration.
    pub fn from_config(config: &pmoconfig::Config) -> Result<Self> {
        let interface = config.get_interface()?.filter(|name| !name.is_empty());
        Ok(Self {
            device_name: config.get_device_name()?,
            interface,
            port: config.get_port()?,
            idle_timeout: Duration::from_secs(config.get_idle_timeout_secs()?),
            bootstrap_delay: Duration::from_millis(config.get_bootstrap_delay_ms()?),
            heartbeat_interval: Duration::from_secs(config.get_heartbeat_interval_secs()?),
            reconnect_backoff: Duration::from_secs(config.get_reconnect_backoff_secs()?),
            volume_step: config.get_volume_step()?,
            media_sender_id: config.get_media_sender_id()?,
            idle_applications: config.get_idle_applications()?,
        })
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_bootstrap_delay(mut self, delay: Duration) -> Self {
        self.bootstrap_delay = delay;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    pub fn with_volume_step(mut self, step: f64) -> Self {
        self.volume_step = step;
        self
    }

    pub fn with_media_sender_id(mut self, sender_id: impl Into<String>) -> Self {
        self.media_sender_id = sender_id.into();
        self
    }

    pub fn with_idle_applications<I, S>(mut self, applications: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.idle_applications = applications.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_idle_application(&self, application: &str) -> bool {
        self.idle_applications.iter().any(|idle| idle == application)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::new("Garage");
        assert_eq!(config.device_name, "Garage");
        assert_eq!(config.interface, None);
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.bootstrap_delay, Duration::from_secs(2));
        assert_eq!(config.reconnect_backoff, Duration::from_secs(5));
        assert!(config.is_idle_application("Backdrop"));
        assert!(!config.is_idle_application("Netflix"));
    }

    #[test]
    fn test_from_pmoconfig() {
        let yaml = r#"
monitor:
  device_name: Kitchen
  interface: eth0
  idle_timeout_secs: 30
  volume_step: 0.1
  idle_applications: [Backdrop, "Ambient Mode"]
"#;
        let pmo = pmoconfig::Config::from_yaml_str(yaml).unwrap();
        let config = MonitorConfig::from_config(&pmo).unwrap();

        assert_eq!(config.device_name, "Kitchen");
        assert_eq!(config.interface.as_deref(), Some("eth0"));
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.bootstrap_delay, Duration::from_millis(2000));
        assert_eq!(config.volume_step, 0.1);
        assert_eq!(config.media_sender_id, "client-17558");
        assert!(config.is_idle_application("Ambient Mode"));
    }

    #[test]
    fn test_builder() {
        let config = MonitorConfig::new("Garage")
            .with_interface("wlan0")
            .with_idle_timeout(Duration::from_millis(500))
            .with_idle_applications(["Backdrop", "Screensaver"]);

        assert_eq!(config.interface.as_deref(), Some("wlan0"));
        assert_eq!(config.idle_timeout, Duration::from_millis(500));
        assert_eq!(config.idle_applications, vec!["Backdrop", "Screensaver"]);
    }
}
