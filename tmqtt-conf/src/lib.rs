#![deny(unsafe_code)]

use std::fmt;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use config::{Config, ConfigBuilder, File};
use once_cell::sync::OnceCell;
use serde::Deserialize;

use tmqtt_utils::{deserialize_addr, deserialize_duration};

use self::logging::Log;

pub use self::options::Options;

pub mod logging;
pub mod options;

pub type Result<T> = anyhow::Result<T>;

static SETTINGS: OnceCell<Settings> = OnceCell::new();

/// Broker configuration, read once at startup.
///
/// Sources in increasing priority: `/etc/tmqtt/tmqtt.toml`, `./tmqtt.toml`, the file named on
/// the command line, `TMQTT__<SECTION>__<KEY>` environment variables, then command line options.
#[derive(Clone)]
pub struct Settings(Arc<Inner>);

#[derive(Debug, Clone, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub listener: Listener,
    #[serde(default)]
    pub mqtt: Mqtt,
    #[serde(default, skip)]
    pub opts: Options,
}

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Settings {
    pub fn new(opts: Options) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("/etc/tmqtt/tmqtt").required(false))
            .add_source(File::with_name("tmqtt").required(false));

        if let Some(cfg) = opts.cfg_name.as_ref() {
            builder = builder.add_source(File::with_name(cfg).required(true));
        }

        Self::build(builder, opts)
    }

    fn build(builder: ConfigBuilder<config::builder::DefaultState>, opts: Options) -> Result<Self> {
        let builder =
            builder.add_source(config::Environment::with_prefix("tmqtt").separator("__").try_parsing(true));

        let mut inner: Inner = builder.build()?.try_deserialize()?;

        //command line wins over files and environment
        if let Some(port) = opts.port {
            inner.listener.addr.set_port(port);
        }
        if let Some(workers) = opts.workers {
            inner.mqtt.workers = workers;
        }
        if inner.mqtt.workers == 0 {
            return Err(anyhow!("mqtt.workers must be greater than 0"));
        }

        inner.opts = opts;
        Ok(Self(Arc::new(inner)))
    }

    /// The settings stored by [`Settings::init`].
    ///
    /// # Panics
    /// When called before `init`.
    #[inline]
    pub fn instance() -> &'static Self {
        SETTINGS.get().unwrap_or_else(|| unreachable!("settings used before init"))
    }

    #[inline]
    pub fn init(opts: Options) -> Result<&'static Self> {
        let settings = Settings::new(opts)?;
        SETTINGS.set(settings).map_err(|_| anyhow!("settings already initialized"))?;
        Ok(Self::instance())
    }

    #[inline]
    pub fn logs() -> Result<()> {
        let cfg = Self::instance();
        log::debug!("settings: {:?}", cfg);
        log::info!(
            "listener: {}, workers: {}, max_connections: {}",
            cfg.listener.addr,
            cfg.mqtt.workers,
            cfg.mqtt.max_connections
        );
        log::info!("retry: every {:?}, {} attempts", cfg.mqtt.retry_delay, cfg.mqtt.retry_attempts);
        Ok(())
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// `[listener]` section, the TCP endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Listener {
    #[serde(deserialize_with = "deserialize_addr")]
    pub addr: SocketAddr,
    pub backlog: i32,
    pub nodelay: bool,
    pub reuseaddr: Option<bool>,
    pub reuseport: Option<bool>,
    /// Largest remaining length accepted, 0 for no limit
    pub max_packet_size: u32,
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            addr: ([0, 0, 0, 0], 1883).into(),
            backlog: 1024,
            nodelay: true,
            reuseaddr: Some(true),
            reuseport: None,
            max_packet_size: 1024 * 1024,
        }
    }
}

/// `[mqtt]` section, broker behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Mqtt {
    /// Worker loops, every connection is pinned to one
    pub workers: usize,
    pub max_connections: usize,
    /// Wait before an unacknowledged QoS 1/2 packet is sent again
    #[serde(deserialize_with = "deserialize_duration")]
    pub retry_delay: Duration,
    pub retry_attempts: u32,
    /// CONNECT must arrive within this time
    #[serde(deserialize_with = "deserialize_duration")]
    pub connect_timeout: Duration,
    /// Keep-alive is enforced at this multiple of the client's interval
    pub keepalive_backoff: f32,
    #[serde(deserialize_with = "deserialize_duration")]
    pub sweep_interval: Duration,
    pub max_clientid_len_v31: usize,
    /// Messages kept per offline session, the oldest is dropped first. 0 for no limit
    pub max_mqueue_len: usize,
}

impl Default for Mqtt {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            max_connections: 1024,
            retry_delay: Duration::from_secs(10),
            retry_attempts: 3,
            connect_timeout: Duration::from_secs(30),
            keepalive_backoff: 1.5,
            sweep_interval: Duration::from_secs(1),
            max_clientid_len_v31: 23,
            max_mqueue_len: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn test_defaults() {
        let settings = Settings::new(Options::default()).expect("Settings creation failed");
        assert_eq!(settings.listener.addr.port(), 1883);
        assert_eq!(settings.mqtt.retry_delay, Duration::from_secs(10));
        assert_eq!(settings.mqtt.retry_attempts, 3);
        assert_eq!(settings.mqtt.max_clientid_len_v31, 23);
        assert_eq!(settings.mqtt.max_mqueue_len, 1000);
        assert!(settings.mqtt.workers > 0);
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
            [listener]
            addr = "127.0.0.1:2883"
            backlog = 64

            [mqtt]
            workers = 2
            retry_delay = "500ms"
            retry_attempts = 5
            connect_timeout = "5s"
            max_connections = 10
        "#;
        let builder = Config::builder().add_source(File::from_str(toml, FileFormat::Toml));
        let settings = Settings::build(builder, Options::default()).expect("Settings creation failed");
        assert_eq!(settings.listener.addr, "127.0.0.1:2883".parse::<SocketAddr>().unwrap());
        assert_eq!(settings.listener.backlog, 64);
        assert_eq!(settings.mqtt.workers, 2);
        assert_eq!(settings.mqtt.retry_delay, Duration::from_millis(500));
        assert_eq!(settings.mqtt.retry_attempts, 5);
        assert_eq!(settings.mqtt.connect_timeout, Duration::from_secs(5));
        assert_eq!(settings.mqtt.max_connections, 10);
        assert_eq!(settings.mqtt.keepalive_backoff, 1.5);
    }

    #[test]
    fn test_options_override() {
        let opts = Options { port: Some(1999), workers: Some(3), ..Default::default() };
        let settings = Settings::build(Config::builder(), opts).expect("Settings creation failed");
        assert_eq!(settings.listener.addr.port(), 1999);
        assert_eq!(settings.mqtt.workers, 3);

        let opts = Options { workers: Some(0), ..Default::default() };
        assert!(Settings::build(Config::builder(), opts).is_err());
    }
}
