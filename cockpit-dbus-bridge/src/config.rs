use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_LOG_FILTER: &str = "cockpit_dbus=debug,axum=info,warn";

/// Bridge settings, from flags or the environment.
#[derive(Debug, Clone, Parser)]
#[command(
    author,
    version,
    about = "D-Bus bridge speaking the Cockpit JSON protocol",
    long_about = None
)]
pub struct BridgeConfig {
    /// Address to listen on
    #[arg(long, env = "COCKPIT_DBUS_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "COCKPIT_DBUS_PORT", default_value = "9090")]
    pub port: u16,

    /// Directory for rolling log files
    #[arg(long, env = "COCKPIT_DBUS_LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,

    /// Prefix of the log file names
    #[arg(long, default_value = "cockpit-dbus-bridge")]
    pub log_prefix: String,

    /// Filter used when `RUST_LOG` is unset
    #[arg(long, env = "COCKPIT_DBUS_LOG", default_value = DEFAULT_LOG_FILTER)]
    pub log_filter: String,

    /// Write the log files as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Grant `superuser: "require"` opens
    #[arg(long, env = "COCKPIT_DBUS_ALLOW_SUPERUSER")]
    pub allow_superuser: bool,

    /// Export the DBusTests objects and own their bus names
    #[arg(long)]
    pub test_service: bool,

    /// Extra well-known names to claim for the test service
    #[arg(long = "name", value_name = "NAME")]
    pub names: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            host: "127.0.0.1".to_string(),
            port: 9090,
            log_dir: PathBuf::from("logs"),
            log_prefix: "cockpit-dbus-bridge".to_string(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_json: false,
            allow_superuser: false,
            test_service: false,
            names: Vec::new(),
        }
    }
}

impl BridgeConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
