//! Firebridge - forward MQTT messages to a Firebase Realtime Database
//!
//! Usage:
//!   firebridge [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>                Configuration file path
//!   -m, --mqtt-host <HOST[:PORT]>      Broker address (default: 127.0.0.1:1883)
//!   -r, --route <PATTERN:PATH>         Route, repeatable (first match wins)
//!   -n, --dry-run                      Log writes instead of sending them
//!   -v, --verbose                      Debug logging
//!   -N, --firebase-app-name <NAME>     Database at https://<NAME>.firebaseio.com
//!   -a, --firebase-credential <SRC>    Credential JSON, file path or token
//!   -l, --log-level                    Log level (error, warn, info, debug, trace)
//!   -h, --help                         Print help

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use firebridge::config::{Config, RouteConfig};
use firebridge::lifecycle::{wait_for_termination, Bridge};
use firebridge::store::{Credential, FirebaseStore};

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    fn from_config(level: &str) -> Self {
        match level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }
}

/// Firebridge - MQTT to Firebase bridge
#[derive(Parser, Debug)]
#[command(name = "firebridge")]
#[command(author = "Firebridge Contributors")]
#[command(version)]
#[command(about = "Forward MQTT messages to a Firebase Realtime Database")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long, env = "FIREBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// MQTT broker address (host or host:port)
    #[arg(short, long, env = "MQTT_HOST")]
    mqtt_host: Option<String>,

    /// Route as PATTERN:PATH; a PATH ending in /# appends the last topic level
    #[arg(short, long, env = "FIREBRIDGE_ROUTES", value_delimiter = ',')]
    route: Vec<RouteConfig>,

    /// Build and log each write without sending it
    #[arg(short = 'n', long, env = "FIREBRIDGE_DRY_RUN")]
    dry_run: bool,

    /// Debug logging (topic, payload and URL of every message)
    #[arg(short, long, env = "FIREBRIDGE_VERBOSE")]
    verbose: bool,

    /// Firebase app name, for https://<NAME>.firebaseio.com
    #[arg(short = 'N', long, env = "FIREBASE_APP_NAME")]
    firebase_app_name: Option<String>,

    /// Credential: inline JSON, path to a JSON or token file, or a raw token
    #[arg(short = 'a', long, env = "FIREBASE_CREDENTIAL_JSON", hide_env_values = true)]
    firebase_credential: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

impl Args {
    /// Command-line values win over the file
    fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.mqtt_host {
            config.mqtt.address = host.clone();
        }
        if !self.route.is_empty() {
            config.route = self.route.clone();
        }
        if self.dry_run {
            config.delivery.dry_run = true;
        }
        if let Some(name) = &self.firebase_app_name {
            config.store.app_name = Some(name.clone());
        }
        if let Some(credential) = &self.firebase_credential {
            config.store.credential = Some(credential.clone());
        }
    }
}

fn fail(context: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", context, err);
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    }
    .unwrap_or_else(|e| fail("Error loading configuration", e));
    args.apply(&mut config);

    // --verbose beats --log-level, which beats the config file
    let log_level = if args.verbose {
        LogLevel::Debug
    } else {
        args.log_level
            .unwrap_or_else(|| LogLevel::from_config(&config.log.level))
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    // Everything is checked before the first connection is made
    if let Err(e) = config.validate_startup() {
        fail("Invalid configuration", e);
    }

    let credential = config
        .store
        .credential
        .as_deref()
        .map(Credential::load)
        .transpose()
        .unwrap_or_else(|e| fail("Invalid Firebase credential", e));
    match &credential {
        None => info!("No credential configured, writes will be unauthenticated"),
        Some(Credential::ServiceAccount(key)) => {
            info!("Authenticating as service account {}", key.client_email())
        }
        Some(_) => {}
    }

    let store = FirebaseStore::new(credential)
        .unwrap_or_else(|e| fail("Cannot create HTTP client", e));

    info!("Starting Firebridge");
    let bridge = Bridge::start(&config, Arc::new(store))
        .unwrap_or_else(|e| fail("Cannot start bridge", e));

    wait_for_termination().await;
    bridge.shutdown().await;

    Ok(())
}
