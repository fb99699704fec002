use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Base URL of the chat backend REST API.
    #[arg(long, env, default_value = "http://localhost:8080/api")]
    pub api_base_url: String,

    /// WebSocket URL of the realtime message bus.
    #[arg(long, env, default_value = "ws://localhost:8080/ws")]
    pub bus_url: String,

    /// Path of the credential refresh endpoint, appended to the API base URL.
    #[arg(long, env, default_value = "/auth/refresh")]
    pub refresh_path: String,

    /// Initial bearer token, as handed out by the login flow.
    #[arg(long, env)]
    access_token: Option<String>,

    /// Maximum number of refresh-triggered replays for any single request.
    #[arg(long, env, default_value_t = 3)]
    pub max_refresh_attempts: u32,

    /// Timeout in seconds for a single HTTP request
    #[arg(long, env, default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Fixed delay in milliseconds between bus reconnection attempts
    #[arg(long, env, default_value_t = 5000)]
    pub reconnect_delay_ms: u64,

    /// Heart-beat interval in milliseconds negotiated with the bus (0 disables)
    #[arg(long, env, default_value_t = 10000)]
    pub heartbeat_ms: u64,

    /// Topics to subscribe to once connected.
    #[arg(long, env, value_delimiter = ',', use_value_delimiter = true)]
    pub topics: Vec<String>,

    /// API path to fetch through the gateway once at startup, e.g. `/me`.
    #[arg(long, env)]
    pub fetch: Option<String>,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap()),
    )]
    pub runtime_env: RustEnv,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn access_token(&self) -> Option<String> {
        self.access_token.clone()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }
}
