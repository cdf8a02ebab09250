use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lib_common::core::backoff::{BackoffPolicy, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_ATTEMPTS};
use lib_common::core::feed_config::FeedConfig;
use lib_common::core::heartbeat::DEFAULT_HEARTBEAT_INTERVAL;
use lib_common::core::pipeline::{FilterCriteria, PUMP_AMM_PROGRAM_ID, TOKEN_PROGRAM_ID};
use lib_common::core::subscription::{
    SubscriptionConfig, SubscriptionOptions, DEFAULT_REQUEST_ID, DEFAULT_TARGET_ADDRESS,
};
use lib_common::ingestors::helius_wss::{HeliusConfig, DEFAULT_WSS_URL};

const DEFAULT_CONFIG_FILE: &str = "server_txstream.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Helius transaction stream client", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "TXSTREAM_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "TXSTREAM_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "TXSTREAM_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "TXSTREAM_WSS_URL", help = "Helius WebSocket endpoint, without the api-key parameter.")]
    pub wss_url: Option<String>,

    #[clap(long, env = "HELIUS_API_KEY", hide_env_values = true, help = "Helius API key.")]
    pub api_key: Option<String>,

    #[clap(long, env = "TXSTREAM_TARGET_ADDRESS", help = "Account address the subscription watches.")]
    pub target_address: Option<String>,

    #[clap(
        long,
        env = "TXSTREAM_FILTER_PROGRAM_IDS",
        value_delimiter = ',',
        help = "Comma separated program ids whose instructions are kept."
    )]
    pub filter_program_ids: Option<Vec<String>>,

    #[clap(long, env = "TXSTREAM_COMMITMENT", help = "Commitment level (processed, confirmed, finalized).")]
    pub commitment: Option<String>,

    #[clap(long, env = "TXSTREAM_ENCODING", help = "Transaction encoding requested from the node.")]
    pub encoding: Option<String>,

    #[clap(long, env = "TXSTREAM_TRANSACTION_DETAILS", help = "Level of transaction detail (full, signatures, ...).")]
    pub transaction_details: Option<String>,

    #[clap(long, env = "TXSTREAM_MAX_SUPPORTED_TX_VERSION", help = "Highest transaction version to receive.")]
    pub max_supported_transaction_version: Option<u8>,

    #[clap(long, env = "TXSTREAM_REQUEST_ID", help = "JSON-RPC id of the subscribe request.")]
    pub request_id: Option<u64>,

    #[clap(long, env = "TXSTREAM_INITIAL_RETRY_DELAY_MS", help = "Delay in milliseconds before the first reconnect attempt.")]
    pub initial_retry_delay_ms: Option<u64>,

    #[clap(long, env = "TXSTREAM_MAX_RETRIES", help = "Reconnect attempts before giving up.")]
    pub max_retries: Option<u32>,

    #[clap(long, env = "TXSTREAM_HEARTBEAT_SECONDS", help = "Seconds between keepalive pings.")]
    pub heartbeat_seconds: Option<u64>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            wss_url: other.wss_url.or(self.wss_url),
            api_key: other.api_key.or(self.api_key),
            target_address: other.target_address.or(self.target_address),
            filter_program_ids: other.filter_program_ids.or(self.filter_program_ids),
            commitment: other.commitment.or(self.commitment),
            encoding: other.encoding.or(self.encoding),
            transaction_details: other.transaction_details.or(self.transaction_details),
            max_supported_transaction_version: other
                .max_supported_transaction_version
                .or(self.max_supported_transaction_version),
            request_id: other.request_id.or(self.request_id),
            initial_retry_delay_ms: other.initial_retry_delay_ms.or(self.initial_retry_delay_ms),
            max_retries: other.max_retries.or(self.max_retries),
            heartbeat_seconds: other.heartbeat_seconds.or(self.heartbeat_seconds),
        }
    }

    fn defaults() -> Config {
        let options = SubscriptionOptions::default();
        Config {
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            wss_url: Some(DEFAULT_WSS_URL.to_string()),
            target_address: Some(DEFAULT_TARGET_ADDRESS.to_string()),
            filter_program_ids: Some(vec![PUMP_AMM_PROGRAM_ID.to_string(), TOKEN_PROGRAM_ID.to_string()]),
            commitment: Some(options.commitment),
            encoding: Some(options.encoding),
            transaction_details: Some(options.transaction_details),
            max_supported_transaction_version: Some(options.max_supported_transaction_version),
            request_id: Some(DEFAULT_REQUEST_ID),
            initial_retry_delay_ms: Some(DEFAULT_INITIAL_DELAY.as_millis() as u64),
            max_retries: Some(DEFAULT_MAX_ATTEMPTS),
            heartbeat_seconds: Some(DEFAULT_HEARTBEAT_INTERVAL.as_secs()),
            ..Default::default()
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn helius_config(&self) -> HeliusConfig {
        HeliusConfig {
            wss_url: self.wss_url.clone().unwrap_or_else(|| DEFAULT_WSS_URL.to_string()),
            api_key: self.api_key.clone(),
        }
    }

    /// Library settings for the feed. Unset fields fall back to the library
    /// defaults.
    pub fn feed_config(&self) -> FeedConfig {
        let defaults = SubscriptionOptions::default();
        let options = SubscriptionOptions {
            commitment: self.commitment.clone().unwrap_or(defaults.commitment),
            encoding: self.encoding.clone().unwrap_or(defaults.encoding),
            transaction_details: self.transaction_details.clone().unwrap_or(defaults.transaction_details),
            max_supported_transaction_version: self
                .max_supported_transaction_version
                .unwrap_or(defaults.max_supported_transaction_version),
        };

        let subscription = SubscriptionConfig {
            request_id: self.request_id.unwrap_or(DEFAULT_REQUEST_ID),
            target_address: self
                .target_address
                .clone()
                .unwrap_or_else(|| DEFAULT_TARGET_ADDRESS.to_string()),
            options,
        };

        let backoff = BackoffPolicy::new(
            self.initial_retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_INITIAL_DELAY),
            self.max_retries.unwrap_or(DEFAULT_MAX_ATTEMPTS),
        );

        let filter = match &self.filter_program_ids {
            Some(ids) => FilterCriteria::new(ids.iter().map(|id| id.trim()).filter(|id| !id.is_empty())),
            None => FilterCriteria::default(),
        };

        FeedConfig {
            subscription,
            backoff,
            heartbeat_interval: self
                .heartbeat_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL),
            filter,
        }
    }
}

/// Loads `.env` and the platform specific env file, if present.
pub fn load_env_files() {
    let dotenv_os: &str = if cfg!(target_os = "windows") {
        ".env.windows"
    } else {
        ".env.linux"
    };

    dotenvy::dotenv().ok();
    dotenvy::from_filename(dotenv_os).ok();
}

pub fn load_config() -> Config {
    resolve(Config::parse())
}

/// Layers defaults < config file < CLI/env. Logging is not up yet, so
/// problems with the file go to stderr.
pub fn resolve(cli: Config) -> Config {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();

    if config_file_path.exists() {
        match read_config_file(&config_file_path) {
            Ok(file_config) => current_config = current_config.merge(file_config),
            Err(e) => eprintln!(
                "Failed to load config file {}: {}. Falling back to other sources.",
                config_file_path.display(),
                e
            ),
        }
    }

    current_config.merge(cli)
}

fn read_config_file(path: &Path) -> anyhow::Result<Config> {
    let config_str = fs::read_to_string(path)?;
    Ok(serde_json::from_str::<Config>(&config_str)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_library_defaults() {
        let config = resolve(Config {
            config_path: Some(PathBuf::from("/nonexistent/server_txstream.conf")),
            ..Default::default()
        });
        let feed = config.feed_config();

        assert_eq!(feed.subscription, SubscriptionConfig::default());
        assert_eq!(feed.backoff, BackoffPolicy::default());
        assert_eq!(feed.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(feed.filter, FilterCriteria::default());
        assert_eq!(config.log_level(), "info");
    }

    #[test]
    fn test_file_overrides_defaults_and_cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"logLevel": "debug", "maxRetries": 3, "initialRetryDelayMs": 250, "filterProgramIds": ["ProgA"]}}"#
        )
        .unwrap();

        let config = resolve(Config {
            config_path: Some(file.path().to_path_buf()),
            max_retries: Some(8),
            ..Default::default()
        });
        let feed = config.feed_config();

        assert_eq!(config.log_level(), "debug");
        assert_eq!(feed.backoff.max_attempts, 8);
        assert_eq!(feed.backoff.initial_delay, Duration::from_millis(250));
        assert!(feed.filter.contains("ProgA"));
        assert!(!feed.filter.contains(PUMP_AMM_PROGRAM_ID));
    }

    #[test]
    fn test_broken_file_falls_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let config = resolve(Config {
            config_path: Some(file.path().to_path_buf()),
            ..Default::default()
        });
        assert_eq!(config.feed_config().backoff, BackoffPolicy::default());
    }

    #[test]
    fn test_missing_api_key_is_a_config_error() {
        let config = resolve(Config {
            config_path: Some(PathBuf::from("/nonexistent/server_txstream.conf")),
            ..Default::default()
        });
        assert!(config.helius_config().endpoint().is_err());

        let config = config.merge(Config {
            api_key: Some("k".to_string()),
            ..Default::default()
        });
        assert!(config.helius_config().endpoint().is_ok());
    }

    #[test]
    fn test_cli_parsing() {
        let cli = Config::parse_from([
            "server_txstream",
            "--filter-program-ids",
            "ProgA,ProgB",
            "--heartbeat-seconds",
            "5",
        ]);
        assert_eq!(cli.filter_program_ids, Some(vec!["ProgA".to_string(), "ProgB".to_string()]));
        assert_eq!(cli.heartbeat_seconds, Some(5));
    }
}
