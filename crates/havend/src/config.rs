use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// CLI arguments for the storage node.
#[derive(Parser, Debug, Clone)]
#[command(name = "havend")]
#[command(about = "haven storage node")]
#[command(version)]
pub struct Args {
    /// Socket address the message bus listens on.
    #[arg(long, default_value = "0.0.0.0:22021", env = "HAVEND_LISTEN")]
    pub listen: SocketAddr,
    /// Socket address for the metrics endpoint.
    #[arg(long, default_value = "127.0.0.1:9090", env = "HAVEND_METRICS")]
    pub metrics_addr: SocketAddr,
    /// Path to the node's 64-hex-character secret scalar.
    #[arg(long, env = "HAVEND_KEY_FILE")]
    pub key_file: Option<PathBuf>,
    /// Hex X25519 public keys granted the admin tier. Repeatable.
    #[arg(long = "admin-key", env = "HAVEND_ADMIN_KEYS", value_delimiter = ',')]
    pub admin_keys: Vec<String>,
    /// Number of general worker tasks handling dispatched commands.
    #[arg(long, default_value = "1", env = "HAVEND_WORKERS")]
    pub workers: usize,
    /// Maximum total concurrent connections.
    #[arg(long, default_value = "10000", env = "HAVEND_MAX_CONNS")]
    pub max_conns: usize,
    /// Admission handshake timeout in seconds.
    #[arg(long, default_value = "5", env = "HAVEND_ADMIT_TIMEOUT")]
    pub admit_timeout: u64,
    /// Connection idle timeout in seconds.
    #[arg(long, default_value = "300", env = "HAVEND_IDLE_TIMEOUT")]
    pub idle_timeout: u64,
    /// DNS name of the TXT record carrying the difficulty schedule.
    #[arg(
        long,
        default_value = "difficulty.havenmsg.net",
        env = "HAVEND_DIFFICULTY_RECORD"
    )]
    pub difficulty_record: String,
    /// DNS name of the TXT record carrying the latest release version.
    #[arg(
        long,
        default_value = "version.havenmsg.net",
        env = "HAVEND_VERSION_RECORD"
    )]
    pub version_record: String,
    /// Seconds between difficulty schedule refreshes.
    #[arg(long, default_value = "600", env = "HAVEND_DIFFICULTY_REFRESH")]
    pub difficulty_refresh: u64,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Socket address the message bus listens on.
    pub listen: SocketAddr,
    /// Socket address for the metrics endpoint.
    pub metrics_addr: SocketAddr,
    /// Hex X25519 public keys granted the admin tier.
    pub admin_keys: Vec<String>,
    /// Number of general worker tasks.
    pub workers: usize,
    /// Maximum total concurrent connections.
    pub max_conns: usize,
    /// Admission handshake timeout in seconds.
    pub admit_timeout: u64,
    /// Connection idle timeout in seconds.
    pub idle_timeout: u64,
    /// DNS name of the difficulty schedule TXT record.
    pub difficulty_record: String,
    /// DNS name of the latest-version TXT record.
    pub version_record: String,
    /// Seconds between difficulty refreshes.
    pub difficulty_refresh: u64,
}

impl NodeConfig {
    /// Validates the configuration values are within acceptable bounds.
    ///
    /// # Errors
    ///
    /// Returns a description of the first offending value.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }
        if self.workers > 64 {
            return Err("workers exceeds reasonable limit (64)".to_string());
        }

        if self.max_conns == 0 {
            return Err("max_conns must be greater than 0".to_string());
        }
        if self.max_conns > 1_000_000 {
            return Err("max_conns exceeds reasonable limit (1,000,000)".to_string());
        }

        if self.admit_timeout == 0 {
            return Err("admit_timeout must be greater than 0".to_string());
        }
        if self.admit_timeout > 300 {
            return Err("admit_timeout exceeds reasonable limit (300 seconds)".to_string());
        }

        if self.idle_timeout == 0 {
            return Err("idle_timeout must be greater than 0".to_string());
        }
        if self.idle_timeout > 86_400 {
            return Err("idle_timeout exceeds reasonable limit (86400 seconds)".to_string());
        }

        if self.difficulty_refresh < 60 {
            return Err("difficulty_refresh below reasonable limit (60 seconds)".to_string());
        }

        for key in &self.admin_keys {
            if key.len() != 64 || !key.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(format!("admin key '{key}' is not 64 hex characters"));
            }
        }

        Ok(())
    }

    /// Decodes the configured admin keys to raw 32-byte X25519 keys.
    ///
    /// Call after [`NodeConfig::validate`].
    #[must_use]
    pub fn admin_keys_bin(&self) -> Vec<[u8; 32]> {
        self.admin_keys
            .iter()
            .filter_map(|k| haven_common::encoding::hex_to_array32(k).ok())
            .collect()
    }
}

impl From<Args> for NodeConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: args.listen,
            metrics_addr: args.metrics_addr,
            admin_keys: args.admin_keys,
            workers: args.workers,
            max_conns: args.max_conns,
            admit_timeout: args.admit_timeout,
            idle_timeout: args.idle_timeout,
            difficulty_record: args.difficulty_record,
            version_record: args.version_record,
            difficulty_refresh: args.difficulty_refresh,
        }
    }
}
