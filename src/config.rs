/// CLI arguments and run configuration
use crate::error::{KeygateError, KeygateResult};
use crate::mapping::UserMap;
use clap::Parser;
use std::path::PathBuf;

/// Log levels accepted by --log-level
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// keygate - AuthorizedKeysCommand helper resolving external identities' SSH keys
///
/// Invoked by sshd on every login attempt; prints the resolved key list to
/// stdout and all diagnostics to stderr.
#[derive(Parser, Debug, Clone)]
#[command(name = "keygate", version)]
#[command(about = "Resolve, cache, and merge SSH public keys for a login account")]
pub struct Args {
    /// Local account being authenticated (passed by sshd as %u)
    pub account: String,

    /// Account mapping: local:external[,local:external...]; `*` matches any account
    #[arg(long, env = "KEYGATE_USER_MAP")]
    pub user_map: String,

    /// Cache directory (default: keygate subdirectory of the OS temp dir)
    #[arg(long, env = "KEYGATE_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Cache TTL in minutes (minimum 1)
    #[arg(long, env = "KEYGATE_CACHE_TTL", default_value_t = 5)]
    pub cache_ttl: i64,

    /// Overall resolution deadline in seconds (minimum 1)
    #[arg(long, env = "KEYGATE_TIMEOUT", default_value_t = 30)]
    pub timeout: u64,

    /// Log verbosity: trace|debug|info|warn|error
    #[arg(long, env = "KEYGATE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Validated run configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub account: String,
    pub user_map: UserMap,
    pub cache_dir: Option<PathBuf>,
    pub cache_ttl: chrono::Duration,
    pub timeout: std::time::Duration,
    pub log_level: String,
}

impl Config {
    /// Validate CLI arguments into a run configuration. All failures here
    /// are configuration errors, reported before any resolution work.
    pub fn from_args(args: Args) -> KeygateResult<Self> {
        let user_map = UserMap::parse(&args.user_map)?;

        if args.cache_ttl < 1 {
            return Err(KeygateError::Config(format!(
                "cache-ttl must be at least 1 minute, got {}",
                args.cache_ttl
            )));
        }
        let cache_ttl = chrono::Duration::try_minutes(args.cache_ttl).ok_or_else(|| {
            KeygateError::Config(format!("cache-ttl out of range: {}", args.cache_ttl))
        })?;
        if args.timeout < 1 {
            return Err(KeygateError::Config(format!(
                "timeout must be at least 1 second, got {}",
                args.timeout
            )));
        }

        let log_level = args.log_level.to_lowercase();
        if !LOG_LEVELS.contains(&log_level.as_str()) {
            return Err(KeygateError::Config(format!(
                "invalid log level {:?} (valid: {})",
                args.log_level,
                LOG_LEVELS.join(", ")
            )));
        }

        Ok(Self {
            account: args.account,
            user_map,
            cache_dir: args.cache_dir,
            cache_ttl,
            timeout: std::time::Duration::from_secs(args.timeout),
            log_level,
        })
    }
}
