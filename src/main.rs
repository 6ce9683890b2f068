/// keygate - SSH AuthorizedKeysCommand helper
///
/// sshd invokes this binary with the account name being authenticated and
/// blocks on its stdout. Only key lines go to stdout; everything else goes
/// to stderr, and a non-zero exit means "no keys from this command".
use clap::Parser;
use keygate::{
    authorized::{self, AuthorizedKeys},
    cache::KeyCache,
    config::{Args, Config},
    error::{KeygateError, KeygateResult},
    fetcher::KeyFetcher,
    keys,
    resolver::Resolver,
};
use std::path::Path;
use std::process::ExitCode;
use tracing::{debug, error, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    match run(args).await {
        Ok(output) => {
            print!("{}", output);
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, exit_code = err.exit_code(), "aborting without output");
            ExitCode::from(err.exit_code())
        }
    }
}

async fn run(args: Args) -> KeygateResult<String> {
    let config = Config::from_args(args)?;
    debug!(
        account = config.account.as_str(),
        timeout = ?config.timeout,
        "starting key resolution"
    );

    let cache = KeyCache::new(config.cache_dir.clone(), config.cache_ttl)?;
    debug!(cache_dir = %cache.dir().display(), "cache initialized");

    let fetcher = KeyFetcher::new()?;
    let resolver = Resolver::new(config.user_map.clone(), fetcher, cache);

    // One slow or hanging fetch must not stall the login past the daemon's
    // own patience.
    let resolved = tokio::time::timeout(config.timeout, resolver.resolve(&config.account))
        .await
        .map_err(|_| KeygateError::Timeout(config.timeout.as_secs()))??;

    // Fail secure: nothing reaches sshd if any resolved line — fresh or
    // served from cache — is not a recognized public key.
    keys::validate_output(&resolved)?;

    let existing = read_local_entries(&config.account).await?;

    let merged = authorized::merge(&resolved, &existing);
    debug!(total = merged.len(), "resolution complete");
    Ok(authorized::format_keys(&merged))
}

/// Read the account's pre-existing authorized_keys entries.
///
/// An unknown account falls back to the invoking user's own $HOME before
/// giving up; a readable-location-but-failed read degrades to "no local
/// entries" so the resolved keys still reach sshd.
async fn read_local_entries(account: &str) -> KeygateResult<Vec<String>> {
    let local = match AuthorizedKeys::for_account(account) {
        Ok(local) => local,
        Err(err) => {
            warn!(error = %err, "account lookup failed, trying $HOME");
            match std::env::var("HOME") {
                Ok(home) => {
                    AuthorizedKeys::with_path(Path::new(&home).join(".ssh").join("authorized_keys"))
                }
                Err(_) => return Err(err),
            }
        }
    };

    match local.read_existing().await {
        Ok(existing) => Ok(existing),
        Err(err) => {
            warn!(
                path = %local.path().display(),
                error = %err,
                "failed to read existing authorized_keys, merging resolved keys only"
            );
            Ok(Vec::new())
        }
    }
}

fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("keygate={}", level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
