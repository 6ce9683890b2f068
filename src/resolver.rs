/// Resolution pipeline: mapping lookup, cache-or-fetch per identity, union
use crate::{
    cache::KeyCache,
    error::{KeygateError, KeygateResult},
    fetcher::{FetchError, KeyFetcher},
    keys::KeySet,
    mapping::UserMap,
};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

/// Bound on per-identity fetches in flight at once
const MAX_IN_FLIGHT: usize = 4;

/// Orchestrates mapping, cache, and fetcher for one login attempt
pub struct Resolver {
    map: UserMap,
    fetcher: KeyFetcher,
    cache: KeyCache,
}

impl Resolver {
    pub fn new(map: UserMap, fetcher: KeyFetcher, cache: KeyCache) -> Self {
        Self {
            map,
            fetcher,
            cache,
        }
    }

    /// Resolve all keys authorized for a local account.
    ///
    /// Identities resolve independently and concurrently; a failure for one
    /// never discards keys obtained for another. The call fails outright
    /// only when no identity produced any usable key — partial results are
    /// returned successfully with the failures logged, because locking an
    /// admin out over one flaky identity is worse than serving a subset.
    pub async fn resolve(&self, account: &str) -> KeygateResult<Vec<String>> {
        if account.is_empty() {
            return Err(KeygateError::Config(
                "local account name is empty".to_string(),
            ));
        }

        let identities = self.map.lookup(account);
        if identities.is_empty() {
            return Err(KeygateError::NoIdentities(account.to_string()));
        }
        debug!(account, ?identities, "resolving identities");

        // `buffered` keeps results in identity order so first-seen dedup is
        // deterministic even with concurrent fetches.
        let results: Vec<(String, Result<Vec<String>, FetchError>)> =
            stream::iter(identities.iter().cloned())
                .map(|identity| async move {
                    let outcome = self.resolve_identity(&identity).await;
                    (identity, outcome)
                })
                .buffered(MAX_IN_FLIGHT)
                .collect()
                .await;

        let mut set = KeySet::new();
        let mut failures = Vec::new();
        for (identity, outcome) in results {
            match outcome {
                Ok(keys) => {
                    for key in &keys {
                        set.insert(key);
                    }
                }
                Err(err) => failures.push(format!("{}: {}", identity, err)),
            }
        }

        if set.is_empty() && failures.len() == identities.len() {
            return Err(KeygateError::AllIdentitiesFailed(failures.join("; ")));
        }
        if !failures.is_empty() {
            warn!(
                account,
                failures = failures.join("; ").as_str(),
                resolved = set.len(),
                "partial failure resolving identities"
            );
        }

        debug!(account, total = set.len(), "resolved keys");
        Ok(set.into_lines())
    }

    /// Cache-or-fetch for a single identity.
    ///
    /// A fresh non-empty cache entry short-circuits the network entirely.
    /// After a failed fetch, any existing non-empty entry — expired included
    /// — is served as a degraded fallback so logins keep working offline.
    async fn resolve_identity(&self, identity: &str) -> Result<Vec<String>, FetchError> {
        let cached = match self.cache.read(identity).await {
            Ok((entry, expired)) => {
                match &entry {
                    Some(e) if !expired && !e.keys.is_empty() => {
                        debug!(identity, count = e.keys.len(), "cache hit");
                        return Ok(e.keys.clone());
                    }
                    Some(_) if expired => debug!(identity, "cache expired"),
                    Some(_) => debug!(identity, "cache entry empty, refetching"),
                    None => debug!(identity, "cache miss"),
                }
                entry
            }
            Err(err) => {
                // A read failure degrades to a miss; stale keys must never
                // be lost to a filesystem hiccup.
                warn!(identity, error = %err, "cache read failed, treating as miss");
                None
            }
        };

        info!(identity, "fetching keys");
        match self.fetcher.fetch(identity).await {
            Ok(keys) => {
                if let Err(err) = self.cache.write(identity, &keys).await {
                    // Keys already in hand are still good.
                    warn!(identity, error = %err, "cache write failed");
                }
                Ok(keys)
            }
            Err(err) => {
                if let Some(entry) = cached.filter(|e| !e.keys.is_empty()) {
                    info!(
                        identity,
                        count = entry.keys.len(),
                        "fetch failed, serving stale cache"
                    );
                    return Ok(entry.keys);
                }
                Err(err)
            }
        }
    }
}
