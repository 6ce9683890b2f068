/// Static mapping from local accounts to external identities
use crate::error::{KeygateError, KeygateResult};
use std::collections::HashMap;

/// Wildcard local-account token matching any otherwise unmapped account
pub const WILDCARD: &str = "*";

/// Immutable account mapping, built once at startup.
///
/// Each local account maps to an ordered, possibly repeating list of
/// external identities; repeated `local:` pairs accumulate in first-seen
/// order.
#[derive(Debug, Clone, Default)]
pub struct UserMap {
    entries: HashMap<String, Vec<String>>,
}

impl UserMap {
    /// Parse a mapping string of comma-separated `local:external` pairs.
    ///
    /// The wildcard `*` is a valid local account. Fails on empty input, a
    /// pair without exactly one colon, an empty side, or zero valid pairs.
    pub fn parse(input: &str) -> KeygateResult<Self> {
        if input.trim().is_empty() {
            return Err(KeygateError::Config("user map cannot be empty".to_string()));
        }

        let mut entries: HashMap<String, Vec<String>> = HashMap::new();
        for pair in input.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }

            let parts: Vec<&str> = pair.split(':').collect();
            if parts.len() != 2 {
                return Err(KeygateError::Config(format!(
                    "invalid mapping pair {:?} (expected local:external)",
                    pair
                )));
            }

            let local = parts[0].trim();
            let external = parts[1].trim();
            if local.is_empty() {
                return Err(KeygateError::Config(format!(
                    "empty local account in pair {:?}",
                    pair
                )));
            }
            if external.is_empty() {
                return Err(KeygateError::Config(format!(
                    "empty external identity in pair {:?}",
                    pair
                )));
            }

            entries
                .entry(local.to_string())
                .or_default()
                .push(external.to_string());
        }

        if entries.is_empty() {
            return Err(KeygateError::Config(
                "no valid pairs in user map".to_string(),
            ));
        }

        Ok(Self { entries })
    }

    /// Identities mapped to a local account: exact match first, then the
    /// wildcard entry, else empty.
    pub fn lookup(&self, account: &str) -> &[String] {
        if let Some(identities) = self.entries.get(account) {
            return identities;
        }
        if let Some(identities) = self.entries.get(WILDCARD) {
            return identities;
        }
        &[]
    }
}
