/// Shared key-line model: format checks, normalization, and dedup
///
/// Both the fetcher (filtering listing responses) and the output path
/// (fail-secure validation) agree on what counts as a public key line, so
/// the algorithm set and normalization rules live here.
use crate::error::{KeygateError, KeygateResult};
use std::collections::HashSet;

/// Key algorithms accepted on an authorized_keys line
pub const SUPPORTED_ALGORITHMS: [&str; 6] = [
    "ssh-rsa",
    "ssh-ed25519",
    "ecdsa-sha2-nistp256",
    "ecdsa-sha2-nistp384",
    "ecdsa-sha2-nistp521",
    "ssh-dss",
];

/// Check whether a line's leading token is a supported key algorithm
pub fn is_supported_key(line: &str) -> bool {
    match line.split_whitespace().next() {
        Some(token) => SUPPORTED_ALGORITHMS.contains(&token),
        None => false,
    }
}

/// Normalize a key line for dedup: algorithm and blob only, trailing comment
/// dropped. Lines with fewer than two tokens normalize to their trimmed text.
pub fn normalize(line: &str) -> String {
    let mut tokens = line.split_whitespace();
    match (tokens.next(), tokens.next()) {
        (Some(algorithm), Some(blob)) => format!("{} {}", algorithm, blob),
        _ => line.trim().to_string(),
    }
}

/// Insertion-ordered set of key lines, deduplicated by normalized content.
///
/// The first line seen for a given algorithm+blob wins; later duplicates are
/// dropped regardless of how their comment differs. Iteration order is the
/// insertion order, so output is deterministic.
#[derive(Debug, Default)]
pub struct KeySet {
    lines: Vec<String>,
    seen: HashSet<String>,
}

impl KeySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key line, returning true if it was not already present
    pub fn insert(&mut self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return false;
        }
        if self.seen.insert(normalize(line)) {
            self.lines.push(line.to_string());
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Consume the set, yielding lines in insertion order
    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

/// Fail-secure validation over every line destined for sshd.
///
/// A single unrecognized line fails the whole batch: the caller must abort
/// without emitting any output, valid lines included.
pub fn validate_output(lines: &[String]) -> KeygateResult<()> {
    for line in lines {
        if !is_supported_key(line) {
            return Err(KeygateError::InvalidKeyFormat(line.clone()));
        }
    }
    Ok(())
}
