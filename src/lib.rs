/// keygate - SSH AuthorizedKeysCommand helper
///
/// Maps a local account to external identities, fetches each identity's
/// public keys from a key-listing endpoint with an on-disk TTL cache and
/// retrying HTTP client, and merges the result with the account's existing
/// authorized_keys entries. Runs once per login attempt under sshd.
pub mod authorized;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod keys;
pub mod mapping;
pub mod resolver;

pub use config::{Args, Config};
pub use error::{KeygateError, KeygateResult};
