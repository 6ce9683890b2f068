/// End-to-end pipeline tests: mapping -> cache/fetch -> validation -> merge
use chrono::{Duration, Utc};
use keygate::{
    authorized::{self, AuthorizedKeys},
    cache::{CacheEntry, KeyCache},
    error::KeygateError,
    fetcher::KeyFetcher,
    keys,
    mapping::UserMap,
    resolver::Resolver,
};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn pipeline(server: &MockServer, mapping: &str, cache_dir: &TempDir) -> Resolver {
    let cache = KeyCache::new(
        Some(cache_dir.path().to_path_buf()),
        Duration::minutes(5),
    )
    .unwrap();
    let fetcher = KeyFetcher::with_base_url(server.uri())
        .unwrap()
        .with_retry_delay(std::time::Duration::from_millis(5));
    Resolver::new(UserMap::parse(mapping).unwrap(), fetcher, cache)
}

#[tokio::test]
async fn resolves_validates_and_merges_with_local_entries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gh-alice.keys"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "ssh-ed25519 AAAA alice@laptop\nssh-rsa BBBB alice@desktop\n# noise\n",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let cache_dir = TempDir::new().unwrap();
    let resolver = pipeline(&server, "alice:gh-alice", &cache_dir);

    let resolved = resolver.resolve("alice").await.unwrap();
    keys::validate_output(&resolved).unwrap();

    // One of the fetched keys already exists locally with a custom comment;
    // the local line wins.
    let home = TempDir::new().unwrap();
    let local_path = home.path().join("authorized_keys");
    std::fs::write(&local_path, "# hand managed\nssh-rsa BBBB backup@office\n").unwrap();
    let existing = AuthorizedKeys::with_path(&local_path)
        .read_existing()
        .await
        .unwrap();

    let merged = authorized::merge(&resolved, &existing);
    let output = authorized::format_keys(&merged);
    assert_eq!(
        output,
        "ssh-rsa BBBB backup@office\nssh-ed25519 AAAA alice@laptop\n"
    );
}

#[tokio::test]
async fn second_invocation_is_served_from_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gh-bob.keys"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ssh-ed25519 CCCC bob@host\n"))
        .expect(1)
        .mount(&server)
        .await;

    let cache_dir = TempDir::new().unwrap();

    // Two separate resolver instances over the same cache directory, like
    // two consecutive login attempts.
    let first = pipeline(&server, "bob:gh-bob", &cache_dir);
    let keys_first = first.resolve("bob").await.unwrap();

    let second = pipeline(&server, "bob:gh-bob", &cache_dir);
    let keys_second = second.resolve("bob").await.unwrap();

    assert_eq!(keys_first, keys_second);
    // expect(1) on the mock verifies the second run never hit the network.
}

#[tokio::test]
async fn stale_cache_keeps_login_working_offline() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let cache_dir = TempDir::new().unwrap();
    let cache = KeyCache::new(
        Some(cache_dir.path().to_path_buf()),
        Duration::minutes(5),
    )
    .unwrap();
    cache
        .write_entry(&CacheEntry {
            identity: "gh-carol".to_string(),
            keys: vec!["ssh-ed25519 DDDD carol@host".to_string()],
            fetched_at: Utc::now() - Duration::days(1),
        })
        .await
        .unwrap();

    let resolver = pipeline(&server, "carol:gh-carol", &cache_dir);
    let resolved = resolver.resolve("carol").await.unwrap();
    assert_eq!(resolved, vec!["ssh-ed25519 DDDD carol@host".to_string()]);

    let output = authorized::format_keys(&authorized::merge(&resolved, &[]));
    assert_eq!(output, "ssh-ed25519 DDDD carol@host\n");
}

#[tokio::test]
async fn overall_deadline_bounds_a_hanging_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gh-slow.keys"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("ssh-ed25519 FFFF slow@host\n")
                .set_delay(std::time::Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let cache_dir = TempDir::new().unwrap();
    let resolver = pipeline(&server, "dan:gh-slow", &cache_dir);

    // Same wrapper the binary runs: one hanging fetch must not stall the
    // login past the configured deadline.
    let deadline = std::time::Duration::from_millis(200);
    let err = tokio::time::timeout(deadline, resolver.resolve("dan"))
        .await
        .map_err(|_| KeygateError::Timeout(deadline.as_secs()))
        .and_then(|inner| inner)
        .unwrap_err();
    assert!(matches!(err, KeygateError::Timeout(_)));
    assert_eq!(err.exit_code(), 4);
}

#[tokio::test]
async fn fail_secure_rejects_tainted_batch() {
    // A cached record that somehow holds a non-key line must abort the whole
    // output, valid lines included.
    let server = MockServer::start().await;
    let cache_dir = TempDir::new().unwrap();
    let cache = KeyCache::new(
        Some(cache_dir.path().to_path_buf()),
        Duration::minutes(5),
    )
    .unwrap();
    cache
        .write_entry(&CacheEntry {
            identity: "gh-eve".to_string(),
            keys: vec![
                "ssh-ed25519 EEEE eve@host".to_string(),
                "not-a-key garbage".to_string(),
            ],
            fetched_at: Utc::now(),
        })
        .await
        .unwrap();

    let resolver = pipeline(&server, "eve:gh-eve", &cache_dir);
    let resolved = resolver.resolve("eve").await.unwrap();

    let err = keys::validate_output(&resolved).unwrap_err();
    assert_eq!(err.exit_code(), 2);
}
