//! Tests against a live queue engine.
//!
//! These need a Redis server with the engine's Lua core on disk, e.g.
//!
//! ```text
//! FOREMAN_SCRIPT_PATH=/path/to/qless.lua \
//! FOREMAN_TEST_REDIS=redis://127.0.0.1:6379/15 \
//! cargo test -p foreman-core -- --ignored
//! ```

use foreman_core::{Client, ClientConfig, PutOptions};

fn connect() -> Client {
    let url = std::env::var("FOREMAN_TEST_REDIS")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string());
    Client::connect(ClientConfig::new(url)).expect("engine reachable")
}

#[test]
#[ignore = "requires a running queue engine"]
fn put_pop_fail_roundtrip() {
    let client = connect();
    let queue = client.queue("foreman-test-queue");

    let jid = queue
        .put(
            "Echo",
            &serde_json::json!({"message": "hi"}),
            &PutOptions::default(),
        )
        .unwrap();

    let job = queue.pop("test-worker").unwrap().expect("job available");
    assert_eq!(job.jid, jid);
    assert_eq!(job.klass, "Echo");
    assert_eq!(job.worker, "test-worker");
    assert!(job.ttl() > 0.0);

    client
        .fail(&job.jid, "test-worker", "system:test", "cleanup", None)
        .unwrap();
    let counts = client.jobs().failed_counts().unwrap();
    assert!(counts.get("system:test").copied().unwrap_or(0) >= 1);

    client.cancel(&jid).unwrap();
}

#[test]
#[ignore = "requires a running queue engine"]
fn empty_queue_pops_nothing() {
    let client = connect();
    let job = client.queue("foreman-empty-queue").pop("test-worker").unwrap();
    assert!(job.is_none());
}

#[test]
#[ignore = "requires a running queue engine"]
fn config_roundtrip() {
    let client = connect();
    client.config_set("foreman-test-key", "10").unwrap();
    assert_eq!(
        client.config_get("foreman-test-key").unwrap().as_deref(),
        Some("10")
    );
    client.config_clear("foreman-test-key").unwrap();
    client.reconnect().unwrap();
}
