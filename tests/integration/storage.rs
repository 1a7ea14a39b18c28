//! Artifact cache and ledger behavior across sessions.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use overseer::core::{Action, TaskId};
use overseer::orchestration::{FallbackOracle, SupervisorConfig};
use overseer::storage::{AccomplishmentLedger, CacheConfig};
use overseer::SessionManager;

use crate::fixtures::{chain, collaborators, quiet_config, supervisor};

/// Test: Cache entries expire between sessions
/// Given a manager whose cache keeps entries for ten seconds
/// When a second session starts after the TTL elapsed
/// Then the identical snapshot is parsed again instead of served from the cache
#[tokio::test(start_paused = true)]
async fn test_cache_ttl_spans_sessions() {
    let cache = CacheConfig {
        ttl: Duration::from_secs(10),
        capacity: 8,
    };
    let manager = SessionManager::new(
        collaborators(&[], Arc::new(FallbackOracle::default())),
        SupervisorConfig::default(),
        &cache,
    );

    let (graph, _) = chain(&["Open", "Close"]);
    let first = manager.submit(graph, 1).await.unwrap();
    assert!(manager.result(&first).await.unwrap().outcome.is_succeeded());

    let stats = manager.cache().stats().await;
    assert_eq!(stats.misses, 1);
    assert!(stats.hits >= 1);

    tokio::time::sleep(Duration::from_secs(11)).await;

    let (graph, _) = chain(&["Open again"]);
    let second = manager.submit(graph, 1).await.unwrap();
    assert!(manager.result(&second).await.unwrap().outcome.is_succeeded());

    let stats = manager.cache().stats().await;
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.expirations, 1);
    assert_eq!(stats.entries, 1);

    manager.shutdown().await;
}

/// Test: Ledger scoping
/// Given an action recorded in one session
/// When another session asks whether it was accomplished
/// Then only the recording session sees it
#[tokio::test]
async fn test_ledger_is_scoped_to_its_session() {
    let login = Action::click("Login button");
    let first = AccomplishmentLedger::new("session-a");
    first.record(TaskId::new(), &login, BTreeMap::new()).await;

    assert!(first.has_accomplished(&login).await);

    let second = AccomplishmentLedger::new("session-b");
    assert!(!second.has_accomplished(&login).await);
    assert!(second.is_empty().await);
}

/// Test: Every supervisor gets its own ledger, cleared when it finishes
#[tokio::test(start_paused = true)]
async fn test_supervisor_ledger_is_fresh_and_cleared() {
    let collaborators = collaborators(&[], Arc::new(FallbackOracle::default()));
    let (graph, _) = chain(&["Open", "Close"]);
    let first = supervisor(graph, &collaborators, quiet_config(1));
    let (graph, _) = chain(&["Open"]);
    let second = supervisor(graph, &collaborators, quiet_config(1));

    let first_ledger = first.ledger();
    let second_ledger = second.ledger();
    assert!(!Arc::ptr_eq(&first_ledger, &second_ledger));

    let report = first.run().await;
    assert!(report.outcome.is_succeeded());
    assert!(first_ledger.is_empty().await);
    assert!(second_ledger.is_empty().await);
}
