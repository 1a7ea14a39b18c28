//! Plan files through graph building and the dry-run path.

use std::sync::Arc;

use tempfile::TempDir;

use overseer::core::TaskStatus;
use overseer::dry_run;
use overseer::orchestration::SupervisorConfig;
use overseer::plan::{self, Plan};
use overseer::storage::{CacheConfig, ContextKind, MemoryContextStore};
use overseer::Error;

const CHECKOUT: &str = r#"{
    "goal": "buy the blue shirt",
    "steps": [
        {"number": 1, "name": "search", "description": "Search for blue shirt"},
        {"number": 2, "name": "open", "description": "Open the first result", "dependencies": [1]},
        {"number": 3, "name": "size", "description": "Pick size M", "dependencies": [2]},
        {"number": 4, "name": "cart", "description": "Add to cart", "dependencies": [2, 3]}
    ]
}"#;

fn write_plan(dir: &TempDir, json: &str) -> Plan {
    let path = dir.path().join("plan.json");
    std::fs::write(&path, json).unwrap();
    Plan::load(&path).unwrap()
}

/// Test: Plan file to topological order
#[test]
fn test_plan_file_builds_ordered_graph() {
    let dir = TempDir::new().unwrap();
    let plan = write_plan(&dir, CHECKOUT);
    assert_eq!(plan.goal, "buy the blue shirt");

    let built = plan::build_graph(&plan.steps).unwrap();
    let order: Vec<&str> = built
        .graph
        .topological_order()
        .unwrap()
        .into_iter()
        .map(|t| t.description.as_str())
        .collect();
    assert_eq!(
        order,
        vec!["Search for blue shirt", "Open the first result", "Pick size M", "Add to cart"]
    );
}

/// Test: Cyclic and dangling plans are rejected
#[test]
fn test_invalid_plans_are_rejected() {
    let dir = TempDir::new().unwrap();
    let cyclic = write_plan(
        &dir,
        r#"{"steps": [
            {"number": 1, "name": "a", "description": "A", "dependencies": [2]},
            {"number": 2, "name": "b", "description": "B", "dependencies": [1]}
        ]}"#,
    );
    assert!(matches!(
        plan::build_graph(&cyclic.steps),
        Err(Error::Cycle { .. })
    ));

    let dangling = write_plan(
        &dir,
        r#"{"steps": [{"number": 1, "name": "a", "description": "A", "dependencies": [7]}]}"#,
    );
    assert!(matches!(
        plan::build_graph(&dangling.steps),
        Err(Error::Validation(_))
    ));
}

/// Test: Dry run of a plan with a failing step
/// Given the checkout plan with the size step always failing
/// When it is rehearsed with the fallback oracle
/// Then the step is retried once, skipped, and the rest of the plan completes
#[tokio::test(start_paused = true)]
async fn test_dry_run_recovers_from_failing_step() {
    let dir = TempDir::new().unwrap();
    let plan = write_plan(&dir, CHECKOUT);
    let context = Arc::new(MemoryContextStore::new());
    let mut config = SupervisorConfig::default().with_max_parallel(2);
    config.health.min_samples = 100;

    let report = dry_run::run(
        &plan,
        &["size".to_string()],
        config,
        &CacheConfig::default(),
        context.clone(),
    )
    .await
    .unwrap();

    assert!(report.outcome.is_succeeded());
    assert_eq!(report.completed_count(), 3);
    assert_eq!(report.count(TaskStatus::Skipped), 1);
    assert_eq!(context.count(ContextKind::SessionStarted).await, 1);
    assert_eq!(context.count(ContextKind::SessionFinished).await, 1);
    assert!(context.count(ContextKind::Decision).await >= 1);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["outcome"], "succeeded");
}
