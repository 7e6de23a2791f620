use std::time::Duration;

use async_trait::async_trait;

use super::*;
use crate::cache::InMemoryResultCache;
use crate::core::{Completeness, Field, Scope, TransientKind};
use crate::dispatch::RemoteResponse;
use crate::inventory::StaticInventory;
use crate::test_utils::{generated_inventory, orders_inventory, unit_with_fields, ScriptedRemote};

fn config() -> ValidatorConfig {
    ValidatorConfig::new()
        .with_backoff_base(Duration::from_millis(10))
        .with_jitter(false)
}

fn runner(
    config: ValidatorConfig,
    inventory: StaticInventory,
    remote: &Arc<ScriptedRemote>,
) -> ValidationRunner {
    ValidationRunner::builder(config)
        .inventory(inventory)
        .remote(remote.clone())
        .build()
        .unwrap()
}

fn orders() -> UnitId {
    UnitId::new("sales", "orders")
}

#[tokio::test]
async fn test_single_failing_field_is_isolated() {
    let remote = Arc::new(ScriptedRemote::new().poison(["b"]));
    let runner = runner(config().with_batch_size(3), orders_inventory(), &remote);

    let result = runner.run().await.unwrap();
    let report = &result.report;

    assert_eq!(report.field_outcome(&orders(), "a"), Some(&Outcome::Passed));
    assert!(report.field_outcome(&orders(), "b").unwrap().is_confirmed_invalid());
    assert_eq!(report.field_outcome(&orders(), "c"), Some(&Outcome::Passed));
    assert_eq!(report.len(), 3);
    assert!(report.is_complete());

    assert_eq!(result.stats.isolation_calls, 4);
    assert_eq!(result.stats.remote_calls, 5);
    assert_eq!(remote.call_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_ceiling_holds_across_units() {
    let remote = Arc::new(ScriptedRemote::new().latency(Duration::from_millis(100)));
    let inventory = generated_inventory("sales", 5, 1);
    let runner = runner(config().with_concurrency(2), inventory, &remote);

    let result = runner.run().await.unwrap();

    assert_eq!(result.report.len(), 5);
    assert_eq!(remote.call_count(), 5);
    assert_eq!(remote.peak_in_flight(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_ceiling_covers_isolation() {
    let remote = Arc::new(
        ScriptedRemote::new()
            .latency(Duration::from_millis(100))
            .poison(["f001", "f006", "f013"]),
    );
    let inventory = generated_inventory("sales", 3, 16);
    let runner = runner(config().with_concurrency(3).with_batch_size(8), inventory, &remote);

    let result = runner.run().await.unwrap();

    assert_eq!(result.report.failures().count(), 9);
    assert!(remote.peak_in_flight() <= 3);
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_then_success_is_passed() {
    let remote = Arc::new(ScriptedRemote::new().script([
        RemoteResponse::Transport(TransientKind::Timeout),
        RemoteResponse::Transport(TransientKind::Timeout),
        RemoteResponse::Transport(TransientKind::Timeout),
    ]));
    let inventory = StaticInventory::new([unit_with_fields("sales", "orders", &["a"])]);
    let runner = runner(config().with_max_retries(3), inventory, &remote);

    let result = runner.run().await.unwrap();

    assert_eq!(result.report.field_outcome(&orders(), "a"), Some(&Outcome::Passed));
    assert_eq!(result.stats.remote_calls, 4);
    assert_eq!(result.stats.retries, 3);
}

#[tokio::test]
async fn test_fatal_error_aborts_only_its_unit() {
    let returns = UnitId::new("sales", "returns");
    let remote = Arc::new(ScriptedRemote::new().fatal_unit(returns.clone()));
    let inventory = orders_inventory().with_unit(unit_with_fields("sales", "returns", &["x", "y"]));
    let runner = runner(config().with_batch_size(1), inventory, &remote);

    let result = runner.run().await.unwrap();
    let report = &result.report;

    let unit_entries: Vec<_> = report.unit_entries(&returns).collect();
    assert_eq!(unit_entries.len(), 1);
    assert_eq!(unit_entries[0].0, &ReportKey::unit(returns.clone()));
    assert!(unit_entries[0].1.is_fatal());
    assert!(!report.has_failures());
    assert_eq!(report.unit_entries(&orders()).count(), 3);
    assert_eq!(report.summary().unvalidated, 1);
}

#[tokio::test]
async fn test_cross_field_interaction_is_reported_unattributed() {
    let remote = Arc::new(ScriptedRemote::new().interaction(["a", "c"]));
    let runner = runner(config(), orders_inventory(), &remote);

    let result = runner.run().await.unwrap();
    let failures: Vec<_> = result.report.failures().collect();

    assert_eq!(failures.len(), 1);
    assert_eq!(
        failures[0].0.scope,
        Scope::Span {
            first: "a".to_string(),
            last: "c".to_string()
        }
    );
    assert!(failures[0].1.is_confirmed_invalid());
    for field in ["a", "b", "c"] {
        assert_eq!(result.report.field_outcome(&orders(), field), Some(&Outcome::Passed));
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_yields_partial_report() {
    let remote = Arc::new(ScriptedRemote::new().latency(Duration::from_secs(10)));
    let inventory = generated_inventory("sales", 3, 2);
    let runner = runner(config().with_concurrency(1), inventory, &remote);
    let (tx, rx) = watch::channel(false);

    let (result, _) = tokio::join!(runner.run_with_cancellation(rx), async move {
        tokio::time::sleep(Duration::from_secs(15)).await;
        tx.send(true).unwrap();
    });
    let report = result.unwrap().report;

    match report.completeness() {
        Completeness::Partial { unresolved } => assert_eq!(unresolved.len(), 2),
        Completeness::Complete => panic!("report should be partial"),
    }
    assert_eq!(report.units().len(), 1);
    assert_eq!(report.len(), 2);
    assert_eq!(remote.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_run_timeout_cancels() {
    let remote = Arc::new(ScriptedRemote::new().latency(Duration::from_secs(10)));
    let inventory = generated_inventory("sales", 4, 1);
    let runner = runner(
        config()
            .with_concurrency(2)
            .with_run_timeout(Duration::from_secs(15)),
        inventory,
        &remote,
    );

    let result = runner.run().await.unwrap();

    assert!(!result.report.is_complete());
    assert_eq!(result.report.len(), 2);
}

#[tokio::test]
async fn test_reruns_are_byte_identical() {
    let make_remote = || {
        Arc::new(
            ScriptedRemote::new()
                .poison(["f003", "f017"])
                .interaction(["f008", "f011"]),
        )
    };
    let config = config().with_batch_size(8).with_concurrency(3);

    let first = runner(config.clone(), generated_inventory("ns", 3, 20), &make_remote())
        .run()
        .await
        .unwrap();
    let second = runner(config, generated_inventory("ns", 3, 20), &make_remote())
        .run()
        .await
        .unwrap();

    assert_eq!(
        first.report.to_json_pretty().unwrap(),
        second.report.to_json_pretty().unwrap()
    );
}

#[tokio::test]
async fn test_selector_error_before_any_call() {
    let remote = Arc::new(ScriptedRemote::new());
    let runner = runner(
        config().with_selectors(["sales/ordrs"]),
        orders_inventory(),
        &remote,
    );

    let err = runner.run().await.unwrap_err();

    assert!(matches!(err, GuardError::Selector { .. }));
    assert_eq!(remote.call_count(), 0);
}

#[tokio::test]
async fn test_unit_without_fields_is_skipped() {
    let remote = Arc::new(ScriptedRemote::new());
    let inventory = orders_inventory().with_unit(unit_with_fields("sales", "empty", &[]));
    let runner = runner(config(), inventory, &remote);

    let result = runner.run().await.unwrap();

    assert_eq!(
        result.report.get(&ReportKey::unit(UnitId::new("sales", "empty"))),
        Some(&Outcome::Skipped {
            reason: SkipReason::NoFields
        })
    );
    assert_eq!(result.report.summary().skipped_units, 1);
}

#[tokio::test]
async fn test_hidden_fields_excluded() {
    let remote = Arc::new(ScriptedRemote::new().poison(["secret"]));
    let inventory = StaticInventory::new([Unit::new(
        orders(),
        vec![
            Field::new(orders(), "id"),
            Field::new(orders(), "secret").with_hidden(true),
        ],
    )]);
    let runner = runner(config().with_exclude_hidden(true), inventory, &remote);

    let result = runner.run().await.unwrap();

    assert_eq!(result.report.len(), 1);
    assert!(!result.report.has_failures());
    assert_eq!(remote.calls()[0].fields, vec!["id"]);
}

#[tokio::test]
async fn test_capacity_failures_are_resplit() {
    let remote = Arc::new(ScriptedRemote::new().capacity_limit(2));
    let inventory = generated_inventory("sales", 1, 8);
    let runner = runner(config().with_batch_size(8).with_max_retries(0), inventory, &remote);

    let result = runner.run().await.unwrap();

    assert_eq!(result.report.len(), 8);
    assert!(!result.report.has_failures());
    assert_eq!(result.stats.isolation_calls, 0);
    assert_eq!(result.stats.resplits, 3);
    assert!(remote.calls().iter().skip(1).all(|c| c.fields.len() <= 4));
}

#[tokio::test]
async fn test_fail_fast_skips_isolation() {
    let remote = Arc::new(ScriptedRemote::new().poison(["b"]));
    let runner = runner(config().with_fail_fast(true), orders_inventory(), &remote);

    let result = runner.run().await.unwrap();

    assert_eq!(remote.call_count(), 1);
    assert_eq!(result.stats.isolation_calls, 0);
    let (key, _) = result.report.failures().next().unwrap();
    assert_eq!(key.to_string(), "sales/orders[a..c]");
}

#[tokio::test]
async fn test_cache_replays_resolved_units() {
    let cache = InMemoryResultCache::new();
    let remote = Arc::new(ScriptedRemote::new().poison(["b"]));
    let build = || {
        ValidationRunner::builder(config())
            .inventory(orders_inventory())
            .remote(remote.clone())
            .cache(cache.clone())
            .build()
            .unwrap()
    };

    let first = build().run().await.unwrap();
    let calls_after_first = remote.call_count();
    let second = build().run().await.unwrap();

    assert_eq!(cache.len().await, 1);
    assert_eq!(remote.call_count(), calls_after_first);
    assert_eq!(second.stats.cached_units, 1);
    assert_eq!(second.stats.remote_calls, 0);
    assert_eq!(first.report, second.report);
}

#[tokio::test]
async fn test_fail_fast_results_are_not_replayed_into_isolating_runs() {
    let cache = InMemoryResultCache::new();
    let remote = Arc::new(ScriptedRemote::new().poison(["b"]));
    let build = |config: ValidatorConfig| {
        ValidationRunner::builder(config)
            .inventory(orders_inventory())
            .remote(remote.clone())
            .cache(cache.clone())
            .build()
            .unwrap()
    };

    let quick = build(config().with_fail_fast(true)).run().await.unwrap();
    assert_eq!(quick.report.len(), 1);
    assert_eq!(cache.len().await, 1);

    let full = build(config()).run().await.unwrap();
    assert_eq!(full.stats.cached_units, 0);
    let keys: Vec<String> = full.report.entries().map(|(k, _)| k.to_string()).collect();
    assert_eq!(
        keys,
        vec!["sales/orders:a", "sales/orders:b", "sales/orders:c"]
    );
    assert_eq!(cache.len().await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_unvalidated_units_are_not_cached() {
    let cache = InMemoryResultCache::new();
    let remote = Arc::new(
        ScriptedRemote::new().script([RemoteResponse::Transport(TransientKind::ConnectionReset)]),
    );
    let inventory = StaticInventory::new([unit_with_fields("sales", "orders", &["a"])]);
    let runner = ValidationRunner::builder(config().with_max_retries(0))
        .inventory(inventory)
        .remote(remote.clone())
        .cache(cache.clone())
        .build()
        .unwrap();

    let result = runner.run().await.unwrap();

    assert_eq!(result.report.summary().unvalidated, 1);
    assert!(cache.is_empty().await);
}

struct BrokenInventory;

#[async_trait]
impl InventoryProvider for BrokenInventory {
    async fn units(&self) -> Result<Vec<UnitId>> {
        Ok(vec![orders(), UnitId::new("sales", "returns")])
    }

    async fn fields(&self, unit: &UnitId) -> Result<Vec<Field>> {
        if unit == &orders() {
            Ok(vec![Field::new(orders(), "a")])
        } else {
            Err(GuardError::inventory("explore could not be loaded"))
        }
    }
}

#[tokio::test]
async fn test_field_listing_failure_is_unit_fatal() {
    let remote = Arc::new(ScriptedRemote::new());
    let runner = ValidationRunner::builder(config())
        .inventory(BrokenInventory)
        .remote(remote.clone())
        .build()
        .unwrap();

    let result = runner.run().await.unwrap();

    let fatal = result
        .report
        .get(&ReportKey::unit(UnitId::new("sales", "returns")))
        .unwrap();
    assert!(fatal.is_fatal());
    assert_eq!(result.report.field_outcome(&orders(), "a"), Some(&Outcome::Passed));
}

#[tokio::test]
async fn test_run_incremental_reports_new_failures_only() {
    let current = Arc::new(ScriptedRemote::new().poison(["b", "c"]));
    let baseline = Arc::new(ScriptedRemote::new().poison(["b"]));
    let incremental = config().with_incremental(true).with_baseline("master");

    let run = runner(incremental.clone(), orders_inventory(), &current)
        .run_incremental(&runner(incremental, orders_inventory(), &baseline))
        .await
        .unwrap();

    let keys: Vec<String> = run
        .diff
        .new_failures
        .entries()
        .map(|(k, _)| k.to_string())
        .collect();
    assert_eq!(keys, vec!["sales/orders:c"]);
    assert_eq!(run.diff.suppressed, 1);
    assert_eq!(run.current.report.failures().count(), 2);
}

struct UnreachableInventory;

#[async_trait]
impl InventoryProvider for UnreachableInventory {
    async fn units(&self) -> Result<Vec<UnitId>> {
        Err(GuardError::inventory("branch checkout failed"))
    }

    async fn fields(&self, _unit: &UnitId) -> Result<Vec<Field>> {
        Err(GuardError::inventory("branch checkout failed"))
    }
}

#[tokio::test]
async fn test_run_incremental_without_baseline_is_unavailable() {
    let remote = Arc::new(ScriptedRemote::new().poison(["b"]));
    let baseline = ValidationRunner::builder(config())
        .inventory(UnreachableInventory)
        .remote(remote.clone())
        .build()
        .unwrap();

    let err = runner(config(), orders_inventory(), &remote)
        .run_incremental(&baseline)
        .await
        .unwrap_err();

    assert!(matches!(err, GuardError::IncrementalUnavailable(_)));
}

#[test]
fn test_build_requires_collaborators() {
    let err = ValidationRunner::builder(config())
        .inventory(orders_inventory())
        .build()
        .unwrap_err();
    assert!(matches!(err, GuardError::Configuration(_)));

    let err = ValidationRunner::builder(config().with_batch_size(0))
        .inventory(orders_inventory())
        .remote(ScriptedRemote::new())
        .build()
        .unwrap_err();
    assert!(err.is_pre_run());
}
