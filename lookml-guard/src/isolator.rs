//! Binary-search isolation of failing batches.
//!
//! A failing batch is split into halves which are dispatched concurrently
//! through the shared [`Dispatcher`]. Passing halves clear their fields;
//! failing halves are split again until single fields remain. Pending halves
//! live in an explicit work set, so deep failure trees do not grow the stack
//! and every call competes for the same permits as top-level batches.
//!
//! When both halves of a failing batch pass, the failure comes from an
//! interaction between fields. Nothing is blamed on a single field: the batch
//! is recorded as an unattributed [`Scope::Span`](crate::core::Scope::Span)
//! failure. A batch that only failed with exhausted transient errors keeps
//! that cause on its span, since the service never judged it.

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tracing::{debug, instrument, warn};

use crate::aggregator::Aggregator;
use crate::core::{Batch, FailureCause, Outcome, ReportKey};
use crate::dispatch::Dispatcher;
use crate::error::Result;

const UNATTRIBUTED_NOTE: &str =
    "each half of the batch passed on its own; isolation could not attribute a singular cause";

/// How an isolation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IsolationEnd {
    /// Every field of the batch has a terminal outcome
    Resolved,
    /// A half returned a fatal error; the unit must be aborted
    Aborted(Outcome),
}

/// Summary of one isolation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Isolation {
    /// How the isolation ended
    pub end: IsolationEnd,
    /// Remote calls issued for halves (retries not counted)
    pub calls: u64,
    /// Fields blamed individually
    pub attributed: usize,
    /// Sub-batches recorded as unattributed failures
    pub unattributed: usize,
}

/// A failing batch whose halves are being validated.
struct Node {
    batch: Batch,
    outcome: Outcome,
    pending: u8,
    failed: u8,
}

type HalfResult = (usize, Batch, Result<Outcome>);

/// Bisects failing batches down to the fields that break them.
#[derive(Debug, Clone, Copy)]
pub struct FaultIsolator<'a> {
    dispatcher: &'a Dispatcher,
    aggregator: &'a Aggregator,
}

impl<'a> FaultIsolator<'a> {
    /// Creates an isolator dispatching through `dispatcher` and recording
    /// into `aggregator`.
    pub fn new(dispatcher: &'a Dispatcher, aggregator: &'a Aggregator) -> Self {
        Self {
            dispatcher,
            aggregator,
        }
    }

    /// Attributes the failure of `batch` (whose outcome is `failed`) to
    /// individual fields.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Cancelled`](crate::error::GuardError::Cancelled)
    /// if the run is cancelled mid-isolation, and
    /// [`GuardError::AggregationLogic`](crate::error::GuardError::AggregationLogic)
    /// if a field would be recorded twice.
    #[instrument(skip_all, fields(batch = %batch.id(), fields = batch.len()))]
    pub async fn isolate(&self, batch: Batch, failed: Outcome) -> Result<Isolation> {
        let mut isolation = Isolation {
            end: IsolationEnd::Resolved,
            calls: 0,
            attributed: 0,
            unattributed: 0,
        };

        let mut nodes: Vec<Node> = Vec::new();
        let mut in_flight: FuturesUnordered<BoxFuture<'a, HalfResult>> = FuturesUnordered::new();

        if !self.expand(batch, failed, &mut nodes, &mut in_flight, &mut isolation).await? {
            return Ok(isolation);
        }

        while let Some((parent, half, result)) = in_flight.next().await {
            let outcome = result?;
            match outcome {
                Outcome::Passed => {
                    self.aggregator.record_batch(&half, &outcome).await?;
                }
                Outcome::FatalError { .. } => {
                    warn!(batch = %half.id(), "Fatal error during isolation");
                    isolation.end = IsolationEnd::Aborted(outcome);
                    return Ok(isolation);
                }
                failed => {
                    nodes[parent].failed += 1;
                    debug!(batch = %half.id(), fields = half.len(), "Half failed");
                    self.expand(half, failed, &mut nodes, &mut in_flight, &mut isolation)
                        .await?;
                }
            }

            let node = &mut nodes[parent];
            node.pending -= 1;
            if node.pending == 0 && node.failed == 0 {
                let key = ReportKey::span(
                    node.batch.unit().clone(),
                    node.batch.first_field(),
                    node.batch.last_field(),
                );
                let message = match node.outcome.message() {
                    Some(original) => format!("{original} ({UNATTRIBUTED_NOTE})"),
                    None => UNATTRIBUTED_NOTE.to_string(),
                };
                let (location, cause) = match &node.outcome {
                    Outcome::Failed {
                        location,
                        cause: FailureCause::TransientExhausted(kind),
                        ..
                    } => (location.clone(), FailureCause::TransientExhausted(*kind)),
                    Outcome::Failed { location, .. } => {
                        (location.clone(), FailureCause::Unattributed)
                    }
                    _ => (None, FailureCause::Unattributed),
                };
                warn!(
                    batch = %node.batch.id(),
                    cause = ?cause,
                    "Batch failure could not be attributed"
                );
                self.aggregator
                    .record(
                        key,
                        Outcome::Failed {
                            message,
                            location,
                            cause,
                        },
                    )
                    .await?;
                isolation.unattributed += 1;
            }
        }

        debug!(
            calls = isolation.calls,
            attributed = isolation.attributed,
            unattributed = isolation.unattributed,
            "Isolation finished"
        );
        Ok(isolation)
    }

    /// Records a single failing field, or registers a node for `batch` and
    /// dispatches both of its halves. Returns true if halves were dispatched.
    async fn expand(
        &self,
        batch: Batch,
        failed: Outcome,
        nodes: &mut Vec<Node>,
        in_flight: &mut FuturesUnordered<BoxFuture<'a, HalfResult>>,
        isolation: &mut Isolation,
    ) -> Result<bool> {
        let Some((left, right)) = batch.split_halves() else {
            let field = batch.first_field().to_string();
            self.aggregator
                .record(ReportKey::field(batch.unit().clone(), field), failed)
                .await?;
            isolation.attributed += 1;
            return Ok(false);
        };

        let index = nodes.len();
        nodes.push(Node {
            batch,
            outcome: failed,
            pending: 2,
            failed: 0,
        });
        for half in [left, right] {
            let dispatcher = self.dispatcher;
            isolation.calls += 1;
            in_flight.push(
                async move {
                    let result = dispatcher.dispatch(&half).await;
                    (index, half, result)
                }
                .boxed(),
            );
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::core::{BatchId, Field, Scope, TransientKind, UnitId, ValidationReport};
    use crate::dispatch::{RemoteResponse, RetryPolicy};
    use crate::test_utils::ScriptedRemote;

    fn unit() -> UnitId {
        UnitId::new("sales", "orders")
    }

    fn batch(ids: &[String]) -> Batch {
        let fields = ids.iter().map(|id| Field::new(unit(), id.clone())).collect();
        Batch::new(BatchId::top_level(&unit(), 0), unit(), fields, ids.len()).unwrap()
    }

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("f{i:03}")).collect()
    }

    async fn run(remote: Arc<ScriptedRemote>, ids: &[String]) -> (Isolation, ValidationReport) {
        let dispatcher = Dispatcher::new(
            remote.clone(),
            4,
            RetryPolicy::none(),
            Duration::from_secs(5),
        )
        .unwrap();
        let aggregator = Aggregator::new();
        let batch = batch(ids);
        let first = dispatcher.dispatch(&batch).await.unwrap();
        assert!(first.is_failed());
        let isolation = FaultIsolator::new(&dispatcher, &aggregator)
            .isolate(batch, first)
            .await
            .unwrap();
        (isolation, aggregator.finish(BTreeSet::new()))
    }

    #[tokio::test]
    async fn test_three_fields_one_failing() {
        let remote = Arc::new(ScriptedRemote::new().poison(["b"]));
        let ids: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let (isolation, report) = run(remote.clone(), &ids).await;

        assert_eq!(isolation.calls, 4);
        assert_eq!(isolation.attributed, 1);
        assert_eq!(report.field_outcome(&unit(), "a"), Some(&Outcome::Passed));
        assert!(report.field_outcome(&unit(), "b").unwrap().is_confirmed_invalid());
        assert_eq!(report.field_outcome(&unit(), "c"), Some(&Outcome::Passed));
        assert_eq!(report.len(), 3);

        let mut calls: Vec<Vec<String>> = remote.calls().into_iter().map(|c| c.fields).collect();
        calls[1..3].sort();
        calls[3..5].sort();
        assert_eq!(
            calls,
            vec![
                vec!["a", "b", "c"],
                vec!["a", "b"],
                vec!["c"],
                vec!["a"],
                vec!["b"],
            ]
        );
    }

    #[tokio::test]
    async fn test_call_bound_for_single_failure() {
        for size in [2usize, 7, 64, 100, 500] {
            let ids = names(size);
            let culprit = ids[size / 3].clone();
            let remote = Arc::new(ScriptedRemote::new().poison([culprit.clone()]));
            let (isolation, report) = run(remote, &ids).await;

            let bound = 2 * (size as f64).log2().ceil() as u64;
            assert!(
                isolation.calls <= bound,
                "size {size}: {} calls > {bound}",
                isolation.calls
            );
            assert_eq!(report.len(), size);
            assert_eq!(report.failures().count(), 1);
            assert!(report.field_outcome(&unit(), &culprit).unwrap().is_failed());
        }
    }

    #[tokio::test]
    async fn test_multiple_failures_all_found() {
        let ids = names(16);
        let remote = Arc::new(ScriptedRemote::new().poison(["f001", "f009", "f015"]));
        let (isolation, report) = run(remote, &ids).await;
        assert_eq!(isolation.attributed, 3);
        let failed: Vec<String> = report.failures().map(|(k, _)| k.to_string()).collect();
        assert_eq!(
            failed,
            vec!["sales/orders:f001", "sales/orders:f009", "sales/orders:f015"]
        );
        assert_eq!(report.len(), 16);
    }

    #[tokio::test]
    async fn test_cross_field_interaction_is_unattributed() {
        let ids = names(4);
        let remote = Arc::new(ScriptedRemote::new().interaction(["f000", "f003"]));
        let (isolation, report) = run(remote, &ids).await;

        assert_eq!(isolation.attributed, 0);
        assert_eq!(isolation.unattributed, 1);
        let (key, outcome) = report.failures().next().unwrap();
        assert_eq!(
            key.scope,
            Scope::Span {
                first: "f000".to_string(),
                last: "f003".to_string()
            }
        );
        match outcome {
            Outcome::Failed { message, cause, .. } => {
                assert_eq!(*cause, FailureCause::Unattributed);
                assert!(message.contains("could not attribute a singular cause"));
            }
            other => panic!("unexpected outcome: {other}"),
        }
        assert!(ids
            .iter()
            .all(|id| report.field_outcome(&unit(), id) == Some(&Outcome::Passed)));
    }

    #[tokio::test]
    async fn test_transient_batch_with_passing_halves_stays_unvalidated() {
        let ids = names(4);
        let remote = Arc::new(ScriptedRemote::new().script([RemoteResponse::RateLimited {
            retry_after: None,
        }]));
        let (isolation, report) = run(remote, &ids).await;

        assert_eq!(isolation.unattributed, 1);
        assert_eq!(report.failures().count(), 1);
        let (key, outcome) = report.failures().next().unwrap();
        assert!(matches!(key.scope, Scope::Span { .. }));
        assert!(matches!(
            outcome,
            Outcome::Failed {
                cause: FailureCause::TransientExhausted(TransientKind::RateLimited),
                ..
            }
        ));
        assert!(outcome.is_unvalidated());
        assert!(!outcome.is_confirmed_invalid());
        assert_eq!(report.summary().unattributed_failures, 0);
        assert_eq!(report.summary().unvalidated, 1);
    }

    #[tokio::test]
    async fn test_fatal_half_aborts() {
        let ids = names(4);
        let expired = || RemoteResponse::Fatal {
            message: "session expired".to_string(),
        };
        let remote = Arc::new(ScriptedRemote::new().poison(["f000"]).script_unit(
            unit(),
            [
                RemoteResponse::Invalid {
                    message: "bad".to_string(),
                    location: None,
                    runtime: None,
                },
                expired(),
                expired(),
            ],
        ));
        let (isolation, _) = run(remote, &ids).await;
        assert!(matches!(isolation.end, IsolationEnd::Aborted(Outcome::FatalError { .. })));
    }

    #[tokio::test]
    async fn test_single_field_batch_takes_outcome() {
        let remote = Arc::new(ScriptedRemote::new().poison(["a"]));
        let (isolation, report) = run(remote.clone(), &["a".to_string()]).await;
        assert_eq!(isolation.calls, 0);
        assert_eq!(remote.call_count(), 1);
        assert!(report.field_outcome(&unit(), "a").unwrap().is_failed());
    }
}
