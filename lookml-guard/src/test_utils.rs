//! Deterministic stand-ins for the modeling service.
//!
//! [`ScriptedRemote`] answers validation requests from fixed rules: batches
//! containing a poisoned field are invalid, batches containing every field of
//! an interaction set are invalid, units marked fatal always fail fatally.
//! Queued responses are served first, one per call. Every call is recorded so
//! tests can assert on the exact dispatch sequence.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::{Field, TransientKind, Unit, UnitId};
use crate::dispatch::{RemoteResponse, RemoteValidator, ValidationRequest};
use crate::inventory::StaticInventory;

/// One recorded remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// The unit validated
    pub unit: UnitId,
    /// Field ids in request order
    pub fields: Vec<String>,
}

/// A scripted, in-memory [`RemoteValidator`].
#[derive(Debug, Default)]
pub struct ScriptedRemote {
    poisoned: BTreeSet<String>,
    interactions: Vec<BTreeSet<String>>,
    fatal_units: BTreeSet<UnitId>,
    capacity_limit: Option<usize>,
    latency: Duration,
    runtime: Option<Duration>,
    queued: Mutex<VecDeque<RemoteResponse>>,
    queued_by_unit: Mutex<BTreeMap<UnitId, VecDeque<RemoteResponse>>>,
    calls: Mutex<Vec<RecordedCall>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedRemote {
    /// A remote that accepts every batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Batches containing any of `fields` are invalid.
    pub fn poison<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.poisoned.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Batches containing all of `fields` together are invalid.
    pub fn interaction<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interactions
            .push(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Every call for `unit` fails fatally.
    pub fn fatal_unit(mut self, unit: UnitId) -> Self {
        self.fatal_units.insert(unit);
        self
    }

    /// Batches larger than `limit` time out.
    pub fn capacity_limit(mut self, limit: usize) -> Self {
        self.capacity_limit = Some(limit);
        self
    }

    /// Each call takes `latency` to answer.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Answered calls report `runtime`.
    pub fn runtime(mut self, runtime: Duration) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Serves `responses` to the next calls, before any rule applies.
    pub fn script<I>(self, responses: I) -> Self
    where
        I: IntoIterator<Item = RemoteResponse>,
    {
        self.queued
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend(responses);
        self
    }

    /// Serves `responses` to the next calls for `unit`.
    pub fn script_unit<I>(self, unit: UnitId, responses: I) -> Self
    where
        I: IntoIterator<Item = RemoteResponse>,
    {
        self.queued_by_unit
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(unit)
            .or_default()
            .extend(responses);
        self
    }

    /// Every call received so far, in arrival order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Number of calls received.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Largest number of calls observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_queued(&self, unit: &UnitId) -> Option<RemoteResponse> {
        let by_unit = self
            .queued_by_unit
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get_mut(unit)
            .and_then(VecDeque::pop_front);
        by_unit.or_else(|| {
            self.queued
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .pop_front()
        })
    }

    fn judge(&self, request: &ValidationRequest<'_>) -> RemoteResponse {
        if let Some(response) = self.next_queued(request.unit) {
            return response;
        }
        if self.fatal_units.contains(request.unit) {
            return RemoteResponse::Fatal {
                message: format!("Explore '{}' not found", request.unit),
            };
        }
        if self
            .capacity_limit
            .is_some_and(|limit| request.fields.len() > limit)
        {
            return RemoteResponse::Transport(TransientKind::Timeout);
        }
        if let Some(field) = request
            .fields
            .iter()
            .find(|f| self.poisoned.contains(&f.id))
        {
            return RemoteResponse::Invalid {
                message: format!("Unknown column '{}'", field.id),
                location: Some("line 1".to_string()),
                runtime: self.runtime,
            };
        }
        let present: BTreeSet<&str> = request.fields.iter().map(|f| f.id.as_str()).collect();
        if self
            .interactions
            .iter()
            .any(|set| set.iter().all(|id| present.contains(id.as_str())))
        {
            return RemoteResponse::Invalid {
                message: "Duplicate column name in generated SQL".to_string(),
                location: None,
                runtime: self.runtime,
            };
        }
        RemoteResponse::Valid {
            runtime: self.runtime,
        }
    }
}

#[async_trait]
impl RemoteValidator for ScriptedRemote {
    async fn validate(&self, request: ValidationRequest<'_>) -> RemoteResponse {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak.fetch_max(current, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(RecordedCall {
                unit: request.unit.clone(),
                fields: request.fields.iter().map(|f| f.id.clone()).collect(),
            });
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.judge(&request)
    }
}

/// A unit with plain visible fields named by `ids`.
pub fn unit_with_fields(namespace: &str, unit: &str, ids: &[&str]) -> Unit {
    let id = UnitId::new(namespace, unit);
    let fields = ids.iter().map(|f| Field::new(id.clone(), *f)).collect();
    Unit::new(id, fields)
}

/// An inventory holding the `sales/orders` unit with fields `a`, `b`, `c`.
pub fn orders_inventory() -> StaticInventory {
    StaticInventory::new([unit_with_fields("sales", "orders", &["a", "b", "c"])])
}

/// An inventory of `units` units in namespace `ns`, each with `fields` fields
/// named `f000`, `f001`, ...
pub fn generated_inventory(ns: &str, units: usize, fields: usize) -> StaticInventory {
    StaticInventory::new((0..units).map(|u| {
        let id = UnitId::new(ns, format!("unit_{u:03}"));
        let fields = (0..fields)
            .map(|f| Field::new(id.clone(), format!("f{f:03}")))
            .collect();
        Unit::new(id, fields)
    }))
}
