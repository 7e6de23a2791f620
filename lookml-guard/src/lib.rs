//! # lookml-guard - SQL generation checks for LookML projects
//!
//! lookml-guard finds the dimensions whose generated SQL fails to compile,
//! using as few calls to the modeling service as possible. It is meant to run
//! in CI against every pull request of a LookML project.
//!
//! ## Overview
//!
//! A run goes through these stages:
//!
//! 1. The [`selector`] resolves `model/explore` patterns against the inventory.
//! 2. The [`batcher`] cuts every selected explore into batches of dimensions.
//! 3. The [`dispatch`] layer sends each batch as one zero-row query, under a
//!    shared concurrency limit, with retries for transient failures.
//! 4. The [`isolator`] bisects failing batches until the broken dimensions
//!    are found.
//! 5. The [`aggregator`] collects terminal outcomes into a deterministic
//!    [`ValidationReport`](core::ValidationReport).
//! 6. In incremental mode the [`differ`] drops failures that already exist on
//!    the baseline branch.
//!
//! ## Quick Start
//!
//! ```rust
//! use async_trait::async_trait;
//! use lookml_guard::prelude::*;
//!
//! struct Warehouse;
//!
//! #[async_trait]
//! impl RemoteValidator for Warehouse {
//!     async fn validate(&self, request: ValidationRequest<'_>) -> RemoteResponse {
//!         if request.fields.iter().any(|f| f.id == "orders.broken") {
//!             RemoteResponse::Invalid {
//!                 message: "Unknown column 'broken'".into(),
//!                 location: None,
//!                 runtime: None,
//!             }
//!         } else {
//!             RemoteResponse::Valid { runtime: None }
//!         }
//!     }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let orders = UnitId::new("sales", "orders");
//! let inventory = StaticInventory::new([Unit::new(
//!     orders.clone(),
//!     ["orders.id", "orders.broken", "orders.total"]
//!         .into_iter()
//!         .map(|f| Field::new(orders.clone(), f))
//!         .collect(),
//! )]);
//!
//! let runner = ValidationRunner::builder(ValidatorConfig::default())
//!     .inventory(inventory)
//!     .remote(Warehouse)
//!     .build()?;
//! let result = runner.run().await?;
//!
//! let failures: Vec<String> = result.report.failures().map(|(k, _)| k.to_string()).collect();
//! assert_eq!(failures, vec!["sales/orders:orders.broken"]);
//! # Ok::<(), GuardError>(())
//! # }).unwrap();
//! ```
//!
//! ## Key Features
//!
//! - **Bisection**: a failing batch of `b` dimensions is narrowed down with at
//!   most `2⌈log₂ b⌉` extra queries per broken dimension
//! - **Fault tolerance**: rate limits, timeouts and server errors are retried
//!   with exponential backoff; oversized batches are re-split
//! - **Determinism**: reruns over identical inputs serialize to identical bytes
//! - **Incremental mode**: only failures introduced by the branch are reported
//! - **Caching**: explores whose dimensions did not change are not re-queried
//!
//! ## Features
//!
//! - `looker` (default): [`looker::LookerClient`], the HTTP collaborator for
//!   a live Looker instance
//! - `test-utils`: scripted collaborators for tests and benchmarks

pub mod aggregator;
pub mod batcher;
pub mod cache;
pub mod config;
pub mod core;
pub mod differ;
pub mod dispatch;
pub mod error;
pub mod formatters;
pub mod inventory;
pub mod isolator;
pub mod logging;
#[cfg(feature = "looker")]
pub mod looker;
pub mod prelude;
pub mod runner;
pub mod security;
pub mod selector;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
