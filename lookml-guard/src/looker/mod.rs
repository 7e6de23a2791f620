//! Looker API collaborator.
//!
//! [`LookerClient`] implements both [`InventoryProvider`](crate::inventory::InventoryProvider)
//! and [`RemoteValidator`](crate::dispatch::RemoteValidator): explores of one
//! LookML project are the units, their dimensions the fields.
//!
//! ```rust,no_run
//! use lookml_guard::config::ValidatorConfig;
//! use lookml_guard::looker::{LookerClient, LookerConfig};
//! use lookml_guard::runner::ValidationRunner;
//!
//! # async fn example() -> lookml_guard::error::Result<()> {
//! let client = LookerClient::new(LookerConfig::from_env()?)?;
//! let runner = ValidationRunner::builder(ValidatorConfig::default())
//!     .inventory(client.clone())
//!     .remote(client)
//!     .build()?;
//! let result = runner.run().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
mod types;

pub use client::LookerClient;
pub use config::LookerConfig;
pub use error::{LookerError, LookerResult};
pub use types::{ExploreDetail, LookmlModel, TaskResult, TaskVerdict};
