//! Query dispatch: the remote boundary, retry policy and the shared permit pool.
//!
//! [`Dispatcher::dispatch`] turns one [`Batch`](crate::core::Batch) into one
//! terminal [`Outcome`](crate::core::Outcome). Transient failures (rate
//! limits, timeouts, dropped connections) are retried with exponential
//! backoff; content failures and fatal errors are returned immediately.

mod cancel;
mod dispatcher;
mod remote;
mod retry;

pub use cancel::CancellationSignal;
pub use dispatcher::{DispatchStats, Dispatcher};
pub use remote::{RemoteResponse, RemoteValidator, ValidationRequest};
pub use retry::RetryPolicy;
