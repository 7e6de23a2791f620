use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::core::{Field, TransientKind, UnitId};
use crate::dispatch::{RemoteResponse, RemoteValidator, ValidationRequest};
use crate::error::{GuardError, Result};
use crate::inventory::InventoryProvider;
use crate::looker::types::{
    Created, ExploreDetail, LoginResponse, LookmlModel, MultiResults, QueryBody, QueryTaskBody,
    TaskResult, TaskVerdict,
};
use crate::looker::{LookerConfig, LookerError, LookerResult};
use crate::security::{mask, SecureString};

/// Tokens are refreshed this long before the server would expire them.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Runs `on_drop` when dropped unless disarmed first.
///
/// Guards a running query task: if the validating future is dropped by the
/// dispatcher's call timeout or by run cancellation, the task is still
/// cancelled on the server.
struct CancelOnDrop<F: FnOnce()> {
    on_drop: Option<F>,
}

impl<F: FnOnce()> CancelOnDrop<F> {
    fn new(on_drop: F) -> Self {
        Self {
            on_drop: Some(on_drop),
        }
    }

    fn disarm(&mut self) {
        self.on_drop = None;
    }
}

impl<F: FnOnce()> Drop for CancelOnDrop<F> {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop();
        }
    }
}

/// When polling gives up: one poll interval before the caller's timeout, so
/// the task is cancelled before the caller drops the request.
fn poll_deadline(started: Instant, timeout: Duration, poll_interval: Duration) -> Instant {
    started + timeout.saturating_sub(poll_interval)
}

struct AccessToken {
    value: SecureString,
    expires_at: Instant,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + TOKEN_EXPIRY_MARGIN < self.expires_at
    }
}

/// HTTP client for the Looker API.
///
/// Lists the explores of one LookML project as units and validates batches
/// by creating a zero-row query and polling its query task.
#[derive(Clone)]
pub struct LookerClient {
    config: Arc<LookerConfig>,
    client: Client,
    token: Arc<Mutex<Option<AccessToken>>>,
}

impl std::fmt::Debug for LookerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookerClient")
            .field("base_url", &self.config.base_url())
            .field("client_id", &mask(self.config.client_id()))
            .field("project", &self.config.project())
            .finish()
    }
}

impl LookerClient {
    /// Create a new client with the given configuration.
    pub fn new(config: LookerConfig) -> LookerResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| LookerError::Configuration {
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            config: Arc::new(config),
            client,
            token: Arc::new(Mutex::new(None)),
        })
    }

    /// Connection settings.
    pub fn config(&self) -> &LookerConfig {
        &self.config
    }

    async fn access_token(&self) -> LookerResult<String> {
        let mut token = self.token.lock().await;
        if let Some(current) = token.as_ref().filter(|t| t.is_fresh()) {
            return Ok(current.value.expose().to_string());
        }
        let fresh = self.login().await?;
        let value = fresh.value.expose().to_string();
        *token = Some(fresh);
        Ok(value)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    async fn login(&self) -> LookerResult<AccessToken> {
        debug!(client_id = %mask(self.config.client_id()), "Logging in to Looker");
        let response = self
            .client
            .post(self.config.api_url("login"))
            .form(&[
                ("client_id", self.config.client_id()),
                ("client_secret", self.config.client_secret().expose()),
            ])
            .send()
            .await?;
        let login: LoginResponse = self.handle_response(response).await?;
        info!(expires_in = login.expires_in, "Authenticated with Looker");
        Ok(AccessToken {
            value: SecureString::new(login.access_token),
            expires_at: Instant::now() + Duration::from_secs(login.expires_in),
        })
    }

    /// Sends an authenticated request, logging in again once if the token
    /// was rejected.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
    ) -> LookerResult<T> {
        let mut relogged = false;
        loop {
            let token = self.access_token().await?;
            let mut builder = self
                .client
                .request(method.clone(), self.config.api_url(path))
                .header("Authorization", format!("token {token}"))
                .query(query);
            if let Some(body) = body {
                builder = builder.json(body);
            }
            let response = builder.send().await?;
            match self.handle_response(response).await {
                Err(LookerError::Authentication { message }) if !relogged => {
                    warn!(path, %message, "Token rejected, logging in again");
                    self.invalidate_token().await;
                    relogged = true;
                }
                other => return other,
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> LookerResult<T> {
        self.request(Method::GET, path, query, None).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: &B,
    ) -> LookerResult<T> {
        let body = serde_json::to_value(body).map_err(|e| LookerError::Serialization {
            message: e.to_string(),
        })?;
        self.request(Method::POST, path, query, Some(&body)).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> LookerResult<T> {
        let status = response.status();

        if status.is_success() {
            response
                .json::<T>()
                .await
                .map_err(|e| LookerError::Serialization {
                    message: e.to_string(),
                })
        } else {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let body = response.text().await.unwrap_or_default();
            Err(LookerError::from_status(status.as_u16(), retry_after, body))
        }
    }

    /// All LookML models visible to the API user.
    pub async fn lookml_models(&self) -> LookerResult<Vec<LookmlModel>> {
        self.get("lookml_models", &[("fields", "name,project_name,explores")])
            .await
    }

    /// The dimensions of one explore.
    pub async fn explore(&self, unit: &UnitId) -> LookerResult<ExploreDetail> {
        let path = format!("lookml_models/{}/explores/{}", unit.namespace, unit.unit);
        self.get(&path, &[("fields", "fields")]).await
    }

    async fn create_query(&self, unit: &UnitId, fields: &[Field]) -> LookerResult<String> {
        let created: Created = self
            .post(
                "queries",
                &[("fields", "id"), ("cache", "false")],
                &QueryBody::new(unit, fields),
            )
            .await?;
        Ok(created.id.to_string())
    }

    async fn create_query_task(&self, query_id: String) -> LookerResult<String> {
        let created: Created = self
            .post(
                "query_tasks",
                &[("fields", "id"), ("cache", "false")],
                &QueryTaskBody {
                    query_id,
                    result_format: "json_detail",
                },
            )
            .await?;
        Ok(created.id.to_string())
    }

    async fn task_result(&self, task_id: &str) -> LookerResult<Option<TaskResult>> {
        let mut results: MultiResults = self
            .get("query_tasks/multi_results", &[("query_task_ids", task_id)])
            .await?;
        Ok(results.remove(task_id))
    }

    async fn cancel_task(&self, task_id: &str) {
        let path = format!("running_queries/{task_id}");
        let result: LookerResult<serde_json::Value> =
            self.request(Method::DELETE, &path, &[], None).await;
        if let Err(err) = result {
            debug!(task_id, error = %err, "Could not cancel query task");
        }
    }

    async fn run_query(&self, request: &ValidationRequest<'_>) -> LookerResult<RemoteResponse> {
        let deadline = poll_deadline(Instant::now(), request.timeout, self.config.poll_interval());
        let query_id = self.create_query(request.unit, request.fields).await?;
        let task_id = self.create_query_task(query_id).await?;

        let mut guard = CancelOnDrop::new({
            let client = self.clone();
            let task_id = task_id.clone();
            move || {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    debug!(task_id = %task_id, "Cancelling abandoned query task");
                    handle.spawn(async move { client.cancel_task(&task_id).await });
                }
            }
        });
        let response = self.poll_task(&task_id, deadline).await;
        guard.disarm();
        response
    }

    async fn poll_task(&self, task_id: &str, deadline: Instant) -> LookerResult<RemoteResponse> {
        loop {
            let now = Instant::now();
            if now >= deadline {
                self.cancel_task(task_id).await;
                return Ok(RemoteResponse::Transport(TransientKind::Timeout));
            }
            tokio::time::sleep(self.config.poll_interval().min(deadline - now)).await;
            if let Some(result) = self.task_result(task_id).await? {
                match result.verdict() {
                    TaskVerdict::Done(response) => return Ok(response),
                    TaskVerdict::SessionExpired => {
                        self.invalidate_token().await;
                        return Ok(RemoteResponse::Transport(TransientKind::ConnectionReset));
                    }
                    TaskVerdict::Pending => {}
                }
            }
        }
    }
}

#[async_trait]
impl InventoryProvider for LookerClient {
    #[instrument(skip(self), fields(project = %self.config.project()))]
    async fn units(&self) -> Result<Vec<UnitId>> {
        let models = self.lookml_models().await?;
        let mut units: Vec<UnitId> = models
            .iter()
            .flat_map(|model| model.units_in(self.config.project()))
            .collect();
        units.sort();
        if units.is_empty() {
            warn!("No explores found for project");
        }
        Ok(units)
    }

    #[instrument(skip(self), fields(unit = %unit))]
    async fn fields(&self, unit: &UnitId) -> Result<Vec<Field>> {
        match self.explore(unit).await {
            Ok(detail) => Ok(detail.into_fields(unit)),
            Err(LookerError::NotFound { .. }) => {
                Err(GuardError::inventory(format!("unit '{unit}' not found")))
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl RemoteValidator for LookerClient {
    #[instrument(skip(self, request), fields(unit = %request.unit, fields = request.fields.len()))]
    async fn validate(&self, request: ValidationRequest<'_>) -> RemoteResponse {
        match self.run_query(&request).await {
            Ok(response) => response,
            Err(err) => {
                debug!(error = %err, retryable = err.is_retryable(), "Looker request failed");
                err.into_response()
            }
        }
    }
}
