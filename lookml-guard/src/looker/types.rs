use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{Field, TransientKind, UnitId};
use crate::dispatch::RemoteResponse;

/// Looker ids arrive as strings or numbers depending on the endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum LookerId {
    Text(String),
    Number(u64),
}

impl fmt::Display for LookerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(id) => f.write_str(id),
            Self::Number(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub expires_in: u64,
}

#[derive(Debug, Deserialize)]
pub struct LookmlModel {
    pub name: String,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub explores: Vec<ExploreRef>,
}

#[derive(Debug, Deserialize)]
pub struct ExploreRef {
    pub name: String,
}

impl LookmlModel {
    /// Units of this model if it belongs to `project`.
    pub fn units_in(&self, project: &str) -> impl Iterator<Item = UnitId> + '_ {
        let belongs = self.project_name.as_deref() == Some(project);
        self.explores
            .iter()
            .filter(move |_| belongs)
            .map(move |explore| UnitId::new(&self.name, &explore.name))
    }
}

#[derive(Debug, Deserialize)]
pub struct ExploreDetail {
    pub fields: ExploreFields,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExploreFields {
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
}

#[derive(Debug, Deserialize)]
pub struct Dimension {
    pub name: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub sql: Option<String>,
}

impl ExploreDetail {
    /// Converts the explore's dimensions into fields of `unit`, in order.
    pub fn into_fields(self, unit: &UnitId) -> Vec<Field> {
        self.fields
            .dimensions
            .into_iter()
            .map(|d| {
                let field = Field::new(unit.clone(), d.name)
                    .with_hidden(d.hidden)
                    .with_tags(d.tags);
                match d.sql {
                    Some(sql) => field.with_sql(sql),
                    None => field,
                }
            })
            .collect()
    }
}

/// Body of `POST /queries`. The query selects the batch's dimensions and
/// returns no rows.
#[derive(Debug, Serialize)]
pub struct QueryBody<'a> {
    pub model: &'a str,
    pub view: &'a str,
    pub fields: Vec<&'a str>,
    pub limit: &'static str,
    pub filter_expression: &'static str,
}

impl<'a> QueryBody<'a> {
    pub fn new(unit: &'a UnitId, fields: &'a [Field]) -> Self {
        Self {
            model: &unit.namespace,
            view: &unit.unit,
            fields: fields.iter().map(|f| f.id.as_str()).collect(),
            limit: "0",
            filter_expression: "1=2",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Created {
    pub id: LookerId,
}

#[derive(Debug, Serialize)]
pub struct QueryTaskBody {
    pub query_id: String,
    pub result_format: &'static str,
}

/// Entries of `GET /query_tasks/multi_results`, keyed by task id.
pub type MultiResults = HashMap<String, TaskResult>;

#[derive(Debug, Clone, Deserialize)]
pub struct TaskResult {
    pub status: String,
    #[serde(default)]
    pub data: Option<TaskData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskData {
    #[serde(default)]
    pub runtime: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub errors: Vec<TaskError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskError {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub message_details: Option<String>,
    #[serde(default)]
    pub sql_error_loc: Option<SqlErrorLocation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SqlErrorLocation {
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub character: Option<u32>,
}

impl fmt::Display for SqlErrorLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.character) {
            (Some(line), Some(character)) => write!(f, "line {line}, character {character}"),
            (Some(line), None) => write!(f, "line {line}"),
            _ => f.write_str("unknown location"),
        }
    }
}

/// What a polled query task says about the batch.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskVerdict {
    /// The task has not finished yet
    Pending,
    /// The task's session expired; log in again and retry
    SessionExpired,
    /// The task finished
    Done(RemoteResponse),
}

impl TaskResult {
    fn runtime(&self) -> Option<Duration> {
        self.data
            .as_ref()
            .and_then(|d| d.runtime)
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64)
    }

    /// Classifies the task status.
    pub fn verdict(&self) -> TaskVerdict {
        match self.status.as_str() {
            "complete" => TaskVerdict::Done(RemoteResponse::Valid {
                runtime: self.runtime(),
            }),
            "error" => {
                let data = self.data.clone().unwrap_or_default();
                if let Some(error) = &data.error {
                    if error.contains("OAuth") || error.contains("log in required") {
                        return TaskVerdict::SessionExpired;
                    }
                }
                let message = if data.errors.is_empty() {
                    data.error.clone().unwrap_or_else(|| "Unknown error".to_string())
                } else {
                    data.errors
                        .iter()
                        .map(|e| {
                            e.message_details
                                .clone()
                                .or_else(|| e.message.clone())
                                .unwrap_or_else(|| "Unknown error detail".to_string())
                        })
                        .collect::<Vec<_>>()
                        .join("; ")
                };
                let location = data
                    .errors
                    .iter()
                    .find_map(|e| e.sql_error_loc.as_ref())
                    .map(ToString::to_string);
                TaskVerdict::Done(RemoteResponse::Invalid {
                    message,
                    location,
                    runtime: self.runtime(),
                })
            }
            "killed" => TaskVerdict::Done(RemoteResponse::Transport(TransientKind::Timeout)),
            "running" | "added" | "expired" => TaskVerdict::Pending,
            other => TaskVerdict::Done(RemoteResponse::Fatal {
                message: format!("unexpected query task status '{other}'"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(json: &str) -> TaskResult {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_complete_task_is_valid() {
        let verdict = task(r#"{"status": "complete", "data": {"runtime": 1.5}}"#).verdict();
        assert_eq!(
            verdict,
            TaskVerdict::Done(RemoteResponse::Valid {
                runtime: Some(Duration::from_millis(1500))
            })
        );
    }

    #[test]
    fn test_error_task_carries_message_and_location() {
        let verdict = task(
            r#"{"status": "error", "data": {"runtime": 0.2, "errors": [
                {"message": "Query failed", "message_details": "Unknown column 'x'",
                 "sql_error_loc": {"line": 3, "character": 14}},
                {"message": "Second problem"}
            ]}}"#,
        )
        .verdict();
        match verdict {
            TaskVerdict::Done(RemoteResponse::Invalid {
                message, location, ..
            }) => {
                assert_eq!(message, "Unknown column 'x'; Second problem");
                assert_eq!(location.as_deref(), Some("line 3, character 14"));
            }
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[test]
    fn test_other_statuses() {
        assert_eq!(
            task(r#"{"status": "running"}"#).verdict(),
            TaskVerdict::Pending
        );
        assert_eq!(
            task(r#"{"status": "killed"}"#).verdict(),
            TaskVerdict::Done(RemoteResponse::Transport(TransientKind::Timeout))
        );
        assert_eq!(
            task(r#"{"status": "error", "data": {"error": "OAuth token expired"}}"#).verdict(),
            TaskVerdict::SessionExpired
        );
        assert!(matches!(
            task(r#"{"status": "mystery"}"#).verdict(),
            TaskVerdict::Done(RemoteResponse::Fatal { .. })
        ));
    }

    #[test]
    fn test_model_and_explore_parsing() {
        let models: Vec<LookmlModel> = serde_json::from_str(
            r#"[
                {"name": "sales", "project_name": "ecommerce",
                 "explores": [{"name": "orders"}, {"name": "returns"}]},
                {"name": "other", "project_name": "marketing", "explores": [{"name": "x"}]}
            ]"#,
        )
        .unwrap();
        let units: Vec<UnitId> = models.iter().flat_map(|m| m.units_in("ecommerce")).collect();
        assert_eq!(
            units,
            vec![UnitId::new("sales", "orders"), UnitId::new("sales", "returns")]
        );

        let detail: ExploreDetail = serde_json::from_str(
            r#"{"fields": {"dimensions": [
                {"name": "orders.id", "sql": "${TABLE}.id"},
                {"name": "orders.secret", "hidden": true, "tags": ["spectacles: ignore"]}
            ]}}"#,
        )
        .unwrap();
        let fields = detail.into_fields(&units[0]);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].sql.as_deref(), Some("${TABLE}.id"));
        assert!(fields[1].hidden);
        assert!(fields[1].is_ignored());
    }

    #[test]
    fn test_query_body_selects_no_rows() {
        let unit = UnitId::new("sales", "orders");
        let fields = vec![Field::new(unit.clone(), "orders.id")];
        let body = serde_json::to_value(QueryBody::new(&unit, &fields)).unwrap();
        assert_eq!(body["model"], "sales");
        assert_eq!(body["view"], "orders");
        assert_eq!(body["fields"][0], "orders.id");
        assert_eq!(body["limit"], "0");
    }
}
