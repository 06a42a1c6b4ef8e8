//! Request handlers and wire types

use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
};
use cadence_common::{Priority, incoming};
use cadence_dispatch::{DispatchService, ScheduleRequest, ScheduledUnit, ValidationError};
use cadence_store::{CampaignId, DispatchUnit, UnitId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared state of every handler
#[derive(Debug, Clone)]
pub struct AppState {
    pub service: Arc<dyn DispatchService>,
    pub default_sender: Arc<str>,
}

/// Body of `POST /api/schedule`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleBody {
    pub recipients: Option<Vec<String>>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    pub start_time: Option<DateTime<Utc>>,
    pub delay_seconds: Option<i64>,
    pub hourly_limit: Option<i64>,
    pub sender: Option<String>,
    /// Anything other than `"high"` schedules at normal priority
    #[serde(default, deserialize_with = "lenient_priority")]
    pub priority: Priority,
}

fn lenient_priority<'de, D>(deserializer: D) -> Result<Priority, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(priority)) => priority.parse().unwrap_or_default(),
        _ => Priority::Normal,
    })
}

impl ScheduleBody {
    /// Apply defaults and clamp numeric fields into range
    ///
    /// Negative delays are treated as zero and a negative hourly limit as
    /// unlimited.
    ///
    /// # Errors
    /// If no recipients were given
    pub fn into_request(
        self,
        default_sender: &str,
        now: DateTime<Utc>,
    ) -> Result<ScheduleRequest, ValidationError> {
        let recipients = self
            .recipients
            .filter(|recipients| !recipients.is_empty())
            .ok_or(ValidationError::NoRecipients)?;

        let sender = self
            .sender
            .filter(|sender| !sender.trim().is_empty())
            .unwrap_or_else(|| default_sender.to_string());

        Ok(ScheduleRequest {
            recipients,
            subject: self.subject,
            body: self.body,
            start_time: self.start_time.unwrap_or(now),
            delay_seconds: self
                .delay_seconds
                .map_or(0, |secs| u64::try_from(secs).unwrap_or(0)),
            hourly_limit: self.hourly_limit.map_or(0, |limit| {
                u32::try_from(limit.max(0)).unwrap_or(u32::MAX)
            }),
            sender,
            priority: self.priority,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleResponse {
    pub message: &'static str,
    pub campaign_id: CampaignId,
    pub count: usize,
}

/// Body of `PUT /api/scheduled-units/{id}`
#[derive(Debug, Deserialize)]
pub struct EditBody {
    pub body: Option<String>,
}

/// Body of `POST /api/delete-units`
#[derive(Debug, Deserialize)]
pub struct DeleteBody {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub message: &'static str,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct FailedQuery {
    pub limit: Option<usize>,
}

const DEFAULT_FAILED_LIMIT: usize = 5;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

fn bad_json(rejection: &JsonRejection) -> ApiError {
    ApiError::BadRequest(rejection.body_text())
}

pub async fn schedule(
    State(state): State<AppState>,
    body: Result<Json<ScheduleBody>, JsonRejection>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let Json(body) = body.map_err(|e| bad_json(&e))?;
    let request = body.into_request(&state.default_sender, Utc::now())?;

    incoming!(
        level = INFO,
        recipients = request.recipients.len(),
        sender = %request.sender,
        priority = %request.priority,
        "Schedule request"
    );

    let handle = state.service.schedule(request).await?;

    Ok(Json(ScheduleResponse {
        message: "Emails scheduled",
        campaign_id: handle.campaign_id,
        count: handle.count,
    }))
}

pub async fn scheduled_units(
    State(state): State<AppState>,
) -> Result<Json<Vec<ScheduledUnit>>, ApiError> {
    Ok(Json(state.service.scheduled_units().await?))
}

pub async fn sent_units(
    State(state): State<AppState>,
) -> Result<Json<Vec<DispatchUnit>>, ApiError> {
    Ok(Json(state.service.sent_units().await?))
}

pub async fn failed_units(
    State(state): State<AppState>,
    query: Result<Query<FailedQuery>, QueryRejection>,
) -> Result<Json<Vec<DispatchUnit>>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let limit = query.limit.unwrap_or(DEFAULT_FAILED_LIMIT);
    Ok(Json(state.service.failed_units(limit).await?))
}

pub async fn edit_unit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<EditBody>, JsonRejection>,
) -> Result<Json<DispatchUnit>, ApiError> {
    let Json(body) = body.map_err(|e| bad_json(&e))?;
    let body = body
        .body
        .filter(|body| !body.trim().is_empty())
        .ok_or(ValidationError::EmptyBody)?;

    let id: UnitId = id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid unit id: {id}")))?;

    incoming!(level = INFO, unit_id = %id, "Edit request");

    Ok(Json(state.service.edit_unit_body(&id, body).await?))
}

pub async fn delete_units(
    State(state): State<AppState>,
    body: Result<Json<DeleteBody>, JsonRejection>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let Json(body) = body.map_err(|e| bad_json(&e))?;

    // Malformed identifiers cannot name a stored unit
    let ids: Vec<UnitId> = body.ids.iter().filter_map(|id| id.parse().ok()).collect();

    incoming!(level = INFO, requested = body.ids.len(), "Delete request");

    let count = state.service.delete_units(&ids).await?;

    Ok(Json(DeleteResponse {
        message: "Emails deleted",
        count,
    }))
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "tests")]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_schedule_body_defaults() {
        let body: ScheduleBody =
            serde_json::from_str(r#"{"recipients": ["a@x.com"], "subject": "S", "body": "B"}"#)
                .unwrap();
        let request = body.into_request("test@example.com", now()).unwrap();

        assert_eq!(request.sender, "test@example.com");
        assert_eq!(request.start_time, now());
        assert_eq!(request.delay_seconds, 0);
        assert_eq!(request.hourly_limit, 0);
        assert_eq!(request.priority, Priority::Normal);
    }

    #[test]
    fn test_schedule_body_clamps_numbers() {
        let body: ScheduleBody = serde_json::from_str(
            r#"{"recipients": ["a@x.com"], "delaySeconds": -5, "hourlyLimit": -1, "priority": "high", "sender": "me@x.com"}"#,
        )
        .unwrap();
        let request = body.into_request("test@example.com", now()).unwrap();

        assert_eq!(request.delay_seconds, 0);
        assert_eq!(request.hourly_limit, 0);
        assert_eq!(request.priority, Priority::High);
        assert_eq!(request.sender, "me@x.com");
    }

    #[test]
    fn test_unknown_priority_is_normal() {
        for priority in [r#""urgent""#, r#""low""#, "10", "null", r#""HIGH""#] {
            let body: ScheduleBody = serde_json::from_str(&format!(
                r#"{{"recipients": ["a@x.com"], "priority": {priority}}}"#
            ))
            .unwrap();
            let expected = if priority == r#""HIGH""# {
                Priority::High
            } else {
                Priority::Normal
            };
            assert_eq!(body.priority, expected, "{priority}");
        }
    }

    #[test]
    fn test_schedule_body_requires_recipients() {
        for json in [r#"{}"#, r#"{"recipients": []}"#] {
            let body: ScheduleBody = serde_json::from_str(json).unwrap();
            assert_eq!(
                body.into_request("test@example.com", now()),
                Err(ValidationError::NoRecipients)
            );
        }
    }

    #[tokio::test]
    async fn test_health_handler() {
        let Json(response) = health().await;
        assert_eq!(response.status, "ok");
    }
}
