//! # tl-casebook-http
//!
//! reqwest client for the external case-management service. Implements the
//! read-only case risk lookup and lead creation.
//!
//! Endpoints:
//! - `GET  {base}/cases/{caseId}/risk`  -> `CaseRiskProfile` (camelCase JSON)
//! - `POST {base}/cases/{caseId}/leads` `{title, description}` -> `{leadId}`

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tl_core::error::{AppError, Result};
use tl_core::models::{CaseId, CaseRiskProfile, LeadId};
use tl_core::traits::{CaseDirectory, LeadSink};

pub struct CasebookClient {
    http_client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct NewLead<'a> {
    title: &'a str,
    description: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedLead {
    lead_id: LeadId,
}

/// Rejections the caller can fix are `Validation`; everything else may
/// succeed on retry.
fn status_error(status: StatusCode, url: &str) -> AppError {
    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        AppError::Validation(format!("case service rejected {url}: HTTP {status}"))
    } else {
        AppError::DownstreamUnavailable(format!("case service {url}: HTTP {status}"))
    }
}

fn transport_error(err: reqwest::Error) -> AppError {
    AppError::DownstreamUnavailable(format!("case service unreachable: {err}"))
}

impl CasebookClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn case_url(&self, case_id: CaseId, suffix: &str) -> String {
        format!("{}/cases/{}/{}", self.base_url, case_id, suffix)
    }
}

#[async_trait]
impl CaseDirectory for CasebookClient {
    async fn get_case_risk_profile(&self, case_id: CaseId) -> Result<CaseRiskProfile> {
        let url = self.case_url(case_id, "risk");
        let response = self.http_client.get(&url).send().await.map_err(transport_error)?;

        match response.status() {
            status if status.is_success() => {
                let mut profile: CaseRiskProfile = response.json().await.map_err(transport_error)?;
                profile.case_id = case_id;
                debug!("case {} risk profile fetched", case_id);
                Ok(profile)
            }
            StatusCode::NOT_FOUND => Err(AppError::not_found("case", case_id)),
            status => Err(status_error(status, &url)),
        }
    }
}

#[async_trait]
impl LeadSink for CasebookClient {
    async fn create_lead(&self, case_id: CaseId, title: &str, description: &str) -> Result<LeadId> {
        let url = self.case_url(case_id, "leads");
        let response = self
            .http_client
            .post(&url)
            .json(&NewLead { title, description })
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, &url));
        }
        let created: CreatedLead = response.json().await.map_err(transport_error)?;
        Ok(created.lead_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn urls_are_joined_without_double_slashes() {
        let client = CasebookClient::new("http://cases.internal/api/", Duration::from_secs(1)).unwrap();
        let id = Uuid::nil();
        assert_eq!(
            client.case_url(id, "risk"),
            format!("http://cases.internal/api/cases/{id}/risk")
        );
    }

    #[test]
    fn status_codes_split_into_validation_and_retryable() {
        assert!(matches!(
            status_error(StatusCode::UNPROCESSABLE_ENTITY, "u"),
            AppError::Validation(_)
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, "u"),
            AppError::DownstreamUnavailable(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, "u"),
            AppError::DownstreamUnavailable(_)
        ));
    }

    #[test]
    fn lead_payload_shape() {
        let body = serde_json::to_value(NewLead {
            title: "Check CCTV",
            description: "Verified sighting",
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "title": "Check CCTV", "description": "Verified sighting" }));
        let created: CreatedLead = serde_json::from_str(r#"{"leadId":"L-19"}"#).unwrap();
        assert_eq!(created.lead_id, "L-19");
    }

    #[tokio::test]
    async fn unreachable_service_is_downstream_unavailable() {
        // Nothing listens on the discard port locally.
        let client = CasebookClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = client.get_case_risk_profile(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, AppError::DownstreamUnavailable(_)));
        let err = client.create_lead(Uuid::now_v7(), "t", "d").await.unwrap_err();
        assert!(matches!(err, AppError::DownstreamUnavailable(_)));
    }
}
