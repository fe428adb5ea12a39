//! # tl-api Handlers
//!
//! Thin adapters between HTTP and the [`TriageEngine`]. Handlers only
//! parse, delegate and serialize; all decisions live in tl-core.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tl_core::models::{
    CaseId, HoaxIndicator, PhotoRef, PriorityBucket, QueueItemId, QueueQuery, QueueStatus,
    QueueType, ReliabilityTier, ReviewSubmission, ScoreField, Tip, TipId, TipLocation,
    TipsterAction, TipsterContact, TipsterId, TipsterQuery, TipsterSort,
};
use tl_core::TriageEngine;

use crate::error::ApiResult;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

/// State shared across all Actix-web workers.
pub struct AppState {
    pub engine: Arc<TriageEngine>,
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// Tip as handed over by the intake collaborator. `id` and `submittedAt`
/// are filled in when the intake did not assign them.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTipRequest {
    pub id: Option<TipId>,
    pub case_id: CaseId,
    pub content: String,
    pub location: Option<TipLocation>,
    pub sighted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub photos: Vec<PhotoRef>,
    #[serde(default)]
    pub is_anonymous: bool,
    pub tipster: TipsterContact,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl SubmitTipRequest {
    fn into_tip(self) -> Tip {
        Tip {
            id: self.id.unwrap_or_else(Uuid::now_v7),
            case_id: self.case_id,
            content: self.content,
            location: self.location,
            sighted_at: self.sighted_at,
            photos: self.photos,
            is_anonymous: self.is_anonymous,
            tipster: self.tipster,
            submitted_at: self.submitted_at.unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TipReceipt {
    pub tip_id: TipId,
    pub queue_item_id: QueueItemId,
    pub queue_type: QueueType,
    pub credibility_score: u8,
    pub priority_bucket: PriorityBucket,
    pub is_duplicate: bool,
    pub duplicate_of: Option<TipId>,
    pub hoax_indicators: BTreeSet<HoaxIndicator>,
    pub sla_deadline: DateTime<Utc>,
}

/// POST /tips
pub async fn submit_tip(
    data: web::Data<AppState>,
    body: web::Json<SubmitTipRequest>,
) -> ApiResult<HttpResponse> {
    let tip_id = data.engine.submit_tip(body.into_inner().into_tip()).await?;
    let verification = data.engine.verification(tip_id).await?;
    let item = data.engine.queue_item_for_tip(tip_id).await?;

    Ok(HttpResponse::Created().json(TipReceipt {
        tip_id,
        queue_item_id: item.id,
        queue_type: item.queue_type,
        credibility_score: verification.credibility_score,
        priority_bucket: verification.priority_bucket,
        is_duplicate: verification.is_duplicate,
        duplicate_of: verification.duplicate_of,
        hoax_indicators: verification.hoax_indicators,
        sla_deadline: item.sla_deadline,
    }))
}

/// GET /tips/{id}/verification
pub async fn get_verification(
    data: web::Data<AppState>,
    path: web::Path<TipId>,
) -> ApiResult<HttpResponse> {
    let verification = data.engine.verification(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(verification))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideRequest {
    pub reviewer_id: String,
    pub overrides: BTreeMap<ScoreField, u8>,
}

/// POST /tips/{id}/overrides
pub async fn override_subscores(
    data: web::Data<AppState>,
    path: web::Path<TipId>,
    body: web::Json<OverrideRequest>,
) -> ApiResult<HttpResponse> {
    let verification = data
        .engine
        .override_subscores(path.into_inner(), &body.reviewer_id, &body.overrides)
        .await?;
    Ok(HttpResponse::Ok().json(verification))
}

#[derive(Debug, Deserialize)]
pub struct AnalysisRequest {
    pub summary: Option<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// POST /tips/{id}/analysis
pub async fn merge_analysis(
    data: web::Data<AppState>,
    path: web::Path<TipId>,
    body: web::Json<AnalysisRequest>,
) -> ApiResult<HttpResponse> {
    let AnalysisRequest { summary, recommendations } = body.into_inner();
    let verification = data
        .engine
        .merge_ai_analysis(path.into_inner(), summary, recommendations)
        .await?;
    Ok(HttpResponse::Ok().json(verification))
}

/// POST /tips/{id}/resolution
pub async fn record_resolution(
    data: web::Data<AppState>,
    path: web::Path<TipId>,
) -> ApiResult<HttpResponse> {
    let profile = data.engine.record_case_resolution(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(profile))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub queue_item_id: QueueItemId,
    pub reviewer_id: String,
}

/// POST /queue/claim
pub async fn claim(data: web::Data<AppState>, body: web::Json<ClaimRequest>) -> ApiResult<HttpResponse> {
    let item = data.engine.claim(body.queue_item_id, &body.reviewer_id).await?;
    Ok(HttpResponse::Ok().json(item))
}

/// POST /queue/release
pub async fn release(data: web::Data<AppState>, body: web::Json<ClaimRequest>) -> ApiResult<HttpResponse> {
    let item = data.engine.release(body.queue_item_id, &body.reviewer_id).await?;
    Ok(HttpResponse::Ok().json(item))
}

#[derive(Debug, Deserialize)]
pub struct QueueParams {
    #[serde(rename = "type")]
    pub queue_type: Option<QueueType>,
    pub status: Option<QueueStatus>,
    pub breached: Option<bool>,
    pub limit: Option<usize>,
}

/// GET /queue?type=&status=pending&breached=&limit=
pub async fn list_queue(
    data: web::Data<AppState>,
    params: web::Query<QueueParams>,
) -> ApiResult<HttpResponse> {
    let query = QueueQuery {
        queue_type: params.queue_type,
        status: params.status.unwrap_or(QueueStatus::Pending),
        breached_only: params.breached.unwrap_or(false),
        limit: Some(clamp_limit(params.limit)),
    };
    let items = data.engine.list_queue(&query).await?;
    Ok(HttpResponse::Ok().json(items))
}

/// GET /queue/{id}
pub async fn get_queue_item(
    data: web::Data<AppState>,
    path: web::Path<QueueItemId>,
) -> ApiResult<HttpResponse> {
    let item = data.engine.get_queue_item(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(item))
}

/// POST /review
pub async fn submit_review(
    data: web::Data<AppState>,
    body: web::Json<ReviewSubmission>,
) -> ApiResult<HttpResponse> {
    let decision = data.engine.submit_review(body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(decision))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TipsterParams {
    pub tier: Option<ReliabilityTier>,
    pub sort_by: Option<TipsterSort>,
    pub include_blocked: Option<bool>,
    pub limit: Option<usize>,
}

/// GET /tipsters?tier=&sortBy=&limit=
pub async fn list_tipsters(
    data: web::Data<AppState>,
    params: web::Query<TipsterParams>,
) -> ApiResult<HttpResponse> {
    let query = TipsterQuery {
        tier: params.tier,
        sort_by: params.sort_by.unwrap_or_default(),
        include_blocked: params.include_blocked.unwrap_or(false),
        limit: Some(clamp_limit(params.limit)),
    };
    Ok(HttpResponse::Ok().json(data.engine.list_tipsters(&query)))
}

/// GET /tipsters/{id}
pub async fn get_tipster(data: web::Data<AppState>, path: web::Path<String>) -> ApiResult<HttpResponse> {
    let profile = data.engine.get_tipster(&TipsterId(path.into_inner()))?;
    Ok(HttpResponse::Ok().json(profile))
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub action: TipsterAction,
}

/// POST /tipsters/{id}/action
pub async fn tipster_action(
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<ActionRequest>,
) -> ApiResult<HttpResponse> {
    let profile = data
        .engine
        .tipster_action(&TipsterId(path.into_inner()), body.action)
        .await?;
    Ok(HttpResponse::Ok().json(profile))
}

/// GET /stats
pub async fn stats(data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(data.engine.stats(Utc::now()))
}

/// GET /health
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}
