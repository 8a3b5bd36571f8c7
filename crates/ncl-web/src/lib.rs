//! JSON HTTP surface over the campaign ledger.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Path, Query, Request, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use ncl_core::{
    CampaignPatch, ClientCacheSnapshot, DonationStatus, NewCampaign, NewDonation, NewReport,
    NewUpdate, ReportStatus,
};
use ncl_reconcile::{
    CampaignFilter, LedgerError, Platform, PlatformConfig, ReviewDecision, WithdrawalDecision,
    WithdrawalInput,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "ncl-web";

pub struct AppState {
    pub platform: Platform,
}

impl AppState {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }
}

#[derive(Debug, Deserialize)]
struct WithdrawalsQuery {
    campaign: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DonationStatusBody {
    status: DonationStatus,
    #[serde(default)]
    block_number: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ResolveReportBody {
    outcome: ReportStatus,
}

/// Every failure leaves as an `{"error": ...}` body: ledger errors mapped onto statuses, and
/// extractor rejections keeping axum's status.
#[derive(Debug)]
pub enum ApiError {
    Ledger(LedgerError),
    Rejected { status: StatusCode, message: String },
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        Self::Ledger(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Ledger(err) => {
                let status = match &err {
                    err if err.is_not_found() => StatusCode::NOT_FOUND,
                    LedgerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    LedgerError::Conflict(_) => StatusCode::CONFLICT,
                    LedgerError::Storage(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.to_string())
            }
            Self::Rejected { status, message } => (status, message),
        };
        if status.is_server_error() {
            error!(error = %message, "request failed");
        } else {
            warn!(status = status.as_u16(), error = %message, "request rejected");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// `Json<T>` whose rejection is an [`ApiError`].
#[derive(Debug)]
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::Rejected {
                status: rejection.status(),
                message: rejection.body_text(),
            }),
        }
    }
}

/// `Query<T>`; an unparseable filter is a 422 like any other invalid input.
#[derive(Debug)]
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::Rejected {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                message: rejection.body_text(),
            }),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/api/campaigns", get(list_campaigns_handler).post(create_campaign_handler))
        .route(
            "/api/campaigns/{id}",
            get(get_campaign_handler).patch(update_campaign_handler),
        )
        .route("/api/campaigns/{id}/reconcile", post(reconcile_handler))
        .route("/api/campaigns/{id}/stats", get(stats_handler))
        .route(
            "/api/campaigns/{id}/donations",
            get(list_donations_handler).post(record_donation_handler),
        )
        .route(
            "/api/campaigns/{id}/donations/{tx}",
            patch(donation_status_handler),
        )
        .route("/api/campaigns/{id}/updates", post(add_update_handler))
        .route("/api/campaigns/{id}/reports", post(add_report_handler))
        .route(
            "/api/campaigns/{id}/reports/{report_id}/resolve",
            post(resolve_report_handler),
        )
        .route("/api/campaigns/{id}/review", post(review_campaign_handler))
        .route("/api/donors/{address}/donations", get(donor_history_handler))
        .route("/api/ngos/{id}/score", get(ngo_score_handler))
        .route(
            "/api/withdrawals",
            get(list_withdrawals_handler).post(request_withdrawal_handler),
        )
        .route("/api/withdrawals/{id}/review", post(review_withdrawal_handler))
        .route("/api/admin/review", get(review_queue_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = PlatformConfig::from_env();
    let port = config.web_port;
    let data_dir = config.data_dir.clone();
    let platform = Platform::open(config)?;
    let _scheduler = platform.start_scheduler().await?;

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, data_dir = %data_dir.display(), "listening");
    axum::serve(listener, app(AppState::new(platform))).await?;
    Ok(())
}

async fn healthz_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": CRATE_NAME }))
}

async fn list_campaigns_handler(
    State(state): State<Arc<AppState>>,
    ApiQuery(filter): ApiQuery<CampaignFilter>,
) -> ApiResult<Response> {
    let campaigns = state.platform.campaigns.list_campaigns(&filter).await?;
    Ok(Json(campaigns).into_response())
}

async fn create_campaign_handler(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<NewCampaign>,
) -> ApiResult<Response> {
    let campaign = state.platform.campaigns.create_campaign(body).await?;
    Ok((StatusCode::CREATED, Json(campaign)).into_response())
}

async fn get_campaign_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let campaign = state
        .platform
        .campaigns
        .load_campaign(&id)
        .await?
        .ok_or_else(|| LedgerError::CampaignNotFound(id.clone()))?;
    Ok(Json(campaign).into_response())
}

async fn update_campaign_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<CampaignPatch>,
) -> ApiResult<Response> {
    let campaign = state.platform.campaigns.update_campaign(&id, body).await?;
    Ok(Json(campaign).into_response())
}

/// The body is optional: an empty request reconciles the files only.
async fn reconcile_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Response> {
    let cache = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        Some(
            serde_json::from_slice::<ClientCacheSnapshot>(&body)
                .map_err(|err| LedgerError::Validation(format!("invalid cache snapshot: {err}")))?,
        )
    };
    let campaign = state.platform.campaigns.reconcile_campaign(&id, cache).await?;
    Ok(Json(campaign).into_response())
}

async fn stats_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let stats = state.platform.campaigns.campaign_stats(&id).await?;
    Ok(Json(stats).into_response())
}

async fn list_donations_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let donations = state.platform.campaigns.campaign_donations(&id).await?;
    Ok(Json(donations).into_response())
}

async fn record_donation_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<NewDonation>,
) -> ApiResult<Response> {
    let (donation, created) = state.platform.campaigns.record_donation(&id, body).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(donation)).into_response())
}

async fn donation_status_handler(
    State(state): State<Arc<AppState>>,
    Path((id, tx)): Path<(String, String)>,
    ApiJson(body): ApiJson<DonationStatusBody>,
) -> ApiResult<Response> {
    let donation = state
        .platform
        .campaigns
        .update_donation_status(&id, &tx, body.status, body.block_number)
        .await?;
    Ok(Json(donation).into_response())
}

async fn add_update_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<NewUpdate>,
) -> ApiResult<Response> {
    let update = state.platform.campaigns.add_update(&id, body).await?;
    Ok((StatusCode::CREATED, Json(update)).into_response())
}

async fn add_report_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<NewReport>,
) -> ApiResult<Response> {
    let report = state.platform.campaigns.add_report(&id, body).await?;
    Ok((StatusCode::CREATED, Json(report)).into_response())
}

async fn resolve_report_handler(
    State(state): State<Arc<AppState>>,
    Path((id, report_id)): Path<(String, String)>,
    ApiJson(body): ApiJson<ResolveReportBody>,
) -> ApiResult<Response> {
    let report = state
        .platform
        .campaigns
        .resolve_report(&id, &report_id, body.outcome)
        .await?;
    Ok(Json(report).into_response())
}

async fn review_campaign_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<ReviewDecision>,
) -> ApiResult<Response> {
    let campaign = state.platform.campaigns.review_campaign(&id, body).await?;
    Ok(Json(campaign).into_response())
}

async fn donor_history_handler(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> ApiResult<Response> {
    let donations = state.platform.campaigns.donations_by_donor(&address).await?;
    Ok(Json(donations).into_response())
}

async fn ngo_score_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let score = state.platform.scores.refresh(&id).await?;
    Ok(Json(score).into_response())
}

async fn list_withdrawals_handler(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<WithdrawalsQuery>,
) -> ApiResult<Response> {
    let withdrawals = state
        .platform
        .withdrawals
        .list(query.campaign.as_deref())
        .await?;
    Ok(Json(withdrawals).into_response())
}

async fn request_withdrawal_handler(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<WithdrawalInput>,
) -> ApiResult<Response> {
    let request = state.platform.withdrawals.request(body).await?;
    Ok((StatusCode::CREATED, Json(request)).into_response())
}

async fn review_withdrawal_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<WithdrawalDecision>,
) -> ApiResult<Response> {
    let reviewed = state.platform.withdrawals.review(&id, body).await?;
    Ok(Json(reviewed).into_response())
}

async fn review_queue_handler(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let queue = state.platform.review_queue().await?;
    Ok(Json(queue).into_response())
}
