use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use grid_hedge_core::config::{
    EngineSettings, EntrySettings, ExchangeCredentials, GridLevel, GridSettings, MoneySettings,
    ProfitSettings, SessionConfig, TimeFilter, TradingSettings, WebhookSettings,
};
use grid_hedge_orchestrator::{
    RegistryError, ResourceUsage, SessionRegistry, SessionStatus,
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<SessionRegistry>,
    pub admin_secret: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<T, ApiError>;

fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn map_registry_error(err: RegistryError) -> ApiError {
    let status = match &err {
        RegistryError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
        RegistryError::CapacityExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RegistryError::AlreadyRunning { .. } => StatusCode::CONFLICT,
        RegistryError::InvalidConfig(_) => StatusCode::UNPROCESSABLE_ENTITY,
        RegistryError::ChannelClosed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err.to_string())
}

// ======================================================================
// Registration payload
// ======================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub user_id: String,
    pub user_bot_id: String,
    pub exchange: ExchangePayload,
    pub settings: SettingsPayload,
    #[serde(default)]
    pub webhook: Option<WebhookPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangePayload {
    pub api_key: String,
    pub api_secret: String,
    #[serde(default)]
    pub passphrase: String,
    #[serde(default = "default_true")]
    pub is_demo: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPayload {
    pub trading_pair: String,
    pub leverage: u32,
    #[serde(default)]
    pub custom_settings: CustomSettings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub url: String,
    #[serde(default)]
    pub secret: String,
}

/// Per-user strategy overrides, defaulting field-by-field to the standard
/// grid preset when omitted.
#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CustomSettings {
    pub multiplier: Decimal,
    pub space_percent: Decimal,
    pub space_orders: usize,
    pub space_lots: Decimal,
    pub space1_percent: Decimal,
    pub space1_orders: usize,
    pub space1_lots: Decimal,
    pub space2_percent: Decimal,
    pub space2_orders: usize,
    pub space2_lots: Decimal,
    pub space3_percent: Decimal,
    pub space3_orders: usize,
    pub space3_lots: Decimal,

    pub use_sma_sar: bool,
    pub sma_period: usize,
    pub sar_af: Decimal,
    pub sar_max: Decimal,
    pub reverse_order: bool,
    pub cci_period: usize,
    pub cci_max: Decimal,
    pub cci_min: Decimal,
    pub timeframe: String,
    pub open_on_new_candle: bool,

    pub single_order_profit: Decimal,
    pub pair_global_profit: Decimal,
    pub global_profit: Decimal,
    pub max_loss: Decimal,
    pub trades_per_day: u32,

    pub base_lot: Decimal,
    pub min_lot: Decimal,
    pub max_lot: Decimal,

    pub start_hour: u32,
    pub start_minute: u32,
    pub finish_hour: u32,
    pub finish_minute: u32,

    pub tick_interval_ms: u64,
    pub close_on_stop: bool,
}

impl Default for CustomSettings {
    fn default() -> Self {
        Self {
            multiplier: dec!(1.5),
            space_percent: dec!(0.5),
            space_orders: 5,
            space_lots: dec!(0.01),
            space1_percent: dec!(1.5),
            space1_orders: 1,
            space1_lots: dec!(0.02),
            space2_percent: dec!(3.0),
            space2_orders: 1,
            space2_lots: dec!(0.03),
            space3_percent: dec!(5.0),
            space3_orders: 99,
            space3_lots: dec!(0.09),
            use_sma_sar: true,
            sma_period: 7,
            sar_af: dec!(0.1),
            sar_max: dec!(0.8),
            reverse_order: false,
            cci_period: 0,
            cci_max: dec!(100),
            cci_min: dec!(-100),
            timeframe: "1H".to_string(),
            open_on_new_candle: true,
            single_order_profit: dec!(3.0),
            pair_global_profit: dec!(1.0),
            global_profit: Decimal::ZERO,
            max_loss: Decimal::ZERO,
            trades_per_day: 99,
            base_lot: dec!(0.01),
            min_lot: dec!(0.001),
            max_lot: dec!(50),
            start_hour: 0,
            start_minute: 0,
            finish_hour: 23,
            finish_minute: 59,
            tick_interval_ms: 1_000,
            close_on_stop: true,
        }
    }
}

const fn default_true() -> bool {
    true
}

impl RegisterRequest {
    /// Maps the wire payload onto the validated session configuration.
    #[must_use]
    pub fn into_config(self) -> SessionConfig {
        let custom = self.settings.custom_settings;
        SessionConfig {
            user_id: self.user_id,
            user_bot_id: self.user_bot_id,
            exchange: ExchangeCredentials {
                api_key: self.exchange.api_key,
                api_secret: self.exchange.api_secret,
                passphrase: self.exchange.passphrase,
                demo: self.exchange.is_demo,
            },
            trading: TradingSettings {
                symbol: self.settings.trading_pair,
                leverage: self.settings.leverage,
            },
            grid: GridSettings {
                multiplier: custom.multiplier,
                levels: [
                    GridLevel {
                        percent: custom.space_percent,
                        max_orders: custom.space_orders,
                        lot_size: custom.space_lots,
                    },
                    GridLevel {
                        percent: custom.space1_percent,
                        max_orders: custom.space1_orders,
                        lot_size: custom.space1_lots,
                    },
                    GridLevel {
                        percent: custom.space2_percent,
                        max_orders: custom.space2_orders,
                        lot_size: custom.space2_lots,
                    },
                    GridLevel {
                        percent: custom.space3_percent,
                        max_orders: custom.space3_orders,
                        lot_size: custom.space3_lots,
                    },
                ],
            },
            entry: EntrySettings {
                use_sma_sar: custom.use_sma_sar,
                sma_period: custom.sma_period,
                sar_af: custom.sar_af,
                sar_max: custom.sar_max,
                reverse_order: custom.reverse_order,
                cci_period: custom.cci_period,
                cci_max: custom.cci_max,
                cci_min: custom.cci_min,
                timeframe: custom.timeframe,
                open_on_new_candle: custom.open_on_new_candle,
            },
            profit: ProfitSettings {
                single_order_profit: custom.single_order_profit,
                pair_global_profit: custom.pair_global_profit,
                global_profit: custom.global_profit,
                max_loss: custom.max_loss,
                trades_per_day: custom.trades_per_day,
            },
            money: MoneySettings {
                base_lot: custom.base_lot,
                min_lot: custom.min_lot,
                max_lot: custom.max_lot,
            },
            time_filter: TimeFilter {
                start_hour: custom.start_hour,
                start_minute: custom.start_minute,
                finish_hour: custom.finish_hour,
                finish_minute: custom.finish_minute,
            },
            engine: EngineSettings {
                tick_interval_ms: custom.tick_interval_ms,
                close_on_stop: custom.close_on_stop,
                state_dir: None,
            },
            webhook: self.webhook.map(|w| WebhookSettings {
                url: w.url,
                secret: w.secret,
            }),
        }
    }
}

// ======================================================================
// Session handlers
// ======================================================================

/// Registers a new session; the engine is created but not started.
pub async fn register_session(
    State(state): State<ApiState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<SessionStatus>)> {
    let user_id = request.user_id.clone();
    let config = request.into_config();

    let handle = state
        .registry
        .register(config)
        .await
        .map_err(map_registry_error)?;

    let status = handle.status().await.map_err(|_| {
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("session {user_id} did not come up"),
        )
    })?;
    Ok((StatusCode::CREATED, Json(status)))
}

pub async fn start_session(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .registry
        .start(&user_id)
        .await
        .map_err(map_registry_error)?;
    Ok(StatusCode::OK)
}

pub async fn stop_session(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .registry
        .stop(&user_id)
        .await
        .map_err(map_registry_error)?;
    Ok(StatusCode::OK)
}

pub async fn get_session(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<SessionStatus>> {
    let status = state
        .registry
        .status(&user_id)
        .await
        .map_err(map_registry_error)?;
    Ok(Json(status))
}

/// Unregister is idempotent: removing an unknown session still succeeds.
pub async fn unregister_session(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> StatusCode {
    state.registry.unregister(&user_id).await;
    StatusCode::NO_CONTENT
}

// ======================================================================
// Admin handlers
// ======================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionListResponse {
    pub sessions: Vec<SessionStatus>,
    pub usage: ResourceUsage,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceCloseResponse {
    pub closed: usize,
}

fn require_admin(state: &ApiState, headers: &HeaderMap) -> Result<(), ApiError> {
    if state.admin_secret.is_empty() {
        return Err(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "admin endpoints are disabled",
        ));
    }
    let provided = headers
        .get("x-admin-secret")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if provided != state.admin_secret {
        return Err(error_response(StatusCode::UNAUTHORIZED, "invalid admin secret"));
    }
    Ok(())
}

pub async fn list_sessions(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<SessionListResponse>> {
    require_admin(&state, &headers)?;
    let sessions = state.registry.list_all().await;
    let usage = state.registry.resource_usage().await;
    Ok(Json(SessionListResponse { sessions, usage }))
}

pub async fn force_close_positions(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> ApiResult<Json<ForceCloseResponse>> {
    require_admin(&state, &headers)?;
    let closed = state
        .registry
        .force_close_positions(&user_id)
        .await
        .map_err(map_registry_error)?;
    Ok(Json(ForceCloseResponse { closed }))
}
