//! Raw response shapes for the Bitget mix v2 API.

use serde::Deserialize;

/// Envelope wrapping every Bitget response.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiEnvelope {
    pub code: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawAccount {
    pub margin_coin: String,
    #[serde(default)]
    pub available: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawTicker {
    #[serde(default)]
    pub last_pr: Option<String>,
    #[serde(default)]
    pub last: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawPosition {
    #[serde(default)]
    pub symbol: String,
    pub hold_side: String,
    /// Position size in base units.
    #[serde(default)]
    pub total: String,
    #[serde(default)]
    pub open_price_avg: String,
    #[serde(rename = "unrealizedPL", default)]
    pub unrealized_pl: String,
    #[serde(default)]
    pub leverage: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawOrderAck {
    pub order_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_parses_success_and_error() {
        let ok: ApiEnvelope =
            serde_json::from_str(r#"{"code":"00000","msg":"success","data":[1,2]}"#).unwrap();
        assert_eq!(ok.code, "00000");
        assert!(ok.data.is_some());

        let err: ApiEnvelope =
            serde_json::from_str(r#"{"code":"40034","msg":"Request too frequent"}"#).unwrap();
        assert_eq!(err.code, "40034");
        assert!(err.data.is_none());
    }

    #[test]
    fn position_parses_bitget_field_names() {
        let raw: RawPosition = serde_json::from_str(
            r#"{
                "symbol": "BTCUSDT",
                "holdSide": "long",
                "total": "0.5",
                "openPriceAvg": "43210.5",
                "unrealizedPL": "12.34",
                "leverage": "10"
            }"#,
        )
        .unwrap();
        assert_eq!(raw.hold_side, "long");
        assert_eq!(raw.open_price_avg, "43210.5");
        assert_eq!(raw.unrealized_pl, "12.34");
    }

    #[test]
    fn order_ack_parses() {
        let raw: RawOrderAck =
            serde_json::from_str(r#"{"orderId":"121212","clientOid":"abc"}"#).unwrap();
        assert_eq!(raw.order_id, "121212");
    }
}
