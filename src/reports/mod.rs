pub mod balance;
pub mod transactions;

use axum::{routing::get, Router};
use bigdecimal::BigDecimal;
use serde::Serializer;
use std::sync::Arc;

use crate::core::shared::state::AppState;
use crate::core::urls::ApiUrls;

pub fn configure_reports_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(ApiUrls::REPORT_BALANCE, get(balance::get_balance))
        .route(
            ApiUrls::REPORT_TRANSACTIONS,
            get(transactions::list_transactions),
        )
        .route(ApiUrls::REPORT_SALES, get(transactions::get_sales))
}

/// Money leaves the API as a decimal string with two places, e.g. `"150.50"`.
pub(crate) fn serialize_money<S: Serializer>(value: &BigDecimal, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&value.with_scale(2).to_string())
}

/// Exact amount from a count of cents.
pub(crate) fn cents(value: i64) -> BigDecimal {
    BigDecimal::from(value) / BigDecimal::from(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Serialize)]
    struct Amount {
        #[serde(serialize_with = "serialize_money")]
        value: BigDecimal,
    }

    #[test]
    fn test_money_serializes_with_two_places() {
        let json = serde_json::to_value(Amount { value: cents(15050) }).unwrap();
        assert_eq!(json["value"], "150.50");

        let json = serde_json::to_value(Amount { value: cents(-2500) }).unwrap();
        assert_eq!(json["value"], "-25.00");

        let json = serde_json::to_value(Amount { value: BigDecimal::from(0) }).unwrap();
        assert_eq!(json["value"], "0.00");
    }

    #[test]
    fn test_cents_are_exact() {
        assert_eq!(cents(10) + cents(20), cents(30));
        assert_eq!((cents(10010) - cents(4005)).with_scale(2).to_string(), "60.05");
    }
}
