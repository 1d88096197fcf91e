use axum::{
    extract::{Query, State},
    Json,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, TimeZone, Utc};
use diesel::prelude::*;
use diesel::sql_types::{Integer, Nullable, Numeric, Text, Timestamptz};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::shared::db::with_mock_fallback;
use crate::core::shared::error::ApiResult;
use crate::core::shared::state::AppState;
use crate::core::tenant::TenantContext;
use crate::reports::transactions::TransactionKind;
use crate::reports::{cents, serialize_money};

#[derive(Debug, QueryableByName)]
struct BalanceRow {
    #[diesel(sql_type = Integer)]
    company_id: i32,
    #[diesel(sql_type = Text)]
    company_name: String,
    #[diesel(sql_type = Numeric)]
    debits: BigDecimal,
    #[diesel(sql_type = Numeric)]
    credits: BigDecimal,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    last_transaction_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyBalance {
    pub company_id: i32,
    pub company_name: String,
    #[serde(serialize_with = "serialize_money")]
    pub debits: BigDecimal,
    #[serde(serialize_with = "serialize_money")]
    pub credits: BigDecimal,
    #[serde(serialize_with = "serialize_money")]
    pub balance: BigDecimal,
    pub last_transaction_at: Option<DateTime<Utc>>,
}

impl CompanyBalance {
    pub fn new(
        company_id: i32,
        company_name: String,
        debits: BigDecimal,
        credits: BigDecimal,
        last_transaction_at: Option<DateTime<Utc>>,
    ) -> Self {
        let balance = &debits - &credits;
        Self {
            company_id,
            company_name,
            debits,
            credits,
            balance,
            last_transaction_at,
        }
    }
}

impl From<BalanceRow> for CompanyBalance {
    fn from(row: BalanceRow) -> Self {
        Self::new(
            row.company_id,
            row.company_name,
            row.debits,
            row.credits,
            row.last_transaction_at,
        )
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceQuery {
    pub company_id: Option<i32>,
}

fn mock_balances(company_id: Option<i32>) -> Vec<CompanyBalance> {
    let last = Utc.with_ymd_and_hms(2024, 6, 28, 15, 30, 0).single();
    let all = vec![
        CompanyBalance::new(1, "Acme Ltda".to_string(), cents(1_525_000), cents(1_200_000), last),
        CompanyBalance::new(2, "Globex S.A.".to_string(), cents(840_050), cents(840_050), last),
        CompanyBalance::new(3, "Initech".to_string(), cents(120_000), cents(150_000), None),
    ];
    match company_id {
        Some(id) => all.into_iter().filter(|b| b.company_id == id).collect(),
        None => all,
    }
}

/// Per-company totals. Sales and adjustments are debits, payments and refunds
/// are credits.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Query(query): Query<BalanceQuery>,
) -> ApiResult<Json<Vec<CompanyBalance>>> {
    let company_id = query.company_id;
    let sql = format!(
        "SELECT co.id AS company_id, co.name AS company_name, \
         COALESCE(SUM(CASE WHEN t.kind IN ({debits}) THEN t.amount END), 0) AS debits, \
         COALESCE(SUM(CASE WHEN t.kind IN ({credits}) THEN t.amount END), 0) AS credits, \
         MAX(t.occurred_at) AS last_transaction_at \
         FROM companies co \
         LEFT JOIN transactions t ON t.company_id = co.id AND t.is_deleted = false \
         WHERE co.is_deleted = false AND ($1::int IS NULL OR co.id = $1) \
         GROUP BY co.id, co.name ORDER BY co.name ASC, co.id ASC",
        debits = TransactionKind::sql_list(true),
        credits = TransactionKind::sql_list(false),
    );

    let result = state
        .db
        .run(&tenant, move |conn| {
            let rows = diesel::sql_query(sql)
                .bind::<Nullable<Integer>, _>(company_id)
                .load::<BalanceRow>(conn)?;
            Ok(rows.into_iter().map(CompanyBalance::from).collect::<Vec<_>>())
        })
        .await;

    let balances = with_mock_fallback(result, state.mock_fallback(), "REPORTS", || {
        mock_balances(company_id)
    })?;
    Ok(Json(balances))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_is_debits_minus_credits() {
        let b = CompanyBalance::new(1, "Acme".into(), cents(10_010), cents(4_005), None);
        assert_eq!(b.balance, cents(6_005));

        let b = CompanyBalance::new(1, "Acme".into(), BigDecimal::from(0), cents(2_500), None);
        assert_eq!(b.balance, cents(-2_500));
    }

    #[test]
    fn test_balance_has_no_float_drift() {
        let debits = (0..10).fold(BigDecimal::from(0), |acc, _| acc + cents(10));
        let b = CompanyBalance::new(1, "Acme".into(), debits, cents(100), None);
        assert_eq!(b.balance, BigDecimal::from(0));
        let json = serde_json::to_value(&b).unwrap();
        assert_eq!(json["balance"], "0.00");
    }

    #[test]
    fn test_mock_balances_filter_by_company() {
        assert_eq!(mock_balances(None).len(), 3);
        let only = mock_balances(Some(2));
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].balance, BigDecimal::from(0));
        assert!(mock_balances(Some(42)).is_empty());
    }

    #[test]
    fn test_balance_serializes_camel_case() {
        let json = serde_json::to_value(&mock_balances(Some(1))[0]).unwrap();
        assert_eq!(json["companyId"], 1);
        assert_eq!(json["debits"], "15250.00");
        assert_eq!(json["balance"], "3250.00");
        assert!(json.get("lastTransactionAt").is_some());
    }
}
