use axum::{
    extract::{Query, State},
    Json,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, TimeZone, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Integer, Nullable, Numeric, Text, Timestamptz};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::core::shared::db::{with_mock_fallback, CountRow};
use crate::core::shared::error::{require, ApiError, ApiResult};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{page, parse_datetime, parse_optional_datetime, DateBound};
use crate::core::tenant::TenantContext;
use crate::reports::{cents, serialize_money};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Sale,
    Payment,
    Refund,
    Adjustment,
}

impl TransactionKind {
    pub const ALL: [Self; 4] = [Self::Sale, Self::Payment, Self::Refund, Self::Adjustment];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sale => "sale",
            Self::Payment => "payment",
            Self::Refund => "refund",
            Self::Adjustment => "adjustment",
        }
    }

    pub fn is_debit(&self) -> bool {
        matches!(self, Self::Sale | Self::Adjustment)
    }

    /// SQL `IN` list of the debit kinds, or of the credit kinds.
    pub(crate) fn sql_list(debit: bool) -> String {
        Self::ALL
            .iter()
            .filter(|k| k.is_debit() == debit)
            .map(|k| format!("'{}'", k.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sale" => Ok(Self::Sale),
            "payment" => Ok(Self::Payment),
            "refund" => Ok(Self::Refund),
            "adjustment" => Ok(Self::Adjustment),
            _ => Err(ApiError::BadRequest(format!("Invalid kind: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, QueryableByName)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[diesel(sql_type = Integer)]
    pub id: i32,
    #[diesel(sql_type = Integer)]
    pub company_id: i32,
    #[diesel(sql_type = Text)]
    pub kind: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub description: Option<String>,
    #[diesel(sql_type = Numeric)]
    #[serde(serialize_with = "serialize_money")]
    pub amount: BigDecimal,
    #[diesel(sql_type = Timestamptz)]
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionPage {
    pub items: Vec<Transaction>,
    pub total: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionsQuery {
    pub company_id: Option<i32>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub kind: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// `to` is an exclusive bound, so an empty range means `from` came after it.
fn check_range(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> ApiResult<()> {
    match (from, to) {
        (Some(f), Some(t)) if f >= t => Err(ApiError::BadRequest(
            "from must not be after to".to_string(),
        )),
        _ => Ok(()),
    }
}

fn mock_transactions(company_id: i32, kind: Option<TransactionKind>) -> TransactionPage {
    let day = |d| Utc.with_ymd_and_hms(2024, 6, d, 12, 0, 0).single().unwrap_or_default();
    let tx = |id, kind: TransactionKind, amount: i64, d| Transaction {
        id,
        company_id,
        kind: kind.as_str().to_string(),
        description: Some(format!("Sample {kind}")),
        amount: cents(amount),
        occurred_at: day(d),
    };
    let items: Vec<Transaction> = vec![
        tx(3, TransactionKind::Payment, 50_000, 20),
        tx(2, TransactionKind::Sale, 125_000, 12),
        tx(1, TransactionKind::Sale, 80_000, 3),
    ]
    .into_iter()
    .filter(|t| kind.map_or(true, |k| t.kind == k.as_str()))
    .collect();
    TransactionPage {
        total: items.len() as i64,
        items,
    }
}

pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Query(query): Query<TransactionsQuery>,
) -> ApiResult<Json<TransactionPage>> {
    let company_id = require(query.company_id, "companyId")?;
    let from = parse_optional_datetime(query.from.as_deref(), "from", DateBound::Start)?;
    let to = parse_optional_datetime(query.to.as_deref(), "to", DateBound::End)?;
    check_range(from, to)?;
    let kind = query
        .kind
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(TransactionKind::from_str)
        .transpose()?;
    let (limit, offset) = page(query.limit, query.offset);

    let result = state
        .db
        .run(&tenant, move |conn| {
            let filter = "WHERE company_id = $1 AND is_deleted = false \
                 AND ($2::timestamptz IS NULL OR occurred_at >= $2) \
                 AND ($3::timestamptz IS NULL OR occurred_at < $3) \
                 AND ($4::text IS NULL OR kind = $4)";
            let kind = kind.map(|k| k.as_str());

            let total = diesel::sql_query(format!(
                "SELECT COUNT(*) AS count FROM transactions {filter}"
            ))
            .bind::<Integer, _>(company_id)
            .bind::<Nullable<Timestamptz>, _>(from)
            .bind::<Nullable<Timestamptz>, _>(to)
            .bind::<Nullable<Text>, _>(kind)
            .get_result::<CountRow>(conn)?
            .count;

            let items = diesel::sql_query(format!(
                "SELECT id, company_id, kind, description, amount, occurred_at \
                 FROM transactions {filter} \
                 ORDER BY occurred_at DESC, id DESC LIMIT $5 OFFSET $6"
            ))
            .bind::<Integer, _>(company_id)
            .bind::<Nullable<Timestamptz>, _>(from)
            .bind::<Nullable<Timestamptz>, _>(to)
            .bind::<Nullable<Text>, _>(kind)
            .bind::<BigInt, _>(limit)
            .bind::<BigInt, _>(offset)
            .load::<Transaction>(conn)?;

            Ok(TransactionPage { items, total })
        })
        .await;

    let page = with_mock_fallback(result, state.mock_fallback(), "REPORTS", || {
        mock_transactions(company_id, kind)
    })?;
    Ok(Json(page))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SalesGrouping {
    #[default]
    Day,
    Month,
}

impl SalesGrouping {
    fn trunc_unit(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Month => "month",
        }
    }

    fn label_format(&self) -> &'static str {
        match self {
            Self::Day => "YYYY-MM-DD",
            Self::Month => "YYYY-MM",
        }
    }
}

impl FromStr for SalesGrouping {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "month" => Ok(Self::Month),
            _ => Err(ApiError::BadRequest(format!("Invalid groupBy: {s}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, QueryableByName)]
pub struct SalesPeriod {
    #[diesel(sql_type = Text)]
    pub period: String,
    #[diesel(sql_type = BigInt)]
    pub count: i64,
    #[diesel(sql_type = Numeric)]
    #[serde(serialize_with = "serialize_money")]
    pub total: BigDecimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesReport {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub group_by: SalesGrouping,
    pub rows: Vec<SalesPeriod>,
    pub count: i64,
    #[serde(serialize_with = "serialize_money")]
    pub total: BigDecimal,
}

impl SalesReport {
    pub fn new(
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        group_by: SalesGrouping,
        rows: Vec<SalesPeriod>,
    ) -> Self {
        let count = rows.iter().map(|r| r.count).sum();
        let total = rows
            .iter()
            .fold(BigDecimal::from(0), |acc, r| acc + &r.total);
        Self {
            from,
            to,
            group_by,
            rows,
            count,
            total,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub group_by: Option<String>,
    pub company_id: Option<i32>,
}

fn mock_sales(from: DateTime<Utc>, to: DateTime<Utc>, group_by: SalesGrouping) -> SalesReport {
    let fmt = match group_by {
        SalesGrouping::Day => "%Y-%m-%d",
        SalesGrouping::Month => "%Y-%m",
    };
    let step = match group_by {
        SalesGrouping::Day => Duration::days(1),
        SalesGrouping::Month => Duration::days(31),
    };
    let mut rows = Vec::new();
    let mut cursor = from;
    let mut n: i64 = 1;
    while cursor < to && rows.len() < 3 {
        rows.push(SalesPeriod {
            period: cursor.format(fmt).to_string(),
            count: n * 2,
            total: cents(n * 45_000),
        });
        cursor += step;
        n += 1;
    }
    SalesReport::new(from, to, group_by, rows)
}

pub async fn get_sales(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Query(query): Query<SalesQuery>,
) -> ApiResult<Json<SalesReport>> {
    let from_raw = require(query.from.filter(|v| !v.trim().is_empty()), "from")?;
    let to_raw = require(query.to.filter(|v| !v.trim().is_empty()), "to")?;
    let from = parse_datetime(&from_raw, "from", DateBound::Start)?;
    let to = parse_datetime(&to_raw, "to", DateBound::End)?;
    check_range(Some(from), Some(to))?;
    let group_by = match query.group_by.as_deref().map(str::trim).filter(|g| !g.is_empty()) {
        Some(g) => g.parse::<SalesGrouping>()?,
        None => SalesGrouping::default(),
    };
    let company_id = query.company_id;

    let sql = format!(
        "SELECT to_char(date_trunc('{unit}', occurred_at AT TIME ZONE 'UTC'), '{label}') AS period, \
         COUNT(*) AS count, COALESCE(SUM(amount), 0) AS total \
         FROM transactions \
         WHERE kind = 'sale' AND is_deleted = false \
         AND occurred_at >= $1 AND occurred_at < $2 \
         AND ($3::int IS NULL OR company_id = $3) \
         GROUP BY 1 ORDER BY 1 ASC",
        unit = group_by.trunc_unit(),
        label = group_by.label_format(),
    );

    let result = state
        .db
        .run(&tenant, move |conn| {
            let rows = diesel::sql_query(sql)
                .bind::<Timestamptz, _>(from)
                .bind::<Timestamptz, _>(to)
                .bind::<Nullable<Integer>, _>(company_id)
                .load::<SalesPeriod>(conn)?;
            Ok(SalesReport::new(from, to, group_by, rows))
        })
        .await;

    let report = with_mock_fallback(result, state.mock_fallback(), "REPORTS", || {
        mock_sales(from, to, group_by)
    })?;
    Ok(Json(report))
}
