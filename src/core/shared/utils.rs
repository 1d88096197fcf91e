use chrono::{DateTime, Duration as TimeDelta, DurationRound, NaiveDate, Utc};
use diesel::{
    r2d2::{ConnectionManager, Pool},
    PgConnection,
};
use std::time::Duration;

use crate::core::config::DatabaseConfig;
use crate::core::shared::error::{ApiError, ApiResult};

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 200;

pub fn create_conn(config: &DatabaseConfig) -> Result<DbPool, diesel::r2d2::PoolError> {
    let manager = ConnectionManager::<PgConnection>::new(config.url.clone());
    Pool::builder()
        .max_size(config.max_connections.max(1))
        .connection_timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .build(manager)
}

/// Pool that connects on first use. Startup does not fail when the database is down.
pub fn create_lazy_conn(config: &DatabaseConfig, timeout: Duration) -> DbPool {
    let manager = ConnectionManager::<PgConnection>::new(config.url.clone());
    Pool::builder()
        .max_size(config.max_connections.max(1))
        .min_idle(Some(0))
        .connection_timeout(timeout)
        .build_unchecked(manager)
}

/// Clamps optional paging parameters into `(limit, offset)`.
pub fn page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = offset.unwrap_or(0).max(0);
    (limit, offset)
}

pub fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Which end of a date range a query parameter sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateBound {
    /// Inclusive lower bound.
    Start,
    /// Exclusive upper bound.
    End,
}

/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates.
///
/// A `Start` bound is the instant itself, or midnight UTC for a bare date. An
/// `End` bound is exclusive: the following midnight for a bare date, or one
/// microsecond past the instant, which is the resolution `timestamptz` keeps.
/// Queries compare with `>= start` and `< end`.
pub fn parse_datetime(value: &str, name: &str, bound: DateBound) -> ApiResult<DateTime<Utc>> {
    let value = value.trim();
    let invalid = || ApiError::BadRequest(format!("Invalid date for {name}: {value}"));

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        let dt = dt.with_timezone(&Utc);
        return match bound {
            DateBound::Start => Ok(dt),
            DateBound::End => dt
                .duration_trunc(TimeDelta::microseconds(1))
                .ok()
                .and_then(|t| t.checked_add_signed(TimeDelta::microseconds(1)))
                .ok_or_else(invalid),
        };
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let day = match bound {
            DateBound::Start => Some(date),
            DateBound::End => date.succ_opt(),
        };
        if let Some(midnight) = day.and_then(|d| d.and_hms_opt(0, 0, 0)) {
            return Ok(midnight.and_utc());
        }
    }
    Err(invalid())
}

pub fn parse_optional_datetime(
    value: Option<&str>,
    name: &str,
    bound: DateBound,
) -> ApiResult<Option<DateTime<Utc>>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => parse_datetime(v, name, bound).map(Some),
        None => Ok(None),
    }
}

/// Wraps a search term for `ILIKE`, escaping its wildcards.
pub fn like_pattern(term: &str) -> String {
    let escaped = term
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}
