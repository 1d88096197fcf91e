use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static TENANT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").expect("valid tenant regex"));

static SETTING_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_.\-]{1,64}$").expect("valid setting key regex"));

static ALLOWED_ORDER_COLUMNS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "id",
        "created_at",
        "updated_at",
        "closed_at",
        "name",
        "email",
        "title",
        "status",
        "priority",
        "document",
    ])
});

/// Schemas Postgres reserves for itself.
const RESERVED_SCHEMAS: &[&str] = &["information_schema", "pg_catalog", "pg_toast"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SqlGuardError {
    #[error("Invalid tenant identifier")]
    InvalidTenant(String),
    #[error("Invalid sort column: {0}")]
    InvalidColumnName(String),
    #[error("Invalid sort order: {0}")]
    InvalidOrderDirection(String),
    #[error("Invalid setting key: {0}")]
    InvalidSettingKey(String),
}

impl From<SqlGuardError> for crate::core::shared::error::ApiError {
    fn from(e: SqlGuardError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

/// Normalises a tenant identifier into a schema name safe to splice into SQL.
pub fn validate_tenant(raw: &str) -> Result<String, SqlGuardError> {
    let candidate = raw.trim().to_lowercase();
    if !TENANT_PATTERN.is_match(&candidate)
        || candidate.starts_with("pg_")
        || RESERVED_SCHEMAS.contains(&candidate.as_str())
    {
        return Err(SqlGuardError::InvalidTenant(raw.to_string()));
    }
    Ok(candidate)
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Checks `column` against the global sort allow-list and the columns the
/// caller's table actually has.
pub fn validate_order_column<'a>(
    column: &str,
    table_columns: &[&'a str],
) -> Result<&'a str, SqlGuardError> {
    let lowered = camel_to_snake(column.trim());
    if !ALLOWED_ORDER_COLUMNS.contains(lowered.as_str()) {
        return Err(SqlGuardError::InvalidColumnName(column.to_string()));
    }
    table_columns
        .iter()
        .find(|c| **c == lowered)
        .copied()
        .ok_or_else(|| SqlGuardError::InvalidColumnName(column.to_string()))
}

pub fn validate_order_direction(direction: &str) -> Result<&'static str, SqlGuardError> {
    match direction.trim().to_uppercase().as_str() {
        "ASC" => Ok("ASC"),
        "DESC" => Ok("DESC"),
        _ => Err(SqlGuardError::InvalidOrderDirection(direction.to_string())),
    }
}

/// Builds an `ORDER BY` clause from optional query parameters. `qualifier`
/// is the table alias prefix (`"t."`), or empty for single-table queries.
pub fn order_clause(
    sort: Option<&str>,
    order: Option<&str>,
    table_columns: &[&str],
    qualifier: &str,
    default: &str,
) -> Result<String, SqlGuardError> {
    let Some(sort) = sort.filter(|s| !s.trim().is_empty()) else {
        return Ok(format!("ORDER BY {default}"));
    };
    let column = validate_order_column(sort, table_columns)?;
    let direction = match order.filter(|o| !o.trim().is_empty()) {
        Some(o) => validate_order_direction(o)?,
        None => "ASC",
    };
    Ok(format!(
        "ORDER BY {qualifier}{column} {direction}, {qualifier}id {direction}"
    ))
}

pub fn validate_setting_key(key: &str) -> Result<&str, SqlGuardError> {
    if SETTING_KEY_PATTERN.is_match(key) {
        Ok(key)
    } else {
        Err(SqlGuardError::InvalidSettingKey(key.to_string()))
    }
}

fn camel_to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
