pub mod cors;
pub mod sql_guard;

pub use cors::{create_cors_layer, CorsConfig};
pub use sql_guard::{
    order_clause, quote_identifier, validate_setting_key, validate_tenant, SqlGuardError,
};
