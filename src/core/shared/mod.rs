pub mod db;
pub mod error;
pub mod models;
pub mod state;
pub mod utils;

pub use db::{ensure_live, with_mock_fallback, TenantDb};
pub use models::DeletedResponse;
pub use error::{require, require_text, ApiError, ApiResult};
pub use utils::{create_conn, create_lazy_conn, DbPool};
