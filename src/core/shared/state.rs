use std::sync::Arc;

use crate::core::config::AppConfig;
use crate::core::shared::db::TenantDb;
use crate::core::shared::utils::DbPool;
#[cfg(feature = "crm")]
use crate::contacts::crm_directory::CrmDirectoryClient;
#[cfg(feature = "whatsapp")]
use crate::whatsapp::client::WhatsAppClient;

pub struct AppState {
    pub config: AppConfig,
    pub conn: DbPool,
    pub db: TenantDb,
    #[cfg(feature = "whatsapp")]
    pub whatsapp: Option<Arc<WhatsAppClient>>,
    #[cfg(feature = "crm")]
    pub crm: Option<Arc<CrmDirectoryClient>>,
}

impl AppState {
    pub fn new(config: AppConfig, conn: DbPool) -> Result<Self, anyhow::Error> {
        #[cfg(feature = "whatsapp")]
        let whatsapp = match &config.whatsapp {
            Some(wa) => Some(Arc::new(WhatsAppClient::new(wa.clone())?)),
            None => None,
        };
        #[cfg(feature = "crm")]
        let crm = match &config.crm {
            Some(c) => Some(Arc::new(CrmDirectoryClient::new(c.clone())?)),
            None => None,
        };

        Ok(Self {
            db: TenantDb::new(conn.clone()),
            conn,
            config,
            #[cfg(feature = "whatsapp")]
            whatsapp,
            #[cfg(feature = "crm")]
            crm,
        })
    }

    pub fn mock_fallback(&self) -> bool {
        self.config.mock_fallback
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("default_tenant", &self.config.default_tenant)
            .field("mock_fallback", &self.config.mock_fallback)
            .finish_non_exhaustive()
    }
}
