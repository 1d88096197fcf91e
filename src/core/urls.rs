#[derive(Debug)]
pub struct ApiUrls;

impl ApiUrls {
    // Health
    pub const HEALTH_SIMPLE: &'static str = "/health";
    pub const HEALTH: &'static str = "/api/health";

    // Tickets
    pub const TICKETS: &'static str = "/api/tickets";
    pub const TICKET_STATS: &'static str = "/api/tickets/stats";
    pub const TICKET_BY_ID: &'static str = "/api/tickets/:id";
    pub const TICKET_ATTACHMENTS: &'static str = "/api/tickets/:id/attachments";
    pub const TICKET_ATTACHMENT_BY_ID: &'static str = "/api/tickets/:id/attachments/:attachment_id";

    // Companies & contacts
    pub const COMPANIES: &'static str = "/api/companies";
    pub const COMPANY_BY_ID: &'static str = "/api/companies/:id";
    pub const COMPANY_CONTACTS: &'static str = "/api/companies/:id/contacts";
    pub const CONTACTS: &'static str = "/api/contacts";
    pub const CONTACT_BY_ID: &'static str = "/api/contacts/:id";

    // External CRM directory
    pub const CRM_COMPANIES: &'static str = "/api/crm/companies";
    pub const CRM_COMPANIES_IMPORT: &'static str = "/api/crm/companies/import";

    // Settings: categories
    pub const CATEGORIES: &'static str = "/api/categories";
    pub const CATEGORY_BY_ID: &'static str = "/api/categories/:id";
    pub const CATEGORY_SUBCATEGORIES: &'static str = "/api/categories/:id/subcategories";
    pub const SUBCATEGORY_BY_ID: &'static str = "/api/subcategories/:id";

    // Settings: groups & users
    pub const GROUPS: &'static str = "/api/groups";
    pub const GROUP_BY_ID: &'static str = "/api/groups/:id";
    pub const USERS: &'static str = "/api/users";
    pub const USER_BY_ID: &'static str = "/api/users/:id";

    // Settings: key/value
    pub const SETTINGS: &'static str = "/api/settings";
    pub const SETTING_BY_KEY: &'static str = "/api/settings/:key";

    // Reports
    pub const REPORT_BALANCE: &'static str = "/api/reports/balance";
    pub const REPORT_TRANSACTIONS: &'static str = "/api/reports/transactions";
    pub const REPORT_SALES: &'static str = "/api/reports/sales";

    // WhatsApp
    pub const WHATSAPP_SEND: &'static str = "/api/whatsapp/send";
    pub const WHATSAPP_TEMPLATE: &'static str = "/api/whatsapp/template";
    pub const WHATSAPP_MESSAGES: &'static str = "/api/whatsapp/messages";
    pub const WHATSAPP_TOKEN: &'static str = "/api/whatsapp/token";
}
