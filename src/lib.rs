pub mod contacts;
pub mod core;
pub mod directory;
pub mod main_module;
pub mod reports;
pub mod security;
pub mod settings;
pub mod tickets;
#[cfg(feature = "whatsapp")]
pub mod whatsapp;
