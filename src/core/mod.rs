pub mod config;
pub mod shared;
pub mod tenant;
pub mod urls;
