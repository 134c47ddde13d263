pub mod config;
pub mod directory;
pub mod notifications;
pub mod requests;
pub mod shared;
pub mod sla;
