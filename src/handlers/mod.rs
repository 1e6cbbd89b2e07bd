pub mod admin;
pub mod messages;
pub mod models;
