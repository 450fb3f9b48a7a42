pub mod auth;
pub mod super_admin;
