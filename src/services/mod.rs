pub mod auth;
pub mod resolver;
