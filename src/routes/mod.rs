pub mod auth;
pub mod context;
pub mod health;
pub mod schools;
pub mod students;
