pub mod auth;
pub mod student;
pub mod tenant;
pub mod user;
