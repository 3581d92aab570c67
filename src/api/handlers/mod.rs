mod admin;
mod auth;

pub use admin::health;
pub use auth::{current_session, list_sessions, login, logout, logout_all, register};
