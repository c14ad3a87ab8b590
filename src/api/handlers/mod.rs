pub mod auth;
pub mod authorize;
pub mod health;
pub mod keys;
