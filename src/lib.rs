//! Credential and session lifecycle for TaskHub: registration, email
//! verification, login with rotating refresh tokens, logout with access token
//! revocation, password reset, audit logging, rate limiting and a periodic
//! cleanup sweep.

pub mod api;
pub mod app;
pub mod audit;
pub mod cleanup;
pub mod cli;
pub mod clock;
pub mod config;
pub mod database;
pub mod email;
pub mod error;
pub mod security;
pub mod user;

#[cfg(test)]
pub(crate) mod test_util;

pub use app::App;
pub use error::{AuthError, AuthResult};
