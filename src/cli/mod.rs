pub mod audit;
pub mod auth;
pub mod maintenance;
pub mod utils;
