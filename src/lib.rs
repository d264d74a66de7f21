pub mod analytics;
pub mod config;
pub mod discovery;
pub mod models;
pub mod storage;
