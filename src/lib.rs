pub mod analytics;
pub mod api;
pub mod config;
pub mod directory;
pub mod models;
pub mod redirect;
pub mod services;
pub mod storage;
pub mod tracking;
