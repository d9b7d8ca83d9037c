pub mod campaign;
pub mod campaign_status;
pub mod commands;
pub mod config;
pub mod dates;
pub mod error;
pub mod gateway;
pub mod market_data_client;
pub mod models;
pub mod performance;
pub mod portfolio;
pub mod report;
pub mod retry;
pub mod runner;
pub mod scores;
pub mod summary;
