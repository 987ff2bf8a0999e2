pub mod aggregate;
pub mod cli;
pub mod config;
pub mod core;
pub mod engine;
pub mod exit;
pub mod fix;
pub mod pipeline;
pub mod platform;
pub mod prompts;
pub mod report;
pub mod selector;
pub mod stage;
pub mod store;
pub mod ui;
