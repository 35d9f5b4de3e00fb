pub mod api;
pub mod cli;
pub mod config;
pub mod core;
pub mod engine;
pub mod exit;
pub mod logs;
pub mod pipeline;
pub mod platform;
pub mod stats;
pub mod tui;
pub mod ui;
