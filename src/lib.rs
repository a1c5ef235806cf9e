pub mod api;
pub mod build_info;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod lock;
pub mod model;
pub mod output;
pub mod resolve;
pub mod runlog;
pub mod translate;
