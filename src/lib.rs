pub mod config;
pub mod envelope;
pub mod error;
pub mod issue;
pub mod plan;
pub mod plugin_descriptor;
pub mod plugin_service;
pub mod task_engine;
pub mod token;
