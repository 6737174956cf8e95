pub mod routes;
pub mod service;
pub mod session;

pub use service::{PluginService, PluginServiceConfig};
