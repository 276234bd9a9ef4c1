// This file exposes the modules as public modules in the crate

pub mod access_gate;
pub mod app_config;
pub mod backend_client;
pub mod conversation_log;
pub mod errors;
pub mod handlers;
pub mod local_store;
pub mod model_catalog;
pub mod models;
pub mod preview;
pub mod prompt_store;
pub mod session;
pub mod workflow;

#[cfg(test)]
pub mod test_support;
