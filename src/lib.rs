// HTTP server modules
pub mod filters;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod sse;
pub mod ws;

// Shared state, configuration and cross-cutting concerns
pub mod config;
pub mod error;
pub mod logging;
pub mod rate_limit;
pub mod state;
pub mod validation;

// Domain and persistence
pub mod auth;
pub mod db;
pub mod debug_log;
pub mod models;

// LLM abstraction layer
pub mod llm;
