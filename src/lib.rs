// Shared components
pub mod auth;
pub mod config;
pub mod cursor;
pub mod error;
pub mod metrics;
pub mod storage;

// Delivery subsystem
pub mod connection_manager;
pub mod notification;
pub mod polling;
pub mod sse;

// Application layer
pub mod api;
pub mod server;

// Supporting modules
pub mod shutdown;
pub mod tasks;
pub mod telemetry;
