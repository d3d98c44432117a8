pub mod assembler;
pub mod chat;
pub mod config;
pub mod decoder;
pub mod error;
pub mod events;
pub mod geo;
pub mod http_client;
pub mod model;
pub mod normalizer;
pub mod session;
pub mod stream;
pub mod telemetry;
pub mod weather;
