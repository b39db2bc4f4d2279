//! Farm monitoring host: soil sensor polling, weather, and AI agronomy advice.

pub mod chat;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod gateway;
pub mod gemini;
pub mod history;
pub mod insight;
pub mod poller;
pub mod prompt;
pub mod server;
pub mod store;
pub mod timestamp;
pub mod weather;
