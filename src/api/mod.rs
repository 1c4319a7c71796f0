//! Client for the upload/chat service the agent runs behind.

pub mod types;
pub mod client;

pub use types::*;
pub use client::ApiClient;
