//! Maildesk — intent-routed assistant over a knowledge base and a mailbox.

pub mod cli;
pub mod config;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod mail;
pub mod pipeline;
pub mod server;
