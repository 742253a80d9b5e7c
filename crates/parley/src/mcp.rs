//! Model Context Protocol client for the remote code interpreter, built on `rmcp`.

pub mod client;

pub use client::{result_text, McpClient, McpSession, ResourceData};
