pub mod agent;
pub mod conversation;
pub mod errors;
pub mod files;
pub mod mcp;
pub mod models;
pub mod prompt_template;
pub mod providers;
pub mod rag;
pub mod stage;
pub mod tools;
