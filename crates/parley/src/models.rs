//! These models represent the objects passed around by the agent
//!
//! There are a few related formats we need to interact with:
//! - chat completion requests sent from the client application to the agent
//! - streamed chat completion chunks sent from the agent back to the client
//! - chat completion requests sent from the agent to the upstream deployment
//! - tool calls dispatched by the agent to the tools it pilots
//!
//! The gateway speaks an OpenAI compatible dialect with an extra `custom_content`
//! field, so the internal message shape mirrors that wire format closely and the
//! conversions live in `providers::utils`.
pub mod message;
pub mod role;
pub mod tool;
