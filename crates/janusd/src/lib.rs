//! janusd: a local reverse proxy that speaks the Anthropic Messages API on
//! the front and any OpenAI-compatible Chat Completions backend on the back.
//! Translation lives in [`janusllm`]; this crate is the HTTP plumbing.

pub mod config;
pub mod handlers;
pub mod server;
pub mod upstream;
