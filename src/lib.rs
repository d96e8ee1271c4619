//! chatdeck is a streaming chat client for a backend proxy that fronts
//! several LLM providers.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the conversation store, provider routing, SSE decoding,
//!   cancellable streaming, summaries, and the controller that ties them
//!   together.
//! - [`api`] defines the backend wire payloads and the [`api::backend`]
//!   client used to reach the proxy.
//! - [`cli`] parses arguments and drives the controller for one-shot
//!   commands.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
