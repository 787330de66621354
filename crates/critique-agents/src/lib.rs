//! HTTP reasoning-service backend for the critique orchestration core.
//!
//! Provides [`HttpReasoningService`], a [`ReasoningService`]
//! implementation over any OpenAI-compatible chat completions endpoint,
//! plus the role prompts it renders.
//!
//! [`ReasoningService`]: orchestration::ReasoningService

pub mod prompts;
pub mod service;

pub use service::{HttpReasoningService, ServiceConfig};
