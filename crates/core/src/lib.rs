//! # Spindle Core
//!
//! Domain types, traits, and error definitions for the Spindle
//! conversation engine. This crate has **zero framework dependencies** —
//! it defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem is defined as a trait here or in the crate that owns
//! it. Implementations live in their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod server;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{
    CompactionError, Error, ProviderError, RegistryError, Result, StorageError, ToolError,
};
pub use event::{DomainEvent, EventBus, ToolStatus};
pub use message::{Chat, ChatId, ChatSummary, Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition, Usage};
pub use server::{ServerTransport, ToolServer};
pub use tool::{ToolCall, ToolDescriptor, ToolResult, ToolSource};
