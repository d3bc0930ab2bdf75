//! Error types for the Spindle domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant, and the propagation
//! rules differ per context: provider failures are fatal to a turn,
//! tool and registry failures are absorbed, compaction failures are
//! logged and retried on the next trigger.

use thiserror::Error;

/// The top-level error type for all Spindle operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors (fatal to the turn) ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Storage errors ---
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    // --- Registry errors (one tool source unavailable) ---
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    // --- Tool errors (one tool call failed) ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Compaction errors (background, never user-visible) ---
    #[error("Compaction error: {0}")]
    Compaction(#[from] CompactionError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Chat not found: {0}")]
    ChatNotFound(String),

    /// A transactional write was rolled back because its preconditions
    /// no longer held at commit time (e.g. a compaction batch raced a
    /// concurrent delete or another compaction run).
    #[error("Transaction conflict: {0}")]
    Conflict(String),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to connect to tool server {server}: {reason}")]
    ConnectFailed { server: String, reason: String },

    #[error("Failed to list tools from server {server}: {reason}")]
    ListToolsFailed { server: String, reason: String },

    #[error("Tool server RPC failed on {server}: {reason}")]
    RpcFailed { server: String, reason: String },

    #[error("Skill source unavailable: {0}")]
    SkillSourceUnavailable(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool dispatch failed: {tool_name} — {reason}")]
    DispatchFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Error)]
pub enum CompactionError {
    #[error("Summary merge call failed: {0}")]
    Merge(String),

    #[error("Compaction storage failure: {0}")]
    Storage(String),

    #[error("Compaction batch conflict for chat {0}")]
    Conflict(String),

    #[error("Compaction run timed out for chat {0}")]
    Timeout(String),
}
