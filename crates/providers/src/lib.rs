//! LLM provider implementations for Spindle.
//!
//! The engine consumes the [`spindle_core::Provider`] trait; this crate
//! supplies the concrete backends. The OpenAI-compatible client covers
//! the vast majority of hosted and local endpoints.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
