//! The conversation context & agentic tool-orchestration engine.
//!
//! One turn flows through four stages:
//!
//! 1. **Assemble** — summary (if any) + unsummarized tail + new input
//! 2. **Orchestrate** — the bounded generate → tool-call → tool-result
//!    loop over the turn's tool catalog (servers ∪ skills)
//! 3. **Persist** — the user message and everything the loop produced
//! 4. **Compact** — a fire-and-forget background check that folds old
//!    turns into the rolling summary once enough accumulate
//!
//! The loop continues until the model responds with text only, or the
//! iteration cap forces a final toolless generation.

pub mod context;
pub mod engine;
pub mod loop_runner;
pub mod summarizer;
pub mod testing;

pub use context::ContextAssembler;
pub use engine::{Engine, EngineOptions};
pub use loop_runner::{AgenticLoop, TurnOutput, MAX_TOOL_ITERATIONS};
pub use summarizer::{Summarizer, SUMMARY_BATCH_SIZE, SUMMARY_THRESHOLD};
