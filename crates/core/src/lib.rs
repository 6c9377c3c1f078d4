//! Core state for voice-driven draft capture.
//!
//! This crate holds everything a capture call produces or consumes that is
//! independent of the transport: the variant being filled, the tool schema
//! advertised to the agent, the draft and its completion accounting, the
//! transcript, and the durable storage behind them.

pub mod draft;
pub mod schema;
pub mod storage;
pub mod store;
pub mod transcript;
pub mod variant;

pub use draft::{Completion, Draft, compute_completion};
pub use schema::{ToolSchema, build_tool_schema};
pub use storage::{DraftStorage, FileStorage, MemoryStorage, StoreError};
pub use store::{DraftSnapshot, DraftStore};
pub use transcript::{Speaker, TranscriptEntry};
pub use variant::Variant;
