//! The completion orchestrator: the heart of chatrelay.
//!
//! Each inbound message runs one **turn**:
//!
//! 1. **Classify** the text (system prompt, direct plugin call, or user message)
//! 2. **Budget** the history so it fits the model's context window
//! 3. **Complete** via the configured provider, shrinking on overflow
//! 4. **If the reply carries a directive**: query the plugin, append its
//!    answer, loop back to step 3
//! 5. **Otherwise**: close the turn's output stream
//!
//! Turns on one session run strictly one after another. The loop stops at
//! the round cap when the model keeps asking for plugins.

pub mod directive;
pub mod input;
pub mod orchestrator;
pub mod snapshot;
pub mod stream_event;

pub use directive::{DirectiveParse, MARKER, parse_directive};
pub use input::{Input, classify};
pub use orchestrator::{Orchestrator, OrchestratorSettings, QUERY_FAILED, TurnOutcome};
pub use snapshot::SnapshotPolicy;
pub use stream_event::{ERROR_PREFIX, INFO_PREFIX, OutputChunk};
