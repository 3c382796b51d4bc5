//! Transcript handoff between a primary agent and its sub-agents
//!
//! The delegating process runs the producer side:
//! transcript -> [`prune_to_first_edit`] -> [`normalize`] -> [`chunk_turns`]
//! -> chunk files + manifest ([`HandoffProducer`]).
//!
//! The delegated process runs the consumer side: [`await_handoff`] polls the
//! handoff directory until the producer's files exist and stop changing,
//! then [`load_handoff`] reads them back.

mod chunker;
mod error;
mod poller;
mod producer;
mod tokens;
pub mod transcript;
mod vcs;

pub use chunker::{chunk_turns, TranscriptChunk};
pub use error::{HandoffError, Result};
pub use poller::{await_handoff, load_handoff, LoadedHandoff, PollConfig};
pub use producer::{
    HandoffContext, HandoffManifest, HandoffProducer, HandoffRequest, PreparedHandoff,
    MANIFEST_FILE,
};
pub use tokens::{estimate_tokens, HeuristicCounter, TokenCounter, FRAMING_TOKENS};
pub use transcript::{normalize, prune_to_first_edit, Role, TranscriptEntry, Turn};
pub use vcs::{GitCli, NoVcs, VcsContext};
