//! Greedy packing of normalized turns into token-budgeted chunks

use serde::{Deserialize, Serialize};

use crate::tokens::TokenCounter;
use crate::transcript::Turn;

/// A run of whole turns sized to fit a token budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptChunk {
    /// 1-based position in the handoff
    pub index: usize,
    pub token_count: usize,
    pub turns: Vec<Turn>,
}

/// Split turns into chunks greedily by cumulative token count
///
/// Turns are never split. A turn larger than `budget` on its own becomes a
/// single-turn chunk.
pub fn chunk_turns(turns: Vec<Turn>, budget: usize, counter: &dyn TokenCounter) -> Vec<TranscriptChunk> {
    let mut chunks = Vec::new();
    let mut current: Vec<Turn> = Vec::new();
    let mut current_tokens = 0;

    for turn in turns {
        let tokens = counter.count(&turn);
        if !current.is_empty() && current_tokens + tokens > budget {
            chunks.push(TranscriptChunk {
                index: chunks.len() + 1,
                token_count: current_tokens,
                turns: std::mem::take(&mut current),
            });
            current_tokens = 0;
        }
        current.push(turn);
        current_tokens += tokens;
    }

    if !current.is_empty() {
        chunks.push(TranscriptChunk {
            index: chunks.len() + 1,
            token_count: current_tokens,
            turns: current,
        });
    }

    chunks
}
