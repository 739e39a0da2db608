//! Bounded conversation memory
//!
//! A session keeps its last N (question, answer) pairs and renders them as a
//! transcript for the next prompt. The caller owns persistence; this module
//! only holds the state passed in for a turn.

pub mod types;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

pub use types::*;

/// Configuration for conversation memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum number of remembered turns. Zero disables memory.
    pub capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { capacity: 5 }
    }
}

/// Fixed-capacity FIFO of answered questions.
///
/// Deserialized memory keeps only its newest `capacity` entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "StoredMemory")]
pub struct BufferMemory {
    capacity: usize,
    entries: VecDeque<MemoryEntry>,
}

/// Wire form of [`BufferMemory`] before the capacity is enforced.
#[derive(Deserialize)]
struct StoredMemory {
    capacity: usize,
    #[serde(default)]
    entries: VecDeque<MemoryEntry>,
}

impl From<StoredMemory> for BufferMemory {
    fn from(stored: StoredMemory) -> Self {
        let StoredMemory { capacity, mut entries } = stored;
        if entries.len() > capacity {
            tracing::debug!(
                capacity = capacity,
                supplied = entries.len(),
                "Dropping oldest restored memory entries"
            );
            entries.drain(..entries.len() - capacity);
        }
        Self { capacity, entries }
    }
}

impl BufferMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &MemoryEntry> {
        self.entries.iter()
    }

    /// Record a turn, evicting the oldest entry when full.
    pub fn append(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(MemoryEntry::new(question, answer));
    }

    /// Transcript for prompts: `Question i: ..\nAnswer i: ..\n` per entry.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, entry) in self.entries.iter().enumerate() {
            out.push_str(&format!("Question {}: {}\n", i + 1, entry.question));
            out.push_str(&format!("Answer {}: {}\n", i + 1, entry.answer));
        }
        out
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

impl Default for BufferMemory {
    fn default() -> Self {
        Self::new(MemoryConfig::default().capacity)
    }
}

/// Per-session memories.
///
/// Each session's memory sits behind its own async mutex: a turn holds the
/// lock from start to commit, so two turns of one session are serialized
/// while different sessions run in parallel.
pub struct SessionStore {
    config: MemoryConfig,
    sessions: DashMap<SessionId, Arc<Mutex<BufferMemory>>>,
}

impl SessionStore {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
        }
    }

    /// Memory handle for `session`, created empty on first use.
    pub fn session(&self, session: &SessionId) -> Arc<Mutex<BufferMemory>> {
        self.sessions
            .entry(session.clone())
            .or_insert_with(|| Arc::new(Mutex::new(BufferMemory::new(self.config.capacity))))
            .clone()
    }

    /// Seed a session from caller-persisted state.
    pub fn restore(&self, session: SessionId, memory: BufferMemory) {
        self.sessions.insert(session, Arc::new(Mutex::new(memory)));
    }
}
