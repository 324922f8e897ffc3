//! Transcript aggregation and history
//!
//! Streamed transcript deltas accumulate into two buffers (input language,
//! output language). At a turn boundary, a translation record is finalized
//! only when BOTH buffers are non-empty; a one-sided turn is discarded
//! silently so half-turns never pollute history. History is a bounded ring
//! that drops the oldest record on overflow.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One finalized translation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationRecord {
    pub id: Uuid,
    pub original_text: String,
    pub translated_text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub timestamp: DateTime<Utc>,
}

/// Live partial pair exposed for display while a turn is in flight.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PartialTranscript {
    pub input: String,
    pub output: String,
}

#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    input: String,
    output: String,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_input(&mut self, text: &str) {
        self.input.push_str(text);
    }

    pub fn append_output(&mut self, text: &str) {
        self.output.push_str(text);
    }

    pub fn partial(&self) -> PartialTranscript {
        PartialTranscript {
            input: self.input.clone(),
            output: self.output.clone(),
        }
    }

    /// Close the current turn. Both buffers are cleared regardless of
    /// whether a record was produced.
    pub fn complete_turn(
        &mut self,
        source_lang: &str,
        target_lang: &str,
    ) -> Option<TranslationRecord> {
        let input = std::mem::take(&mut self.input);
        let output = std::mem::take(&mut self.output);

        if input.is_empty() || output.is_empty() {
            return None;
        }

        Some(TranslationRecord {
            id: Uuid::new_v4(),
            original_text: input,
            translated_text: output,
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            timestamp: Utc::now(),
        })
    }

    pub fn clear(&mut self) {
        self.input.clear();
        self.output.clear();
    }
}

/// Bounded drop-oldest ring of finalized records.
#[derive(Debug)]
pub struct TranslationHistory {
    records: VecDeque<TranslationRecord>,
    capacity: usize,
}

impl TranslationHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, record: TranslationRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn records(&self) -> Vec<TranslationRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
