//! Mutation context handed to transition actions

use crate::event::ConversationKey;
use crate::store::{ConversationRecord, INITIAL_STATE};
use crate::value::ConversationData;

/// Working copy of one conversation's record
///
/// Nothing here performs I/O. The conversation handler commits the final
/// state and data once the action returns successfully, and discards the
/// working copy if it fails.
#[derive(Debug)]
pub struct MutationContext {
    key: ConversationKey,
    state: String,
    data: ConversationData,
}

impl MutationContext {
    pub(crate) fn new(key: ConversationKey, record: ConversationRecord) -> Self {
        Self {
            key,
            state: record.state,
            data: record.data,
        }
    }

    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn set_state(&mut self, state: impl Into<String>) {
        self.state = state.into();
    }

    pub fn data(&self) -> &ConversationData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut ConversationData {
        &mut self.data
    }

    pub fn set_data(&mut self, data: ConversationData) {
        self.data = data;
    }

    pub fn clear_data(&mut self) {
        self.data.clear();
    }

    /// Leave the dialog: initial state, empty data
    pub fn finish(&mut self) {
        self.state = INITIAL_STATE.to_string();
        self.data.clear();
    }

    pub(crate) fn into_record(self) -> ConversationRecord {
        ConversationRecord::new(self.state, self.data)
    }
}
