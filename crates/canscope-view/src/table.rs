//! Latest-state table: one row per identifier key

use std::collections::HashMap;

use canscope_core::{IdKey, ReceivedFrame};

use crate::row::{FrameRow, ObservedAt};

/// Rows in first-seen order, updated in place
#[derive(Debug, Default)]
pub struct LatestStateTable {
    index: HashMap<IdKey, usize>,
    rows: Vec<FrameRow>,
}

impl LatestStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a frame and return the row it landed in
    pub fn observe(&mut self, frame: &ReceivedFrame, at: ObservedAt) -> &FrameRow {
        let key = frame.frame.key();
        let slot = match self.index.get(&key) {
            Some(&slot) => {
                self.rows[slot].update(frame, at);
                slot
            }
            None => {
                self.rows.push(FrameRow::new(frame, at));
                let slot = self.rows.len() - 1;
                self.index.insert(key, slot);
                slot
            }
        };
        &self.rows[slot]
    }

    pub fn get(&self, key: &IdKey) -> Option<&FrameRow> {
        self.index.get(key).map(|&slot| &self.rows[slot])
    }

    pub fn rows(&self) -> &[FrameRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.rows.clear();
    }
}
