//! Split payload reassembly
//!
//! Fragments of one payload share a split id. They are collected in a table
//! per id until every index has arrived, then concatenated in index order.
//! Tables that stay incomplete past the assembly deadline are discarded.

use crate::frame::{Frame, SplitInfo};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Reasons a fragment is refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SplitError {
    #[error("Split {id} announces {count} fragments, limit is {max}")]
    TooManyFragments { id: u16, count: u32, max: u32 },

    #[error("Too many payloads under reassembly ({0})")]
    TooManySplits(usize),

    #[error("Split {id} fragment {index} out of range for {count} fragments")]
    IndexOutOfRange { id: u16, index: u32, count: u32 },

    #[error("Split {id} fragment count changed from {expected} to {actual}")]
    CountMismatch { id: u16, expected: u32, actual: u32 },
}

/// Fragments collected so far for one split id
#[derive(Debug)]
struct SplitTable {
    fragments: Vec<Option<Bytes>>,
    received: u32,
    size: usize,
    started: Instant,
    /// Header of the first fragment seen; the reassembled frame inherits it
    header: Frame,
}

impl SplitTable {
    fn new(frame: &Frame, count: u32, now: Instant) -> Self {
        SplitTable {
            fragments: vec![None; count as usize],
            received: 0,
            size: 0,
            started: now,
            header: Frame {
                payload: Bytes::new(),
                split: None,
                ..frame.clone()
            },
        }
    }

    fn is_complete(&self) -> bool {
        self.received as usize == self.fragments.len()
    }

    fn assemble(self) -> Frame {
        let mut payload = BytesMut::with_capacity(self.size);
        for fragment in self.fragments.into_iter().flatten() {
            payload.extend_from_slice(&fragment);
        }
        Frame {
            payload: payload.freeze(),
            ..self.header
        }
    }
}

/// Reassembly tables of one connection
#[derive(Debug)]
pub struct SplitAssembler {
    tables: HashMap<u16, SplitTable>,
    max_fragments: u32,
    max_splits: usize,
    deadline: Duration,
}

impl SplitAssembler {
    pub fn new(max_fragments: u32, max_splits: usize, deadline: Duration) -> Self {
        SplitAssembler {
            tables: HashMap::new(),
            max_fragments,
            max_splits,
            deadline,
        }
    }

    /// Check that every fragment among `frames` would be stored
    ///
    /// Split ids without a table count once each against the limit on
    /// concurrent reassemblies. Nothing is stored.
    pub fn admit<'a>(&self, frames: impl IntoIterator<Item = &'a Frame>) -> Result<(), SplitError> {
        let mut opened: Vec<(u16, u32)> = Vec::new();

        for frame in frames {
            let Some(SplitInfo { count, id, index }) = frame.split else {
                continue;
            };

            if index >= count {
                return Err(SplitError::IndexOutOfRange { id, index, count });
            }

            if count > self.max_fragments {
                return Err(SplitError::TooManyFragments {
                    id,
                    count,
                    max: self.max_fragments,
                });
            }

            let expected = match self.tables.get(&id) {
                Some(table) => table.fragments.len() as u32,
                None => match opened.iter().find(|(open, _)| *open == id) {
                    Some(&(_, expected)) => expected,
                    None => {
                        if self.tables.len() + opened.len() >= self.max_splits {
                            return Err(SplitError::TooManySplits(self.tables.len()));
                        }
                        opened.push((id, count));
                        count
                    }
                },
            };

            if expected != count {
                return Err(SplitError::CountMismatch {
                    id,
                    expected,
                    actual: count,
                });
            }
        }

        Ok(())
    }

    /// Store one fragment; returns the whole frame once the last one arrives
    ///
    /// Frames without split metadata pass straight through.
    pub fn insert(&mut self, frame: Frame, now: Instant) -> Result<Option<Frame>, SplitError> {
        let Some(SplitInfo { count, id, index }) = frame.split else {
            return Ok(Some(frame));
        };
        self.admit([&frame])?;

        let table = self
            .tables
            .entry(id)
            .or_insert_with(|| SplitTable::new(&frame, count, now));

        let slot = index as usize;
        if table.fragments[slot].is_none() {
            table.size += frame.payload.len();
            table.received += 1;
            table.fragments[slot] = Some(frame.payload);
        }

        if !table.is_complete() {
            return Ok(None);
        }

        Ok(self.tables.remove(&id).map(SplitTable::assemble))
    }

    /// Drop tables that did not complete within the deadline
    pub fn purge(&mut self, now: Instant) -> usize {
        let deadline = self.deadline;
        let before = self.tables.len();

        self.tables.retain(|id, table| {
            let alive = now.saturating_duration_since(table.started) < deadline;
            if !alive {
                debug!(
                    split_id = id,
                    received = table.received,
                    expected = table.fragments.len(),
                    "Dropping stale split payload"
                );
            }
            alive
        });

        before - self.tables.len()
    }

    /// Number of payloads under reassembly
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
