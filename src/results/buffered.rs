//! Buffering base shared by stream stages.

use std::collections::VecDeque;
use std::fmt::Debug;

use crate::error::Result;
use crate::hit::HitId;
use crate::results::{HitStream, QueryInfo, UNKNOWN_OFFSET};

/// Ordered buffer of not-yet-returned hits plus stream state.
#[derive(Debug, Clone, Default)]
pub struct HitBuffer {
    hits: VecDeque<HitId>,
    started: bool,
    exhausted: bool,
}

impl HitBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if a fill is needed and the source may still produce hits.
    pub fn needs_fill(&self) -> bool {
        self.hits.is_empty() && !self.exhausted
    }

    pub fn mark_started(&mut self) {
        self.started = true;
    }

    pub fn mark_exhausted(&mut self) {
        self.exhausted = true;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted && self.hits.is_empty()
    }

    pub fn push(&mut self, hit: HitId) {
        self.hits.push_back(hit);
    }

    pub fn peek(&self) -> Option<HitId> {
        self.hits.front().copied()
    }

    pub fn pop(&mut self) -> Option<HitId> {
        self.hits.pop_front()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Back to *not started*.
    pub fn reset(&mut self) {
        self.hits.clear();
        self.started = false;
        self.exhausted = false;
    }
}

impl Extend<HitId> for HitBuffer {
    fn extend<I: IntoIterator<Item = HitId>>(&mut self, iter: I) {
        self.hits.extend(iter);
    }
}

/// The producing half of a [`BufferedResults`] stage.
pub trait Fill: Send + Debug {
    /// Append at least one hit to `out`, or return `Ok(false)` once the
    /// source has nothing more.
    fn fill(&mut self, out: &mut HitBuffer) -> Result<bool>;

    /// Rewind the wrapped source and drop per-pass state.
    fn reset(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    /// Offset of the wrapped source, counting hits already pulled into the
    /// buffer.
    fn source_offset(&self) -> i64 {
        UNKNOWN_OFFSET
    }

    fn result_info(&self) -> Vec<QueryInfo> {
        Vec::new()
    }
}

/// A stream stage that refills an internal buffer from a [`Fill`].
#[derive(Debug)]
pub struct BufferedResults<F: Fill> {
    filler: F,
    buffer: HitBuffer,
}

impl<F: Fill> BufferedResults<F> {
    pub fn new(filler: F) -> Self {
        BufferedResults {
            filler,
            buffer: HitBuffer::new(),
        }
    }

    pub fn filler(&self) -> &F {
        &self.filler
    }

    /// Ensure the buffer holds a hit if one is available.
    ///
    /// A no-op returning `true` when the buffer is already non-empty.
    pub fn fill_buffer(&mut self) -> Result<bool> {
        while self.buffer.needs_fill() {
            self.buffer.mark_started();
            if !self.filler.fill(&mut self.buffer)? {
                self.buffer.mark_exhausted();
            }
        }
        Ok(!self.buffer.is_empty())
    }
}

impl<F: Fill> HitStream for BufferedResults<F> {
    fn reset_iterator(&mut self) -> Result<()> {
        if !self.buffer.is_started() {
            return Ok(());
        }
        self.buffer.reset();
        self.filler.reset()
    }

    fn get_next(&mut self) -> Result<Option<HitId>> {
        self.fill_buffer()?;
        Ok(self.buffer.pop())
    }

    fn peek_next(&mut self) -> Result<Option<HitId>> {
        self.fill_buffer()?;
        Ok(self.buffer.peek())
    }

    fn close(&mut self) -> Result<()> {
        self.buffer.reset();
        self.filler.close()
    }

    fn cursor_offset(&self) -> i64 {
        let offset = self.filler.source_offset();
        if offset < 0 {
            UNKNOWN_OFFSET
        } else {
            offset - self.buffer.len() as i64
        }
    }

    fn result_info(&self) -> Vec<QueryInfo> {
        self.filler.result_info()
    }
}
