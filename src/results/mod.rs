//! Pull-based hit streams.
//!
//! Every producer of hits, from plan nodes to the grouping decorators layered
//! on top of them, implements [`HitStream`]. A stream moves from *not
//! started* through *in progress* to *exhausted*; `reset_iterator` returns it
//! to *not started*. Decorators own the stream they wrap, so composing them is
//! a matter of boxing one inside the next.

pub mod buffered;
pub mod grouper;
pub mod preload;
pub mod ungrouped;

use std::fmt::{self, Debug};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::hit::HitId;
use crate::mailbox::ItemType;
use crate::sort::SortBy;

pub use self::buffered::{BufferedResults, Fill, HitBuffer};
pub use self::grouper::MessageGrouper;
pub use self::preload::Preloader;
pub use self::ungrouped::UngroupedResults;

/// Offset reported when a stream cannot tell its position.
pub const UNKNOWN_OFFSET: i64 = -1;

/// A single-reader, single-pass stream of hits.
pub trait HitStream: Send + Debug {
    /// Return to the start of the stream.
    fn reset_iterator(&mut self) -> Result<()>;

    /// True if another hit is available. Buffers, but never consumes.
    fn has_next(&mut self) -> Result<bool> {
        Ok(self.peek_next()?.is_some())
    }

    /// Consume and return the next hit.
    fn get_next(&mut self) -> Result<Option<HitId>>;

    /// The next hit without consuming it; `None` once exhausted.
    fn peek_next(&mut self) -> Result<Option<HitId>>;

    /// The hit at position `n` from the start.
    ///
    /// Equivalent to a reset followed by `n` discarded hits and one more
    /// `get_next`.
    fn skip_to_hit(&mut self, n: usize) -> Result<Option<HitId>> {
        walk_to_hit(self, n)
    }

    /// Release every resource held by the stream and the streams it wraps.
    fn close(&mut self) -> Result<()>;

    /// Absolute position from the top, or [`UNKNOWN_OFFSET`].
    fn cursor_offset(&self) -> i64 {
        UNKNOWN_OFFSET
    }

    /// Annotations collected from the leaves that produced this stream.
    fn result_info(&self) -> Vec<QueryInfo> {
        Vec::new()
    }
}

/// `skip_to_hit` for streams without native offset support.
pub fn walk_to_hit<S: HitStream + ?Sized>(stream: &mut S, n: usize) -> Result<Option<HitId>> {
    stream.reset_iterator()?;
    for _ in 0..n {
        if stream.get_next()?.is_none() {
            return Ok(None);
        }
    }
    stream.get_next()
}

impl<S: HitStream + ?Sized> HitStream for Box<S> {
    fn reset_iterator(&mut self) -> Result<()> {
        (**self).reset_iterator()
    }

    fn has_next(&mut self) -> Result<bool> {
        (**self).has_next()
    }

    fn get_next(&mut self) -> Result<Option<HitId>> {
        (**self).get_next()
    }

    fn peek_next(&mut self) -> Result<Option<HitId>> {
        (**self).peek_next()
    }

    fn skip_to_hit(&mut self, n: usize) -> Result<Option<HitId>> {
        (**self).skip_to_hit(n)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn cursor_offset(&self) -> i64 {
        (**self).cursor_offset()
    }

    fn result_info(&self) -> Vec<QueryInfo> {
        (**self).result_info()
    }
}

/// How much of each hit callers intend to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// Hits are read in full; backing items will be needed.
    #[default]
    Normal,
    /// Only ids are read.
    Ids,
}

/// A finished result stream as handed to callers.
pub trait ResultContainer: HitStream {
    fn sort_by(&self) -> SortBy;

    fn fetch_mode(&self) -> FetchMode;

    /// Item types the results were restricted to; empty means any.
    fn types(&self) -> &[ItemType];
}

/// An informational annotation attached to a result stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryInfo {
    /// A correction for a term that matched nothing.
    SuggestedQuery { original: String, suggestion: String },
    /// The requested sort could not be honoured.
    SortFallback { requested: SortBy, used: SortBy },
    /// The plan fans out to more than one remote account.
    MultiTarget { accounts: Vec<String> },
}

impl fmt::Display for QueryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryInfo::SuggestedQuery {
                original,
                suggestion,
            } => write!(f, "did you mean \"{suggestion}\" instead of \"{original}\"?"),
            QueryInfo::SortFallback { requested, used } => {
                write!(f, "sort {requested} unsupported, using {used}")
            }
            QueryInfo::MultiTarget { accounts } => {
                write!(f, "searching {} remote accounts", accounts.len())
            }
        }
    }
}

/// A stream over a fixed list of hits.
#[derive(Debug, Clone, Default)]
pub struct HitList {
    hits: Vec<HitId>,
    pos: usize,
}

impl HitList {
    pub fn new(hits: Vec<HitId>) -> Self {
        HitList { hits, pos: 0 }
    }
}

impl HitStream for HitList {
    fn reset_iterator(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }

    fn get_next(&mut self) -> Result<Option<HitId>> {
        let hit = self.hits.get(self.pos).copied();
        if hit.is_some() {
            self.pos += 1;
        }
        Ok(hit)
    }

    fn peek_next(&mut self) -> Result<Option<HitId>> {
        Ok(self.hits.get(self.pos).copied())
    }

    fn skip_to_hit(&mut self, n: usize) -> Result<Option<HitId>> {
        self.pos = n.min(self.hits.len());
        self.get_next()
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn cursor_offset(&self) -> i64 {
        self.pos as i64
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use crate::hit::{HitArena, HitId, MailboxHandle, SharedArena};
    use crate::mailbox::{MailItem, MemoryMailbox};
    use crate::sort::SortValue;

    /// A mailbox holding messages 1..=n and an arena over it.
    pub(crate) fn fixture(n: i32) -> (Arc<MemoryMailbox>, MailboxHandle, SharedArena) {
        let mbox = Arc::new(MemoryMailbox::new(1, "alice"));
        for id in 1..=n {
            mbox.add_item(MailItem {
                date: id as i64,
                ..MailItem::message(id)
            });
        }
        let handle: MailboxHandle = mbox.clone();
        (mbox, handle, HitArena::shared())
    }

    pub(crate) fn messages(arena: &SharedArena, mbox: &MailboxHandle, ids: &[i32]) -> Vec<HitId> {
        let mut arena = arena.lock();
        ids.iter()
            .map(|id| arena.message_hit(mbox, *id, SortValue::Int(*id as i64)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_skip_matches_manual_walk() {
        let (_, mbox, arena) = fixture(5);
        let hits = messages(&arena, &mbox, &[1, 2, 3, 4, 5]);
        let mut list = HitList::new(hits);

        let skipped = list.skip_to_hit(2).unwrap();
        list.reset_iterator().unwrap();
        list.get_next().unwrap();
        list.get_next().unwrap();
        assert_eq!(list.get_next().unwrap(), skipped);
    }

    #[test]
    fn test_peek_at_end_is_none() {
        let mut list = HitList::new(Vec::new());
        assert_eq!(list.peek_next().unwrap(), None);
        assert!(!list.has_next().unwrap());
    }
}
