//! Running a plan against a mailbox and paging through its results.

pub mod engine;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::hit::{Hit, HitId, SharedArena};
use crate::query::SearchParams;
use crate::results::{HitStream, QueryInfo, ResultContainer};
use crate::sort::SortBy;

pub use self::engine::MailboxSearch;

/// How raw hits are presented to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grouping {
    /// One hit per message, with its matched parts folded in.
    #[default]
    Grouped,
    /// Raw hits as the plan produced them.
    Ungrouped,
}

/// The result stream of a running search.
#[derive(Debug)]
pub struct QueryResults {
    stream: Box<dyn ResultContainer>,
    arena: SharedArena,
    plan: String,
    info: Vec<QueryInfo>,
    offset: usize,
    limit: usize,
}

impl QueryResults {
    pub(crate) fn new(
        stream: Box<dyn ResultContainer>,
        arena: SharedArena,
        plan: String,
        info: Vec<QueryInfo>,
        params: &SearchParams,
    ) -> Self {
        QueryResults {
            stream,
            arena,
            plan,
            info,
            offset: params.offset,
            limit: params.limit,
        }
    }

    /// The optimized plan that produced these results.
    pub fn plan(&self) -> &str {
        &self.plan
    }

    /// The sort actually applied.
    pub fn sort_by(&self) -> SortBy {
        self.stream.sort_by()
    }

    pub fn arena(&self) -> &SharedArena {
        &self.arena
    }

    /// Run `f` on the hit behind `id`.
    pub fn with_hit<R>(&self, id: HitId, f: impl FnOnce(&Hit) -> R) -> R {
        f(self.arena.lock().get(id))
    }

    /// Like [`QueryResults::with_hit`], with the backing item resolved.
    pub fn with_loaded_hit<R>(&self, id: HitId, f: impl FnOnce(&Hit) -> R) -> Result<R> {
        let mut arena = self.arena.lock();
        arena.load_item(id)?;
        Ok(f(arena.get(id)))
    }

    /// The requested page: `limit` hits starting at `offset`.
    pub fn page(&mut self) -> Result<Vec<HitId>> {
        let mut hits = Vec::with_capacity(self.limit.min(1024));
        if self.limit == 0 {
            return Ok(hits);
        }
        let Some(first) = self.stream.skip_to_hit(self.offset)? else {
            return Ok(hits);
        };
        hits.push(first);
        while hits.len() < self.limit {
            match self.stream.get_next()? {
                Some(hit) => hits.push(hit),
                None => break,
            }
        }
        Ok(hits)
    }
}

impl HitStream for QueryResults {
    fn reset_iterator(&mut self) -> Result<()> {
        self.stream.reset_iterator()
    }

    fn has_next(&mut self) -> Result<bool> {
        self.stream.has_next()
    }

    fn get_next(&mut self) -> Result<Option<HitId>> {
        self.stream.get_next()
    }

    fn peek_next(&mut self) -> Result<Option<HitId>> {
        self.stream.peek_next()
    }

    fn skip_to_hit(&mut self, n: usize) -> Result<Option<HitId>> {
        self.stream.skip_to_hit(n)
    }

    fn close(&mut self) -> Result<()> {
        self.stream.close()
    }

    fn cursor_offset(&self) -> i64 {
        self.stream.cursor_offset()
    }

    fn result_info(&self) -> Vec<QueryInfo> {
        let mut info = self.info.clone();
        info.extend(self.stream.result_info());
        info
    }
}
