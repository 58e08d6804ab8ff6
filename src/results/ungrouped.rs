//! Pass-through result container.

use crate::error::Result;
use crate::hit::HitId;
use crate::mailbox::ItemType;
use crate::results::{FetchMode, HitStream, QueryInfo, ResultContainer};
use crate::sort::SortBy;

/// Hands a raw stream to callers unchanged, attaching the result-container
/// metadata.
#[derive(Debug)]
pub struct UngroupedResults {
    inner: Box<dyn HitStream>,
    sort: SortBy,
    types: Vec<ItemType>,
    fetch: FetchMode,
}

impl UngroupedResults {
    pub fn new(inner: Box<dyn HitStream>, sort: SortBy, types: Vec<ItemType>) -> Self {
        UngroupedResults {
            inner,
            sort,
            types,
            fetch: FetchMode::Normal,
        }
    }

    pub fn with_fetch_mode(mut self, fetch: FetchMode) -> Self {
        self.fetch = fetch;
        self
    }
}

impl HitStream for UngroupedResults {
    fn reset_iterator(&mut self) -> Result<()> {
        self.inner.reset_iterator()
    }

    fn has_next(&mut self) -> Result<bool> {
        self.inner.has_next()
    }

    fn get_next(&mut self) -> Result<Option<HitId>> {
        self.inner.get_next()
    }

    fn peek_next(&mut self) -> Result<Option<HitId>> {
        self.inner.peek_next()
    }

    fn skip_to_hit(&mut self, n: usize) -> Result<Option<HitId>> {
        self.inner.skip_to_hit(n)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    fn cursor_offset(&self) -> i64 {
        self.inner.cursor_offset()
    }

    fn result_info(&self) -> Vec<QueryInfo> {
        self.inner.result_info()
    }
}

impl ResultContainer for UngroupedResults {
    fn sort_by(&self) -> SortBy {
        self.sort
    }

    fn fetch_mode(&self) -> FetchMode {
        self.fetch
    }

    fn types(&self) -> &[ItemType] {
        &self.types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::testing::*;
    use crate::results::HitList;

    #[test]
    fn test_forwards_unchanged() {
        let (_, mbox, arena) = fixture(3);
        let raw = messages(&arena, &mbox, &[3, 1, 3]);
        let mut results = UngroupedResults::new(
            Box::new(HitList::new(raw.clone())),
            SortBy::DateAsc,
            vec![ItemType::Message],
        );
        assert_eq!(results.sort_by(), SortBy::DateAsc);
        assert_eq!(results.types(), &[ItemType::Message]);
        assert_eq!(results.fetch_mode(), FetchMode::Normal);

        let mut out = Vec::new();
        while let Some(h) = results.get_next().unwrap() {
            out.push(h);
        }
        assert_eq!(out, raw);
        assert_eq!(results.cursor_offset(), 3);
        assert_eq!(results.skip_to_hit(1).unwrap(), Some(raw[1]));
    }
}
