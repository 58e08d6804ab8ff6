//! Per-message deduplication.

use ahash::AHashSet;

use crate::error::Result;
use crate::hit::{HitKind, SharedArena};
use crate::mailbox::{ItemId, ItemType, MailboxId};
use crate::results::{
    BufferedResults, FetchMode, Fill, HitBuffer, HitStream, QueryInfo, ResultContainer,
};
use crate::sort::SortBy;

/// Collapses message and message-part hits of one logical message into a
/// single message hit carrying every matched part.
///
/// The first occurrence of each message fixes its position in the output.
#[derive(Debug)]
pub struct MessageGrouper {
    source: Box<dyn HitStream>,
    arena: SharedArena,
    seen: AHashSet<(MailboxId, ItemId)>,
    sort: SortBy,
    types: Vec<ItemType>,
    fetch: FetchMode,
}

impl MessageGrouper {
    pub fn new(source: Box<dyn HitStream>, arena: SharedArena, sort: SortBy) -> Self {
        MessageGrouper {
            source,
            arena,
            seen: AHashSet::new(),
            sort,
            types: Vec::new(),
            fetch: FetchMode::Normal,
        }
    }

    pub fn with_types(mut self, types: Vec<ItemType>) -> Self {
        self.types = types;
        self
    }

    pub fn with_fetch_mode(mut self, fetch: FetchMode) -> Self {
        self.fetch = fetch;
        self
    }

    /// Fold following raw hits of the same local message into `message`.
    fn absorb_following(&mut self, mailbox: MailboxId, item_id: ItemId) -> Result<()> {
        while let Some(next) = self.source.peek_next()? {
            {
                let arena = self.arena.lock();
                let hit = arena.get(next);
                if !hit.is_local()
                    || !hit.is_message_or_part()
                    || hit.item_id() != item_id
                    || hit.mailbox_id() != Some(mailbox)
                {
                    break;
                }
            }
            self.source.get_next()?;
            self.arena.lock().canonical_message(next);
        }
        Ok(())
    }
}

impl Fill for MessageGrouper {
    fn fill(&mut self, out: &mut HitBuffer) -> Result<bool> {
        loop {
            let Some(raw) = self.source.get_next()? else {
                return Ok(false);
            };

            let (message, key) = {
                let mut arena = self.arena.lock();
                let hit = arena.get(raw);
                if matches!(hit.kind(), HitKind::Conversation { .. }) {
                    panic!("grouping conversation hit {hit} into messages is not supported");
                }
                let key = if hit.is_message_or_part() {
                    hit.mailbox_id().map(|mailbox| (mailbox, hit.item_id()))
                } else {
                    None
                };
                // Parts of an already emitted message are dropped unlinked.
                if key.is_some_and(|key| self.seen.contains(&key)) {
                    continue;
                }
                let message = match key {
                    Some(_) => arena.canonical_message(raw),
                    None => Some(raw),
                };
                (message, key)
            };

            let Some(message) = message else {
                continue;
            };
            if let Some(key) = key {
                self.seen.insert(key);
                self.absorb_following(key.0, key.1)?;
            }
            out.push(message);
            return Ok(true);
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.seen.clear();
        self.source.reset_iterator()
    }

    fn close(&mut self) -> Result<()> {
        self.seen.clear();
        self.source.close()
    }

    fn result_info(&self) -> Vec<QueryInfo> {
        self.source.result_info()
    }
}

impl ResultContainer for BufferedResults<MessageGrouper> {
    fn sort_by(&self) -> SortBy {
        self.filler().sort
    }

    fn fetch_mode(&self) -> FetchMode {
        self.filler().fetch
    }

    fn types(&self) -> &[ItemType] {
        &self.filler().types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hit::{HitArena, HitId};
    use crate::results::testing::*;
    use crate::results::HitList;
    use crate::sort::SortValue;

    fn drain(stream: &mut dyn HitStream) -> Vec<HitId> {
        let mut out = Vec::new();
        while let Some(h) = stream.get_next().unwrap() {
            out.push(h);
        }
        out
    }

    #[test]
    fn test_parts_fold_into_message() {
        let (_, mbox, arena) = fixture(7);
        let raw = {
            let mut a = arena.lock();
            vec![
                a.part_hit(&mbox, 5, "partA", SortValue::Int(5)),
                a.message_hit(&mbox, 5, SortValue::Int(5)),
                a.part_hit(&mbox, 5, "partB", SortValue::Int(5)),
                a.message_hit(&mbox, 7, SortValue::Int(7)),
            ]
        };
        let mut grouped = BufferedResults::new(MessageGrouper::new(
            Box::new(HitList::new(raw.clone())),
            arena.clone(),
            SortBy::None,
        ));

        let out = drain(&mut grouped);
        assert_eq!(out, vec![raw[1], raw[3]]);

        let arena = arena.lock();
        let parts: Vec<String> = arena
            .get(out[0])
            .matched_parts()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(parts, vec!["partA".to_string(), "partB".to_string()]);
        assert!(arena.get(out[1]).matched_parts().is_empty());
    }

    #[test]
    fn test_late_duplicate_is_dropped() {
        let (_, mbox, arena) = fixture(3);
        let raw = messages(&arena, &mbox, &[1, 2, 1, 3]);
        let mut grouped = BufferedResults::new(MessageGrouper::new(
            Box::new(HitList::new(raw.clone())),
            arena,
            SortBy::None,
        ));
        assert_eq!(drain(&mut grouped), vec![raw[0], raw[1], raw[3]]);

        grouped.reset_iterator().unwrap();
        assert_eq!(drain(&mut grouped), vec![raw[0], raw[1], raw[3]]);
    }

    #[test]
    fn test_late_part_leaves_emitted_message_untouched() {
        let (_, mbox, arena) = fixture(7);
        let raw = {
            let mut a = arena.lock();
            vec![
                a.message_hit(&mbox, 5, SortValue::Int(5)),
                a.message_hit(&mbox, 7, SortValue::Int(7)),
                a.part_hit(&mbox, 5, "late", SortValue::Int(5)),
            ]
        };
        let mut grouped = BufferedResults::new(MessageGrouper::new(
            Box::new(HitList::new(raw.clone())),
            arena.clone(),
            SortBy::None,
        ));

        let first = grouped.get_next().unwrap();
        assert_eq!(first, Some(raw[0]));
        assert_eq!(drain(&mut grouped), vec![raw[1]]);
        assert!(arena.lock().get(raw[0]).matched_parts().is_empty());
    }

    #[test]
    fn test_other_kinds_pass_through() {
        let (_, mbox, arena) = fixture(0);
        let raw = {
            let mut a = arena.lock();
            vec![
                a.item_hit(&mbox, ItemType::Contact, 1, SortValue::None),
                a.item_hit(&mbox, ItemType::Contact, 1, SortValue::None),
            ]
        };
        let mut grouped = BufferedResults::new(MessageGrouper::new(
            Box::new(HitList::new(raw.clone())),
            arena,
            SortBy::None,
        ));
        assert_eq!(drain(&mut grouped).len(), 2);
    }

    #[test]
    #[should_panic(expected = "not supported")]
    fn test_conversation_hits_are_rejected() {
        let (_, mbox, _) = fixture(0);
        let arena = HitArena::shared();
        let conv = arena.lock().conversation_hit(&mbox, 40, SortValue::None);
        let mut grouped = BufferedResults::new(MessageGrouper::new(
            Box::new(HitList::new(vec![conv])),
            arena,
            SortBy::None,
        ));
        let _ = grouped.get_next();
    }
}
