//! Batched loading of backing items.

use crate::error::Result;
use crate::hit::{HitId, SharedArena};
use crate::mailbox::{ItemId, ItemType, SKIP_ITEM_ID};
use crate::results::{Fill, HitBuffer, HitStream, QueryInfo};

/// Pulls hits in chunks and resolves their backing items with one batch
/// lookup per chunk.
///
/// Only hits from the same mailbox as the first hit of a chunk are loaded
/// eagerly; the others resolve lazily on first access.
#[derive(Debug)]
pub struct Preloader {
    source: Box<dyn HitStream>,
    arena: SharedArena,
    chunk_size: usize,
}

impl Preloader {
    pub fn new(source: Box<dyn HitStream>, arena: SharedArena, chunk_size: usize) -> Self {
        Preloader {
            source,
            arena,
            chunk_size: chunk_size.max(1),
        }
    }

    fn preload(&self, chunk: &[HitId]) -> Result<()> {
        let mut arena = self.arena.lock();
        let first = arena.get(chunk[0]);
        let Some(mailbox) = first.mailbox().cloned() else {
            // Proxied hits carry their data with them.
            return Ok(());
        };

        let same_mailbox: Vec<HitId> = chunk
            .iter()
            .copied()
            .filter(|id| arena.get(*id).mailbox_id() == Some(mailbox.id()))
            .collect();
        let ids: Vec<ItemId> = same_mailbox
            .iter()
            .map(|id| {
                let hit = arena.get(*id);
                if hit.item_is_loaded() {
                    SKIP_ITEM_ID
                } else {
                    hit.item_id()
                }
            })
            .collect();
        if ids.iter().all(|id| *id == SKIP_ITEM_ID) {
            return Ok(());
        }

        let items = mailbox.items_by_id(&ids, ItemType::Unknown, false)?;
        for (hit, item) in same_mailbox.into_iter().zip(items) {
            if let Some(item) = item {
                arena.get_mut(hit).set_item(item);
            }
        }
        Ok(())
    }
}

impl Fill for Preloader {
    fn fill(&mut self, out: &mut HitBuffer) -> Result<bool> {
        let mut chunk = Vec::with_capacity(self.chunk_size);
        let mut more = true;
        while chunk.len() < self.chunk_size {
            match self.source.get_next()? {
                Some(hit) => chunk.push(hit),
                None => {
                    more = false;
                    break;
                }
            }
        }
        if chunk.is_empty() {
            return Ok(false);
        }
        log::trace!("Preloading chunk of {} hits", chunk.len());
        self.preload(&chunk)?;
        out.extend(chunk);
        Ok(more)
    }

    fn reset(&mut self) -> Result<()> {
        self.source.reset_iterator()
    }

    fn close(&mut self) -> Result<()> {
        self.source.close()
    }

    fn source_offset(&self) -> i64 {
        self.source.cursor_offset()
    }

    fn result_info(&self) -> Vec<QueryInfo> {
        self.source.result_info()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::hit::MailboxHandle;
    use crate::mailbox::{MailItem, MemoryMailbox};
    use crate::results::testing::*;
    use crate::results::{BufferedResults, HitList};
    use crate::sort::SortValue;

    #[test]
    fn test_one_lookup_per_chunk() {
        let (mbox, handle, arena) = fixture(5);
        let hits = messages(&arena, &handle, &[1, 2, 3, 4, 5]);
        let mut stream = BufferedResults::new(Preloader::new(
            Box::new(HitList::new(hits.clone())),
            arena.clone(),
            3,
        ));

        let mut seen = Vec::new();
        while let Some(h) = stream.get_next().unwrap() {
            assert!(arena.lock().get(h).item_is_loaded());
            seen.push(h);
        }
        assert_eq!(seen, hits);
        assert_eq!(mbox.batch_lookup_count(), 2);
    }

    #[test]
    fn test_loaded_hits_are_skipped() {
        let (mbox, handle, arena) = fixture(3);
        let hits = messages(&arena, &handle, &[1, 2, 3]);
        arena.lock().load_item(hits[1]).unwrap();
        assert_eq!(mbox.batch_lookup_count(), 1);

        let mut stream =
            BufferedResults::new(Preloader::new(Box::new(HitList::new(hits)), arena.clone(), 3));
        while stream.get_next().unwrap().is_some() {}
        assert_eq!(mbox.batch_lookup_count(), 2);
    }

    #[test]
    fn test_other_mailbox_stays_lazy() {
        let (mbox, handle, arena) = fixture(2);
        let other = Arc::new(MemoryMailbox::new(2, "bob"));
        other.add_item(MailItem::message(9));
        let other_handle: MailboxHandle = other.clone();

        let mut hits = messages(&arena, &handle, &[1]);
        hits.push(
            arena
                .lock()
                .message_hit(&other_handle, 9, SortValue::None),
        );
        hits.extend(messages(&arena, &handle, &[2]));

        let mut stream =
            BufferedResults::new(Preloader::new(Box::new(HitList::new(hits.clone())), arena.clone(), 3));
        while stream.get_next().unwrap().is_some() {}

        let arena = arena.lock();
        assert!(arena.get(hits[0]).item_is_loaded());
        assert!(!arena.get(hits[1]).item_is_loaded());
        assert!(arena.get(hits[2]).item_is_loaded());
        assert_eq!(mbox.batch_lookup_count(), 1);
        assert_eq!(other.batch_lookup_count(), 0);
    }
}
