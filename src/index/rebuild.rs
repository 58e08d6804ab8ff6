//! Background index teardown and rebuild.
//!
//! A rebuild is fire-and-forget: the caller gets no handle and no result.
//! Progress and failures are visible only in the log, and callers must not
//! assume the rebuild has finished at any particular time.

use std::sync::Arc;
use std::thread;

use crate::error::Result;
use crate::index::{IndexDocument, IndexStore};
use crate::mailbox::MailboxId;

/// Documents re-added per indexer flush.
const REBUILD_BATCH_SIZE: usize = 500;

/// Produces the documents of a mailbox for re-indexing.
pub type DocumentSource = Box<dyn FnOnce() -> Result<Vec<IndexDocument>> + Send>;

/// Delete the index of `mailbox_id` and re-add every document from `source`
/// on a detached thread.
///
/// Only a failure to start the thread is reported.
pub fn spawn_rebuild(
    store: Arc<dyn IndexStore>,
    mailbox_id: MailboxId,
    source: DocumentSource,
) -> Result<()> {
    thread::Builder::new()
        .name(format!("index-rebuild-{mailbox_id}"))
        .spawn(move || match rebuild(store.as_ref(), source) {
            Ok(count) => {
                log::info!("Rebuilt index for mailbox {mailbox_id}: {count} documents")
            }
            Err(e) => log::error!("Index rebuild failed for mailbox {mailbox_id}: {e}"),
        })?;
    Ok(())
}

fn rebuild(store: &dyn IndexStore, source: DocumentSource) -> Result<usize> {
    store.delete_index()?;
    let docs = source()?;
    let count = docs.len();

    let mut indexer = store.open_indexer()?;
    let mut docs = docs.into_iter().peekable();
    while docs.peek().is_some() {
        let batch: Vec<IndexDocument> = docs.by_ref().take(REBUILD_BATCH_SIZE).collect();
        indexer.add_documents(batch)?;
        indexer.flush()?;
    }
    indexer.compact()?;
    indexer.close()?;
    Ok(count)
}
