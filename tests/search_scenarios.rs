//! Full searches over an in-memory mailbox, index and remote proxy.

use std::sync::Arc;

use parking_lot::Mutex;

use mailquery::hit::ProxiedItem;
use mailquery::index::{
    IndexDocument, LoopbackTransport, MemoryIndex, RemoteIndex, FIELD_CONTENT, FIELD_SORT_DATE,
};
use mailquery::mailbox::{ID_FOLDER_INBOX, ID_FOLDER_SPAM, ID_FOLDER_TRASH};
use mailquery::prelude::*;
use mailquery::query::{DbOp, ProxiedStream, RemoteProxy, StaticStream};
use mailquery::sort::SortValue;

/// A proxy that records every request and answers from a canned list.
#[derive(Debug, Default)]
struct ScriptedProxy {
    items: Vec<ProxiedItem>,
    fail: bool,
    requests: Mutex<Vec<(String, String, usize)>>,
}

impl ScriptedProxy {
    fn with_items(items: Vec<ProxiedItem>) -> Self {
        ScriptedProxy {
            items,
            ..Default::default()
        }
    }

    fn failing() -> Self {
        ScriptedProxy {
            fail: true,
            ..Default::default()
        }
    }
}

impl RemoteProxy for ScriptedProxy {
    fn search(
        &self,
        account_id: &str,
        query: &str,
        params: &SearchParams,
    ) -> Result<Box<dyn ProxiedStream>> {
        self.requests
            .lock()
            .push((account_id.to_string(), query.to_string(), params.limit));
        if self.fail {
            return Err(SearchError::transport(format!("{account_id}: connection reset")));
        }
        let items: Vec<ProxiedItem> = self
            .items
            .iter()
            .filter(|i| i.account_id == account_id)
            .cloned()
            .collect();
        Ok(Box::new(StaticStream::new(items)))
    }
}

/// Messages 1..=5 in the inbox dated 10, 20, ... 50, message 6 in the
/// trash and message 7 in spam. Every message mentions "invoice".
fn mailbox() -> (Arc<MemoryMailbox>, MemoryIndex) {
    let mbox = Arc::new(MemoryMailbox::new(1, "alice"));
    let mut docs = Vec::new();
    for id in 1..=7 {
        let folder_id = match id {
            6 => ID_FOLDER_TRASH,
            7 => ID_FOLDER_SPAM,
            _ => ID_FOLDER_INBOX,
        };
        mbox.add_item(MailItem {
            folder_id,
            date: id as i64 * 10,
            subject: format!("invoice {id}"),
            tags: if id % 2 == 1 { vec!["work".into()] } else { Vec::new() },
            ..MailItem::message(id)
        });
        docs.push(
            IndexDocument::new(id, ItemType::Message, None)
                .with_text(FIELD_CONTENT, &format!("invoice number {id}"))
                .with_field(FIELD_SORT_DATE, (id * 10).to_string()),
        );
    }
    (mbox, MemoryIndex::with_documents(docs))
}

fn remote_item(account: &str, id: i32, date: i64) -> ProxiedItem {
    ProxiedItem {
        account_id: account.to_string(),
        item_id: id,
        item_type: ItemType::Message,
        sort_value: SortValue::Int(date),
        name: format!("{account} #{id}"),
        fields: Default::default(),
    }
}

fn item_ids(results: &QueryResults, hits: &[HitId]) -> Vec<i32> {
    hits.iter()
        .map(|h| results.with_hit(*h, |hit| hit.item_id()))
        .collect()
}

#[test]
fn test_term_search_skips_spam_and_trash() -> Result<()> {
    let (mbox, index) = mailbox();
    let search = MailboxSearch::new(mbox).with_index(Arc::new(index));

    let mut results = search.run(QueryOperation::term(FIELD_CONTENT, "invoice"))?;
    let page = results.page()?;
    assert_eq!(item_ids(&results, &page), vec![5, 4, 3, 2, 1]);
    assert_eq!(results.sort_by(), SortBy::DateDesc);
    results.close()?;
    Ok(())
}

#[test]
fn test_paging_with_offset_and_limit() -> Result<()> {
    let (mbox, index) = mailbox();
    let search = MailboxSearch::new(mbox)
        .with_index(Arc::new(index))
        .with_params(SearchParams {
            offset: 1,
            limit: 2,
            ..Default::default()
        });

    let mut results = search.run(QueryOperation::term(FIELD_CONTENT, "invoice"))?;
    let page = results.page()?;
    assert_eq!(item_ids(&results, &page), vec![4, 3]);
    Ok(())
}

#[test]
fn test_server_hosted_index_matches_embedded() -> Result<()> {
    let (mbox, index) = mailbox();
    let remote = RemoteIndex::new(Arc::new(LoopbackTransport::new(index.clone())));
    let plan = || {
        QueryOperation::intersection(vec![
            QueryOperation::term(FIELD_CONTENT, "invoice"),
            QueryOperation::Db(DbOp::tagged("work")),
        ])
    };

    let mut embedded = MailboxSearch::new(mbox.clone())
        .with_index(Arc::new(index))
        .run(plan())?;
    let mut hosted = MailboxSearch::new(mbox).with_index(Arc::new(remote)).run(plan())?;

    let a = embedded.page()?;
    let b = hosted.page()?;
    assert_eq!(item_ids(&embedded, &a), vec![5, 3, 1]);
    assert_eq!(item_ids(&hosted, &b), item_ids(&embedded, &a));
    Ok(())
}

#[test]
fn test_store_cursor_tracks_position() -> Result<()> {
    let (mbox, _) = mailbox();
    let search = MailboxSearch::new(mbox).with_grouping(Grouping::Ungrouped);
    let mut results = search.run(QueryOperation::Db(DbOp::in_folders([ID_FOLDER_INBOX])))?;

    let mut offsets = Vec::new();
    while results.get_next()?.is_some() {
        offsets.push(results.cursor_offset());
    }
    assert_eq!(offsets, vec![1, 2, 3, 4, 5]);
    Ok(())
}

#[test]
fn test_grouped_cursor_is_unknown() -> Result<()> {
    let (mbox, _) = mailbox();
    let search = MailboxSearch::new(mbox);
    let mut results = search.run(QueryOperation::Db(DbOp::in_folders([ID_FOLDER_INBOX])))?;

    results.get_next()?;
    assert_eq!(results.cursor_offset(), -1);
    Ok(())
}

#[test]
fn test_skip_matches_reset_and_walk() -> Result<()> {
    let (mbox, index) = mailbox();
    let search = MailboxSearch::new(mbox).with_index(Arc::new(index));
    let mut results = search.run(QueryOperation::term(FIELD_CONTENT, "invoice"))?;

    let skipped = results.skip_to_hit(2)?;
    results.reset_iterator()?;
    results.get_next()?;
    results.get_next()?;
    assert_eq!(results.get_next()?, skipped);
    Ok(())
}

#[test]
fn test_preload_batches_item_lookups() -> Result<()> {
    let (mbox, _) = mailbox();
    let search = MailboxSearch::new(mbox.clone()).with_preload(3);
    let mut results = search.run(QueryOperation::Db(DbOp::in_folders([ID_FOLDER_INBOX])))?;

    let page = results.page()?;
    assert_eq!(page.len(), 5);
    assert_eq!(mbox.batch_lookup_count(), 2);
    for hit in page {
        assert!(results.with_hit(hit, |h| h.item_is_loaded()));
    }
    Ok(())
}

#[test]
fn test_remote_hits_interleave_by_date() -> Result<()> {
    let (mbox, _) = mailbox();
    mbox.add_item(MailItem {
        date: 5,
        tags: vec!["urgent".into()],
        ..MailItem::message(8)
    });
    mbox.add_item(MailItem {
        date: 25,
        tags: vec!["urgent".into()],
        ..MailItem::message(9)
    });
    let proxy = Arc::new(ScriptedProxy::with_items(vec![remote_item("bob", 70, 15)]));
    let search = MailboxSearch::new(mbox).with_proxy(proxy.clone());

    let plan = QueryOperation::union(vec![
        QueryOperation::Db(DbOp::tagged("urgent")),
        QueryOperation::Db(DbOp::tagged("urgent").with_target(QueryTarget::remote("bob"))),
    ]);
    let mut results = search.run(plan)?;
    let page = results.page()?;

    assert_eq!(item_ids(&results, &page), vec![9, 70, 8]);
    assert!(results.with_hit(page[1], |h| h.is_proxied()));
    assert_eq!(
        results.with_hit(page[1], |h| h.name().map(str::to_string)),
        Some("bob #70".to_string())
    );
    results.close()?;

    let requests = proxy.requests.lock();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, "bob");
    assert_eq!(requests[0].1, "tag:\"urgent\"");
    assert_eq!(requests[0].2, 100);
    Ok(())
}

#[test]
fn test_mixed_conjunction_matches_locally_and_remotely() -> Result<()> {
    let (mbox, index) = mailbox();
    let proxy = Arc::new(ScriptedProxy::with_items(vec![remote_item("bob", 70, 15)]));
    let search = MailboxSearch::new(mbox)
        .with_index(Arc::new(index))
        .with_proxy(proxy.clone());

    let plan = QueryOperation::intersection(vec![
        QueryOperation::term(FIELD_CONTENT, "invoice"),
        QueryOperation::union(vec![
            QueryOperation::Db(DbOp::tagged("work")),
            QueryOperation::Db(DbOp::tagged("urgent").with_target(QueryTarget::remote("bob"))),
        ]),
    ]);
    let mut results = search.run(plan)?;
    let page = results.page()?;
    assert_eq!(item_ids(&results, &page), vec![5, 3, 70, 1]);
    results.close()?;

    let requests = proxy.requests.lock();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, "bob");
    assert!(requests[0].1.contains("urgent"));
    assert!(!requests[0].1.contains("work"));
    assert!(!requests[0].1.contains("inid"));
    Ok(())
}

#[test]
fn test_each_account_gets_one_request() -> Result<()> {
    let (mbox, _) = mailbox();
    let proxy = Arc::new(ScriptedProxy::with_items(vec![
        remote_item("bob", 1, 30),
        remote_item("carol", 1, 20),
        remote_item("bob", 2, 10),
    ]));
    let search = MailboxSearch::new(mbox).with_proxy(proxy.clone());

    let plan = QueryOperation::union(vec![
        QueryOperation::Db(DbOp::tagged("a").with_target(QueryTarget::remote("bob"))),
        QueryOperation::Db(DbOp::tagged("b").with_target(QueryTarget::remote("carol"))),
        QueryOperation::Db(DbOp::tagged("c").with_target(QueryTarget::remote("bob"))),
    ]);
    let mut results = search.run(plan)?;
    let page = results.page()?;

    let accounts: Vec<String> = page
        .iter()
        .map(|h| results.with_hit(*h, |hit| hit.proxied().map(|p| p.account_id.clone())))
        .collect::<Option<_>>()
        .unwrap_or_default();
    assert_eq!(accounts, vec!["bob", "carol", "bob"]);
    assert!(results.result_info().contains(&QueryInfo::MultiTarget {
        accounts: vec!["bob".into(), "carol".into()],
    }));

    let mut requested: Vec<String> = proxy.requests.lock().iter().map(|r| r.0.clone()).collect();
    requested.sort();
    assert_eq!(requested, vec!["bob", "carol"]);
    Ok(())
}

#[test]
fn test_transport_failure_surfaces_as_io_error() -> Result<()> {
    let (mbox, _) = mailbox();
    let proxy = Arc::new(ScriptedProxy::failing());
    let search = MailboxSearch::new(mbox).with_proxy(proxy.clone());

    let plan = QueryOperation::Db(DbOp::tagged("work").with_target(QueryTarget::remote("bob")));
    let mut results = search.run(plan)?;
    let err = results.page().unwrap_err();
    assert!(err.is_io());
    assert_eq!(results.get_next()?, None);
    assert!(!results.has_next()?);
    assert_eq!(proxy.requests.lock().len(), 1);
    results.close()?;
    Ok(())
}

#[test]
fn test_store_only_plan_cannot_sort_by_relevance() -> Result<()> {
    let (mbox, _) = mailbox();
    let search = MailboxSearch::new(mbox).with_params(SearchParams {
        sort: SortBy::RelevanceDesc,
        ..Default::default()
    });
    let mut results = search.run(QueryOperation::Db(DbOp::tagged("work")))?;

    assert_eq!(results.sort_by(), SortBy::DateDesc);
    assert!(results.result_info().contains(&QueryInfo::SortFallback {
        requested: SortBy::RelevanceDesc,
        used: SortBy::DateDesc,
    }));
    let page = results.page()?;
    assert_eq!(item_ids(&results, &page), vec![5, 3, 1]);
    Ok(())
}
