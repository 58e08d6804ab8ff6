//! Criterion benchmarks for mailquery.
//!
//! Covers plan optimization, end-to-end searches over the in-memory engines
//! and the message grouping stage.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use mailquery::hit::MailboxHandle;
use mailquery::index::{FIELD_CONTENT, FIELD_SORT_DATE, IndexDocument, MemoryIndex};
use mailquery::mailbox::{ID_FOLDER_INBOX, ID_FOLDER_TRASH};
use mailquery::prelude::*;
use mailquery::query::DbOp;
use mailquery::results::{BufferedResults, HitList, MessageGrouper};
use mailquery::sort::SortValue;

const WORDS: [&str; 12] = [
    "invoice", "meeting", "budget", "report", "travel", "review", "lunch", "contract", "draft",
    "urgent", "summary", "agenda",
];

/// Generate a mailbox and a matching index of `count` messages.
fn generate_mailbox(count: i32) -> (Arc<MemoryMailbox>, MemoryIndex) {
    let mbox = Arc::new(MemoryMailbox::new(1, "bench"));
    let mut docs = Vec::with_capacity(count as usize);
    for id in 1..=count {
        let i = id as usize;
        let text: Vec<&str> = (0..8).map(|j| WORDS[(i * 7 + j * 13) % WORDS.len()]).collect();
        mbox.add_item(MailItem {
            folder_id: if id % 10 == 0 { ID_FOLDER_TRASH } else { ID_FOLDER_INBOX },
            date: id as i64,
            subject: text[..3].join(" "),
            tags: vec![WORDS[i % WORDS.len()].to_string()],
            ..MailItem::message(id)
        });
        docs.push(
            IndexDocument::new(id, ItemType::Message, None)
                .with_text(FIELD_CONTENT, &text.join(" "))
                .with_field(FIELD_SORT_DATE, id.to_string()),
        );
        // Every third message also matches through an attachment.
        if id % 3 == 0 {
            docs.push(
                IndexDocument::new(id, ItemType::Message, Some("2"))
                    .with_text(FIELD_CONTENT, WORDS[i % WORDS.len()])
                    .with_field(FIELD_SORT_DATE, id.to_string()),
            );
        }
    }
    (mbox, MemoryIndex::with_documents(docs))
}

/// A wide plan mixing index terms, store leaves and remote branches.
fn generate_plan(width: usize) -> QueryOperation {
    let branches = (0..width)
        .map(|i| {
            let word = WORDS[i % WORDS.len()];
            match i % 4 {
                0 => QueryOperation::term(FIELD_CONTENT, word),
                1 => QueryOperation::Db(DbOp::tagged(word)),
                2 => QueryOperation::intersection(vec![
                    QueryOperation::term(FIELD_CONTENT, word),
                    QueryOperation::Db(DbOp::tagged(word)),
                    QueryOperation::no_term(),
                ]),
                _ => QueryOperation::Db(
                    DbOp::tagged(word).with_target(QueryTarget::remote(format!("acct{}", i % 3))),
                ),
            }
        })
        .collect();
    QueryOperation::intersection(vec![
        QueryOperation::union(branches),
        QueryOperation::union(vec![
            QueryOperation::Db(DbOp::in_folders([ID_FOLDER_INBOX])),
            QueryOperation::no_results(),
        ]),
    ])
}

/// Benchmark plan rewriting.
fn bench_optimizer(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimizer");
    let mbox = MemoryMailbox::new(1, "bench");

    for width in [8, 64] {
        let plan = generate_plan(width);
        group.throughput(Throughput::Elements(width as u64));
        group.bench_function(format!("optimize_width_{width}"), |b| {
            b.iter_with_setup(|| plan.clone(), |plan| black_box(plan.optimize(&mbox)))
        });
    }

    let search = MailboxSearch::new(Arc::new(MemoryMailbox::new(1, "bench")));
    let plan = generate_plan(32);
    group.bench_function("plan_lifecycle", |b| {
        b.iter_with_setup(|| plan.clone(), |plan| black_box(search.plan(plan)))
    });

    group.finish();
}

/// Benchmark complete searches.
fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");
    group.sample_size(20);

    let (mbox, index) = generate_mailbox(5000);
    let index = Arc::new(index);

    for (name, grouping) in [("grouped", Grouping::Grouped), ("ungrouped", Grouping::Ungrouped)] {
        let search = MailboxSearch::new(mbox.clone())
            .with_index(index.clone())
            .with_grouping(grouping);
        group.throughput(Throughput::Elements(100));
        group.bench_function(format!("common_term_{name}"), |b| {
            b.iter(|| {
                let mut results = search
                    .run(QueryOperation::term(FIELD_CONTENT, black_box("invoice")))
                    .unwrap();
                let page = results.page().unwrap();
                results.close().unwrap();
                black_box(page)
            })
        });
    }

    let search = MailboxSearch::new(mbox.clone())
        .with_index(index.clone())
        .with_default_preload();
    group.bench_function("tagged_term_preloaded", |b| {
        b.iter(|| {
            let plan = QueryOperation::intersection(vec![
                QueryOperation::term(FIELD_CONTENT, black_box("budget")),
                QueryOperation::Db(DbOp::tagged("urgent")),
            ]);
            let mut results = search.run(plan).unwrap();
            let page = results.page().unwrap();
            results.close().unwrap();
            black_box(page)
        })
    });

    let search = MailboxSearch::new(mbox).with_params(SearchParams {
        offset: 2000,
        limit: 50,
        ..Default::default()
    });
    group.bench_function("store_deep_page", |b| {
        b.iter(|| {
            let mut results = search
                .run(QueryOperation::Db(DbOp::in_folders([ID_FOLDER_INBOX])))
                .unwrap();
            black_box(results.page().unwrap())
        })
    });

    group.finish();
}

/// Benchmark folding part hits into messages.
fn bench_grouping(c: &mut Criterion) {
    let mut group = c.benchmark_group("grouping");

    let mbox: MailboxHandle = generate_mailbox(1000).0;
    let arena = HitArena::shared();
    let raw: Vec<HitId> = {
        let mut arena = arena.lock();
        let mut raw = Vec::new();
        for id in (1..=1000).rev() {
            let sort = SortValue::Int(id as i64);
            raw.push(arena.part_hit(&mbox, id, "1", sort.clone()));
            raw.push(arena.message_hit(&mbox, id, sort.clone()));
            raw.push(arena.part_hit(&mbox, id, "2", sort));
        }
        raw
    };

    group.throughput(Throughput::Elements(raw.len() as u64));
    group.bench_function("group_parts_into_messages", |b| {
        b.iter(|| {
            let mut grouped = BufferedResults::new(MessageGrouper::new(
                Box::new(HitList::new(raw.clone())),
                arena.clone(),
                SortBy::DateDesc,
            ));
            let mut n = 0;
            while grouped.get_next().unwrap().is_some() {
                n += 1;
            }
            black_box(n)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_optimizer, bench_search, bench_grouping);
criterion_main!(benches);
