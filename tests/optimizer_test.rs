//! Plan rewriting: identities, remote routing and folder expansion.

use std::sync::Arc;

use mailquery::index::FIELD_CONTENT;
use mailquery::mailbox::{Folder, FolderKind, ID_FOLDER_INBOX};
use mailquery::prelude::*;
use mailquery::query::{DbOp, FolderScope, HitFilter};

fn mailbox() -> MemoryMailbox {
    MemoryMailbox::new(1, "alice")
}

fn mounted_mailbox(owner: &str) -> MemoryMailbox {
    let mbox = mailbox();
    mbox.add_folder(Folder::new(
        20,
        "Shared",
        FolderKind::Mountpoint {
            owner_account: owner.to_string(),
            remote_folder_id: 7,
        },
    ));
    mbox
}

fn tag(t: &str) -> QueryOperation {
    QueryOperation::Db(DbOp::tagged(t))
}

fn remote_tag(account: &str, t: &str) -> QueryOperation {
    QueryOperation::Db(DbOp::tagged(t).with_target(QueryTarget::remote(account)))
}

fn term(value: &str) -> QueryOperation {
    QueryOperation::term(FIELD_CONTENT, value)
}

fn remotes(op: &QueryOperation) -> Vec<&QueryOperation> {
    match op {
        QueryOperation::Remote(_) => vec![op],
        QueryOperation::Union(union) => union
            .children()
            .iter()
            .filter(|c| matches!(c, QueryOperation::Remote(_)))
            .collect(),
        _ => Vec::new(),
    }
}

#[test]
fn test_no_term_is_and_identity_next_to_index() {
    let mbox = mailbox();
    let plans = vec![
        term("x"),
        QueryOperation::intersection(vec![term("x"), tag("a")]),
        QueryOperation::union(vec![term("a"), term("b")]),
    ];
    for plan in plans {
        let alone = plan.clone().optimize(&mbox).to_string();
        let with_no_term =
            QueryOperation::intersection(vec![plan, QueryOperation::no_term()]).optimize(&mbox);
        assert_eq!(with_no_term.to_string(), alone);
    }
}

#[test]
fn test_no_term_without_index_stays_no_term() {
    let mbox = mailbox();
    let op = QueryOperation::intersection(vec![tag("a"), tag("b"), QueryOperation::no_term()]);
    assert!(matches!(op.optimize(&mbox), QueryOperation::NoTerm(_)));
}

#[test]
fn test_no_results_absorbs_conjunctions() {
    let mbox = mailbox();
    for plan in [term("x"), tag("a"), QueryOperation::union(vec![tag("a"), term("b")])] {
        let op = QueryOperation::intersection(vec![plan, QueryOperation::no_results()]);
        let op = op.optimize(&mbox);
        assert!(matches!(op, QueryOperation::NoResults(_)), "got {op}");
        assert!(op.has_no_results());
    }
}

#[test]
fn test_no_results_is_or_identity() {
    let mbox = mailbox();
    for plan in [term("x"), tag("a"), QueryOperation::intersection(vec![term("x"), tag("a")])] {
        let alone = plan.clone().optimize(&mbox).to_string();
        let op = QueryOperation::union(vec![QueryOperation::no_results(), plan]).optimize(&mbox);
        assert_eq!(op.to_string(), alone);
    }

    let op = QueryOperation::union(vec![QueryOperation::no_results(), QueryOperation::no_results()]);
    assert!(matches!(op.optimize(&mbox), QueryOperation::NoResults(_)));
}

#[test]
fn test_no_term_under_or() {
    let mbox = mailbox();
    let op = QueryOperation::union(vec![tag("a"), QueryOperation::no_term()]).optimize(&mbox);
    assert_eq!(op.kind_name(), "db");

    let op = QueryOperation::union(vec![QueryOperation::no_term(), QueryOperation::no_term()]);
    assert!(matches!(op.optimize(&mbox), QueryOperation::NoTerm(_)));
}

#[test]
fn test_local_and_remote_branches_are_split() {
    let mbox = mailbox();
    let op = QueryOperation::union(vec![tag("a"), remote_tag("bob", "b")]).optimize(&mbox);

    let QueryOperation::Union(union) = &op else {
        panic!("expected a union, got {op}");
    };
    assert_eq!(union.children().len(), 2);
    assert_eq!(remotes(&op).len(), 1);
    assert!(union.fan_out_accounts().is_empty());
    assert!(op.query_targets().contains(&QueryTarget::remote("bob")));
}

#[test]
fn test_same_account_branches_share_one_remote() {
    let mbox = mailbox();
    let op = QueryOperation::union(vec![
        remote_tag("bob", "a"),
        tag("c"),
        remote_tag("bob", "b"),
    ])
    .optimize(&mbox);

    let found = remotes(&op);
    assert_eq!(found.len(), 1);
    let QueryOperation::Remote(remote) = found[0] else {
        unreachable!();
    };
    assert_eq!(remote.account_id(), "bob");
    // Both store leaves of bob fold into one.
    assert_eq!(remote.operations().len(), 1);
}

#[test]
fn test_conjunction_and_leaf_for_one_account() {
    let mbox = mailbox();
    let op = QueryOperation::union(vec![
        QueryOperation::intersection(vec![term("x"), remote_tag("bob", "a")]),
        remote_tag("bob", "b"),
    ])
    .optimize(&mbox);

    let QueryOperation::Remote(remote) = &op else {
        panic!("expected a remote operation, got {op}");
    };
    assert_eq!(remote.target(), &QueryTarget::remote("bob"));
    assert_eq!(remote.operations().len(), 2);
    assert_eq!(
        op.to_query_string(),
        "((tag:\"a\") AND (x)) OR (tag:\"b\")"
    );
}

#[test]
fn test_conjunction_over_mixed_union_is_distributed() {
    let mbox = mailbox();
    let op = QueryOperation::intersection(vec![
        term("x"),
        QueryOperation::union(vec![tag("a"), remote_tag("bob", "b")]),
    ])
    .optimize(&mbox);

    let QueryOperation::Union(union) = &op else {
        panic!("expected a union, got {op}");
    };
    let kinds: Vec<&str> = union.children().iter().map(|c| c.kind_name()).collect();
    assert_eq!(kinds, vec!["db", "remote"]);
    assert!(union.fan_out_accounts().is_empty());
    assert_eq!(union.children()[0].query_targets(), QueryTargetSet::single(QueryTarget::Unspecified));
}

#[test]
fn test_planned_mixed_conjunction_keeps_local_branch_local() -> Result<()> {
    let search = MailboxSearch::new(Arc::new(mailbox()));
    let plan = search.plan(QueryOperation::intersection(vec![
        term("x"),
        QueryOperation::union(vec![tag("a"), remote_tag("bob", "b")]),
    ]))?;

    let QueryOperation::Union(union) = &plan else {
        panic!("expected a union, got {plan}");
    };
    let [local, remote] = union.children() else {
        panic!("expected two branches, got {plan}");
    };
    assert_eq!(local.kind_name(), "db");
    assert!(local.to_query_string().contains("-inid:3"));
    assert!(local.to_query_string().contains("tag:\"a\""));

    let QueryOperation::Remote(account) = remote else {
        panic!("expected a remote branch, got {remote}");
    };
    assert_eq!(account.account_id(), "bob");
    let sent = remote.to_query_string();
    assert!(sent.contains("tag:\"b\""));
    assert!(!sent.contains("tag:\"a\""));
    assert!(!sent.contains("inid"));
    Ok(())
}

#[test]
fn test_filtered_mixed_union_is_not_sent_away() {
    let mbox = mailbox();
    let op = QueryOperation::union(vec![QueryOperation::filter(
        QueryOperation::union(vec![tag("a"), remote_tag("bob", "b")]),
        HitFilter::ExcludeDeleted,
    )])
    .optimize(&mbox);
    assert_eq!(op.kind_name(), "filter");
}

#[test]
fn test_two_accounts_fan_out() {
    let mbox = mailbox();
    let op = QueryOperation::union(vec![remote_tag("carol", "a"), remote_tag("bob", "b")])
        .optimize(&mbox);

    let QueryOperation::Union(union) = &op else {
        panic!("expected a union, got {op}");
    };
    assert_eq!(remotes(&op).len(), 2);
    assert_eq!(union.fan_out_accounts(), ["bob".to_string(), "carol".to_string()]);
}

#[test]
fn test_optimize_is_idempotent() {
    let mbox = mounted_mailbox("bob");
    let plans = vec![
        QueryOperation::intersection(vec![term("x"), tag("a"), QueryOperation::no_term()]),
        QueryOperation::union(vec![tag("a"), remote_tag("bob", "b"), remote_tag("carol", "c")]),
        QueryOperation::intersection(vec![
            term("x"),
            QueryOperation::union(vec![remote_tag("bob", "a"), remote_tag("carol", "b")]),
        ]),
        QueryOperation::filter(
            QueryOperation::union(vec![term("a"), QueryOperation::no_results()]),
            HitFilter::exclude_types([ItemType::Contact]),
        ),
        QueryOperation::Db(DbOp::in_folders([ID_FOLDER_INBOX, 20])),
    ];
    for plan in plans {
        let once = plan.optimize(&mbox);
        let twice = once.clone().optimize(&mbox);
        assert_eq!(twice.to_string(), once.to_string());
    }
}

#[test]
fn test_filter_is_never_removed() {
    let mbox = mailbox();
    let op = QueryOperation::filter(
        QueryOperation::intersection(vec![term("x"), QueryOperation::no_term()]),
        HitFilter::ExcludeDeleted,
    )
    .optimize(&mbox);

    let QueryOperation::Filter(filter) = &op else {
        panic!("expected a filter, got {op}");
    };
    assert_eq!(filter.filter(), &HitFilter::ExcludeDeleted);
    assert_eq!(filter.child().to_string(), "LUCENE(x)");
}

#[test]
fn test_mounted_folder_becomes_remote_branch() -> Result<()> {
    let mbox = mounted_mailbox("bob");
    let op = QueryOperation::Db(DbOp::in_folders([ID_FOLDER_INBOX, 20]))
        .expand_local_remote_part(&mbox)?
        .optimize(&mbox);

    let QueryOperation::Union(union) = &op else {
        panic!("expected a union, got {op}");
    };
    let kinds: Vec<&str> = union.children().iter().map(|c| c.kind_name()).collect();
    assert_eq!(kinds, vec!["db", "remote"]);
    assert_eq!(union.children()[0].to_query_string(), "inid:2");
    assert_eq!(union.children()[1].to_query_string(), "inid:7");

    let targets = op.query_targets();
    assert!(targets.contains(&QueryTarget::Local));
    assert!(targets.contains(&QueryTarget::remote("bob")));
    Ok(())
}

#[test]
fn test_local_scope_excludes_mountpoints() -> Result<()> {
    let mbox = mounted_mailbox("bob");
    let op = QueryOperation::Db(DbOp::scoped(FolderScope::LocalOnly)).expand_local_remote_part(&mbox)?;

    assert_eq!(op.to_query_string(), "-inid:20");
    assert!(op.query_targets().contains(&QueryTarget::Local));
    Ok(())
}

#[test]
fn test_remote_scope_without_mountpoints_matches_nothing() -> Result<()> {
    let mbox = mailbox();
    let op = QueryOperation::Db(DbOp::scoped(FolderScope::RemoteOnly)).expand_local_remote_part(&mbox)?;
    assert!(matches!(op, QueryOperation::NoResults(_)));
    Ok(())
}

#[test]
fn test_mountpoint_without_owner_is_rejected() {
    let mbox = mounted_mailbox("");
    let err = QueryOperation::Db(DbOp::in_folders([20]))
        .expand_local_remote_part(&mbox)
        .unwrap_err();
    assert!(matches!(err, SearchError::InvalidTarget(_)));
}

#[test]
fn test_planned_remote_leaf_is_hoisted() -> Result<()> {
    let search = MailboxSearch::new(Arc::new(mailbox()));
    let plan = search.plan(remote_tag("bob", "a"))?;

    let QueryOperation::Remote(remote) = &plan else {
        panic!("expected a remote operation, got {plan}");
    };
    assert_eq!(remote.account_id(), "bob");
    assert_eq!(plan.to_query_string(), "tag:\"a\"");
    Ok(())
}

#[test]
fn test_planned_term_excludes_spam_and_trash() -> Result<()> {
    let search = MailboxSearch::new(Arc::new(mailbox()));
    let plan = search.plan(term("x"))?;
    assert!(plan.has_spam_trash_setting());
    assert_eq!(plan.to_query_string(), "(-inid:3 AND -inid:4) AND (x)");

    let plan = search.plan(QueryOperation::Db(DbOp::in_folders([3])))?;
    assert_eq!(plan.to_query_string(), "inid:3");
    Ok(())
}
