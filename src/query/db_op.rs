//! Store leaf, optionally joined with an index query.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;

use crate::error::{Result, SearchError};
use crate::hit::HitId;
use crate::index::{IndexSearcher, TermsFilter};
use crate::mailbox::{DbRow, DbSearch, FolderId, FolderKind, ItemId, MailboxStore};
use crate::query::constraints::{DbConstraints, DbLeaf};
use crate::query::context::{ContextSlot, QueryContext};
use crate::query::index_op::{search_matches, searcher_of, IndexCursor, IndexMatch, IndexOp};
use crate::query::{Combined, QueryOperation};
use crate::results::{HitBuffer, QueryInfo};
use crate::sort::SortBy;
use crate::target::QueryTarget;

/// Folder-scope shortcut resolved by `expand_local_remote_part`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FolderScope {
    #[default]
    Any,
    /// Only folders of the issuing mailbox (`is:local`).
    LocalOnly,
    /// Only folders mounted from other accounts (`is:remote`).
    RemoteOnly,
}

/// Evaluation order of a store/index join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStrategy {
    /// Page through the index, then keep hits passing the store predicate.
    IndexFirst,
    /// Page through the store, then ask the index about those ids only.
    DbFirst,
}

/// A query answered by the item store, optionally joined with an index
/// query that every hit must also match.
#[derive(Debug, Clone)]
pub struct DbOp {
    constraints: DbConstraints,
    target: QueryTarget,
    scope: FolderScope,
    index: Option<IndexOp>,
    ctx: ContextSlot,
    buffer: HitBuffer,
    /// First row of the current pass, from the top.
    start: usize,
    /// Store rows consumed in this pass.
    rows_fetched: usize,
    /// Hits handed out in this pass.
    returned: usize,
    strategy: Option<JoinStrategy>,
    index_cursor: IndexCursor,
    info: Vec<QueryInfo>,
}

impl Default for DbOp {
    fn default() -> Self {
        DbOp::new(DbConstraints::default())
    }
}

impl DbOp {
    pub fn new(constraints: DbConstraints) -> Self {
        DbOp {
            constraints,
            target: QueryTarget::Unspecified,
            scope: FolderScope::Any,
            index: None,
            ctx: ContextSlot::default(),
            buffer: HitBuffer::new(),
            start: 0,
            rows_fetched: 0,
            returned: 0,
            strategy: None,
            index_cursor: IndexCursor::default(),
            info: Vec::new(),
        }
    }

    /// Items in one of `folders`. Choosing folders explicitly decides the
    /// Spam/Trash scope.
    pub fn in_folders<I: IntoIterator<Item = FolderId>>(folders: I) -> Self {
        let leaf = DbLeaf {
            folders: folders.into_iter().collect(),
            spam_trash_set: true,
            ..Default::default()
        };
        DbOp::new(DbConstraints::Leaf(leaf))
    }

    /// Items carrying `tag`.
    pub fn tagged<S: Into<String>>(tag: S) -> Self {
        let mut leaf = DbLeaf::default();
        leaf.tags.insert(tag.into());
        DbOp::new(DbConstraints::Leaf(leaf))
    }

    /// Items in a folder of another account's mailbox.
    pub fn remote_folder<S: Into<String>>(account_id: S, folder: FolderId) -> Self {
        DbOp::in_folders([folder]).with_target(QueryTarget::remote(account_id))
    }

    /// Every item of the issuing mailbox, or every mounted folder.
    pub fn scoped(scope: FolderScope) -> Self {
        DbOp {
            scope,
            ..DbOp::default()
        }
    }

    pub fn with_target(mut self, target: QueryTarget) -> Self {
        self.target = target;
        self
    }

    pub fn with_index(mut self, index: IndexOp) -> Self {
        self.index = Some(index);
        self
    }

    pub fn constraints(&self) -> &DbConstraints {
        &self.constraints
    }

    pub fn target(&self) -> &QueryTarget {
        &self.target
    }

    pub fn index_op(&self) -> Option<&IndexOp> {
        self.index.as_ref()
    }

    /// The join order chosen on first fetch, if any.
    pub fn strategy(&self) -> Option<JoinStrategy> {
        self.strategy
    }

    pub(crate) fn has_no_results(&self) -> bool {
        self.constraints.has_no_results()
    }

    pub(crate) fn has_all_results(&self) -> bool {
        self.index.is_none() && self.scope == FolderScope::Any && self.constraints.is_unrestricted()
    }

    pub(crate) fn has_spam_trash_setting(&self) -> bool {
        self.target.is_external() || self.constraints.has_spam_trash_setting()
    }

    pub(crate) fn force_has_spam_trash_setting(&mut self) {
        self.constraints.force_has_spam_trash_setting();
    }

    pub(crate) fn ensure_spam_trash_setting(
        &mut self,
        mailbox: &dyn MailboxStore,
        include_trash: bool,
        include_spam: bool,
    ) {
        if self.target.is_external() {
            return;
        }
        let mut exclude = Vec::new();
        if !include_trash {
            exclude.extend(mailbox.trash_folder_ids());
        }
        if !include_spam {
            exclude.push(mailbox.spam_folder_id());
        }
        self.constraints.ensure_spam_trash_setting(&exclude);
    }

    pub(crate) fn supports_relevance_sort(&self) -> bool {
        self.index.is_some()
    }

    pub(crate) fn to_query_string(&self) -> String {
        let db = (!self.constraints.is_unrestricted()).then(|| self.constraints.to_query_string());
        match (db, &self.index) {
            (Some(db), Some(index)) => format!("({db}) AND ({})", index.query_string()),
            (Some(db), None) => db,
            (None, Some(index)) => index.query_string().to_string(),
            (None, None) => "is:anywhere".to_string(),
        }
    }

    /// Mark folders that do not exist in the mailbox as matching nothing.
    pub(crate) fn optimize(mut self, mailbox: &dyn MailboxStore) -> QueryOperation {
        if !self.target.is_external() {
            if let DbConstraints::Leaf(leaf) = &mut self.constraints {
                if !leaf.folders.is_empty()
                    && leaf.folders.iter().all(|f| mailbox.folder(*f).is_none())
                {
                    log::debug!("No folder of {:?} exists; store leaf matches nothing", leaf.folders);
                    leaf.no_results = true;
                }
            }
        }
        QueryOperation::Db(self)
    }

    /// Resolve folder-scope shortcuts and mountpoints into explicit local
    /// and remote store leaves.
    pub(crate) fn expand_local_remote_part(
        mut self,
        mailbox: &dyn MailboxStore,
    ) -> Result<QueryOperation> {
        let mountpoints: Vec<(FolderId, String, FolderId)> = mailbox
            .folders()
            .into_iter()
            .filter_map(|f| match f.kind {
                FolderKind::Mountpoint {
                    owner_account,
                    remote_folder_id,
                } => Some((f.id, owner_account, remote_folder_id)),
                _ => None,
            })
            .collect();
        for (id, owner, _) in &mountpoints {
            if owner.is_empty() {
                return Err(SearchError::invalid_target(format!(
                    "mountpoint {id} has no owner account"
                )));
            }
        }

        match self.scope {
            FolderScope::LocalOnly => {
                self.scope = FolderScope::Any;
                let leaf = self.constraints.top_leaf_mut();
                leaf.exclude_folders
                    .extend(mountpoints.iter().map(|(id, _, _)| *id));
                if !self.target.is_explicit() {
                    self.target = QueryTarget::Local;
                }
                Ok(QueryOperation::Db(self))
            }
            FolderScope::RemoteOnly => {
                self.scope = FolderScope::Any;
                let branches: Vec<QueryOperation> = mountpoints
                    .into_iter()
                    .map(|(_, owner, remote_id)| {
                        QueryOperation::Db(self.remote_branch(owner, [remote_id].into()))
                    })
                    .collect();
                Ok(QueryOperation::union_of(branches))
            }
            FolderScope::Any => {
                if self.target.is_external() {
                    return Ok(QueryOperation::Db(self));
                }
                let DbConstraints::Leaf(leaf) = &self.constraints else {
                    return Ok(QueryOperation::Db(self));
                };
                let mounted: Vec<&(FolderId, String, FolderId)> = mountpoints
                    .iter()
                    .filter(|(id, _, _)| leaf.folders.contains(id))
                    .collect();
                if mounted.is_empty() {
                    return Ok(QueryOperation::Db(self));
                }

                let mut branches = Vec::new();
                for (id, owner, remote_id) in mounted {
                    log::debug!("Folder {id} is mounted from {owner}:{remote_id}");
                    branches.push(QueryOperation::Db(
                        self.remote_branch(owner.clone(), [*remote_id].into()),
                    ));
                }
                let local: BTreeSet<FolderId> = leaf
                    .folders
                    .iter()
                    .copied()
                    .filter(|f| !mountpoints.iter().any(|(id, _, _)| id == f))
                    .collect();
                if !local.is_empty() {
                    let mut local_op = self.clone();
                    local_op.target = QueryTarget::Local;
                    local_op.constraints.top_leaf_mut().folders = local;
                    branches.insert(0, QueryOperation::Db(local_op));
                }
                Ok(QueryOperation::union_of(branches))
            }
        }
    }

    fn remote_branch(&self, owner: String, folders: BTreeSet<FolderId>) -> DbOp {
        let mut branch = self.clone();
        branch.scope = FolderScope::Any;
        branch.target = QueryTarget::Remote(owner);
        let leaf = branch.constraints.top_leaf_mut();
        leaf.folders = folders;
        leaf.spam_trash_set = true;
        branch
    }

    pub(crate) fn combine(mut self, other: QueryOperation, union: bool) -> Combined {
        if union {
            if other.has_no_results() {
                return Combined::Merged(QueryOperation::Db(self));
            }
            let other = match other {
                QueryOperation::Db(other) => other,
                other => return Combined::Unmerged(QueryOperation::Db(self), other),
            };
            if self.target != other.target || self.scope != other.scope {
                return Combined::Unmerged(QueryOperation::Db(self), QueryOperation::Db(other));
            }
            if self.has_all_results() {
                return Combined::Merged(QueryOperation::Db(self));
            }
            if other.has_all_results() {
                return Combined::Merged(QueryOperation::Db(other));
            }
            if self.index.is_some() || other.index.is_some() {
                return Combined::Unmerged(QueryOperation::Db(self), QueryOperation::Db(other));
            }
            self.constraints = self.constraints.or(other.constraints);
            return Combined::Merged(QueryOperation::Db(self));
        }

        match other {
            other if other.has_no_results() => Combined::Merged(QueryOperation::no_results()),
            QueryOperation::Index(index) => {
                self.index = Some(match self.index.take() {
                    Some(existing) => existing.combine_with(index, false),
                    None => index,
                });
                Combined::Merged(QueryOperation::Db(self))
            }
            QueryOperation::Db(mut other) => {
                if self.scope != other.scope {
                    return Combined::Unmerged(QueryOperation::Db(self), QueryOperation::Db(other));
                }
                if self.has_all_results() {
                    if self.constraints.has_spam_trash_setting() {
                        other.force_has_spam_trash_setting();
                    }
                    return Combined::Merged(QueryOperation::Db(other));
                }
                if other.has_all_results() {
                    if other.constraints.has_spam_trash_setting() {
                        self.force_has_spam_trash_setting();
                    }
                    return Combined::Merged(QueryOperation::Db(self));
                }
                if self.target.is_explicit()
                    && other.target.is_explicit()
                    && self.target != other.target
                {
                    return Combined::Merged(QueryOperation::no_results());
                }
                if !self.target.is_explicit() {
                    self.target = other.target;
                }
                self.index = match (self.index.take(), other.index) {
                    (Some(a), Some(b)) => Some(a.combine_with(b, false)),
                    (a, b) => a.or(b),
                };
                self.constraints = self.constraints.and(other.constraints);
                Combined::Merged(QueryOperation::Db(self))
            }
            other => Combined::Unmerged(QueryOperation::Db(self), other),
        }
    }

    pub(crate) fn begin(&mut self, ctx: Arc<QueryContext>) {
        self.ctx.bind(ctx);
    }

    pub(crate) fn is_begun(&self) -> bool {
        self.ctx.is_bound()
    }

    pub(crate) fn buffer(&mut self) -> &mut HitBuffer {
        &mut self.buffer
    }

    pub(crate) fn fill(&mut self) -> Result<bool> {
        while self.buffer.needs_fill() {
            self.buffer.mark_started();
            let more = match self.index.is_some() {
                false => self.fetch_rows()?,
                true => self.fetch_joined()?,
            };
            if !more {
                self.buffer.mark_exhausted();
            }
        }
        Ok(!self.buffer.is_empty())
    }

    pub(crate) fn note_returned(&mut self) {
        self.returned += 1;
    }

    fn check_local(&self) -> Result<()> {
        if self.target.is_external() {
            return Err(SearchError::invalid_target(format!(
                "store query for {} cannot run in the local mailbox",
                self.target
            )));
        }
        Ok(())
    }

    fn search_rows(&self, ctx: &QueryContext, constraints: &DbConstraints, offset: usize, limit: usize) -> Result<Vec<DbRow>> {
        let params = ctx.params();
        ctx.mailbox().search(&DbSearch {
            constraints,
            sort: params.sort,
            types: &params.types,
            offset,
            limit,
            in_dumpster: params.in_dumpster,
        })
    }

    fn fetch_rows(&mut self) -> Result<bool> {
        self.check_local()?;
        let ctx = self.ctx.get();
        let config = ctx.config();
        let chunk = config.chunk_size.min(config.max_db_hits_per_chunk);
        let rows = self.search_rows(&ctx, &self.constraints, self.start + self.rows_fetched, chunk)?;
        log::trace!(
            "[{}] Store chunk at {}: {} rows",
            ctx.id(),
            self.start + self.rows_fetched,
            rows.len()
        );
        self.rows_fetched += rows.len();

        let full = rows.len() == chunk;
        let mut arena = ctx.arena().lock();
        for row in rows {
            let hit = arena.item_hit(ctx.mailbox(), row.item_type, row.id, row.sort_value);
            self.buffer.push(hit);
        }
        Ok(full)
    }

    fn fetch_joined(&mut self) -> Result<bool> {
        self.check_local()?;
        let ctx = self.ctx.get();
        let searcher = searcher_of(&ctx)?;
        let strategy = match self.strategy {
            Some(s) => s,
            None => {
                let s = self.choose_strategy(&ctx, searcher.as_ref())?;
                log::debug!("[{}] Join strategy {:?} for {}", ctx.id(), s, self);
                self.strategy = Some(s);
                s
            }
        };
        match strategy {
            JoinStrategy::IndexFirst => self.fetch_index_first(&ctx, searcher.as_ref()),
            JoinStrategy::DbFirst => self.fetch_db_first(&ctx, searcher.as_ref()),
        }
    }

    fn choose_strategy(&self, ctx: &QueryContext, searcher: &dyn IndexSearcher) -> Result<JoinStrategy> {
        if ctx.sort() == SortBy::RelevanceDesc {
            return Ok(JoinStrategy::IndexFirst);
        }
        let Some(index) = &self.index else {
            return Ok(JoinStrategy::DbFirst);
        };
        let config = ctx.config();

        if let Some((field, term)) = index.query().single_term() {
            let num_docs = searcher.reader().num_docs()?;
            let freq = searcher.doc_freq(field, term)?;
            if freq as f64 > num_docs as f64 * config.db_first_cutoff() as f64 {
                return Ok(JoinStrategy::DbFirst);
            }
        }

        let probe = searcher.search(index.query(), 1, None, None)?;
        if probe.total_hits > config.db_first_index_hit_threshold {
            let db_hits = ctx
                .mailbox()
                .count(&self.constraints, ctx.params().in_dumpster)?;
            if db_hits < probe.total_hits {
                return Ok(JoinStrategy::DbFirst);
            }
        }
        Ok(JoinStrategy::IndexFirst)
    }

    fn fetch_index_first(&mut self, ctx: &QueryContext, searcher: &dyn IndexSearcher) -> Result<bool> {
        let Some(index) = &self.index else {
            return Ok(false);
        };
        let matches =
            self.index_cursor
                .next_chunk(searcher, index.query(), ctx.sort(), ctx.config())?;
        if matches.is_empty() {
            return Ok(false);
        }

        let ids: BTreeSet<ItemId> = matches.iter().map(|m| m.item_id).collect();
        let restricted = self.constraints.clone().and(DbConstraints::Leaf(DbLeaf {
            item_ids: ids.clone(),
            ..Default::default()
        }));
        let rows = self.search_rows(ctx, &restricted, 0, ids.len())?;
        let rows: AHashMap<ItemId, DbRow> = rows.into_iter().map(|r| (r.id, r)).collect();

        let relevance = ctx.sort() == SortBy::RelevanceDesc;
        let mut arena = ctx.arena().lock();
        for m in matches {
            let Some(row) = rows.get(&m.item_id) else {
                continue;
            };
            let sort_value = if relevance {
                m.sort_value.clone()
            } else {
                row.sort_value.clone()
            };
            self.buffer.push(m.into_hit(&mut arena, ctx.mailbox(), sort_value));
        }
        Ok(!self.index_cursor.is_done())
    }

    fn fetch_db_first(&mut self, ctx: &QueryContext, searcher: &dyn IndexSearcher) -> Result<bool> {
        let Some(index) = &self.index else {
            return Ok(false);
        };
        let config = ctx.config();
        let chunk = config.max_db_hits_per_chunk;
        let rows = self.search_rows(ctx, &self.constraints, self.rows_fetched, chunk)?;
        self.rows_fetched += rows.len();
        if rows.is_empty() {
            return Ok(false);
        }
        let full = rows.len() == chunk;

        let filter = TermsFilter::for_item_ids(rows.iter().map(|r| r.id));
        let (matches, _) = search_matches(
            searcher,
            index.query(),
            config.max_topdocs_chunk,
            Some(&filter),
            SortBy::None,
        )?;
        let mut by_item: AHashMap<ItemId, Vec<IndexMatch>> = AHashMap::new();
        for m in matches {
            by_item.entry(m.item_id).or_default().push(m);
        }

        let mut arena = ctx.arena().lock();
        for row in rows {
            for m in by_item.remove(&row.id).unwrap_or_default() {
                let hit: HitId = m.into_hit(&mut arena, ctx.mailbox(), row.sort_value.clone());
                self.buffer.push(hit);
            }
        }
        Ok(full)
    }

    pub(crate) fn reset(&mut self) {
        self.buffer.reset();
        self.start = 0;
        self.rows_fetched = 0;
        self.returned = 0;
        self.index_cursor.reset();
    }

    /// Restart the pass at row `n`; only plain store queries page natively.
    pub(crate) fn seek(&mut self, n: usize) -> bool {
        if self.index.is_some() {
            return false;
        }
        self.buffer.reset();
        self.start = n;
        self.rows_fetched = 0;
        self.returned = 0;
        true
    }

    pub(crate) fn close(&mut self) {
        self.buffer.reset();
        self.index_cursor.reset();
    }

    pub(crate) fn cursor_offset(&self) -> i64 {
        if self.index.is_some() {
            -1
        } else {
            (self.start + self.returned) as i64
        }
    }

    pub(crate) fn result_info(&self) -> Vec<QueryInfo> {
        self.info.clone()
    }
}

impl fmt::Display for DbOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DB")?;
        if self.target.is_explicit() {
            write!(f, "({})", self.target)?;
        }
        match self.scope {
            FolderScope::Any => {}
            FolderScope::LocalOnly => write!(f, "<is:local>")?,
            FolderScope::RemoteOnly => write!(f, "<is:remote>")?,
        }
        write!(f, "[{}]", self.constraints)?;
        if let Some(index) = &self.index {
            write!(f, "+LUCENE({})", index.query_string())?;
        }
        Ok(())
    }
}
