//! The query operation tree.
//!
//! A plan is a tree of [`QueryOperation`] nodes. The planner builds it, the
//! search lifecycle rewrites it (`expand_local_remote_part`, `optimize`,
//! spam/trash scoping), binds it to a [`QueryContext`] with `begin`, and then
//! pulls hits from it through [`HitStream`].
//!
//! The optimizer works bottom-up. Children are optimized first, constant
//! leaves are absorbed, siblings are merged pairwise with `combine_ops`, and
//! union children bound to a single remote account are hoisted into one
//! [`RemoteOp`] per account.

pub mod combining;
pub mod constraints;
pub mod context;
pub mod db_op;
pub mod filter;
pub mod index_op;
pub mod leaf;
pub mod remote;

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::hit::HitId;
use crate::mailbox::MailboxStore;
use crate::results::{walk_to_hit, HitStream, QueryInfo, UNKNOWN_OFFSET};
use crate::target::{QueryTarget, QueryTargetSet};

pub use self::combining::{IntersectionOp, UnionOp};
pub use self::constraints::{DbConstraints, DbLeaf};
pub use self::context::{QueryContext, SearchParams};
pub use self::db_op::{DbOp, FolderScope, JoinStrategy};
pub use self::filter::{FilterOp, HitFilter};
pub use self::index_op::IndexOp;
pub use self::leaf::{NoResultsOp, NoTermOp};
pub use self::remote::{ProxiedStream, RemoteOp, RemoteProxy, StaticStream};

/// One node of a query plan.
#[derive(Debug, Clone)]
pub enum QueryOperation {
    /// Matches nothing.
    NoResults(NoResultsOp),
    /// A query without a search term.
    NoTerm(NoTermOp),
    /// Answered by the inverted index.
    Index(IndexOp),
    /// Answered by the item store, optionally joined with an index query.
    Db(DbOp),
    Union(UnionOp),
    Intersection(IntersectionOp),
    Filter(FilterOp),
    /// A sub-plan proxied to the server of another account.
    Remote(RemoteOp),
}

/// Outcome of [`QueryOperation::combine_ops`].
#[derive(Debug)]
pub enum Combined {
    /// Both operands were folded into one node.
    Merged(QueryOperation),
    /// No merge possible; both operands are handed back in order.
    Unmerged(QueryOperation, QueryOperation),
}

impl From<IndexOp> for QueryOperation {
    fn from(op: IndexOp) -> Self {
        QueryOperation::Index(op)
    }
}

impl From<DbOp> for QueryOperation {
    fn from(op: DbOp) -> Self {
        QueryOperation::Db(op)
    }
}

impl From<FilterOp> for QueryOperation {
    fn from(op: FilterOp) -> Self {
        QueryOperation::Filter(op)
    }
}

impl From<RemoteOp> for QueryOperation {
    fn from(op: RemoteOp) -> Self {
        QueryOperation::Remote(op)
    }
}

impl QueryOperation {
    pub fn no_results() -> Self {
        QueryOperation::NoResults(NoResultsOp::new())
    }

    pub fn no_term() -> Self {
        QueryOperation::NoTerm(NoTermOp::new())
    }

    /// A single-term index query.
    pub fn term(field: &str, value: &str) -> Self {
        QueryOperation::Index(IndexOp::term(field, value))
    }

    /// OR of `children`, unoptimized.
    pub fn union(children: Vec<QueryOperation>) -> Self {
        QueryOperation::Union(UnionOp::new(children))
    }

    /// AND of `children`, unoptimized.
    pub fn intersection(children: Vec<QueryOperation>) -> Self {
        QueryOperation::Intersection(IntersectionOp::new(children))
    }

    pub fn filter(child: QueryOperation, filter: HitFilter) -> Self {
        QueryOperation::Filter(FilterOp::new(child, filter))
    }

    /// OR of `children`, skipping the union node for zero or one child.
    pub(crate) fn union_of(mut children: Vec<QueryOperation>) -> Self {
        match children.len() {
            0 => QueryOperation::no_results(),
            1 => children.remove(0),
            _ => QueryOperation::union(children),
        }
    }

    /// Bind the execution context to this node and all of its children.
    ///
    /// # Panics
    ///
    /// Panics if any node of the tree was already bound.
    pub fn begin(&mut self, ctx: Arc<QueryContext>) {
        log::trace!("[{}] begin {}", ctx.id(), self);
        match self {
            QueryOperation::NoResults(op) => op.begin(ctx),
            QueryOperation::NoTerm(op) => op.begin(ctx),
            QueryOperation::Index(op) => op.begin(ctx),
            QueryOperation::Db(op) => op.begin(ctx),
            QueryOperation::Union(op) => op.begin(ctx),
            QueryOperation::Intersection(op) => op.begin(ctx),
            QueryOperation::Filter(op) => op.begin(ctx),
            QueryOperation::Remote(op) => op.begin(ctx),
        }
    }

    pub fn is_begun(&self) -> bool {
        match self {
            QueryOperation::NoResults(op) => op.is_begun(),
            QueryOperation::NoTerm(op) => op.is_begun(),
            QueryOperation::Index(op) => op.is_begun(),
            QueryOperation::Db(op) => op.is_begun(),
            QueryOperation::Union(op) => op.is_begun(),
            QueryOperation::Intersection(op) => op.is_begun(),
            QueryOperation::Filter(op) => op.is_begun(),
            QueryOperation::Remote(op) => op.is_begun(),
        }
    }

    /// The targets this node and its descendants must run against.
    pub fn query_targets(&self) -> QueryTargetSet {
        match self {
            QueryOperation::NoResults(_) | QueryOperation::NoTerm(_) | QueryOperation::Index(_) => {
                QueryTargetSet::single(QueryTarget::Unspecified)
            }
            QueryOperation::Db(op) => QueryTargetSet::single(op.target().clone()),
            QueryOperation::Union(op) => {
                let mut set = QueryTargetSet::new();
                for child in op.children() {
                    set.union_with(&child.query_targets());
                }
                set
            }
            QueryOperation::Intersection(op) => {
                let mut children = op.children().iter();
                let Some(first) = children.next() else {
                    return QueryTargetSet::single(QueryTarget::Unspecified);
                };
                let mut set = first.query_targets();
                for child in children {
                    set.intersect_with(&child.query_targets());
                }
                set
            }
            QueryOperation::Filter(op) => op.child().query_targets(),
            QueryOperation::Remote(op) => QueryTargetSet::single(op.target().clone()),
        }
    }

    pub fn has_no_results(&self) -> bool {
        match self {
            QueryOperation::NoResults(_) => true,
            QueryOperation::Db(op) => op.has_no_results(),
            QueryOperation::Union(op) => {
                !op.children().is_empty() && op.children().iter().all(|c| c.has_no_results())
            }
            QueryOperation::Intersection(op) => op.children().iter().any(|c| c.has_no_results()),
            QueryOperation::Filter(op) => op.child().has_no_results(),
            _ => false,
        }
    }

    pub fn has_all_results(&self) -> bool {
        match self {
            QueryOperation::NoTerm(_) => true,
            QueryOperation::Db(op) => op.has_all_results(),
            _ => false,
        }
    }

    /// True if some leaf of this subtree is evaluated by an index, so that
    /// an empty term can be dropped next to it.
    pub fn is_index_capable(&self) -> bool {
        match self {
            QueryOperation::Index(_) | QueryOperation::Remote(_) => true,
            QueryOperation::Db(op) => op.index_op().is_some(),
            QueryOperation::Union(op) => op.children().iter().any(|c| c.is_index_capable()),
            QueryOperation::Intersection(op) => {
                op.children().iter().any(|c| c.is_index_capable())
            }
            QueryOperation::Filter(op) => op.child().is_index_capable(),
            QueryOperation::NoResults(_) | QueryOperation::NoTerm(_) => false,
        }
    }

    /// True if the plan can return hits in relevance order.
    pub fn supports_relevance_sort(&self) -> bool {
        match self {
            QueryOperation::NoResults(_) | QueryOperation::NoTerm(_) => true,
            QueryOperation::Index(_) => true,
            QueryOperation::Db(op) => op.supports_relevance_sort(),
            QueryOperation::Union(op) => op.children().iter().all(|c| c.supports_relevance_sort()),
            QueryOperation::Intersection(op) => {
                op.children().iter().all(|c| c.supports_relevance_sort())
            }
            QueryOperation::Filter(op) => op.child().supports_relevance_sort(),
            QueryOperation::Remote(op) => op.supports_relevance_sort(),
        }
    }

    /// Try to fold `other` into this node under OR (`union`) or AND.
    pub fn combine_ops(self, other: QueryOperation, union: bool) -> Combined {
        match self {
            QueryOperation::Db(op) => op.combine(other, union),
            QueryOperation::Index(op) => match other {
                QueryOperation::Index(other) => {
                    Combined::Merged(QueryOperation::Index(op.combine_with(other, union)))
                }
                QueryOperation::Db(other) if !union => {
                    other.combine(QueryOperation::Index(op), false)
                }
                other => Combined::Unmerged(QueryOperation::Index(op), other),
            },
            QueryOperation::Remote(op) if union => op.combine(other),
            op => Combined::Unmerged(op, other),
        }
    }

    /// Rewrite this subtree into a simpler plan with the same matches.
    pub fn optimize(self, mailbox: &dyn MailboxStore) -> QueryOperation {
        match self {
            QueryOperation::Db(op) => op.optimize(mailbox),
            QueryOperation::Union(op) => op.optimize(mailbox),
            QueryOperation::Intersection(op) => op.optimize(mailbox),
            QueryOperation::Filter(op) => op.optimize(mailbox),
            op => op,
        }
    }

    /// Resolve folder-scope shortcuts now that the mailbox is known.
    pub fn expand_local_remote_part(self, mailbox: &dyn MailboxStore) -> Result<QueryOperation> {
        match self {
            QueryOperation::Db(op) => op.expand_local_remote_part(mailbox),
            QueryOperation::Union(op) => op.expand_local_remote_part(mailbox),
            QueryOperation::Intersection(op) => op.expand_local_remote_part(mailbox),
            QueryOperation::Filter(op) => op.expand_local_remote_part(mailbox),
            op => Ok(op),
        }
    }

    /// True if the Spam/Trash scope of this subtree has been decided.
    pub fn has_spam_trash_setting(&self) -> bool {
        match self {
            QueryOperation::NoResults(_) | QueryOperation::NoTerm(_) => true,
            QueryOperation::Remote(_) => true,
            QueryOperation::Index(_) => false,
            QueryOperation::Db(op) => op.has_spam_trash_setting(),
            QueryOperation::Union(op) => op.children().iter().all(|c| c.has_spam_trash_setting()),
            QueryOperation::Intersection(op) => {
                op.children().iter().any(|c| c.has_spam_trash_setting())
            }
            QueryOperation::Filter(op) => op.child().has_spam_trash_setting(),
        }
    }

    /// Record that the Spam/Trash scope is decided without changing it.
    pub fn force_has_spam_trash_setting(&mut self) {
        match self {
            QueryOperation::Db(op) => op.force_has_spam_trash_setting(),
            QueryOperation::Union(op) => {
                for child in op.children_mut() {
                    child.force_has_spam_trash_setting();
                }
            }
            QueryOperation::Intersection(op) => {
                if let Some(first) = op.children_mut().first_mut() {
                    first.force_has_spam_trash_setting();
                }
            }
            QueryOperation::Filter(op) => op.child_mut().force_has_spam_trash_setting(),
            _ => {}
        }
    }

    /// Apply the default Spam/Trash exclusion wherever no scope was chosen.
    ///
    /// Index-only leaves are wrapped in an unrestricted store operation so
    /// that the exclusion has somewhere to live.
    pub fn ensure_spam_trash_setting(
        self,
        mailbox: &dyn MailboxStore,
        include_trash: bool,
        include_spam: bool,
    ) -> QueryOperation {
        if self.has_spam_trash_setting() {
            return self;
        }
        match self {
            QueryOperation::Index(index) => {
                let mut op = DbOp::default().with_index(index);
                op.ensure_spam_trash_setting(mailbox, include_trash, include_spam);
                QueryOperation::Db(op)
            }
            QueryOperation::Db(mut op) => {
                op.ensure_spam_trash_setting(mailbox, include_trash, include_spam);
                QueryOperation::Db(op)
            }
            QueryOperation::Union(op) => {
                op.ensure_spam_trash_setting(mailbox, include_trash, include_spam)
            }
            QueryOperation::Intersection(op) => {
                op.ensure_spam_trash_setting(mailbox, include_trash, include_spam)
            }
            QueryOperation::Filter(op) => {
                op.ensure_spam_trash_setting(mailbox, include_trash, include_spam)
            }
            op => op,
        }
    }

    /// An equivalent textual query, for execution on another server.
    pub fn to_query_string(&self) -> String {
        match self {
            QueryOperation::NoResults(_) => "-is:anywhere".to_string(),
            QueryOperation::NoTerm(_) => String::new(),
            QueryOperation::Index(op) => op.query_string().to_string(),
            QueryOperation::Db(op) => op.to_query_string(),
            QueryOperation::Union(op) => join_query_strings(op.children(), " OR "),
            QueryOperation::Intersection(op) => join_query_strings(op.children(), " AND "),
            QueryOperation::Filter(op) => op.to_query_string(),
            QueryOperation::Remote(op) => op.to_query_string(),
        }
    }

    /// Short lowercase name of the node type, as used in logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            QueryOperation::NoResults(_) => "no-results",
            QueryOperation::NoTerm(_) => "no-term",
            QueryOperation::Index(_) => "index",
            QueryOperation::Db(_) => "db",
            QueryOperation::Union(_) => "union",
            QueryOperation::Intersection(_) => "intersection",
            QueryOperation::Filter(_) => "filter",
            QueryOperation::Remote(_) => "remote",
        }
    }
}

/// Join the non-empty query strings of `children`, parenthesizing each one
/// when there is more than one.
pub(crate) fn join_query_strings(children: &[QueryOperation], joiner: &str) -> String {
    let mut parts: Vec<String> = children
        .iter()
        .map(|c| c.to_query_string())
        .filter(|s| !s.is_empty())
        .collect();
    if parts.len() == 1 {
        return parts.remove(0);
    }
    parts
        .iter()
        .map(|s| format!("({s})"))
        .collect::<Vec<_>>()
        .join(joiner)
}

/// Combine two siblings, trying `b` into `a` and then `a` into `b`.
///
/// An unmerged result keeps the original order.
fn combine_either(a: QueryOperation, b: QueryOperation, union: bool) -> Combined {
    match a.combine_ops(b, union) {
        Combined::Merged(op) => Combined::Merged(op),
        Combined::Unmerged(a, b) => match b.combine_ops(a, union) {
            Combined::Merged(op) => Combined::Merged(op),
            Combined::Unmerged(b, a) => Combined::Unmerged(a, b),
        },
    }
}

/// Merge siblings pairwise in insertion order until no pair combines.
///
/// A merged node takes the position of its left operand.
pub(crate) fn combine_pairs(children: &mut Vec<QueryOperation>, union: bool) {
    let mut i = 0;
    while i < children.len() {
        let mut j = i + 1;
        while j < children.len() {
            let rhs = children.remove(j);
            let lhs = std::mem::replace(&mut children[i], QueryOperation::no_results());
            match combine_either(lhs, rhs, union) {
                Combined::Merged(op) => {
                    log::trace!("Combined {} siblings into {}", if union { "OR" } else { "AND" }, op);
                    children[i] = op;
                    j = i + 1;
                }
                Combined::Unmerged(lhs, rhs) => {
                    children[i] = lhs;
                    children.insert(j, rhs);
                    j += 1;
                }
            }
        }
        i += 1;
    }
}

impl HitStream for QueryOperation {
    fn reset_iterator(&mut self) -> Result<()> {
        match self {
            QueryOperation::NoResults(_) | QueryOperation::NoTerm(_) => Ok(()),
            QueryOperation::Index(op) => {
                op.reset();
                Ok(())
            }
            QueryOperation::Db(op) => {
                op.reset();
                Ok(())
            }
            QueryOperation::Union(op) => op.reset_iterator(),
            QueryOperation::Intersection(op) => op.reset_iterator(),
            QueryOperation::Filter(op) => op.reset_iterator(),
            QueryOperation::Remote(op) => op.reset_iterator(),
        }
    }

    fn get_next(&mut self) -> Result<Option<HitId>> {
        match self {
            QueryOperation::NoResults(_) | QueryOperation::NoTerm(_) => Ok(None),
            QueryOperation::Index(op) => {
                op.fill()?;
                Ok(op.buffer().pop())
            }
            QueryOperation::Db(op) => {
                op.fill()?;
                let hit = op.buffer().pop();
                if hit.is_some() {
                    op.note_returned();
                }
                Ok(hit)
            }
            QueryOperation::Union(op) => op.get_next(),
            QueryOperation::Intersection(op) => op.get_next(),
            QueryOperation::Filter(op) => op.get_next(),
            QueryOperation::Remote(op) => op.get_next(),
        }
    }

    fn peek_next(&mut self) -> Result<Option<HitId>> {
        match self {
            QueryOperation::NoResults(_) | QueryOperation::NoTerm(_) => Ok(None),
            QueryOperation::Index(op) => {
                op.fill()?;
                Ok(op.buffer().peek())
            }
            QueryOperation::Db(op) => {
                op.fill()?;
                Ok(op.buffer().peek())
            }
            QueryOperation::Union(op) => op.peek_next(),
            QueryOperation::Intersection(op) => op.peek_next(),
            QueryOperation::Filter(op) => op.peek_next(),
            QueryOperation::Remote(op) => op.peek_next(),
        }
    }

    fn skip_to_hit(&mut self, n: usize) -> Result<Option<HitId>> {
        if let QueryOperation::Db(op) = self {
            if op.seek(n) {
                return self.get_next();
            }
        }
        walk_to_hit(self, n)
    }

    fn close(&mut self) -> Result<()> {
        match self {
            QueryOperation::NoResults(_) | QueryOperation::NoTerm(_) => Ok(()),
            QueryOperation::Index(op) => {
                op.close();
                Ok(())
            }
            QueryOperation::Db(op) => {
                op.close();
                Ok(())
            }
            QueryOperation::Union(op) => op.close(),
            QueryOperation::Intersection(op) => op.close(),
            QueryOperation::Filter(op) => op.close(),
            QueryOperation::Remote(op) => op.close(),
        }
    }

    fn cursor_offset(&self) -> i64 {
        match self {
            QueryOperation::Db(op) => op.cursor_offset(),
            _ => UNKNOWN_OFFSET,
        }
    }

    fn result_info(&self) -> Vec<QueryInfo> {
        match self {
            QueryOperation::NoResults(_) | QueryOperation::NoTerm(_) => Vec::new(),
            QueryOperation::Index(op) => op.result_info(),
            QueryOperation::Db(op) => op.result_info(),
            QueryOperation::Union(op) => op.result_info(),
            QueryOperation::Intersection(op) => op.result_info(),
            QueryOperation::Filter(op) => op.result_info(),
            QueryOperation::Remote(op) => op.result_info(),
        }
    }
}

impl fmt::Display for QueryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryOperation::NoResults(_) => write!(f, "NO_RESULTS"),
            QueryOperation::NoTerm(_) => write!(f, "NO_TERM"),
            QueryOperation::Index(op) => write!(f, "LUCENE({})", op.query_string()),
            QueryOperation::Db(op) => write!(f, "{op}"),
            QueryOperation::Union(op) => write_children(f, "UNION", op.children()),
            QueryOperation::Intersection(op) => write_children(f, "INTERSECTION", op.children()),
            QueryOperation::Filter(op) => write!(f, "{op}"),
            QueryOperation::Remote(op) => write!(f, "{op}"),
        }
    }
}

pub(crate) fn write_children(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    children: &[QueryOperation],
) -> fmt::Result {
    write!(f, "{name}{{")?;
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{child}")?;
    }
    write!(f, "}}")
}
