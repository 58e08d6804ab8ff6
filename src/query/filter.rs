//! Pass-through node that drops hits failing a predicate.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::hit::{HitArena, HitId};
use crate::mailbox::{ItemType, MailboxStore};
use crate::query::context::{ContextSlot, QueryContext};
use crate::query::QueryOperation;
use crate::results::{HitStream, QueryInfo};

/// A predicate over hits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HitFilter {
    /// Drop hits of these item types.
    ExcludeItemTypes { types: BTreeSet<ItemType> },
    /// Drop items flagged as deleted. Resolves the backing item.
    ExcludeDeleted,
}

impl HitFilter {
    pub fn exclude_types<I: IntoIterator<Item = ItemType>>(types: I) -> Self {
        HitFilter::ExcludeItemTypes {
            types: types.into_iter().collect(),
        }
    }

    /// True if `id` passes. Proxied hits always pass the item checks the
    /// remote server could not have applied.
    pub fn accepts(&self, arena: &mut HitArena, id: HitId) -> Result<bool> {
        match self {
            HitFilter::ExcludeItemTypes { types } => Ok(!types.contains(&arena.get(id).item_type())),
            HitFilter::ExcludeDeleted => {
                let hit = arena.get_mut(id);
                if hit.is_proxied() {
                    return Ok(true);
                }
                Ok(!hit.load_item()?.is_some_and(|item| item.deleted))
            }
        }
    }

    fn query_clause(&self) -> String {
        match self {
            HitFilter::ExcludeItemTypes { types } => types
                .iter()
                .map(|t| format!("-type:{}", t.as_str()))
                .collect::<Vec<_>>()
                .join(" AND "),
            HitFilter::ExcludeDeleted => "-is:deleted".to_string(),
        }
    }
}

impl fmt::Display for HitFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HitFilter::ExcludeItemTypes { types } => {
                let names: Vec<&str> = types.iter().map(|t| t.as_str()).collect();
                write!(f, "exclude_types:[{}]", names.join(","))
            }
            HitFilter::ExcludeDeleted => write!(f, "exclude_deleted"),
        }
    }
}

/// Wraps one child and passes through only the hits the filter accepts.
///
/// The optimizer never removes a filter node.
#[derive(Debug, Clone)]
pub struct FilterOp {
    child: Box<QueryOperation>,
    filter: HitFilter,
    ctx: ContextSlot,
}

impl FilterOp {
    pub fn new(child: QueryOperation, filter: HitFilter) -> Self {
        FilterOp {
            child: Box::new(child),
            filter,
            ctx: ContextSlot::default(),
        }
    }

    pub fn child(&self) -> &QueryOperation {
        &self.child
    }

    pub(crate) fn child_mut(&mut self) -> &mut QueryOperation {
        &mut self.child
    }

    pub fn filter(&self) -> &HitFilter {
        &self.filter
    }

    fn map_child(self, f: impl FnOnce(QueryOperation) -> QueryOperation) -> QueryOperation {
        QueryOperation::Filter(FilterOp {
            child: Box::new(f(*self.child)),
            filter: self.filter,
            ctx: self.ctx,
        })
    }

    pub(crate) fn begin(&mut self, ctx: Arc<QueryContext>) {
        self.child.begin(Arc::clone(&ctx));
        self.ctx.bind(ctx);
    }

    pub(crate) fn is_begun(&self) -> bool {
        self.ctx.is_bound()
    }

    pub(crate) fn optimize(self, mailbox: &dyn MailboxStore) -> QueryOperation {
        self.map_child(|child| child.optimize(mailbox))
    }

    pub(crate) fn expand_local_remote_part(
        self,
        mailbox: &dyn MailboxStore,
    ) -> Result<QueryOperation> {
        let child = (*self.child).expand_local_remote_part(mailbox)?;
        Ok(QueryOperation::Filter(FilterOp {
            child: Box::new(child),
            filter: self.filter,
            ctx: self.ctx,
        }))
    }

    pub(crate) fn ensure_spam_trash_setting(
        self,
        mailbox: &dyn MailboxStore,
        include_trash: bool,
        include_spam: bool,
    ) -> QueryOperation {
        self.map_child(|child| child.ensure_spam_trash_setting(mailbox, include_trash, include_spam))
    }

    pub(crate) fn to_query_string(&self) -> String {
        let child = self.child.to_query_string();
        let clause = self.filter.query_clause();
        if child.is_empty() {
            clause
        } else {
            format!("({child}) AND {clause}")
        }
    }

    /// Drop rejected hits until the child's head passes.
    fn advance(&mut self) -> Result<Option<HitId>> {
        let ctx = self.ctx.get();
        while let Some(hit) = self.child.peek_next()? {
            let accepted = self.filter.accepts(&mut ctx.arena().lock(), hit)?;
            if accepted {
                return Ok(Some(hit));
            }
            self.child.get_next()?;
        }
        Ok(None)
    }
}

impl HitStream for FilterOp {
    fn reset_iterator(&mut self) -> Result<()> {
        self.child.reset_iterator()
    }

    fn get_next(&mut self) -> Result<Option<HitId>> {
        let hit = self.advance()?;
        if hit.is_some() {
            self.child.get_next()?;
        }
        Ok(hit)
    }

    fn peek_next(&mut self) -> Result<Option<HitId>> {
        self.advance()
    }

    fn close(&mut self) -> Result<()> {
        self.child.close()
    }

    fn result_info(&self) -> Vec<QueryInfo> {
        self.child.result_info()
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FILTER({}){{{}}}", self.filter, self.child)
    }
}
