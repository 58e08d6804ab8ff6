//! Constant leaves of the algebra.

use std::sync::Arc;

use crate::query::context::{ContextSlot, QueryContext};

/// Matches nothing, ever. Absorbing under AND, dropped under OR.
#[derive(Debug, Clone, Default)]
pub struct NoResultsOp {
    ctx: ContextSlot,
}

impl NoResultsOp {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn begin(&mut self, ctx: Arc<QueryContext>) {
        self.ctx.bind(ctx);
    }

    pub(crate) fn is_begun(&self) -> bool {
        self.ctx.is_bound()
    }
}

/// A query with no search term.
///
/// Identity under AND when an index-capable sibling exists; a whole
/// store-only conjunction containing it collapses to it. Evaluated alone it
/// yields no hits.
#[derive(Debug, Clone, Default)]
pub struct NoTermOp {
    ctx: ContextSlot,
}

impl NoTermOp {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn begin(&mut self, ctx: Arc<QueryContext>) {
        self.ctx.bind(ctx);
    }

    pub(crate) fn is_begun(&self) -> bool {
        self.ctx.is_bound()
    }
}
