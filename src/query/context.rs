//! Per-search execution context.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SearchConfig;
use crate::hit::{MailboxHandle, SharedArena};
use crate::index::IndexSearcher;
use crate::mailbox::ItemType;
use crate::query::remote::RemoteProxy;
use crate::sort::SortBy;

/// Caller-supplied parameters of one search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    pub sort: SortBy,
    /// Item types to return; empty means any.
    pub types: Vec<ItemType>,
    /// Hits to skip from the top.
    pub offset: usize,
    /// Page size.
    pub limit: usize,
    /// Search deleted items instead of live ones.
    pub in_dumpster: bool,
    pub include_trash: bool,
    pub include_spam: bool,
}

impl Default for SearchParams {
    fn default() -> Self {
        SearchParams {
            sort: SortBy::DateDesc,
            types: Vec::new(),
            offset: 0,
            limit: 100,
            in_dumpster: false,
            include_trash: false,
            include_spam: false,
        }
    }
}

/// Everything a plan needs at execution time. Read-only once bound.
#[derive(Debug)]
pub struct QueryContext {
    id: Uuid,
    mailbox: MailboxHandle,
    params: SearchParams,
    config: SearchConfig,
    arena: SharedArena,
    index: Option<Arc<dyn IndexSearcher>>,
    proxy: Option<Arc<dyn RemoteProxy>>,
}

impl QueryContext {
    pub fn new(
        mailbox: MailboxHandle,
        params: SearchParams,
        config: SearchConfig,
        arena: SharedArena,
    ) -> Self {
        QueryContext {
            id: Uuid::new_v4(),
            mailbox,
            params,
            config,
            arena,
            index: None,
            proxy: None,
        }
    }

    pub fn with_index(mut self, index: Arc<dyn IndexSearcher>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_proxy(mut self, proxy: Arc<dyn RemoteProxy>) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Identifier used to correlate log lines of one search.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mailbox(&self) -> &MailboxHandle {
        &self.mailbox
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    pub fn sort(&self) -> SortBy {
        self.params.sort
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn arena(&self) -> &SharedArena {
        &self.arena
    }

    pub fn index(&self) -> Option<&Arc<dyn IndexSearcher>> {
        self.index.as_ref()
    }

    pub fn proxy(&self) -> Option<&Arc<dyn RemoteProxy>> {
        self.proxy.as_ref()
    }
}

/// Holds the context of one plan node; bound exactly once.
#[derive(Debug, Clone, Default)]
pub(crate) struct ContextSlot(Option<Arc<QueryContext>>);

impl ContextSlot {
    /// # Panics
    ///
    /// Panics if a context is already bound.
    pub(crate) fn bind(&mut self, ctx: Arc<QueryContext>) {
        assert!(self.0.is_none(), "query operation bound to a context twice");
        self.0 = Some(ctx);
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.0.is_some()
    }

    /// # Panics
    ///
    /// Panics if the node was never started.
    pub(crate) fn get(&self) -> Arc<QueryContext> {
        match &self.0 {
            Some(ctx) => Arc::clone(ctx),
            None => panic!("query operation used before begin"),
        }
    }
}
