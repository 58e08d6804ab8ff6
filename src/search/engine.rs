//! End-to-end search lifecycle over one mailbox.

use std::sync::Arc;

use crate::config::SearchConfig;
use crate::error::Result;
use crate::hit::{HitArena, MailboxHandle};
use crate::index::IndexStore;
use crate::query::{QueryContext, QueryOperation, RemoteProxy, SearchParams};
use crate::results::{
    BufferedResults, FetchMode, HitStream, MessageGrouper, Preloader, QueryInfo, ResultContainer,
    UngroupedResults,
};
use crate::search::{Grouping, QueryResults};
use crate::sort::SortBy;

/// Compiles a plan for one mailbox and runs it.
#[derive(Debug, Clone)]
pub struct MailboxSearch {
    mailbox: MailboxHandle,
    params: SearchParams,
    config: SearchConfig,
    index: Option<Arc<dyn IndexStore>>,
    proxy: Option<Arc<dyn RemoteProxy>>,
    grouping: Grouping,
    fetch: FetchMode,
    /// Chunk size for batched item loading; `None` loads lazily.
    preload: Option<usize>,
}

impl MailboxSearch {
    pub fn new(mailbox: MailboxHandle) -> Self {
        MailboxSearch {
            mailbox,
            params: SearchParams::default(),
            config: SearchConfig::default(),
            index: None,
            proxy: None,
            grouping: Grouping::default(),
            fetch: FetchMode::Normal,
            preload: None,
        }
    }

    pub fn with_params(mut self, params: SearchParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_config(mut self, config: SearchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_index(mut self, index: Arc<dyn IndexStore>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_proxy(mut self, proxy: Arc<dyn RemoteProxy>) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_grouping(mut self, grouping: Grouping) -> Self {
        self.grouping = grouping;
        self
    }

    pub fn with_fetch_mode(mut self, fetch: FetchMode) -> Self {
        self.fetch = fetch;
        self
    }

    /// Preload backing items in chunks of `chunk_size`.
    pub fn with_preload(mut self, chunk_size: usize) -> Self {
        self.preload = Some(chunk_size);
        self
    }

    /// Use the configured default preload chunk size.
    pub fn with_default_preload(mut self) -> Self {
        self.preload = Some(self.config.preload_chunk_size);
        self
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Turn a planner tree into an executable plan.
    ///
    /// Shortcuts are expanded, the tree is optimized, the default
    /// Spam/Trash scope is applied once, and branches bound to other
    /// accounts are gathered into remote operations.
    pub fn plan(&self, op: QueryOperation) -> Result<QueryOperation> {
        let mailbox = self.mailbox.as_ref();
        log::debug!("RAW={op}");

        let op = op.expand_local_remote_part(mailbox)?;
        let mut op = op.optimize(mailbox);
        if !op.has_spam_trash_setting() {
            op = op
                .ensure_spam_trash_setting(mailbox, self.params.include_trash, self.params.include_spam)
                .optimize(mailbox);
        }
        // A single-child union hoists a lone remote branch too.
        let op = QueryOperation::union(vec![op]).optimize(mailbox);

        log::debug!("OPTIMIZED={op}");
        Ok(op)
    }

    /// Plan and start `op`, returning the result stream.
    pub fn run(&self, op: QueryOperation) -> Result<QueryResults> {
        self.config.validate()?;
        let mut plan = self.plan(op)?;

        let mut params = self.params.clone();
        let mut info = Vec::new();
        if params.sort == SortBy::RelevanceDesc && !plan.supports_relevance_sort() {
            log::debug!("Plan cannot sort by relevance; falling back to {}", SortBy::DateDesc);
            info.push(QueryInfo::SortFallback {
                requested: SortBy::RelevanceDesc,
                used: SortBy::DateDesc,
            });
            params.sort = SortBy::DateDesc;
        }

        let arena = HitArena::shared();
        let mut ctx = QueryContext::new(
            Arc::clone(&self.mailbox),
            params.clone(),
            self.config.clone(),
            Arc::clone(&arena),
        );
        if let Some(index) = &self.index {
            ctx = ctx.with_index(index.open_searcher()?);
        }
        if let Some(proxy) = &self.proxy {
            ctx = ctx.with_proxy(Arc::clone(proxy));
        }
        let ctx = Arc::new(ctx);
        log::debug!(
            "[{}] Searching mailbox {} sort={} grouping={:?}",
            ctx.id(),
            self.mailbox.id(),
            params.sort,
            self.grouping
        );

        let plan_text = plan.to_string();
        plan.begin(ctx);

        let mut source: Box<dyn HitStream> = Box::new(plan);
        if let (Some(chunk), FetchMode::Normal) = (self.preload, self.fetch) {
            source = Box::new(BufferedResults::new(Preloader::new(
                source,
                Arc::clone(&arena),
                chunk,
            )));
        }
        let stream: Box<dyn ResultContainer> = match self.grouping {
            Grouping::Grouped => Box::new(BufferedResults::new(
                MessageGrouper::new(source, Arc::clone(&arena), params.sort)
                    .with_types(params.types.clone())
                    .with_fetch_mode(self.fetch),
            )),
            Grouping::Ungrouped => Box::new(
                UngroupedResults::new(source, params.sort, params.types.clone())
                    .with_fetch_mode(self.fetch),
            ),
        };

        Ok(QueryResults::new(stream, arena, plan_text, info, &params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexDocument, MemoryIndex, FIELD_CONTENT, FIELD_SORT_DATE};
    use crate::mailbox::{ItemType, MailItem, MemoryMailbox, ID_FOLDER_TRASH};

    fn search() -> MailboxSearch {
        let mbox = Arc::new(MemoryMailbox::new(1, "alice"));
        let mut docs = Vec::new();
        for id in 1..=4 {
            mbox.add_item(MailItem {
                date: id as i64,
                folder_id: if id == 4 { ID_FOLDER_TRASH } else { 2 },
                ..MailItem::message(id)
            });
            docs.push(
                IndexDocument::new(id, ItemType::Message, None)
                    .with_text(FIELD_CONTENT, "invoice")
                    .with_field(FIELD_SORT_DATE, id.to_string()),
            );
        }
        MailboxSearch::new(mbox).with_index(Arc::new(MemoryIndex::with_documents(docs)))
    }

    #[test]
    fn test_trash_is_excluded_by_default() {
        let search = search();
        let mut results = search.run(QueryOperation::term(FIELD_CONTENT, "invoice")).unwrap();
        let ids: Vec<i32> = results
            .page()
            .unwrap()
            .into_iter()
            .map(|h| results.with_hit(h, |hit| hit.item_id()))
            .collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_trash_included_on_request() {
        let search = search().with_params(SearchParams {
            include_trash: true,
            ..Default::default()
        });
        let mut results = search.run(QueryOperation::term(FIELD_CONTENT, "invoice")).unwrap();
        assert_eq!(results.page().unwrap().len(), 4);
    }

    #[test]
    fn test_relevance_falls_back_for_store_only_plans() {
        let search = search().with_params(SearchParams {
            sort: SortBy::RelevanceDesc,
            ..Default::default()
        });
        let op = QueryOperation::Db(crate::query::DbOp::tagged("none"));
        let results = search.run(op).unwrap();
        assert_eq!(results.sort_by(), SortBy::DateDesc);
        assert!(results
            .result_info()
            .contains(&QueryInfo::SortFallback {
                requested: SortBy::RelevanceDesc,
                used: SortBy::DateDesc,
            }));
    }
}
