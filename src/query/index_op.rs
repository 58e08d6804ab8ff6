//! Index-only leaf.

use std::sync::Arc;

use crate::config::SearchConfig;
use crate::error::{Result, SearchError};
use crate::hit::{HitArena, HitId, MailboxHandle};
use crate::index::{
    DocumentId, IndexQuery, IndexSearcher, Occur, TermsFilter, FIELD_CONTENT, FIELD_ITEM_ID,
    FIELD_PART, FIELD_TYPE,
};
use crate::mailbox::{ItemId, ItemType};
use crate::query::context::{ContextSlot, QueryContext};
use crate::results::{HitBuffer, QueryInfo};
use crate::sort::{SortBy, SortValue};

/// One document matched in the index.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IndexMatch {
    pub item_id: ItemId,
    pub part: Option<String>,
    pub item_type: ItemType,
    pub score: f32,
    pub sort_value: SortValue,
}

impl IndexMatch {
    /// Register this match in the arena, keeping `sort_value` as the hit's
    /// sort key.
    pub fn into_hit(self, arena: &mut HitArena, mailbox: &MailboxHandle, sort_value: SortValue) -> HitId {
        let id = match &self.part {
            Some(part) => arena.part_hit(mailbox, self.item_id, part, sort_value),
            None => arena.item_hit(mailbox, self.item_type, self.item_id, sort_value),
        };
        if !self.score.is_nan() {
            arena.get_mut(id).set_score(self.score);
        }
        id
    }
}

/// Index sort for a hit sort; `None` asks for relevance order.
fn index_sort(sort: SortBy) -> Option<SortBy> {
    match sort {
        SortBy::RelevanceDesc => None,
        other => Some(other),
    }
}

/// Run a search and decode its hits.
pub(crate) fn search_matches(
    searcher: &dyn IndexSearcher,
    query: &IndexQuery,
    n: usize,
    filter: Option<&TermsFilter>,
    sort: SortBy,
) -> Result<(Vec<IndexMatch>, usize)> {
    let top = searcher.search_fields(
        query,
        n,
        filter,
        index_sort(sort),
        FIELD_ITEM_ID,
        &[FIELD_PART, FIELD_TYPE],
    )?;
    let docs = top.documents.unwrap_or_default();
    let sort_values = top.sort_values.unwrap_or_default();

    let mut matches = Vec::with_capacity(top.score_docs.len());
    for (i, score_doc) in top.score_docs.into_iter().enumerate() {
        let item_id = match &score_doc.doc {
            DocumentId::Key(key) => key
                .parse()
                .map_err(|_| SearchError::malformed(format!("bad item id in index: {key:?}")))?,
            DocumentId::Ordinal(ord) => {
                return Err(SearchError::malformed(format!(
                    "index returned ordinal {ord} where an item id was requested"
                )));
            }
        };
        let doc = docs.get(i);
        let sort_value = if sort == SortBy::RelevanceDesc {
            SortValue::Score(score_doc.score)
        } else {
            sort_values.get(i).cloned().unwrap_or_default()
        };
        matches.push(IndexMatch {
            item_id,
            part: doc.and_then(|d| d.part()).map(str::to_string),
            item_type: doc.map(|d| d.item_type()).unwrap_or(ItemType::Message),
            score: score_doc.score,
            sort_value,
        });
    }
    Ok((matches, top.total_hits))
}

/// Pages through an index query with growing top-N requests.
#[derive(Debug, Clone, Default)]
pub(crate) struct IndexCursor {
    fetched: usize,
    chunk: usize,
    done: bool,
}

impl IndexCursor {
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn reset(&mut self) {
        *self = IndexCursor::default();
    }

    /// The next page of matches after those already returned.
    pub fn next_chunk(
        &mut self,
        searcher: &dyn IndexSearcher,
        query: &IndexQuery,
        sort: SortBy,
        config: &SearchConfig,
    ) -> Result<Vec<IndexMatch>> {
        if self.done {
            return Ok(Vec::new());
        }
        self.chunk = if self.chunk == 0 {
            config.chunk_size
        } else {
            (self.chunk * 2).min(config.max_topdocs_chunk)
        };
        let want = self.fetched + self.chunk;
        let (matches, total) = search_matches(searcher, query, want, None, sort)?;
        log::debug!(
            "Index chunk for {query}: requested {want}, got {} of {total}",
            matches.len()
        );

        let page: Vec<IndexMatch> = matches.into_iter().skip(self.fetched).collect();
        self.fetched += page.len();
        if self.fetched >= total || page.is_empty() {
            self.done = true;
        }
        Ok(page)
    }
}

/// A query answered by the inverted index alone.
#[derive(Debug, Clone)]
pub struct IndexOp {
    query: IndexQuery,
    query_string: String,
    ctx: ContextSlot,
    cursor: IndexCursor,
    buffer: HitBuffer,
    info: Vec<QueryInfo>,
}

impl IndexOp {
    pub fn new<S: Into<String>>(query: IndexQuery, query_string: S) -> Self {
        IndexOp {
            query,
            query_string: query_string.into(),
            ctx: ContextSlot::default(),
            cursor: IndexCursor::default(),
            buffer: HitBuffer::new(),
            info: Vec::new(),
        }
    }

    /// A single-term query; terms on the default field render bare.
    pub fn term(field: &str, value: &str) -> Self {
        let text = if field == FIELD_CONTENT {
            value.to_string()
        } else {
            format!("{field}:{value}")
        };
        IndexOp::new(IndexQuery::term(field, value), text)
    }

    pub fn query(&self) -> &IndexQuery {
        &self.query
    }

    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    /// Merge `other` into this query under OR or AND.
    pub(crate) fn combine_with(self, other: IndexOp, union: bool) -> IndexOp {
        let (occur, joiner) = if union {
            (Occur::Should, "OR")
        } else {
            (Occur::Must, "AND")
        };
        let text = format!("({}) {joiner} ({})", self.query_string, other.query_string);
        IndexOp::new(self.query.combine(other.query, occur), text)
    }

    pub(crate) fn begin(&mut self, ctx: Arc<QueryContext>) {
        self.ctx.bind(ctx);
    }

    pub(crate) fn is_begun(&self) -> bool {
        self.ctx.is_bound()
    }

    pub(crate) fn fill(&mut self) -> Result<bool> {
        while self.buffer.needs_fill() {
            if !self.buffer.is_started() {
                self.buffer.mark_started();
                self.check_spelling()?;
            }
            if !self.fetch_chunk()? {
                self.buffer.mark_exhausted();
            }
        }
        Ok(!self.buffer.is_empty())
    }

    fn fetch_chunk(&mut self) -> Result<bool> {
        let ctx = self.ctx.get();
        let searcher = searcher_of(&ctx)?;
        let page = self
            .cursor
            .next_chunk(searcher.as_ref(), &self.query, ctx.sort(), ctx.config())?;
        let mut arena = ctx.arena().lock();
        for m in page {
            let sort_value = m.sort_value.clone();
            self.buffer.push(m.into_hit(&mut arena, ctx.mailbox(), sort_value));
        }
        Ok(!self.cursor.is_done())
    }

    /// Offer a correction when a lone term matches nothing.
    fn check_spelling(&mut self) -> Result<()> {
        if !self.info.is_empty() {
            return Ok(());
        }
        let Some((field, value)) = self.query.single_term() else {
            return Ok(());
        };
        let ctx = self.ctx.get();
        let searcher = searcher_of(&ctx)?;
        if searcher.doc_freq(field, value)? > 0 {
            return Ok(());
        }
        let prefix: String = value.chars().take(2).collect();
        let mut terms = searcher.reader().terms(field, &prefix)?;
        let mut suggestion = None;
        while let Some(term) = terms.next_term() {
            if !term.starts_with(&prefix) {
                break;
            }
            if term != value {
                suggestion = Some(term);
                break;
            }
        }
        terms.close()?;

        if let Some(term) = suggestion {
            let suggestion = if field == FIELD_CONTENT {
                term
            } else {
                format!("{field}:{term}")
            };
            self.info.push(QueryInfo::SuggestedQuery {
                original: self.query_string.clone(),
                suggestion,
            });
        }
        Ok(())
    }

    pub(crate) fn buffer(&mut self) -> &mut HitBuffer {
        &mut self.buffer
    }

    pub(crate) fn reset(&mut self) {
        if !self.buffer.is_started() {
            return;
        }
        self.buffer.reset();
        self.cursor.reset();
    }

    pub(crate) fn close(&mut self) {
        self.buffer.reset();
        self.cursor.reset();
    }

    pub(crate) fn result_info(&self) -> Vec<QueryInfo> {
        self.info.clone()
    }
}

pub(crate) fn searcher_of(ctx: &QueryContext) -> Result<Arc<dyn IndexSearcher>> {
    ctx.index().cloned().ok_or_else(|| {
        SearchError::service(format!("mailbox {} has no index", ctx.mailbox().id()))
    })
}
