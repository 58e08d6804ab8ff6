//! Engine-neutral inverted-index interfaces.
//!
//! Leaf operations never talk to an index engine directly. They go through
//! [`IndexSearcher`] for top-N searches and cost estimates, [`IndexReader`]
//! for statistics and term enumeration, and [`Indexer`] for the write side.
//! Two engines implement the traits: [`memory::MemoryIndex`] (embedded) and
//! [`remote::RemoteIndex`] (server-hosted). They are interchangeable from the
//! query tree's point of view.

pub mod memory;
pub mod rebuild;
pub mod remote;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Debug};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::mailbox::{ItemId, ItemType};
use crate::sort::{SortBy, SortKey, SortValue};

pub use self::memory::MemoryIndex;
pub use self::remote::{IndexTransport, LoopbackTransport, RemoteIndex};

/// Field holding the owning item id.
pub const FIELD_ITEM_ID: &str = "l.item_id";
/// Field holding the part name of a message part; absent for whole items.
pub const FIELD_PART: &str = "l.part";
/// Field holding the item type name.
pub const FIELD_TYPE: &str = "l.type";
/// Default text field.
pub const FIELD_CONTENT: &str = "l.content";
pub const FIELD_SUBJECT: &str = "subject";
pub const FIELD_FROM: &str = "from";
/// Sort fields, stored single-valued.
pub const FIELD_SORT_DATE: &str = "sort.date";
pub const FIELD_SORT_SIZE: &str = "sort.size";
pub const FIELD_SORT_SUBJECT: &str = "sort.subject";
pub const FIELD_SORT_NAME: &str = "sort.name";

/// A document as stored by an index engine: field name to terms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub fields: BTreeMap<String, Vec<String>>,
}

impl IndexDocument {
    /// A document for one item, optionally for one of its parts.
    pub fn new(item_id: ItemId, item_type: ItemType, part: Option<&str>) -> Self {
        let mut doc = IndexDocument::default();
        doc.set(FIELD_ITEM_ID, item_id.to_string());
        doc.set(FIELD_TYPE, item_type.as_str());
        if let Some(part) = part {
            doc.set(FIELD_PART, part);
        }
        doc
    }

    /// Replace a field with a single stored value.
    pub fn set<F: Into<String>, V: Into<String>>(&mut self, field: F, value: V) {
        self.fields.insert(field.into(), vec![value.into()]);
    }

    /// Append terms to a field.
    pub fn add_terms<I, S>(&mut self, field: &str, terms: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields
            .entry(field.to_string())
            .or_default()
            .extend(terms.into_iter().map(Into::into));
    }

    /// Tokenize `text` on whitespace and punctuation into lowercase terms.
    pub fn with_text(mut self, field: &str, text: &str) -> Self {
        let terms = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase());
        self.add_terms(field, terms);
        self
    }

    pub fn with_field<V: Into<String>>(mut self, field: &str, value: V) -> Self {
        self.set(field, value);
        self
    }

    /// The first value stored in `field`.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    pub fn terms(&self, field: &str) -> &[String] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn item_id(&self) -> Option<ItemId> {
        self.get(FIELD_ITEM_ID).and_then(|v| v.parse().ok())
    }

    pub fn part(&self) -> Option<&str> {
        self.get(FIELD_PART).filter(|p| !p.is_empty())
    }

    pub fn item_type(&self) -> ItemType {
        self.get(FIELD_TYPE)
            .and_then(ItemType::parse)
            .unwrap_or(ItemType::Message)
    }

    /// The stored value used to order this document under `sort`.
    pub fn sort_value(&self, sort: SortBy) -> SortValue {
        let int = |field: &str| {
            self.get(field)
                .and_then(|v| v.parse::<i64>().ok())
                .map(SortValue::Int)
                .unwrap_or(SortValue::None)
        };
        let text = |field: &str| {
            self.get(field)
                .map(|v| SortValue::Text(v.to_string()))
                .unwrap_or(SortValue::None)
        };
        match sort.key() {
            SortKey::None | SortKey::Score => SortValue::None,
            SortKey::Date => int(FIELD_SORT_DATE),
            SortKey::Size => int(FIELD_SORT_SIZE),
            SortKey::Subject => text(FIELD_SORT_SUBJECT),
            SortKey::Name => text(FIELD_SORT_NAME),
        }
    }

    /// A copy holding only the requested fields.
    pub fn project(&self, fields: &[&str]) -> IndexDocument {
        IndexDocument {
            fields: self
                .fields
                .iter()
                .filter(|(k, _)| fields.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// Clause occurrence in a boolean query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Occur {
    Must,
    Should,
    MustNot,
}

/// An engine-neutral index query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexQuery {
    Term { field: String, value: String },
    Prefix { field: String, prefix: String },
    Boolean(Vec<(Occur, IndexQuery)>),
    MatchAll,
}

impl IndexQuery {
    pub fn term<F: Into<String>, V: Into<String>>(field: F, value: V) -> Self {
        IndexQuery::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Combine two queries with the same occurrence, flattening nested
    /// boolean queries of that occurrence.
    pub fn combine(self, other: IndexQuery, occur: Occur) -> IndexQuery {
        let mut clauses = match self {
            IndexQuery::Boolean(c) if c.iter().all(|(o, _)| *o == occur) => c,
            q => vec![(occur, q)],
        };
        match other {
            IndexQuery::Boolean(c) if c.iter().all(|(o, _)| *o == occur) => clauses.extend(c),
            q => clauses.push((occur, q)),
        }
        IndexQuery::Boolean(clauses)
    }

    /// The single term this query consists of, if it is a term query.
    pub fn single_term(&self) -> Option<(&str, &str)> {
        match self {
            IndexQuery::Term { field, value } => Some((field, value)),
            _ => None,
        }
    }

    /// Score `doc` against this query; `None` if it does not match.
    pub fn score(&self, doc: &IndexDocument) -> Option<f32> {
        match self {
            IndexQuery::MatchAll => Some(1.0),
            IndexQuery::Term { field, value } => {
                let terms = doc.terms(field);
                let tf = terms.iter().filter(|t| *t == value).count();
                (tf > 0).then(|| tf as f32 / (terms.len() as f32).sqrt())
            }
            IndexQuery::Prefix { field, prefix } => doc
                .terms(field)
                .iter()
                .any(|t| t.starts_with(prefix.as_str()))
                .then_some(1.0),
            IndexQuery::Boolean(clauses) => {
                let mut score = 0.0;
                let mut has_required = false;
                let mut matched_optional = false;
                for (occur, q) in clauses {
                    match occur {
                        Occur::Must => {
                            has_required = true;
                            score += q.score(doc)?;
                        }
                        Occur::MustNot => {
                            if q.score(doc).is_some() {
                                return None;
                            }
                        }
                        Occur::Should => {
                            if let Some(s) = q.score(doc) {
                                matched_optional = true;
                                score += s;
                            }
                        }
                    }
                }
                (has_required || matched_optional).then_some(score)
            }
        }
    }
}

impl fmt::Display for IndexQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexQuery::MatchAll => write!(f, "*:*"),
            IndexQuery::Term { field, value } => write!(f, "{field}:{value}"),
            IndexQuery::Prefix { field, prefix } => write!(f, "{field}:{prefix}*"),
            IndexQuery::Boolean(clauses) => {
                write!(f, "(")?;
                for (i, (occur, q)) in clauses.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    match occur {
                        Occur::Must => write!(f, "+{q}")?,
                        Occur::Should => write!(f, "{q}")?,
                        Occur::MustNot => write!(f, "-{q}")?,
                    }
                }
                write!(f, ")")
            }
        }
    }
}

/// A set of (field, value) terms; a document passes if it holds any of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TermsFilter {
    terms: BTreeSet<(String, String)>,
}

impl TermsFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A filter on the item-id field for every id in `ids`.
    pub fn for_item_ids<I: IntoIterator<Item = ItemId>>(ids: I) -> Self {
        let mut filter = TermsFilter::new();
        for id in ids {
            filter.add_term(FIELD_ITEM_ID, id.to_string());
        }
        filter
    }

    pub fn add_term<F: Into<String>, V: Into<String>>(&mut self, field: F, value: V) {
        self.terms.insert((field.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn matches(&self, doc: &IndexDocument) -> bool {
        self.terms
            .iter()
            .any(|(field, value)| doc.terms(field).iter().any(|t| t == value))
    }
}

/// Identifies a document in a top-docs list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentId {
    /// Engine-internal document number.
    Ordinal(u64),
    /// Value of a caller-chosen identifier field.
    Key(String),
}

/// One entry of a top-docs list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreDoc {
    pub doc: DocumentId,
    #[serde(with = "nan_as_null")]
    pub score: f32,
}

/// The ordered result of an index search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopDocs {
    pub total_hits: usize,
    pub score_docs: Vec<ScoreDoc>,
    /// NaN when scoring was disabled.
    #[serde(with = "nan_as_null")]
    pub max_score: f32,
    /// Materialized documents parallel to `score_docs`.
    #[serde(default)]
    pub documents: Option<Vec<IndexDocument>>,
    /// Per-type hit counts.
    #[serde(default)]
    pub facets: Option<BTreeMap<String, usize>>,
    /// Sort values parallel to `score_docs` when a sort was requested.
    #[serde(default)]
    pub sort_values: Option<Vec<SortValue>>,
}

impl TopDocs {
    pub fn empty() -> Self {
        TopDocs {
            max_score: f32::NAN,
            ..Default::default()
        }
    }
}

mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f32, s: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            s.serialize_none()
        } else {
            s.serialize_some(value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f32, D::Error> {
        Ok(Option::<f32>::deserialize(d)?.unwrap_or(f32::NAN))
    }
}

/// A top-N search request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: IndexQuery,
    pub n: usize,
    #[serde(default)]
    pub filter: Option<TermsFilter>,
    /// `None` or relevance orders by score; any other sort disables scoring.
    #[serde(default)]
    pub sort: Option<SortBy>,
    /// Report documents by this field instead of by ordinal.
    #[serde(default)]
    pub id_field: Option<String>,
    /// Fields to fetch alongside each hit.
    #[serde(default)]
    pub fetch_fields: Vec<String>,
}

impl SearchRequest {
    pub fn new(query: IndexQuery, n: usize) -> Self {
        SearchRequest {
            query,
            n,
            filter: None,
            sort: None,
            id_field: None,
            fetch_fields: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: TermsFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_sort(mut self, sort: SortBy) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_fields(mut self, id_field: &str, fetch: &[&str]) -> Self {
        self.id_field = Some(id_field.to_string());
        self.fetch_fields = fetch.iter().map(|f| f.to_string()).collect();
        self
    }

    /// True if hits should be ordered by score.
    pub fn scores(&self) -> bool {
        matches!(self.sort, None | Some(SortBy::RelevanceDesc))
    }
}

/// Searches an index.
pub trait IndexSearcher: Send + Sync + Debug {
    /// Run a top-N search.
    fn search_request(&self, request: &SearchRequest) -> Result<TopDocs>;

    /// Top-N documents matching `query`, optionally filtered and sorted.
    fn search(
        &self,
        query: &IndexQuery,
        n: usize,
        filter: Option<&TermsFilter>,
        sort: Option<SortBy>,
    ) -> Result<TopDocs> {
        let mut request = SearchRequest::new(query.clone(), n);
        request.filter = filter.cloned();
        request.sort = sort;
        self.search_request(&request)
    }

    /// Like [`IndexSearcher::search`], but identifies hits by `id_field` and
    /// fetches `fetch` without materializing whole documents.
    fn search_fields(
        &self,
        query: &IndexQuery,
        n: usize,
        filter: Option<&TermsFilter>,
        sort: Option<SortBy>,
        id_field: &str,
        fetch: &[&str],
    ) -> Result<TopDocs> {
        let mut request = SearchRequest::new(query.clone(), n).with_fields(id_field, fetch);
        request.filter = filter.cloned();
        request.sort = sort;
        self.search_request(&request)
    }

    /// Load a stored document.
    fn doc(&self, id: &DocumentId) -> Result<Option<IndexDocument>>;

    /// Number of live documents holding `term` in `field`.
    fn doc_freq(&self, field: &str, term: &str) -> Result<usize>;

    fn reader(&self) -> &dyn IndexReader;
}

/// Index statistics and term enumeration.
pub trait IndexReader: Send + Sync + Debug {
    /// Number of live documents.
    fn num_docs(&self) -> Result<usize>;

    /// Deletions not yet reclaimed by compaction.
    fn num_deleted_docs(&self) -> Result<usize>;

    /// Distinct values of `field` at or after `start`, in string order.
    fn terms(&self, field: &str, start: &str) -> Result<Box<dyn TermEnumeration>>;
}

/// A restartable cursor over a field's distinct terms.
pub trait TermEnumeration: Send + Debug {
    fn next_term(&mut self) -> Option<String>;

    /// Go back to the first term.
    fn reset(&mut self);

    fn close(&mut self) -> Result<()>;
}

/// Term enumeration over a materialized, sorted term list.
#[derive(Debug, Clone)]
pub struct TermList {
    terms: Vec<String>,
    pos: usize,
    closed: bool,
}

impl TermList {
    pub fn new(mut terms: Vec<String>) -> Self {
        terms.sort();
        terms.dedup();
        TermList {
            terms,
            pos: 0,
            closed: false,
        }
    }
}

impl TermEnumeration for TermList {
    fn next_term(&mut self) -> Option<String> {
        if self.closed {
            return None;
        }
        let term = self.terms.get(self.pos).cloned();
        if term.is_some() {
            self.pos += 1;
        }
        term
    }

    fn reset(&mut self) {
        self.pos = 0;
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Write side of an index.
pub trait Indexer: Send + Debug {
    /// Buffer documents for addition.
    fn add_documents(&mut self, docs: Vec<IndexDocument>) -> Result<()>;

    /// Delete every document of the given items.
    fn delete_documents(&mut self, ids: &[ItemId]) -> Result<()> {
        self.delete_documents_in_field(ids, FIELD_ITEM_ID)
    }

    /// Delete documents whose `field` holds one of `ids`.
    fn delete_documents_in_field(&mut self, ids: &[ItemId], field: &str) -> Result<()>;

    /// Make buffered additions visible to searchers.
    fn flush(&mut self) -> Result<()>;

    /// Reclaim space held by deleted documents.
    fn compact(&mut self) -> Result<()>;

    /// Document count including buffered additions and excluding deletions.
    ///
    /// The value is cached by the writer and may be stale.
    fn max_docs(&self) -> usize;

    /// Flush and release the writer.
    fn close(&mut self) -> Result<()>;
}

/// An index that can be opened for reading and writing.
pub trait IndexStore: Send + Sync + Debug {
    fn open_searcher(&self) -> Result<Arc<dyn IndexSearcher>>;

    fn open_indexer(&self) -> Result<Box<dyn Indexer>>;

    /// Drop every document and all index state.
    fn delete_index(&self) -> Result<()>;
}
