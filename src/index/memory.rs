//! Embedded in-memory index engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::index::{
    DocumentId, IndexDocument, IndexReader, IndexSearcher, IndexStore, Indexer, ScoreDoc,
    SearchRequest, TermEnumeration, TermList, TopDocs, FIELD_TYPE,
};
use crate::mailbox::ItemId;
use crate::sort::SortValue;

#[derive(Debug, Clone)]
struct Slot {
    doc: IndexDocument,
    deleted: bool,
}

#[derive(Debug, Default)]
struct IndexData {
    slots: Vec<Slot>,
}

impl IndexData {
    fn live(&self) -> impl Iterator<Item = (usize, &IndexDocument)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.deleted)
            .map(|(i, s)| (i, &s.doc))
    }

    fn num_docs(&self) -> usize {
        self.slots.iter().filter(|s| !s.deleted).count()
    }
}

/// An index held in memory. Clones share the same documents.
#[derive(Debug, Clone, Default)]
pub struct MemoryIndex {
    data: Arc<RwLock<IndexData>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// An index pre-populated with `docs`.
    pub fn with_documents(docs: Vec<IndexDocument>) -> Self {
        let index = MemoryIndex::new();
        index.data.write().slots.extend(docs.into_iter().map(|doc| Slot {
            doc,
            deleted: false,
        }));
        index
    }

    /// A searcher over the current documents.
    pub fn searcher(&self) -> MemorySearcher {
        MemorySearcher {
            data: Arc::clone(&self.data),
        }
    }

    pub fn indexer(&self) -> MemoryIndexer {
        let max_docs = self.data.read().num_docs();
        MemoryIndexer {
            data: Arc::clone(&self.data),
            pending: Vec::new(),
            max_docs,
        }
    }
}

impl IndexStore for MemoryIndex {
    fn open_searcher(&self) -> Result<Arc<dyn IndexSearcher>> {
        Ok(Arc::new(self.searcher()))
    }

    fn open_indexer(&self) -> Result<Box<dyn Indexer>> {
        Ok(Box::new(self.indexer()))
    }

    fn delete_index(&self) -> Result<()> {
        self.data.write().slots.clear();
        Ok(())
    }
}

/// Searcher and reader over a [`MemoryIndex`].
#[derive(Debug, Clone)]
pub struct MemorySearcher {
    data: Arc<RwLock<IndexData>>,
}

impl IndexSearcher for MemorySearcher {
    fn search_request(&self, request: &SearchRequest) -> Result<TopDocs> {
        let data = self.data.read();
        let scores = request.scores();
        let mut matched: Vec<(usize, f32, SortValue)> = data
            .live()
            .filter(|(_, doc)| request.filter.as_ref().is_none_or(|f| f.matches(doc)))
            .filter_map(|(ord, doc)| {
                let score = request.query.score(doc)?;
                let sort_value = match request.sort {
                    Some(sort) if !scores => doc.sort_value(sort),
                    _ => SortValue::Score(score),
                };
                Some((ord, score, sort_value))
            })
            .collect();

        let sort = request.sort;
        matched.sort_by(|a, b| {
            let by_value = match sort {
                Some(sort) if !scores => sort.compare(&a.2, &b.2),
                _ => b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal),
            };
            by_value.then_with(|| a.0.cmp(&b.0))
        });

        let mut facets: BTreeMap<String, usize> = BTreeMap::new();
        for (ord, _, _) in &matched {
            let kind = data.slots[*ord].doc.get(FIELD_TYPE).unwrap_or("unknown");
            *facets.entry(kind.to_string()).or_default() += 1;
        }

        let total_hits = matched.len();
        matched.truncate(request.n);

        let max_score = if scores {
            matched.iter().map(|m| m.1).fold(f32::NAN, f32::max)
        } else {
            f32::NAN
        };

        let mut score_docs = Vec::with_capacity(matched.len());
        let mut documents = Vec::with_capacity(matched.len());
        for (ord, score, _) in &matched {
            let doc = &data.slots[*ord].doc;
            let id = match &request.id_field {
                Some(field) => DocumentId::Key(doc.get(field).unwrap_or_default().to_string()),
                None => DocumentId::Ordinal(*ord as u64),
            };
            score_docs.push(ScoreDoc {
                doc: id,
                score: if scores { *score } else { f32::NAN },
            });
            if !request.fetch_fields.is_empty() {
                let fields: Vec<&str> = request.fetch_fields.iter().map(String::as_str).collect();
                documents.push(doc.project(&fields));
            }
        }

        Ok(TopDocs {
            total_hits,
            score_docs,
            max_score,
            documents: (!request.fetch_fields.is_empty()).then_some(documents),
            facets: Some(facets),
            sort_values: request
                .sort
                .map(|_| matched.into_iter().map(|(_, _, v)| v).collect()),
        })
    }

    fn doc(&self, id: &DocumentId) -> Result<Option<IndexDocument>> {
        let data = self.data.read();
        Ok(match id {
            DocumentId::Ordinal(ord) => data
                .slots
                .get(*ord as usize)
                .filter(|s| !s.deleted)
                .map(|s| s.doc.clone()),
            DocumentId::Key(key) => data
                .live()
                .find(|(_, d)| d.get(crate::index::FIELD_ITEM_ID) == Some(key.as_str()))
                .map(|(_, d)| d.clone()),
        })
    }

    fn doc_freq(&self, field: &str, term: &str) -> Result<usize> {
        let data = self.data.read();
        Ok(data
            .live()
            .filter(|(_, d)| d.terms(field).iter().any(|t| t == term))
            .count())
    }

    fn reader(&self) -> &dyn IndexReader {
        self
    }
}

impl IndexReader for MemorySearcher {
    fn num_docs(&self) -> Result<usize> {
        Ok(self.data.read().num_docs())
    }

    fn num_deleted_docs(&self) -> Result<usize> {
        Ok(self.data.read().slots.iter().filter(|s| s.deleted).count())
    }

    fn terms(&self, field: &str, start: &str) -> Result<Box<dyn TermEnumeration>> {
        let data = self.data.read();
        let terms: Vec<String> = data
            .live()
            .flat_map(|(_, d)| d.terms(field).iter())
            .filter(|t| t.as_str() >= start)
            .cloned()
            .collect();
        Ok(Box::new(TermList::new(terms)))
    }
}

/// Writer over a [`MemoryIndex`]. Additions are buffered until `flush`.
#[derive(Debug)]
pub struct MemoryIndexer {
    data: Arc<RwLock<IndexData>>,
    pending: Vec<IndexDocument>,
    max_docs: usize,
}

impl Indexer for MemoryIndexer {
    fn add_documents(&mut self, docs: Vec<IndexDocument>) -> Result<()> {
        self.max_docs += docs.len();
        self.pending.extend(docs);
        Ok(())
    }

    fn delete_documents_in_field(&mut self, ids: &[ItemId], field: &str) -> Result<()> {
        let keys: Vec<String> = ids.iter().map(|i| i.to_string()).collect();
        let matches = |d: &IndexDocument| d.terms(field).iter().any(|t| keys.contains(t));

        let before = self.pending.len();
        self.pending.retain(|d| !matches(d));
        let mut removed = before - self.pending.len();

        let mut data = self.data.write();
        for slot in data.slots.iter_mut().filter(|s| !s.deleted) {
            if matches(&slot.doc) {
                slot.deleted = true;
                removed += 1;
            }
        }
        self.max_docs = self.max_docs.saturating_sub(removed);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut data = self.data.write();
        data.slots.extend(self.pending.drain(..).map(|doc| Slot {
            doc,
            deleted: false,
        }));
        self.max_docs = data.num_docs();
        Ok(())
    }

    fn compact(&mut self) -> Result<()> {
        self.flush()?;
        let mut data = self.data.write();
        let before = data.slots.len();
        data.slots.retain(|s| !s.deleted);
        log::debug!("Compacted index: reclaimed {} documents", before - data.slots.len());
        Ok(())
    }

    fn max_docs(&self) -> usize {
        self.max_docs
    }

    fn close(&mut self) -> Result<()> {
        self.flush()
    }
}
