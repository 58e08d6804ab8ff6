//! Server-hosted index engine.
//!
//! [`RemoteIndex`] implements the same searcher, reader and indexer traits as
//! the embedded engine by sending JSON-encoded [`IndexRequest`]s through an
//! [`IndexTransport`]. [`LoopbackTransport`] serves a [`MemoryIndex`] in
//! process, which is how the two engines are checked against each other.

use std::fmt::Debug;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};
use crate::index::memory::MemoryIndex;
use crate::index::{
    DocumentId, IndexDocument, IndexReader, IndexSearcher, IndexStore, Indexer, SearchRequest,
    TermEnumeration, TermList, TopDocs,
};
use crate::mailbox::ItemId;

/// A request to the index server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum IndexRequest {
    Search(SearchRequest),
    Doc { id: DocumentId },
    DocFreq { field: String, term: String },
    NumDocs,
    NumDeletedDocs,
    Terms { field: String, start: String },
    Add { docs: Vec<IndexDocument> },
    Delete { ids: Vec<ItemId>, field: String },
    Compact,
    DeleteIndex,
}

/// The index server's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IndexResponse {
    TopDocs(TopDocs),
    Doc(Option<IndexDocument>),
    Count(usize),
    Terms(Vec<String>),
    Done,
    Error(String),
}

/// Carries encoded requests to an index server.
pub trait IndexTransport: Send + Sync + Debug {
    fn round_trip(&self, request: &str) -> Result<String>;
}

/// Client for an index served elsewhere.
#[derive(Debug, Clone)]
pub struct RemoteIndex {
    transport: Arc<dyn IndexTransport>,
}

impl RemoteIndex {
    pub fn new(transport: Arc<dyn IndexTransport>) -> Self {
        RemoteIndex { transport }
    }

    fn call(&self, request: &IndexRequest) -> Result<IndexResponse> {
        let encoded = serde_json::to_string(request)?;
        let reply = self.transport.round_trip(&encoded)?;
        match serde_json::from_str(&reply)? {
            IndexResponse::Error(msg) => Err(SearchError::service(msg)),
            response => Ok(response),
        }
    }

    fn call_count(&self, request: &IndexRequest) -> Result<usize> {
        match self.call(request)? {
            IndexResponse::Count(n) => Ok(n),
            other => Err(unexpected(&other)),
        }
    }

    fn call_done(&self, request: &IndexRequest) -> Result<()> {
        match self.call(request)? {
            IndexResponse::Done => Ok(()),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(response: &IndexResponse) -> SearchError {
    SearchError::malformed(format!("unexpected index response: {response:?}"))
}

impl IndexStore for RemoteIndex {
    fn open_searcher(&self) -> Result<Arc<dyn IndexSearcher>> {
        Ok(Arc::new(self.clone()))
    }

    fn open_indexer(&self) -> Result<Box<dyn Indexer>> {
        let max_docs = self.call_count(&IndexRequest::NumDocs)?;
        Ok(Box::new(RemoteIndexer {
            index: self.clone(),
            pending: Vec::new(),
            max_docs,
        }))
    }

    fn delete_index(&self) -> Result<()> {
        self.call_done(&IndexRequest::DeleteIndex)
    }
}

impl IndexSearcher for RemoteIndex {
    fn search_request(&self, request: &SearchRequest) -> Result<TopDocs> {
        match self.call(&IndexRequest::Search(request.clone()))? {
            IndexResponse::TopDocs(top) => Ok(top),
            other => Err(unexpected(&other)),
        }
    }

    fn doc(&self, id: &DocumentId) -> Result<Option<IndexDocument>> {
        match self.call(&IndexRequest::Doc { id: id.clone() })? {
            IndexResponse::Doc(doc) => Ok(doc),
            other => Err(unexpected(&other)),
        }
    }

    fn doc_freq(&self, field: &str, term: &str) -> Result<usize> {
        self.call_count(&IndexRequest::DocFreq {
            field: field.to_string(),
            term: term.to_string(),
        })
    }

    fn reader(&self) -> &dyn IndexReader {
        self
    }
}

impl IndexReader for RemoteIndex {
    fn num_docs(&self) -> Result<usize> {
        self.call_count(&IndexRequest::NumDocs)
    }

    fn num_deleted_docs(&self) -> Result<usize> {
        self.call_count(&IndexRequest::NumDeletedDocs)
    }

    fn terms(&self, field: &str, start: &str) -> Result<Box<dyn TermEnumeration>> {
        match self.call(&IndexRequest::Terms {
            field: field.to_string(),
            start: start.to_string(),
        })? {
            IndexResponse::Terms(terms) => Ok(Box::new(TermList::new(terms))),
            other => Err(unexpected(&other)),
        }
    }
}

/// Buffers additions locally and ships them on flush.
#[derive(Debug)]
struct RemoteIndexer {
    index: RemoteIndex,
    pending: Vec<IndexDocument>,
    max_docs: usize,
}

impl Indexer for RemoteIndexer {
    fn add_documents(&mut self, docs: Vec<IndexDocument>) -> Result<()> {
        self.max_docs += docs.len();
        self.pending.extend(docs);
        Ok(())
    }

    fn delete_documents_in_field(&mut self, ids: &[ItemId], field: &str) -> Result<()> {
        self.flush()?;
        self.index.call_done(&IndexRequest::Delete {
            ids: ids.to_vec(),
            field: field.to_string(),
        })?;
        self.max_docs = self.index.num_docs()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let docs = std::mem::take(&mut self.pending);
        self.index.call_done(&IndexRequest::Add { docs })
    }

    fn compact(&mut self) -> Result<()> {
        self.flush()?;
        self.index.call_done(&IndexRequest::Compact)
    }

    fn max_docs(&self) -> usize {
        self.max_docs
    }

    fn close(&mut self) -> Result<()> {
        self.flush()
    }
}

/// Serves a [`MemoryIndex`] over an in-process JSON round trip.
#[derive(Debug, Clone, Default)]
pub struct LoopbackTransport {
    index: MemoryIndex,
}

impl LoopbackTransport {
    pub fn new(index: MemoryIndex) -> Self {
        LoopbackTransport { index }
    }

    fn handle(&self, request: IndexRequest) -> Result<IndexResponse> {
        let searcher = self.index.searcher();
        Ok(match request {
            IndexRequest::Search(req) => IndexResponse::TopDocs(searcher.search_request(&req)?),
            IndexRequest::Doc { id } => IndexResponse::Doc(searcher.doc(&id)?),
            IndexRequest::DocFreq { field, term } => {
                IndexResponse::Count(searcher.doc_freq(&field, &term)?)
            }
            IndexRequest::NumDocs => IndexResponse::Count(searcher.num_docs()?),
            IndexRequest::NumDeletedDocs => IndexResponse::Count(searcher.num_deleted_docs()?),
            IndexRequest::Terms { field, start } => {
                let mut terms = searcher.terms(&field, &start)?;
                let mut all = Vec::new();
                while let Some(t) = terms.next_term() {
                    all.push(t);
                }
                terms.close()?;
                IndexResponse::Terms(all)
            }
            IndexRequest::Add { docs } => {
                let mut writer = self.index.indexer();
                writer.add_documents(docs)?;
                writer.close()?;
                IndexResponse::Done
            }
            IndexRequest::Delete { ids, field } => {
                let mut writer = self.index.indexer();
                writer.delete_documents_in_field(&ids, &field)?;
                writer.close()?;
                IndexResponse::Done
            }
            IndexRequest::Compact => {
                self.index.indexer().compact()?;
                IndexResponse::Done
            }
            IndexRequest::DeleteIndex => {
                self.index.delete_index()?;
                IndexResponse::Done
            }
        })
    }
}

impl IndexTransport for LoopbackTransport {
    fn round_trip(&self, request: &str) -> Result<String> {
        let request: IndexRequest = serde_json::from_str(request)?;
        let response = self
            .handle(request)
            .unwrap_or_else(|e| IndexResponse::Error(e.to_string()));
        Ok(serde_json::to_string(&response)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexQuery, FIELD_CONTENT};
    use crate::mailbox::ItemType;
    use crate::sort::SortBy;

    fn docs() -> Vec<IndexDocument> {
        vec![
            IndexDocument::new(1, ItemType::Message, None).with_text(FIELD_CONTENT, "alpha beta"),
            IndexDocument::new(2, ItemType::Message, None).with_text(FIELD_CONTENT, "beta gamma"),
        ]
    }

    fn remote(local: &MemoryIndex) -> RemoteIndex {
        RemoteIndex::new(Arc::new(LoopbackTransport::new(local.clone())))
    }

    #[test]
    fn test_remote_matches_embedded() {
        let local = MemoryIndex::with_documents(docs());
        let remote = remote(&local);
        let query = IndexQuery::term(FIELD_CONTENT, "beta");

        for sort in [None, Some(SortBy::DateDesc)] {
            let a = local.searcher().search(&query, 10, None, sort).unwrap();
            let b = remote.search(&query, 10, None, sort).unwrap();
            assert_eq!(a.total_hits, b.total_hits);
            assert_eq!(a.score_docs.len(), b.score_docs.len());
            for (x, y) in a.score_docs.iter().zip(&b.score_docs) {
                assert_eq!(x.doc, y.doc);
                assert_eq!(x.score.is_nan(), y.score.is_nan());
            }
        }
        assert_eq!(remote.doc_freq(FIELD_CONTENT, "beta").unwrap(), 2);
        assert_eq!(remote.num_docs().unwrap(), 2);
    }

    #[test]
    fn test_remote_writer() {
        let local = MemoryIndex::new();
        let remote = remote(&local);
        let mut writer = remote.open_indexer().unwrap();
        writer.add_documents(docs()).unwrap();
        assert_eq!(writer.max_docs(), 2);
        assert_eq!(remote.num_docs().unwrap(), 0);
        writer.close().unwrap();
        assert_eq!(remote.num_docs().unwrap(), 2);

        writer.delete_documents(&[1]).unwrap();
        assert_eq!(writer.max_docs(), 1);
        assert_eq!(remote.num_deleted_docs().unwrap(), 1);
        writer.compact().unwrap();
        assert_eq!(remote.num_deleted_docs().unwrap(), 0);

        let mut terms = remote.terms(FIELD_CONTENT, "").unwrap();
        assert_eq!(terms.next_term().as_deref(), Some("beta"));
    }

    #[test]
    fn test_server_error_is_service_error() {
        #[derive(Debug)]
        struct Failing;
        impl IndexTransport for Failing {
            fn round_trip(&self, _request: &str) -> Result<String> {
                Ok(serde_json::to_string(&IndexResponse::Error("index closed".into()))?)
            }
        }
        let remote = RemoteIndex::new(Arc::new(Failing));
        let err = remote.num_docs().unwrap_err();
        assert!(!err.is_io());
        assert!(err.to_string().contains("index closed"));
    }
}
