//! JSON fixtures: a mailbox, its index, canned remote accounts and a plan.
//!
//! ```json
//! {
//!   "account": "alice",
//!   "items": [{ "id": 1, "item_type": "message", "date": 10, "tags": ["work"] }],
//!   "documents": [{ "item_id": 1, "content": "quarterly invoice" }],
//!   "remote": { "bob": [{ "account_id": "bob", "item_id": 7, "item_type": "message" }] },
//!   "plan": { "and": [{ "term": { "value": "invoice" } }, { "tag": "work" }] }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};
use crate::hit::ProxiedItem;
use crate::index::{
    IndexDocument, MemoryIndex, FIELD_CONTENT, FIELD_SORT_DATE, FIELD_SORT_NAME, FIELD_SORT_SIZE,
    FIELD_SORT_SUBJECT,
};
use crate::mailbox::{Folder, FolderId, ItemId, ItemType, MailItem, MailboxId, MemoryMailbox};
use crate::query::{
    DbOp, FolderScope, HitFilter, ProxiedStream, QueryOperation, RemoteProxy, SearchParams,
    StaticStream,
};

/// A planner tree as written in a fixture.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanNode {
    And(Vec<PlanNode>),
    Or(Vec<PlanNode>),
    /// An index term; `field` defaults to the body text.
    Term {
        #[serde(default = "content_field")]
        field: String,
        value: String,
    },
    InFolder(Vec<FolderId>),
    RemoteFolder { account: String, folder: FolderId },
    Tag(String),
    IsLocal,
    IsRemote,
    #[default]
    NoTerm,
    NoResults,
    ExcludeTypes {
        types: Vec<ItemType>,
        of: Box<PlanNode>,
    },
}

fn content_field() -> String {
    FIELD_CONTENT.to_string()
}

impl PlanNode {
    pub fn to_operation(&self) -> QueryOperation {
        match self {
            PlanNode::And(nodes) => {
                QueryOperation::intersection(nodes.iter().map(PlanNode::to_operation).collect())
            }
            PlanNode::Or(nodes) => {
                QueryOperation::union(nodes.iter().map(PlanNode::to_operation).collect())
            }
            PlanNode::Term { field, value } => QueryOperation::term(field, value),
            PlanNode::InFolder(folders) => {
                QueryOperation::Db(DbOp::in_folders(folders.iter().copied()))
            }
            PlanNode::RemoteFolder { account, folder } => {
                QueryOperation::Db(DbOp::remote_folder(account.as_str(), *folder))
            }
            PlanNode::Tag(tag) => QueryOperation::Db(DbOp::tagged(tag.as_str())),
            PlanNode::IsLocal => QueryOperation::Db(DbOp::scoped(FolderScope::LocalOnly)),
            PlanNode::IsRemote => QueryOperation::Db(DbOp::scoped(FolderScope::RemoteOnly)),
            PlanNode::NoTerm => QueryOperation::no_term(),
            PlanNode::NoResults => QueryOperation::no_results(),
            PlanNode::ExcludeTypes { types, of } => QueryOperation::filter(
                of.to_operation(),
                HitFilter::exclude_types(types.iter().copied()),
            ),
        }
    }
}

/// Index content for one item or one of its parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureDocument {
    pub item_id: ItemId,
    #[serde(default)]
    pub part: Option<String>,
    #[serde(default)]
    pub content: String,
    /// Extra tokenized fields, such as `subject` or `from`.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl FixtureDocument {
    /// The indexed form, with sort fields copied from the backing item.
    pub fn to_index_document(&self, item: Option<&MailItem>) -> IndexDocument {
        let item_type = item.map_or(ItemType::Message, |i| i.item_type);
        let mut doc = IndexDocument::new(self.item_id, item_type, self.part.as_deref())
            .with_text(FIELD_CONTENT, &self.content);
        for (field, text) in &self.fields {
            doc = doc.with_text(field, text);
        }
        if let Some(item) = item {
            doc = doc
                .with_field(FIELD_SORT_DATE, item.date.to_string())
                .with_field(FIELD_SORT_SIZE, item.size.to_string())
                .with_field(FIELD_SORT_SUBJECT, item.subject.as_str())
                .with_field(FIELD_SORT_NAME, item.display_name());
        }
        doc
    }
}

/// Everything one `plan` or `search` invocation runs against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default = "default_account")]
    pub account: String,
    #[serde(default = "default_mailbox_id")]
    pub mailbox_id: MailboxId,
    /// Folders beyond the system Inbox, Trash and Junk.
    #[serde(default)]
    pub folders: Vec<Folder>,
    #[serde(default)]
    pub items: Vec<MailItem>,
    #[serde(default)]
    pub documents: Vec<FixtureDocument>,
    /// Canned results served for each remote account.
    #[serde(default)]
    pub remote: BTreeMap<String, Vec<ProxiedItem>>,
    #[serde(default)]
    pub params: SearchParams,
    #[serde(default)]
    pub plan: PlanNode,
}

fn default_account() -> String {
    "local".to_string()
}

fn default_mailbox_id() -> MailboxId {
    1
}

impl Fixture {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let fixture: Fixture = serde_json::from_str(&text)?;
        log::debug!(
            "Loaded fixture {}: {} items, {} documents, {} remote accounts",
            path.as_ref().display(),
            fixture.items.len(),
            fixture.documents.len(),
            fixture.remote.len()
        );
        Ok(fixture)
    }

    pub fn mailbox(&self) -> Arc<MemoryMailbox> {
        let mailbox = MemoryMailbox::new(self.mailbox_id, self.account.as_str());
        for folder in &self.folders {
            mailbox.add_folder(folder.clone());
        }
        for item in &self.items {
            mailbox.add_item(item.clone());
        }
        Arc::new(mailbox)
    }

    pub fn index(&self) -> MemoryIndex {
        let docs = self
            .documents
            .iter()
            .map(|doc| {
                let item = self.items.iter().find(|i| i.id == doc.item_id);
                doc.to_index_document(item)
            })
            .collect();
        MemoryIndex::with_documents(docs)
    }

    pub fn proxy(&self) -> FixtureProxy {
        FixtureProxy {
            accounts: self.remote.clone(),
        }
    }
}

/// Serves each remote account's canned items, sorted and truncated to the
/// requested page.
#[derive(Debug, Clone, Default)]
pub struct FixtureProxy {
    accounts: BTreeMap<String, Vec<ProxiedItem>>,
}

impl RemoteProxy for FixtureProxy {
    fn search(
        &self,
        account_id: &str,
        query: &str,
        params: &SearchParams,
    ) -> Result<Box<dyn ProxiedStream>> {
        let items = self
            .accounts
            .get(account_id)
            .ok_or_else(|| SearchError::unknown_account(account_id))?;
        log::debug!("Serving {} canned hits for {account_id}: {query:?}", items.len());

        let mut items = items.clone();
        items.sort_by(|a, b| params.sort.compare(&a.sort_value, &b.sort_value));
        items.truncate(params.limit);
        Ok(Box::new(StaticStream::new(items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::{SortBy, SortValue};

    fn parse(json: &str) -> Fixture {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_plan_nodes_parse() {
        let fixture = parse(
            r#"{
                "plan": { "or": [
                    { "and": [{ "term": { "value": "invoice" } }, { "tag": "work" }] },
                    { "remote_folder": { "account": "bob", "folder": 9 } },
                    "is_local",
                    { "exclude_types": { "types": ["contact"], "of": "no_term" } }
                ] }
            }"#,
        );
        let PlanNode::Or(children) = &fixture.plan else {
            panic!("Expected an OR node");
        };
        assert_eq!(children.len(), 4);
        assert_eq!(children[2], PlanNode::IsLocal);
        assert_eq!(
            children[0],
            PlanNode::And(vec![
                PlanNode::Term {
                    field: FIELD_CONTENT.to_string(),
                    value: "invoice".to_string()
                },
                PlanNode::Tag("work".to_string()),
            ])
        );
        assert_eq!(fixture.account, "local");
    }

    #[test]
    fn test_plan_node_builds_operations() {
        let op = PlanNode::And(vec![PlanNode::Tag("a".into()), PlanNode::NoResults]).to_operation();
        assert_eq!(op.kind_name(), "intersection");

        let op = PlanNode::RemoteFolder {
            account: "bob".into(),
            folder: 9,
        }
        .to_operation();
        assert!(op.query_targets().has_external_targets());
    }

    #[test]
    fn test_index_documents_carry_sort_fields() {
        let fixture = parse(
            r#"{
                "items": [{ "id": 5, "item_type": "message", "date": 42, "subject": "Hi" }],
                "documents": [{ "item_id": 5, "content": "Hello world" }]
            }"#,
        );
        let doc = fixture.documents[0].to_index_document(fixture.items.first());
        assert_eq!(doc.get(FIELD_SORT_DATE), Some("42"));
        assert_eq!(doc.get(FIELD_SORT_SUBJECT), Some("Hi"));
        assert_eq!(doc.terms(FIELD_CONTENT), ["hello", "world"]);
    }

    #[test]
    fn test_proxy_sorts_and_truncates() {
        let item = |id: ItemId, date: i64| ProxiedItem {
            account_id: "bob".into(),
            item_id: id,
            item_type: ItemType::Message,
            sort_value: SortValue::Int(date),
            name: String::new(),
            fields: Default::default(),
        };
        let proxy = FixtureProxy {
            accounts: BTreeMap::from([("bob".to_string(), vec![item(1, 10), item(2, 30), item(3, 20)])]),
        };
        let params = SearchParams {
            sort: SortBy::DateDesc,
            limit: 2,
            ..Default::default()
        };
        let mut stream = proxy.search("bob", "", &params).unwrap();
        assert_eq!(stream.next_item().unwrap().map(|i| i.item_id), Some(2));
        assert_eq!(stream.next_item().unwrap().map(|i| i.item_id), Some(3));
        assert_eq!(stream.next_item().unwrap(), None);

        let err = proxy.search("carol", "", &params).unwrap_err();
        assert!(!err.is_io());
    }
}
