//! Mail items and the item-store interface.
//!
//! The relational store that holds item metadata lives outside this crate;
//! [`MailboxStore`] is the surface the query tree consumes. [`MemoryMailbox`]
//! is a complete in-memory store used by the command-line tool and tests.

use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::query::constraints::DbConstraints;
use crate::sort::{SortBy, SortKey, SortValue};

pub type ItemId = i32;
pub type FolderId = i32;
pub type MailboxId = i32;

/// Marks a slot in a batch lookup that is already loaded and must be skipped.
pub const SKIP_ITEM_ID: ItemId = -1;

pub const ID_FOLDER_INBOX: FolderId = 2;
pub const ID_FOLDER_TRASH: FolderId = 3;
pub const ID_FOLDER_SPAM: FolderId = 4;

/// Kinds of stored items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    /// Any type; used as a lookup wildcard.
    Unknown,
    Message,
    Conversation,
    Contact,
    Note,
    Appointment,
    Task,
    Document,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Unknown => "unknown",
            ItemType::Message => "message",
            ItemType::Conversation => "conversation",
            ItemType::Contact => "contact",
            ItemType::Note => "note",
            ItemType::Appointment => "appointment",
            ItemType::Task => "task",
            ItemType::Document => "document",
        }
    }

    /// Parse the name produced by [`ItemType::as_str`].
    pub fn parse(s: &str) -> Option<ItemType> {
        Some(match s {
            "unknown" => ItemType::Unknown,
            "message" => ItemType::Message,
            "conversation" => ItemType::Conversation,
            "contact" => ItemType::Contact,
            "note" => ItemType::Note,
            "appointment" => ItemType::Appointment,
            "task" => ItemType::Task,
            "document" => ItemType::Document,
            _ => return None,
        })
    }

    /// Whether `self` satisfies a lookup for `wanted`.
    pub fn accepts(&self, wanted: ItemType) -> bool {
        wanted == ItemType::Unknown || *self == wanted
    }
}

/// The backing record of a hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailItem {
    pub id: ItemId,
    pub item_type: ItemType,
    #[serde(default = "default_folder")]
    pub folder_id: FolderId,
    #[serde(default)]
    pub conversation_id: Option<ItemId>,
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub deleted: bool,
}

fn default_folder() -> FolderId {
    ID_FOLDER_INBOX
}

impl MailItem {
    /// A message in the inbox with empty metadata.
    pub fn message(id: ItemId) -> Self {
        MailItem {
            id,
            item_type: ItemType::Message,
            folder_id: ID_FOLDER_INBOX,
            conversation_id: None,
            date: 0,
            size: 0,
            subject: String::new(),
            sender: String::new(),
            tags: Vec::new(),
            deleted: false,
        }
    }

    /// The name shown for this item and used by name sorts.
    pub fn display_name(&self) -> &str {
        match self.item_type {
            ItemType::Message | ItemType::Conversation => &self.sender,
            _ => &self.subject,
        }
    }

    /// The cached sort value for `sort`.
    pub fn sort_value(&self, sort: SortBy) -> SortValue {
        match sort.key() {
            SortKey::None | SortKey::Score => SortValue::None,
            SortKey::Date => SortValue::Int(self.date),
            SortKey::Size => SortValue::Int(self.size as i64),
            SortKey::Subject => SortValue::Text(self.subject.clone()),
            SortKey::Name => SortValue::Text(self.display_name().to_string()),
        }
    }
}

/// What kind of folder a folder is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderKind {
    Regular,
    Trash,
    Spam,
    /// A link to a folder in another account's mailbox.
    Mountpoint {
        owner_account: String,
        remote_folder_id: FolderId,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: FolderId,
    pub name: String,
    #[serde(default = "regular")]
    pub kind: FolderKind,
    #[serde(default)]
    pub item_count: usize,
}

fn regular() -> FolderKind {
    FolderKind::Regular
}

impl Folder {
    pub fn new<S: Into<String>>(id: FolderId, name: S, kind: FolderKind) -> Self {
        Folder {
            id,
            name: name.into(),
            kind,
            item_count: 0,
        }
    }

    pub fn is_mountpoint(&self) -> bool {
        matches!(self.kind, FolderKind::Mountpoint { .. })
    }
}

/// A request for a page of rows from the item store.
#[derive(Debug, Clone)]
pub struct DbSearch<'a> {
    pub constraints: &'a DbConstraints,
    pub sort: SortBy,
    /// Restrict to these types; empty means any.
    pub types: &'a [ItemType],
    pub offset: usize,
    pub limit: usize,
    /// Search the archive of deleted items instead of the live mailbox.
    pub in_dumpster: bool,
}

/// One row returned by the item store.
#[derive(Debug, Clone, PartialEq)]
pub struct DbRow {
    pub id: ItemId,
    pub item_type: ItemType,
    pub sort_value: SortValue,
    pub folder_id: FolderId,
}

/// The relational store and batch lookup of one mailbox.
pub trait MailboxStore: Send + Sync + Debug {
    fn id(&self) -> MailboxId;

    /// The account owning this mailbox.
    fn account_id(&self) -> &str;

    fn folders(&self) -> Vec<Folder>;

    fn folder(&self, id: FolderId) -> Option<Folder> {
        self.folders().into_iter().find(|f| f.id == id)
    }

    fn spam_folder_id(&self) -> FolderId {
        ID_FOLDER_SPAM
    }

    fn trash_folder_ids(&self) -> Vec<FolderId> {
        self.folders()
            .into_iter()
            .filter(|f| f.kind == FolderKind::Trash)
            .map(|f| f.id)
            .collect()
    }

    /// Resolve items by id.
    ///
    /// The result is positionally aligned with `ids`; slots holding
    /// [`SKIP_ITEM_ID`] and misses come back as `None`.
    fn items_by_id(
        &self,
        ids: &[ItemId],
        item_type: ItemType,
        in_dumpster: bool,
    ) -> Result<Vec<Option<MailItem>>>;

    /// Fetch one page of matching rows in the requested order.
    fn search(&self, request: &DbSearch<'_>) -> Result<Vec<DbRow>>;

    /// Count the rows matching `constraints`.
    fn count(&self, constraints: &DbConstraints, in_dumpster: bool) -> Result<usize>;
}

/// An item store held entirely in memory.
#[derive(Debug)]
pub struct MemoryMailbox {
    id: MailboxId,
    account_id: String,
    folders: RwLock<Vec<Folder>>,
    items: RwLock<Vec<MailItem>>,
    dumpster: RwLock<Vec<MailItem>>,
    lookups: AtomicUsize,
}

impl MemoryMailbox {
    /// Create a mailbox with the system Inbox, Trash and Spam folders.
    pub fn new<S: Into<String>>(id: MailboxId, account_id: S) -> Self {
        MemoryMailbox {
            id,
            account_id: account_id.into(),
            folders: RwLock::new(vec![
                Folder::new(ID_FOLDER_INBOX, "Inbox", FolderKind::Regular),
                Folder::new(ID_FOLDER_TRASH, "Trash", FolderKind::Trash),
                Folder::new(ID_FOLDER_SPAM, "Junk", FolderKind::Spam),
            ]),
            items: RwLock::new(Vec::new()),
            dumpster: RwLock::new(Vec::new()),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn add_folder(&self, folder: Folder) {
        let mut folders = self.folders.write();
        folders.retain(|f| f.id != folder.id);
        folders.push(folder);
    }

    pub fn add_item(&self, item: MailItem) {
        let mut items = self.items.write();
        items.retain(|i| i.id != item.id);
        items.push(item);
    }

    pub fn add_dumpster_item(&self, item: MailItem) {
        self.dumpster.write().push(item);
    }

    /// Number of `items_by_id` calls served so far.
    pub fn batch_lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// A snapshot of every live item.
    pub fn items(&self) -> Vec<MailItem> {
        self.items.read().clone()
    }
}

impl MailboxStore for MemoryMailbox {
    fn id(&self) -> MailboxId {
        self.id
    }

    fn account_id(&self) -> &str {
        &self.account_id
    }

    fn folders(&self) -> Vec<Folder> {
        self.folders.read().clone()
    }

    fn items_by_id(
        &self,
        ids: &[ItemId],
        item_type: ItemType,
        in_dumpster: bool,
    ) -> Result<Vec<Option<MailItem>>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let source = if in_dumpster {
            self.dumpster.read()
        } else {
            self.items.read()
        };
        Ok(ids
            .iter()
            .map(|&id| {
                if id == SKIP_ITEM_ID {
                    return None;
                }
                source
                    .iter()
                    .find(|i| i.id == id && i.item_type.accepts(item_type))
                    .cloned()
            })
            .collect())
    }

    fn search(&self, request: &DbSearch<'_>) -> Result<Vec<DbRow>> {
        let source = if request.in_dumpster {
            self.dumpster.read()
        } else {
            self.items.read()
        };
        let mut rows: Vec<DbRow> = source
            .iter()
            .filter(|i| request.types.is_empty() || request.types.contains(&i.item_type))
            .filter(|i| request.constraints.matches(i))
            .map(|i| DbRow {
                id: i.id,
                item_type: i.item_type,
                sort_value: i.sort_value(request.sort),
                folder_id: i.folder_id,
            })
            .collect();
        // Ties break on id so paging is stable.
        rows.sort_by(|a, b| {
            request
                .sort
                .compare(&a.sort_value, &b.sort_value)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(rows
            .into_iter()
            .skip(request.offset)
            .take(request.limit)
            .collect())
    }

    fn count(&self, constraints: &DbConstraints, in_dumpster: bool) -> Result<usize> {
        let source = if in_dumpster {
            self.dumpster.read()
        } else {
            self.items.read()
        };
        Ok(source.iter().filter(|i| constraints.matches(i)).count())
    }
}
