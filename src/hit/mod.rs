//! Lazily-loaded result objects.
//!
//! Every matched item surfaces as a [`Hit`] stored in a [`HitArena`] owned by
//! the result stream. Hits refer to one another (part to message, message to
//! parts, conversation to messages) through [`HitId`] keys into the arena
//! rather than through references, and the arena hands out one hit per
//! logical item so that the same message reached by two branches of a plan
//! is the same hit.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};
use crate::mailbox::{ItemId, ItemType, MailItem, MailboxId, MailboxStore};
use crate::sort::{SortBy, SortValue};

/// Handle to the mailbox a local hit belongs to.
pub type MailboxHandle = Arc<dyn MailboxStore>;

/// Arena shared by every stage of one result stream.
pub type SharedArena = Arc<Mutex<HitArena>>;

/// Stable key of a hit inside its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HitId(u32);

impl HitId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for HitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An item relayed from another server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxiedItem {
    pub account_id: String,
    pub item_id: ItemId,
    pub item_type: ItemType,
    #[serde(default)]
    pub sort_value: SortValue,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// The variant-specific part of a hit.
#[derive(Debug, Clone)]
pub enum HitKind {
    Message {
        /// Matched parts keyed by part name.
        parts: AHashMap<String, HitId>,
    },
    MessagePart {
        part: String,
        /// The containing message, created on first access.
        message: Option<HitId>,
    },
    Conversation {
        /// Member messages in insertion order.
        messages: Vec<(ItemId, HitId)>,
    },
    Contact,
    Note,
    CalendarItem,
    Document,
    Proxied(ProxiedItem),
    ProxiedContact(ProxiedItem),
}

impl HitKind {
    fn tag(&self) -> &'static str {
        match self {
            HitKind::Message { .. } => "MSG",
            HitKind::MessagePart { .. } => "MP",
            HitKind::Conversation { .. } => "CONV",
            HitKind::Contact => "CONTACT",
            HitKind::Note => "NOTE",
            HitKind::CalendarItem => "CAL",
            HitKind::Document => "DOC",
            HitKind::Proxied(_) => "PROXY",
            HitKind::ProxiedContact(_) => "PROXYCONTACT",
        }
    }

    /// The item type a batch lookup should ask for.
    pub fn lookup_type(&self) -> ItemType {
        match self {
            HitKind::Message { .. } | HitKind::MessagePart { .. } => ItemType::Message,
            HitKind::Conversation { .. } => ItemType::Conversation,
            HitKind::Contact => ItemType::Contact,
            HitKind::Note => ItemType::Note,
            HitKind::Document => ItemType::Document,
            HitKind::CalendarItem => ItemType::Unknown,
            HitKind::Proxied(p) | HitKind::ProxiedContact(p) => p.item_type,
        }
    }
}

/// One matched item.
pub struct Hit {
    mailbox: Option<MailboxHandle>,
    item_id: ItemId,
    kind: HitKind,
    item: Option<MailItem>,
    sort_value: SortValue,
    name: Option<String>,
    score: f32,
}

impl Hit {
    fn local(mailbox: MailboxHandle, item_id: ItemId, kind: HitKind, sort_value: SortValue) -> Self {
        Hit {
            mailbox: Some(mailbox),
            item_id,
            kind,
            item: None,
            sort_value,
            name: None,
            score: f32::NAN,
        }
    }

    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    pub fn kind(&self) -> &HitKind {
        &self.kind
    }

    pub fn mailbox(&self) -> Option<&MailboxHandle> {
        self.mailbox.as_ref()
    }

    pub fn mailbox_id(&self) -> Option<MailboxId> {
        self.mailbox.as_ref().map(|m| m.id())
    }

    /// True for hits produced by another server.
    pub fn is_proxied(&self) -> bool {
        matches!(self.kind, HitKind::Proxied(_) | HitKind::ProxiedContact(_))
    }

    pub fn is_local(&self) -> bool {
        !self.is_proxied()
    }

    /// True if both hits refer to the same stored item.
    pub fn same_item(&self, other: &Hit) -> bool {
        if self.item_id != other.item_id {
            return false;
        }
        match (self.proxied(), other.proxied()) {
            (Some(a), Some(b)) => a.account_id == b.account_id,
            (None, None) => self.mailbox_id() == other.mailbox_id(),
            _ => false,
        }
    }

    /// The item type, from the backing item when it is loaded.
    pub fn item_type(&self) -> ItemType {
        if let Some(item) = &self.item {
            return item.item_type;
        }
        match &self.kind {
            HitKind::CalendarItem => ItemType::Appointment,
            kind => kind.lookup_type(),
        }
    }

    pub fn is_message_or_part(&self) -> bool {
        matches!(self.kind, HitKind::Message { .. } | HitKind::MessagePart { .. })
    }

    pub fn sort_value(&self) -> &SortValue {
        &self.sort_value
    }

    /// Relevance score, NaN when scoring was not performed.
    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn set_score(&mut self, score: f32) {
        if self.score.is_nan() || score > self.score {
            self.score = score;
        }
    }

    /// The part name of a message-part hit.
    pub fn part_name(&self) -> Option<&str> {
        match &self.kind {
            HitKind::MessagePart { part, .. } => Some(part),
            _ => None,
        }
    }

    /// Part hits matched within a message hit, sorted by part name.
    pub fn matched_parts(&self) -> Vec<(String, HitId)> {
        match &self.kind {
            HitKind::Message { parts } => {
                let mut parts: Vec<(String, HitId)> =
                    parts.iter().map(|(k, v)| (k.clone(), *v)).collect();
                parts.sort();
                parts
            }
            _ => Vec::new(),
        }
    }

    /// Member messages of a conversation hit.
    pub fn conversation_messages(&self) -> &[(ItemId, HitId)] {
        match &self.kind {
            HitKind::Conversation { messages } => messages,
            _ => &[],
        }
    }

    /// The relayed data of a proxied hit.
    pub fn proxied(&self) -> Option<&ProxiedItem> {
        match &self.kind {
            HitKind::Proxied(p) | HitKind::ProxiedContact(p) => Some(p),
            _ => None,
        }
    }

    pub fn item_is_loaded(&self) -> bool {
        self.item.is_some() || self.is_proxied()
    }

    /// The backing item, if it has been resolved.
    pub fn item(&self) -> Option<&MailItem> {
        self.item.as_ref()
    }

    /// Attach a resolved backing item.
    ///
    /// # Panics
    ///
    /// Panics on proxied hits, whose backing data comes from another server.
    pub fn set_item(&mut self, item: MailItem) {
        assert!(!self.is_proxied(), "cannot attach a local item to a proxied hit");
        if self.name.is_none() {
            self.name = Some(item.display_name().to_string());
        }
        self.item = Some(item);
    }

    /// Resolve the backing item on demand. Memoized after the first success.
    pub fn load_item(&mut self) -> Result<Option<&MailItem>> {
        if self.is_proxied() {
            return Ok(None);
        }
        if self.item.is_none() {
            let mailbox = match &self.mailbox {
                Some(m) => Arc::clone(m),
                None => return Ok(None),
            };
            let found = mailbox
                .items_by_id(&[self.item_id], self.kind.lookup_type(), false)?
                .into_iter()
                .next()
                .flatten()
                .ok_or_else(|| {
                    SearchError::service(format!(
                        "no such item {} in mailbox {}",
                        self.item_id,
                        mailbox.id()
                    ))
                })?;
            self.set_item(found);
        }
        Ok(self.item.as_ref())
    }

    /// Cached display name.
    pub fn name(&self) -> Option<&str> {
        if let Some(p) = self.proxied() {
            return Some(&p.name);
        }
        self.name.as_deref()
    }
}

impl fmt::Debug for Hit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hit")
            .field("mailbox", &self.mailbox_id())
            .field("item_id", &self.item_id)
            .field("kind", &self.kind)
            .field("loaded", &self.item.is_some())
            .field("sort_value", &self.sort_value)
            .finish()
    }
}

impl fmt::Display for Hit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            HitKind::MessagePart { part, .. } => {
                write!(f, "{}({}/{})", self.kind.tag(), self.item_id, part)
            }
            HitKind::Proxied(p) | HitKind::ProxiedContact(p) => {
                write!(f, "{}({}:{})", self.kind.tag(), p.account_id, p.item_id)
            }
            _ => write!(f, "{}({})", self.kind.tag(), self.item_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum HitKey {
    Item(MailboxId, ItemId, &'static str),
    Part(MailboxId, ItemId, String),
    Proxied(String, ItemId),
}

/// Owns every hit produced by one result stream.
#[derive(Debug, Default)]
pub struct HitArena {
    hits: Vec<Hit>,
    by_key: AHashMap<HitKey, HitId>,
}

impl HitArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh arena behind a shared handle.
    pub fn shared() -> SharedArena {
        Arc::new(Mutex::new(HitArena::new()))
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// # Panics
    ///
    /// Panics if `id` does not belong to this arena.
    pub fn get(&self, id: HitId) -> &Hit {
        &self.hits[id.index()]
    }

    pub fn get_mut(&mut self, id: HitId) -> &mut Hit {
        &mut self.hits[id.index()]
    }

    fn intern(&mut self, key: HitKey, make: impl FnOnce() -> Hit) -> HitId {
        if let Some(id) = self.by_key.get(&key) {
            return *id;
        }
        let id = HitId(self.hits.len() as u32);
        self.hits.push(make());
        self.by_key.insert(key, id);
        id
    }

    /// The message hit for an item, created on first request.
    pub fn message_hit(
        &mut self,
        mailbox: &MailboxHandle,
        item_id: ItemId,
        sort_value: SortValue,
    ) -> HitId {
        let key = HitKey::Item(mailbox.id(), item_id, "MSG");
        self.intern(key, || {
            Hit::local(
                Arc::clone(mailbox),
                item_id,
                HitKind::Message {
                    parts: AHashMap::new(),
                },
                sort_value,
            )
        })
    }

    /// The hit for one matched part of a message.
    pub fn part_hit(
        &mut self,
        mailbox: &MailboxHandle,
        item_id: ItemId,
        part: &str,
        sort_value: SortValue,
    ) -> HitId {
        let key = HitKey::Part(mailbox.id(), item_id, part.to_string());
        self.intern(key, || {
            Hit::local(
                Arc::clone(mailbox),
                item_id,
                HitKind::MessagePart {
                    part: part.to_string(),
                    message: None,
                },
                sort_value,
            )
        })
    }

    pub fn conversation_hit(
        &mut self,
        mailbox: &MailboxHandle,
        item_id: ItemId,
        sort_value: SortValue,
    ) -> HitId {
        let key = HitKey::Item(mailbox.id(), item_id, "CONV");
        self.intern(key, || {
            Hit::local(
                Arc::clone(mailbox),
                item_id,
                HitKind::Conversation {
                    messages: Vec::new(),
                },
                sort_value,
            )
        })
    }

    /// The hit for a non-part item of the given type.
    pub fn item_hit(
        &mut self,
        mailbox: &MailboxHandle,
        item_type: ItemType,
        item_id: ItemId,
        sort_value: SortValue,
    ) -> HitId {
        let kind = match item_type {
            ItemType::Message | ItemType::Unknown => {
                return self.message_hit(mailbox, item_id, sort_value);
            }
            ItemType::Conversation => {
                return self.conversation_hit(mailbox, item_id, sort_value);
            }
            ItemType::Contact => HitKind::Contact,
            ItemType::Note => HitKind::Note,
            ItemType::Appointment | ItemType::Task => HitKind::CalendarItem,
            ItemType::Document => HitKind::Document,
        };
        let key = HitKey::Item(mailbox.id(), item_id, kind.tag());
        self.intern(key, || Hit::local(Arc::clone(mailbox), item_id, kind, sort_value))
    }

    /// The hit for an item relayed from another server.
    pub fn proxied_hit(&mut self, item: ProxiedItem) -> HitId {
        let key = HitKey::Proxied(item.account_id.clone(), item.item_id);
        self.intern(key, || {
            let item_id = item.item_id;
            let sort_value = item.sort_value.clone();
            let kind = if item.item_type == ItemType::Contact {
                HitKind::ProxiedContact(item)
            } else {
                HitKind::Proxied(item)
            };
            Hit {
                mailbox: None,
                item_id,
                kind,
                item: None,
                sort_value,
                name: None,
                score: f32::NAN,
            }
        })
    }

    /// Record `message` as a member of conversation `conv`.
    pub fn add_conversation_message(&mut self, conv: HitId, message: HitId) {
        let item_id = self.get(message).item_id;
        if let HitKind::Conversation { messages } = &mut self.get_mut(conv).kind {
            if !messages.iter().any(|(id, _)| *id == item_id) {
                messages.push((item_id, message));
            }
        }
    }

    /// The message containing a part hit, created and linked on first access.
    ///
    /// # Panics
    ///
    /// Panics if `part` is not a message-part hit.
    pub fn message_of_part(&mut self, part: HitId) -> HitId {
        let (mailbox, item_id, part_name, existing, sort_value) = match &self.get(part).kind {
            HitKind::MessagePart { part: name, message } => {
                let hit = self.get(part);
                (
                    hit.mailbox.clone(),
                    hit.item_id,
                    name.clone(),
                    *message,
                    hit.sort_value.clone(),
                )
            }
            _ => panic!("{} is not a message part", self.get(part)),
        };
        if let Some(message) = existing {
            return message;
        }
        let mailbox = mailbox.unwrap_or_else(|| unreachable!("part hits are always local"));
        let message = self.message_hit(&mailbox, item_id, sort_value);
        if let HitKind::Message { parts } = &mut self.get_mut(message).kind {
            parts.insert(part_name, part);
        }
        if let HitKind::MessagePart { message: link, .. } = &mut self.get_mut(part).kind {
            *link = Some(message);
        }
        let score = self.get(part).score;
        if !score.is_nan() {
            self.get_mut(message).set_score(score);
        }
        message
    }

    /// The message hit a message or part hit stands for.
    pub fn canonical_message(&mut self, id: HitId) -> Option<HitId> {
        match self.get(id).kind {
            HitKind::Message { .. } => Some(id),
            HitKind::MessagePart { .. } => Some(self.message_of_part(id)),
            _ => None,
        }
    }

    /// Resolve the backing item of `id` on demand.
    pub fn load_item(&mut self, id: HitId) -> Result<()> {
        self.get_mut(id).load_item().map(|_| ())
    }

    /// Compare two hits under `sort`.
    pub fn compare(&self, sort: SortBy, a: HitId, b: HitId) -> Ordering {
        sort.compare(self.get(a).sort_value(), self.get(b).sort_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::MemoryMailbox;

    fn mailbox() -> (Arc<MemoryMailbox>, MailboxHandle) {
        let mbox = Arc::new(MemoryMailbox::new(1, "alice"));
        mbox.add_item(MailItem {
            subject: "hello".into(),
            sender: "bob".into(),
            ..MailItem::message(5)
        });
        let handle: MailboxHandle = mbox.clone();
        (mbox, handle)
    }

    #[test]
    fn test_message_hits_are_memoized() {
        let (_, handle) = mailbox();
        let mut arena = HitArena::new();
        let a = arena.message_hit(&handle, 5, SortValue::Int(1));
        let b = arena.item_hit(&handle, ItemType::Message, 5, SortValue::Int(2));
        assert_eq!(a, b);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_part_links_to_message() {
        let (_, handle) = mailbox();
        let mut arena = HitArena::new();
        let part_a = arena.part_hit(&handle, 5, "1", SortValue::None);
        let part_b = arena.part_hit(&handle, 5, "2", SortValue::None);

        let msg = arena.message_of_part(part_a);
        assert_eq!(arena.message_of_part(part_a), msg);
        assert_eq!(arena.message_of_part(part_b), msg);

        let parts: Vec<String> = arena
            .get(msg)
            .matched_parts()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(parts, vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_lazy_load() {
        let (mbox, handle) = mailbox();
        let mut arena = HitArena::new();
        let id = arena.message_hit(&handle, 5, SortValue::None);
        assert!(!arena.get(id).item_is_loaded());

        arena.load_item(id).unwrap();
        arena.load_item(id).unwrap();
        assert!(arena.get(id).item_is_loaded());
        assert_eq!(arena.get(id).name(), Some("bob"));
        assert_eq!(mbox.batch_lookup_count(), 1);
    }

    #[test]
    fn test_missing_item_is_service_error() {
        let (_, handle) = mailbox();
        let mut arena = HitArena::new();
        let id = arena.message_hit(&handle, 42, SortValue::None);
        let err = arena.load_item(id).unwrap_err();
        assert!(!err.is_io());
    }

    #[test]
    fn test_conversation_keeps_insertion_order() {
        let (_, handle) = mailbox();
        let mut arena = HitArena::new();
        let conv = arena.conversation_hit(&handle, 100, SortValue::None);
        let m2 = arena.message_hit(&handle, 2, SortValue::None);
        let m1 = arena.message_hit(&handle, 1, SortValue::None);
        arena.add_conversation_message(conv, m2);
        arena.add_conversation_message(conv, m1);
        arena.add_conversation_message(conv, m2);

        let ids: Vec<ItemId> = arena
            .get(conv)
            .conversation_messages()
            .iter()
            .map(|(id, _)| *id)
            .collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    #[should_panic(expected = "proxied")]
    fn test_proxied_hit_rejects_local_item() {
        let mut arena = HitArena::new();
        let id = arena.proxied_hit(ProxiedItem {
            account_id: "bob".into(),
            item_id: 7,
            item_type: ItemType::Message,
            sort_value: SortValue::None,
            name: String::new(),
            fields: BTreeMap::new(),
        });
        arena.get_mut(id).set_item(MailItem::message(7));
    }
}
