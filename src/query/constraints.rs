//! Relational predicates evaluated by the item store.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::mailbox::{FolderId, ItemId, ItemType, MailItem};

/// A conjunction of simple item predicates.
///
/// Empty sets place no restriction.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DbLeaf {
    /// The leaf can never match (e.g. it names a folder that does not exist).
    pub no_results: bool,
    pub folders: BTreeSet<FolderId>,
    pub exclude_folders: BTreeSet<FolderId>,
    pub tags: BTreeSet<String>,
    pub exclude_tags: BTreeSet<String>,
    pub item_ids: BTreeSet<ItemId>,
    pub exclude_item_ids: BTreeSet<ItemId>,
    pub date_after: Option<i64>,
    pub date_before: Option<i64>,
    pub types: BTreeSet<ItemType>,
    /// Spam/Trash scope has been decided for this leaf.
    pub spam_trash_set: bool,
}

impl DbLeaf {
    fn is_unrestricted(&self) -> bool {
        !self.no_results
            && self.folders.is_empty()
            && self.exclude_folders.is_empty()
            && self.tags.is_empty()
            && self.exclude_tags.is_empty()
            && self.item_ids.is_empty()
            && self.exclude_item_ids.is_empty()
            && self.date_after.is_none()
            && self.date_before.is_none()
            && self.types.is_empty()
    }

    fn matches(&self, item: &MailItem) -> bool {
        if self.no_results {
            return false;
        }
        if !self.folders.is_empty() && !self.folders.contains(&item.folder_id) {
            return false;
        }
        if self.exclude_folders.contains(&item.folder_id) {
            return false;
        }
        if !self.tags.iter().all(|t| item.tags.contains(t)) {
            return false;
        }
        if self.exclude_tags.iter().any(|t| item.tags.contains(t)) {
            return false;
        }
        if !self.item_ids.is_empty() && !self.item_ids.contains(&item.id) {
            return false;
        }
        if self.exclude_item_ids.contains(&item.id) {
            return false;
        }
        if self.date_after.is_some_and(|d| item.date <= d) {
            return false;
        }
        if self.date_before.is_some_and(|d| item.date >= d) {
            return false;
        }
        if !self.types.is_empty() && !self.types.contains(&item.item_type) {
            return false;
        }
        true
    }

    fn write_query_string(&self, out: &mut String) {
        if self.no_results {
            out.push_str("-is:anywhere");
            return;
        }
        let mut clauses: Vec<String> = Vec::new();
        if !self.folders.is_empty() {
            let ors: Vec<String> = self.folders.iter().map(|f| format!("inid:{f}")).collect();
            clauses.push(join_or(ors));
        }
        for f in &self.exclude_folders {
            clauses.push(format!("-inid:{f}"));
        }
        for t in &self.tags {
            clauses.push(format!("tag:\"{t}\""));
        }
        for t in &self.exclude_tags {
            clauses.push(format!("-tag:\"{t}\""));
        }
        if !self.item_ids.is_empty() {
            let ids: Vec<String> = self.item_ids.iter().map(|i| i.to_string()).collect();
            clauses.push(format!("item:{{{}}}", ids.join(",")));
        }
        for i in &self.exclude_item_ids {
            clauses.push(format!("-item:{i}"));
        }
        if let Some(d) = self.date_after {
            clauses.push(format!("after:{d}"));
        }
        if let Some(d) = self.date_before {
            clauses.push(format!("before:{d}"));
        }
        if !self.types.is_empty() {
            let ors: Vec<String> = self.types.iter().map(|t| format!("type:{}", t.as_str())).collect();
            clauses.push(join_or(ors));
        }
        if clauses.is_empty() {
            out.push_str("is:anywhere");
        } else {
            out.push_str(&clauses.join(" AND "));
        }
    }
}

fn join_or(mut parts: Vec<String>) -> String {
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        format!("({})", parts.join(" OR "))
    }
}

/// A boolean tree of store predicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DbConstraints {
    Leaf(DbLeaf),
    And(Vec<DbConstraints>),
    Or(Vec<DbConstraints>),
}

impl Default for DbConstraints {
    fn default() -> Self {
        DbConstraints::Leaf(DbLeaf::default())
    }
}

impl DbConstraints {
    /// AND `other` onto this tree.
    pub fn and(self, other: DbConstraints) -> DbConstraints {
        let mut children = match self {
            DbConstraints::And(children) => children,
            c => vec![c],
        };
        match other {
            DbConstraints::And(more) => children.extend(more),
            c => children.push(c),
        }
        DbConstraints::And(children)
    }

    /// OR `other` onto this tree.
    pub fn or(self, other: DbConstraints) -> DbConstraints {
        let mut children = match self {
            DbConstraints::Or(children) => children,
            c => vec![c],
        };
        match other {
            DbConstraints::Or(more) => children.extend(more),
            c => children.push(c),
        }
        DbConstraints::Or(children)
    }

    pub fn has_no_results(&self) -> bool {
        match self {
            DbConstraints::Leaf(leaf) => leaf.no_results,
            DbConstraints::And(children) => children.iter().any(|c| c.has_no_results()),
            DbConstraints::Or(children) => children.iter().all(|c| c.has_no_results()),
        }
    }

    /// True if this tree places no restriction at all.
    pub fn is_unrestricted(&self) -> bool {
        match self {
            DbConstraints::Leaf(leaf) => leaf.is_unrestricted(),
            DbConstraints::And(children) => children.iter().all(|c| c.is_unrestricted()),
            DbConstraints::Or(children) => children.iter().any(|c| c.is_unrestricted()),
        }
    }

    pub fn has_spam_trash_setting(&self) -> bool {
        match self {
            DbConstraints::Leaf(leaf) => leaf.spam_trash_set,
            DbConstraints::And(children) => children.iter().any(|c| c.has_spam_trash_setting()),
            DbConstraints::Or(children) => children.iter().all(|c| c.has_spam_trash_setting()),
        }
    }

    pub fn force_has_spam_trash_setting(&mut self) {
        self.top_leaf_mut().spam_trash_set = true;
    }

    /// Exclude the given folders unless a scope has already been chosen.
    pub fn ensure_spam_trash_setting(&mut self, exclude: &[FolderId]) {
        if self.has_spam_trash_setting() {
            return;
        }
        let leaf = self.top_leaf_mut();
        leaf.exclude_folders.extend(exclude.iter().copied());
        leaf.spam_trash_set = true;
    }

    /// The leaf that ANDs with the whole tree, creating one if needed.
    pub fn top_leaf_mut(&mut self) -> &mut DbLeaf {
        if !matches!(self, DbConstraints::Leaf(_) | DbConstraints::And(_)) {
            let taken = std::mem::take(self);
            *self = DbConstraints::And(vec![DbConstraints::Leaf(DbLeaf::default()), taken]);
        }
        if let DbConstraints::And(children) = self {
            if !children.iter().any(|c| matches!(c, DbConstraints::Leaf(_))) {
                children.insert(0, DbConstraints::Leaf(DbLeaf::default()));
            }
        }
        match self {
            DbConstraints::Leaf(leaf) => leaf,
            DbConstraints::And(children) => children
                .iter_mut()
                .find_map(|c| match c {
                    DbConstraints::Leaf(leaf) => Some(leaf),
                    _ => None,
                })
                .unwrap_or_else(|| unreachable!("AND node always holds a leaf here")),
            DbConstraints::Or(_) => unreachable!("OR root was wrapped above"),
        }
    }

    /// The folders this tree restricts to, if it restricts to any.
    pub fn target_folders(&self) -> Option<BTreeSet<FolderId>> {
        match self {
            DbConstraints::Leaf(leaf) if !leaf.folders.is_empty() => Some(leaf.folders.clone()),
            DbConstraints::Leaf(_) => None,
            DbConstraints::And(children) => children.iter().find_map(|c| c.target_folders()),
            DbConstraints::Or(children) => {
                let mut all = BTreeSet::new();
                for c in children {
                    all.extend(c.target_folders()?);
                }
                Some(all)
            }
        }
    }

    pub fn matches(&self, item: &MailItem) -> bool {
        match self {
            DbConstraints::Leaf(leaf) => leaf.matches(item),
            DbConstraints::And(children) => children.iter().all(|c| c.matches(item)),
            DbConstraints::Or(children) => children.iter().any(|c| c.matches(item)),
        }
    }

    /// Render as a textual sub-query.
    pub fn write_query_string(&self, out: &mut String) {
        match self {
            DbConstraints::Leaf(leaf) => leaf.write_query_string(out),
            DbConstraints::And(children) | DbConstraints::Or(children) => {
                let op = if matches!(self, DbConstraints::And(_)) {
                    " AND "
                } else {
                    " OR "
                };
                out.push('(');
                for (i, c) in children.iter().enumerate() {
                    if i > 0 {
                        out.push_str(op);
                    }
                    c.write_query_string(out);
                }
                out.push(')');
            }
        }
    }

    pub fn to_query_string(&self) -> String {
        let mut out = String::new();
        self.write_query_string(&mut out);
        out
    }
}

impl std::fmt::Display for DbConstraints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = String::new();
        self.write_query_string(&mut out);
        f.write_str(&out)?;
        if self.has_spam_trash_setting() {
            f.write_char('*')?;
        }
        Ok(())
    }
}
