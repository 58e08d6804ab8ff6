//! Execution domains for parts of a query plan.
//!
//! A [`QueryTarget`] names the mailbox a sub-plan has to run against. The
//! optimizer reasons over [`QueryTargetSet`]s to decide which branches can run
//! locally and which must be proxied to another server.

use std::fmt;

use ahash::AHashSet;

/// The mailbox/account domain a sub-plan must execute against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryTarget {
    /// No explicit target; compatible with everything.
    Unspecified,
    /// The mailbox issuing the query.
    Local,
    /// A mailbox owned by another account, keyed by account id.
    Remote(String),
}

impl QueryTarget {
    /// A remote target for the given account.
    pub fn remote<S: Into<String>>(account_id: S) -> Self {
        QueryTarget::Remote(account_id.into())
    }

    /// True only for the remote target of exactly this account.
    pub fn is_compatible(&self, account_id: &str) -> bool {
        match self {
            QueryTarget::Remote(id) => id == account_id,
            QueryTarget::Unspecified | QueryTarget::Local => false,
        }
    }

    /// True for targets that can be evaluated in the local mailbox.
    pub fn is_compatible_local(&self) -> bool {
        matches!(self, QueryTarget::Unspecified | QueryTarget::Local)
    }

    /// True for targets other than `Unspecified`.
    pub fn is_explicit(&self) -> bool {
        !matches!(self, QueryTarget::Unspecified)
    }

    /// True for targets naming another account.
    pub fn is_external(&self) -> bool {
        matches!(self, QueryTarget::Remote(_))
    }

    /// The remote account id, if any.
    pub fn account_id(&self) -> Option<&str> {
        match self {
            QueryTarget::Remote(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for QueryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryTarget::Unspecified => write!(f, "UNSPECIFIED"),
            QueryTarget::Local => write!(f, "LOCAL"),
            QueryTarget::Remote(id) => write!(f, "{id}"),
        }
    }
}

/// A set of targets required by a plan node and its descendants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryTargetSet {
    targets: AHashSet<QueryTarget>,
}

impl QueryTargetSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding one target.
    pub fn single(target: QueryTarget) -> Self {
        let mut set = Self::new();
        set.insert(target);
        set
    }

    pub fn insert(&mut self, target: QueryTarget) {
        self.targets.insert(target);
    }

    pub fn contains(&self, target: &QueryTarget) -> bool {
        self.targets.contains(target)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueryTarget> {
        self.targets.iter()
    }

    /// Add every target of `other` (OR semantics).
    pub fn union_with(&mut self, other: &QueryTargetSet) {
        self.targets.extend(other.targets.iter().cloned());
    }

    /// Combine with `other` under AND semantics.
    ///
    /// An `Unspecified` side adopts the other side; if both sides carry
    /// `Unspecified` the sets are merged; otherwise only shared targets
    /// survive.
    pub fn intersect_with(&mut self, other: &QueryTargetSet) {
        let unspecified = QueryTarget::Unspecified;
        if self.contains(&unspecified) {
            if other.contains(&unspecified) {
                self.union_with(other);
            } else {
                self.targets = other.targets.clone();
            }
        } else if !other.contains(&unspecified) {
            self.targets.retain(|t| other.targets.contains(t));
        }
    }

    /// True if any member names another account.
    pub fn has_external_targets(&self) -> bool {
        self.targets.iter().any(QueryTarget::is_external)
    }

    /// Number of members other than `Unspecified`.
    pub fn count_explicit_targets(&self) -> usize {
        self.targets.iter().filter(|t| t.is_explicit()).count()
    }

    /// The distinct external targets, sorted by account id.
    pub fn external_targets(&self) -> Vec<QueryTarget> {
        let mut external: Vec<QueryTarget> = self
            .targets
            .iter()
            .filter(|t| t.is_external())
            .cloned()
            .collect();
        external.sort_by(|a, b| a.account_id().cmp(&b.account_id()));
        external
    }
}

impl FromIterator<QueryTarget> for QueryTargetSet {
    fn from_iter<I: IntoIterator<Item = QueryTarget>>(iter: I) -> Self {
        QueryTargetSet {
            targets: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for QueryTargetSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.targets.iter().map(|t| t.to_string()).collect();
        names.sort();
        write!(f, "{{{}}}", names.join(","))
    }
}
