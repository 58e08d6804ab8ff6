//! Sort orders and cached sort keys.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The order in which hits are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortBy {
    /// Store order; no ordering guarantee.
    None,
    #[default]
    DateDesc,
    DateAsc,
    SubjectAsc,
    SubjectDesc,
    NameAsc,
    NameDesc,
    SizeAsc,
    SizeDesc,
    /// Index relevance, best first.
    RelevanceDesc,
}

impl SortBy {
    pub const ALL: [SortBy; 10] = [
        SortBy::None,
        SortBy::DateDesc,
        SortBy::DateAsc,
        SortBy::SubjectAsc,
        SortBy::SubjectDesc,
        SortBy::NameAsc,
        SortBy::NameDesc,
        SortBy::SizeAsc,
        SortBy::SizeDesc,
        SortBy::RelevanceDesc,
    ];

    /// The key this order compares on.
    pub fn key(&self) -> SortKey {
        match self {
            SortBy::None => SortKey::None,
            SortBy::DateDesc | SortBy::DateAsc => SortKey::Date,
            SortBy::SubjectAsc | SortBy::SubjectDesc => SortKey::Subject,
            SortBy::NameAsc | SortBy::NameDesc => SortKey::Name,
            SortBy::SizeAsc | SortBy::SizeDesc => SortKey::Size,
            SortBy::RelevanceDesc => SortKey::Score,
        }
    }

    pub fn is_descending(&self) -> bool {
        matches!(
            self,
            SortBy::DateDesc
                | SortBy::SubjectDesc
                | SortBy::NameDesc
                | SortBy::SizeDesc
                | SortBy::RelevanceDesc
        )
    }

    /// Compare two cached sort values under this order.
    ///
    /// `Less` means `a` is produced before `b`.
    pub fn compare(&self, a: &SortValue, b: &SortValue) -> Ordering {
        if *self == SortBy::None {
            return Ordering::Equal;
        }
        let natural = a.natural_cmp(b);
        if self.is_descending() {
            natural.reverse()
        } else {
            natural
        }
    }

    /// Token used when a query is delegated to another server.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::None => "none",
            SortBy::DateDesc => "dateDesc",
            SortBy::DateAsc => "dateAsc",
            SortBy::SubjectAsc => "subjAsc",
            SortBy::SubjectDesc => "subjDesc",
            SortBy::NameAsc => "nameAsc",
            SortBy::NameDesc => "nameDesc",
            SortBy::SizeAsc => "sizeAsc",
            SortBy::SizeDesc => "sizeDesc",
            SortBy::RelevanceDesc => "scoreDesc",
        }
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortBy {
    type Err = String;

    /// Parse the token produced by [`SortBy::as_str`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SortBy::ALL
            .into_iter()
            .find(|sort| sort.as_str() == s)
            .ok_or_else(|| format!("unknown sort order: {s}"))
    }
}

/// Which attribute a sort order reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    None,
    Date,
    Subject,
    Name,
    Size,
    Score,
}

/// A cached, opaque sort value carried by a hit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum SortValue {
    #[default]
    None,
    Int(i64),
    Text(String),
    Score(f32),
}

impl SortValue {
    fn natural_cmp(&self, other: &SortValue) -> Ordering {
        match (self, other) {
            (SortValue::Int(a), SortValue::Int(b)) => a.cmp(b),
            (SortValue::Text(a), SortValue::Text(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
            (SortValue::Score(a), SortValue::Score(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (SortValue::None, SortValue::None) => Ordering::Equal,
            // Missing values sort last in ascending order.
            (SortValue::None, _) => Ordering::Greater,
            (_, SortValue::None) => Ordering::Less,
            _ => Ordering::Equal,
        }
    }
}
