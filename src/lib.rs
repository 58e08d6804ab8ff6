//! # mailquery
//!
//! The query-execution core of a mailbox search engine.
//!
//! A parsed query arrives as a tree of [`query::QueryOperation`]s. The tree is
//! algebraically simplified and partitioned into local and proxied parts by
//! `optimize`, bound to a mailbox with `begin`, and then pulled one hit at a
//! time through the [`results`] pipeline (batched preloading, per-message
//! grouping). [`search::MailboxSearch`] runs that whole lifecycle.
//!
//! ## Features
//!
//! - Boolean plan optimizer with absorbing/identity elements and target-aware
//!   routing of remote branches
//! - Index/store joins with cost-based evaluation order
//! - Lazily materialized hits stored in an arena
//! - Embedded and server-hosted index engines behind one interface

pub mod cli;
pub mod config;
pub mod error;
pub mod hit;
pub mod index;
pub mod mailbox;
pub mod query;
pub mod results;
pub mod search;
pub mod sort;
pub mod target;

pub mod prelude {
    pub use crate::config::SearchConfig;
    pub use crate::error::{Result, SearchError};
    pub use crate::hit::{Hit, HitArena, HitId, HitKind, SharedArena};
    pub use crate::mailbox::{ItemType, MailItem, MailboxStore, MemoryMailbox};
    pub use crate::query::{QueryOperation, SearchParams};
    pub use crate::results::{HitStream, QueryInfo};
    pub use crate::search::{Grouping, MailboxSearch, QueryResults};
    pub use crate::sort::SortBy;
    pub use crate::target::{QueryTarget, QueryTargetSet};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
