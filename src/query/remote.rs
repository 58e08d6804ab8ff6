//! Sub-plans executed by the server of another account.

use std::collections::VecDeque;
use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::error::{Result, SearchError};
use crate::hit::{HitId, ProxiedItem};
use crate::query::combining::UnionOp;
use crate::query::context::{ContextSlot, QueryContext, SearchParams};
use crate::query::{join_query_strings, write_children, Combined, QueryOperation};
use crate::results::{HitStream, QueryInfo};
use crate::target::QueryTarget;

/// Items relayed back by a remote server, in the requested order.
pub trait ProxiedStream: Send + Debug {
    fn next_item(&mut self) -> Result<Option<ProxiedItem>>;

    /// Annotations the remote server attached to its results.
    fn info(&self) -> Vec<QueryInfo> {
        Vec::new()
    }

    fn close(&mut self) -> Result<()>;
}

/// Issues a query string on the server owning an account.
///
/// Failure to establish the stream is an error, never an empty result.
pub trait RemoteProxy: Send + Sync + Debug {
    fn search(
        &self,
        account_id: &str,
        query: &str,
        params: &SearchParams,
    ) -> Result<Box<dyn ProxiedStream>>;
}

/// A [`ProxiedStream`] over items already in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticStream {
    items: VecDeque<ProxiedItem>,
    info: Vec<QueryInfo>,
}

impl StaticStream {
    pub fn new<I: IntoIterator<Item = ProxiedItem>>(items: I) -> Self {
        StaticStream {
            items: items.into_iter().collect(),
            info: Vec::new(),
        }
    }

    pub fn with_info(mut self, info: Vec<QueryInfo>) -> Self {
        self.info = info;
        self
    }
}

impl ProxiedStream for StaticStream {
    fn next_item(&mut self) -> Result<Option<ProxiedItem>> {
        Ok(self.items.pop_front())
    }

    fn info(&self) -> Vec<QueryInfo> {
        self.info.clone()
    }

    fn close(&mut self) -> Result<()> {
        self.items.clear();
        Ok(())
    }
}

/// A union of sub-plans sharing one remote target, run as a single
/// proxied request.
#[derive(Debug)]
pub struct RemoteOp {
    target: QueryTarget,
    inner: UnionOp,
    ctx: ContextSlot,
    stream: Option<Box<dyn ProxiedStream>>,
    peeked: Option<HitId>,
    exhausted: bool,
    /// Set once the proxy call fails; the branch stays empty from then on.
    failed: bool,
    info: Vec<QueryInfo>,
}

impl Clone for RemoteOp {
    /// # Panics
    ///
    /// Panics if the remote stream is open.
    fn clone(&self) -> Self {
        assert!(
            self.stream.is_none(),
            "cannot copy a remote operation with an open stream"
        );
        RemoteOp {
            target: self.target.clone(),
            inner: self.inner.clone(),
            ctx: self.ctx.clone(),
            stream: None,
            peeked: self.peeked,
            exhausted: self.exhausted,
            failed: self.failed,
            info: self.info.clone(),
        }
    }
}

impl RemoteOp {
    /// An empty remote operation for `target`, which must name another
    /// account.
    pub fn new(target: QueryTarget) -> Result<Self> {
        match target {
            QueryTarget::Remote(account) if !account.is_empty() => Ok(RemoteOp::for_account(account)),
            other => Err(SearchError::invalid_target(format!(
                "remote operation needs an external target, got {other}"
            ))),
        }
    }

    pub(crate) fn for_account(account_id: String) -> Self {
        RemoteOp {
            target: QueryTarget::Remote(account_id),
            inner: UnionOp::default(),
            ctx: ContextSlot::default(),
            stream: None,
            peeked: None,
            exhausted: false,
            failed: false,
            info: Vec::new(),
        }
    }

    pub fn target(&self) -> &QueryTarget {
        &self.target
    }

    pub fn account_id(&self) -> &str {
        self.target.account_id().unwrap_or_default()
    }

    /// The accumulated sub-plans.
    pub fn operations(&self) -> &[QueryOperation] {
        self.inner.children()
    }

    /// OR `op` into this operation if it runs against the same account.
    ///
    /// On a target conflict `op` is handed back untouched.
    pub fn try_add_ored_operation(&mut self, op: QueryOperation) -> std::result::Result<(), QueryOperation> {
        match op {
            QueryOperation::Remote(other) => {
                if other.target != self.target {
                    return Err(QueryOperation::Remote(other));
                }
                self.inner.children_mut().extend(other.inner.into_children());
                Ok(())
            }
            op => {
                let targets = op.query_targets();
                if targets.count_explicit_targets() != 1 || !targets.contains(&self.target) {
                    return Err(op);
                }
                self.inner.children_mut().push(op);
                Ok(())
            }
        }
    }

    pub(crate) fn combine(mut self, other: QueryOperation) -> Combined {
        match self.try_add_ored_operation(other) {
            Ok(()) => Combined::Merged(QueryOperation::Remote(self)),
            Err(other) => Combined::Unmerged(QueryOperation::Remote(self), other),
        }
    }

    /// The accumulated sub-plan, unwrapped from the remote node.
    pub(crate) fn into_inner(self) -> QueryOperation {
        QueryOperation::union_of(self.inner.into_children())
    }

    pub(crate) fn supports_relevance_sort(&self) -> bool {
        true
    }

    pub(crate) fn to_query_string(&self) -> String {
        join_query_strings(self.inner.children(), " OR ")
    }

    pub(crate) fn begin(&mut self, ctx: Arc<QueryContext>) {
        self.ctx.bind(ctx);
    }

    pub(crate) fn is_begun(&self) -> bool {
        self.ctx.is_bound()
    }

    fn open(&mut self, ctx: &QueryContext) -> Result<()> {
        let proxy = ctx.proxy().ok_or_else(|| {
            SearchError::service(format!("no remote proxy configured for {}", self.target))
        })?;
        let query = self.to_query_string();
        // Paging happens here, so the remote side returns from the top.
        let params = SearchParams {
            offset: 0,
            limit: ctx.params().offset + ctx.params().limit,
            ..ctx.params().clone()
        };
        log::debug!("[{}] Proxying {:?} to {}", ctx.id(), query, self.target);
        self.stream = Some(proxy.search(self.account_id(), &query, &params)?);
        Ok(())
    }

    fn fill(&mut self) -> Result<Option<HitId>> {
        if self.peeked.is_some() || self.exhausted || self.failed {
            return Ok(self.peeked);
        }
        let ctx = self.ctx.get();
        if self.stream.is_none() {
            if let Err(e) = self.open(&ctx) {
                log::warn!("[{}] Remote branch {} failed: {e}", ctx.id(), self.target);
                self.failed = true;
                return Err(e);
            }
        }
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        match stream.next_item()? {
            Some(item) => self.peeked = Some(ctx.arena().lock().proxied_hit(item)),
            None => self.exhausted = true,
        }
        Ok(self.peeked)
    }

    fn close_stream(&mut self) -> Result<()> {
        self.peeked = None;
        self.exhausted = false;
        match self.stream.take() {
            Some(mut stream) => {
                self.info = stream.info();
                stream.close()
            }
            None => Ok(()),
        }
    }
}

impl HitStream for RemoteOp {
    fn reset_iterator(&mut self) -> Result<()> {
        if self.stream.is_none() && self.peeked.is_none() {
            return Ok(());
        }
        self.close_stream()
    }

    fn get_next(&mut self) -> Result<Option<HitId>> {
        let hit = self.fill()?;
        self.peeked = None;
        Ok(hit)
    }

    fn peek_next(&mut self) -> Result<Option<HitId>> {
        self.fill()
    }

    fn close(&mut self) -> Result<()> {
        self.close_stream()
    }

    fn result_info(&self) -> Vec<QueryInfo> {
        match &self.stream {
            Some(stream) => stream.info(),
            None => self.info.clone(),
        }
    }
}

impl fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "REMOTE[{}]", self.target)?;
        write_children(f, "", self.inner.children())
    }
}
