//! Union and intersection nodes.

use std::cmp::Ordering;
use std::sync::Arc;

use ahash::AHashMap;

use crate::error::{FirstError, Result};
use crate::hit::HitId;
use crate::mailbox::MailboxStore;
use crate::query::context::{ContextSlot, QueryContext};
use crate::query::remote::RemoteOp;
use crate::query::{combine_pairs, QueryOperation};
use crate::results::{HitBuffer, HitStream, QueryInfo};

/// The only external account `op` needs, if it needs exactly one target.
///
/// A subtree still holding a union of local and remote branches is never
/// handed to another account, even when its target set narrows to one.
fn single_external_account(op: &QueryOperation) -> Option<String> {
    let targets = op.query_targets();
    if targets.count_explicit_targets() != 1
        || !targets.has_external_targets()
        || contains_mixed_union(op)
    {
        return None;
    }
    targets
        .external_targets()
        .into_iter()
        .next()
        .and_then(|t| t.account_id().map(str::to_string))
}

/// True if some union below `op` ORs local branches with remote ones.
fn contains_mixed_union(op: &QueryOperation) -> bool {
    match op {
        QueryOperation::Union(union) => {
            let targets = op.query_targets();
            let mixed = targets.has_external_targets()
                && targets.iter().any(|t| t.is_compatible_local());
            mixed || union.children().iter().any(contains_mixed_union)
        }
        QueryOperation::Intersection(inter) => inter.children().iter().any(contains_mixed_union),
        QueryOperation::Filter(filter) => contains_mixed_union(filter.child()),
        _ => false,
    }
}

/// Gather union children bound to one remote account into a single
/// [`RemoteOp`] per account, placed where the account first occurs.
///
/// Returns the new children and the sorted list of remote accounts.
fn hoist_remote(children: Vec<QueryOperation>) -> (Vec<QueryOperation>, Vec<String>) {
    let mut out: Vec<QueryOperation> = Vec::with_capacity(children.len());
    let mut slots: AHashMap<String, usize> = AHashMap::new();

    for child in children {
        let Some(account) = single_external_account(&child) else {
            out.push(child);
            continue;
        };
        if let Some(&slot) = slots.get(&account) {
            let rejected = match &mut out[slot] {
                QueryOperation::Remote(remote) => remote.try_add_ored_operation(child).err(),
                _ => Some(child),
            };
            if let Some(child) = rejected {
                out.push(child);
            }
            continue;
        }

        let remote = match child {
            QueryOperation::Remote(remote) => QueryOperation::Remote(remote),
            child => {
                let mut remote = RemoteOp::for_account(account.clone());
                match remote.try_add_ored_operation(child) {
                    Ok(()) => QueryOperation::Remote(remote),
                    Err(child) => child,
                }
            }
        };
        log::debug!("Hoisted branch for {account} into {remote}");
        slots.insert(account, out.len());
        out.push(remote);
    }

    let mut accounts: Vec<String> = slots.into_keys().collect();
    accounts.sort();
    (out, accounts)
}

/// OR of its children: hits of every child, merged in sort order.
#[derive(Debug, Clone, Default)]
pub struct UnionOp {
    children: Vec<QueryOperation>,
    /// Remote accounts this union fans out to, when more than one.
    fan_out: Vec<String>,
    ctx: ContextSlot,
}

impl UnionOp {
    pub fn new(children: Vec<QueryOperation>) -> Self {
        UnionOp {
            children,
            ..Default::default()
        }
    }

    pub fn children(&self) -> &[QueryOperation] {
        &self.children
    }

    pub(crate) fn children_mut(&mut self) -> &mut Vec<QueryOperation> {
        &mut self.children
    }

    pub(crate) fn into_children(self) -> Vec<QueryOperation> {
        self.children
    }

    /// Remote accounts searched in parallel branches of this union.
    pub fn fan_out_accounts(&self) -> &[String] {
        &self.fan_out
    }

    pub(crate) fn begin(&mut self, ctx: Arc<QueryContext>) {
        for child in &mut self.children {
            child.begin(Arc::clone(&ctx));
        }
        self.ctx.bind(ctx);
    }

    pub(crate) fn is_begun(&self) -> bool {
        self.ctx.is_bound()
    }

    pub(crate) fn optimize(self, mailbox: &dyn MailboxStore) -> QueryOperation {
        let mut children = Vec::with_capacity(self.children.len());
        for child in self.children {
            match child.optimize(mailbox) {
                QueryOperation::Union(inner) => children.extend(inner.children),
                op => children.push(op),
            }
        }

        children.retain(|c| !c.has_no_results());
        if children.is_empty() {
            return QueryOperation::no_results();
        }
        if children.len() > 1 {
            if children.iter().all(|c| matches!(c, QueryOperation::NoTerm(_))) {
                return QueryOperation::no_term();
            }
            children.retain(|c| !matches!(c, QueryOperation::NoTerm(_)));
        }

        combine_pairs(&mut children, true);
        let (mut children, accounts) = hoist_remote(children);
        if accounts.len() > 1 {
            log::debug!("Union fans out to {} remote accounts", accounts.len());
        }
        if children.len() == 1 {
            return children.remove(0);
        }
        QueryOperation::Union(UnionOp {
            children,
            fan_out: if accounts.len() > 1 { accounts } else { Vec::new() },
            ctx: ContextSlot::default(),
        })
    }

    pub(crate) fn expand_local_remote_part(
        self,
        mailbox: &dyn MailboxStore,
    ) -> Result<QueryOperation> {
        let children = self
            .children
            .into_iter()
            .map(|c| c.expand_local_remote_part(mailbox))
            .collect::<Result<Vec<_>>>()?;
        Ok(QueryOperation::union(children))
    }

    pub(crate) fn ensure_spam_trash_setting(
        self,
        mailbox: &dyn MailboxStore,
        include_trash: bool,
        include_spam: bool,
    ) -> QueryOperation {
        let children = self
            .children
            .into_iter()
            .map(|c| c.ensure_spam_trash_setting(mailbox, include_trash, include_spam))
            .collect();
        QueryOperation::Union(UnionOp {
            children,
            fan_out: self.fan_out,
            ctx: self.ctx,
        })
    }

    /// Index of the child whose head comes first, ties to the lowest index.
    fn first_child(&mut self) -> Result<Option<(usize, HitId)>> {
        let ctx = self.ctx.get();
        let sort = ctx.sort();
        let mut best: Option<(usize, HitId)> = None;
        for (i, child) in self.children.iter_mut().enumerate() {
            let Some(hit) = child.peek_next()? else {
                continue;
            };
            let better = match best {
                None => true,
                Some((_, current)) => {
                    let arena = ctx.arena().lock();
                    arena.compare(sort, hit, current) == Ordering::Less
                }
            };
            if better {
                best = Some((i, hit));
            }
        }
        Ok(best)
    }
}

impl HitStream for UnionOp {
    fn reset_iterator(&mut self) -> Result<()> {
        let mut first = FirstError::default();
        for child in &mut self.children {
            first.record(child.reset_iterator());
        }
        first.into_result()
    }

    fn get_next(&mut self) -> Result<Option<HitId>> {
        let Some((index, hit)) = self.first_child()? else {
            return Ok(None);
        };
        self.children[index].get_next()?;
        // The arena hands out one id per item, so a hit reached through two
        // branches sits at the head of both.
        for (i, child) in self.children.iter_mut().enumerate() {
            if i != index && child.peek_next()? == Some(hit) {
                child.get_next()?;
            }
        }
        Ok(Some(hit))
    }

    fn peek_next(&mut self) -> Result<Option<HitId>> {
        Ok(self.first_child()?.map(|(_, hit)| hit))
    }

    fn close(&mut self) -> Result<()> {
        let mut first = FirstError::default();
        for child in &mut self.children {
            first.record(child.close());
        }
        first.into_result()
    }

    fn result_info(&self) -> Vec<QueryInfo> {
        let mut info: Vec<QueryInfo> = self.children.iter().flat_map(|c| c.result_info()).collect();
        if !self.fan_out.is_empty() {
            info.push(QueryInfo::MultiTarget {
                accounts: self.fan_out.clone(),
            });
        }
        info
    }
}

/// AND of its children: hits present in every child.
#[derive(Debug, Clone, Default)]
pub struct IntersectionOp {
    children: Vec<QueryOperation>,
    ctx: ContextSlot,
    buffer: HitBuffer,
}

impl IntersectionOp {
    pub fn new(children: Vec<QueryOperation>) -> Self {
        IntersectionOp {
            children,
            ..Default::default()
        }
    }

    pub fn children(&self) -> &[QueryOperation] {
        &self.children
    }

    pub(crate) fn children_mut(&mut self) -> &mut Vec<QueryOperation> {
        &mut self.children
    }

    pub(crate) fn begin(&mut self, ctx: Arc<QueryContext>) {
        for child in &mut self.children {
            child.begin(Arc::clone(&ctx));
        }
        self.ctx.bind(ctx);
    }

    pub(crate) fn is_begun(&self) -> bool {
        self.ctx.is_bound()
    }

    pub(crate) fn optimize(self, mailbox: &dyn MailboxStore) -> QueryOperation {
        let mut children = Vec::with_capacity(self.children.len());
        for child in self.children {
            match child.optimize(mailbox) {
                QueryOperation::Intersection(inner) => children.extend(inner.children),
                // Remote branches are re-hoisted by the enclosing union once
                // the conjunction has been merged.
                QueryOperation::Remote(remote) => children.push(remote.into_inner()),
                op => children.push(op),
            }
        }

        if children.is_empty() {
            return QueryOperation::no_term();
        }
        if children.iter().any(|c| c.has_no_results()) {
            return QueryOperation::no_results();
        }
        if children.iter().any(|c| matches!(c, QueryOperation::NoTerm(_))) {
            children.retain(|c| !matches!(c, QueryOperation::NoTerm(_)));
            // A store-only conjunction cannot express a missing term.
            if !children.iter().any(|c| c.is_index_capable()) {
                return QueryOperation::no_term();
            }
        }

        let probe = IntersectionOp::new(children);
        if probe.disjoint_targets() {
            log::debug!("Intersection spans disjoint targets; matches nothing");
            return QueryOperation::no_results();
        }
        let mut children = probe.children;

        // Remote branches of a union child must not share an execution unit
        // with the local ones, so the conjunction is distributed over it.
        let spread = children.iter().position(|c| {
            matches!(c, QueryOperation::Union(_)) && c.query_targets().has_external_targets()
        });
        if let Some(pos) = spread {
            if let QueryOperation::Union(union) = children.remove(pos) {
                let branches = union
                    .into_children()
                    .into_iter()
                    .map(|branch| {
                        let mut terms = children.clone();
                        terms.insert(pos, branch);
                        QueryOperation::intersection(terms)
                    })
                    .collect();
                return QueryOperation::union(branches).optimize(mailbox);
            }
        }

        combine_pairs(&mut children, false);
        if children.iter().any(|c| c.has_no_results()) {
            return QueryOperation::no_results();
        }
        if children.len() == 1 {
            return children.remove(0);
        }
        QueryOperation::Intersection(IntersectionOp::new(children))
    }

    /// True if the children name explicit targets that share nothing.
    fn disjoint_targets(&self) -> bool {
        let mut children = self.children.iter();
        let Some(first) = children.next() else {
            return false;
        };
        let mut targets = first.query_targets();
        for child in children {
            targets.intersect_with(&child.query_targets());
        }
        targets.is_empty()
    }

    pub(crate) fn expand_local_remote_part(
        self,
        mailbox: &dyn MailboxStore,
    ) -> Result<QueryOperation> {
        let children = self
            .children
            .into_iter()
            .map(|c| c.expand_local_remote_part(mailbox))
            .collect::<Result<Vec<_>>>()?;
        Ok(QueryOperation::intersection(children))
    }

    pub(crate) fn ensure_spam_trash_setting(
        mut self,
        mailbox: &dyn MailboxStore,
        include_trash: bool,
        include_spam: bool,
    ) -> QueryOperation {
        if !self.children.is_empty() {
            let first = self.children.remove(0);
            self.children
                .insert(0, first.ensure_spam_trash_setting(mailbox, include_trash, include_spam));
        }
        QueryOperation::Intersection(self)
    }

    /// Buffer the next run of hits present in every child.
    fn fill(&mut self) -> Result<()> {
        if !self.buffer.needs_fill() || self.children.is_empty() {
            if self.children.is_empty() {
                self.buffer.mark_exhausted();
            }
            return Ok(());
        }
        let ctx = self.ctx.get();
        let sort = ctx.sort();
        self.buffer.mark_started();

        loop {
            // The head that sorts last bounds where a common hit can be.
            let mut latest: Option<HitId> = None;
            for child in &mut self.children {
                let Some(head) = child.peek_next()? else {
                    self.buffer.mark_exhausted();
                    return Ok(());
                };
                let later = match latest {
                    None => true,
                    Some(current) => {
                        ctx.arena().lock().compare(sort, head, current) == Ordering::Greater
                    }
                };
                if later {
                    latest = Some(head);
                }
            }
            let Some(latest) = latest else {
                self.buffer.mark_exhausted();
                return Ok(());
            };

            let mut advanced = false;
            for child in &mut self.children {
                while let Some(head) = child.peek_next()? {
                    let before = ctx.arena().lock().compare(sort, head, latest) == Ordering::Less;
                    if !before {
                        break;
                    }
                    child.get_next()?;
                    advanced = true;
                }
            }
            if advanced {
                continue;
            }

            // Every head now shares the sort key of `latest`.
            let mut groups: Vec<Vec<HitId>> = Vec::with_capacity(self.children.len());
            for child in &mut self.children {
                let mut group = Vec::new();
                while let Some(head) = child.peek_next()? {
                    let equal = ctx.arena().lock().compare(sort, head, latest) == Ordering::Equal;
                    if !equal {
                        break;
                    }
                    child.get_next()?;
                    group.push(head);
                }
                groups.push(group);
            }

            let arena = ctx.arena().lock();
            let (first, rest) = groups.split_at(1);
            for &hit in &first[0] {
                let candidate = arena.get(hit);
                let everywhere = rest.iter().all(|group| {
                    group
                        .iter()
                        .any(|&other| other == hit || arena.get(other).same_item(candidate))
                });
                if everywhere {
                    self.buffer.push(hit);
                }
            }
            if !self.buffer.is_empty() {
                return Ok(());
            }
        }
    }
}

impl HitStream for IntersectionOp {
    fn reset_iterator(&mut self) -> Result<()> {
        if !self.buffer.is_started() {
            return Ok(());
        }
        self.buffer.reset();
        let mut first = FirstError::default();
        for child in &mut self.children {
            first.record(child.reset_iterator());
        }
        first.into_result()
    }

    fn get_next(&mut self) -> Result<Option<HitId>> {
        self.fill()?;
        Ok(self.buffer.pop())
    }

    fn peek_next(&mut self) -> Result<Option<HitId>> {
        self.fill()?;
        Ok(self.buffer.peek())
    }

    fn close(&mut self) -> Result<()> {
        self.buffer.reset();
        let mut first = FirstError::default();
        for child in &mut self.children {
            first.record(child.close());
        }
        first.into_result()
    }

    fn result_info(&self) -> Vec<QueryInfo> {
        self.children.iter().flat_map(|c| c.result_info()).collect()
    }
}
