// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Route table: message id to destination-list mapping.
//!
//! Routes and destinations live in fixed-capacity arenas addressed by
//! integer indices; destination lists are singly linked through
//! `Option<DestIdx>` fields inside the destination arena, so the table owns
//! every node and no pointers escape. Route slots come from a LIFO
//! [`index::IndexStack`] preloaded at initialization, which keeps the table
//! compaction-free for the process lifetime.
//!
//! The table itself is not synchronized; the engine guards it with its
//! shared-state lock and holds that lock across every traversal, so a
//! destination is always observed fully linked or fully absent.

mod index;

pub(crate) use index::IndexStack;

use crate::error::{Error, Result};
use crate::msg::MsgId;
use crate::pipe::PipeId;

/// Routing key derived from a message id.
///
/// No id aliasing is configured: the key is the id value itself. The
/// newtype keeps the derivation in one place should a mission introduce
/// reserved-bit masking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteKey(u32);

impl RouteKey {
    pub fn from_msg_id(id: MsgId) -> Self {
        Self(id.value())
    }

    pub fn msg_id(self) -> MsgId {
        MsgId::new(self.0)
    }
}

/// Index of a route slot in the route arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RouteIdx(u16);

/// Index of a destination node in the destination arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DestIdx(u16);

/// Quality-of-service hint carried per subscription. Stored and reported,
/// not enforced by the local routing core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Qos {
    pub priority: u8,
    pub reliability: u8,
}

/// Visibility of a subscription in "who subscribes to what" reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionScope {
    /// Reported to subscription-reporting consumers.
    Global,
    /// Internal/loopback routing only; never broadcast.
    Local,
}

/// One (route, pipe) subscription binding.
#[derive(Debug)]
pub(crate) struct Destination {
    pub pipe: PipeId,
    pub qos: Qos,
    /// Max in-flight messages of this id on this pipe.
    pub msg_limit: u16,
    /// Current in-flight count.
    pub in_flight: u16,
    /// Administratively disabled destinations are skipped by send.
    pub active: bool,
    pub scope: SubscriptionScope,
    next: Option<DestIdx>,
}

/// Per-key routing state, alive while at least one destination exists.
#[derive(Debug)]
pub(crate) struct RouteRecord {
    pub key: RouteKey,
    head: Option<DestIdx>,
    pub dest_count: u16,
    /// Route-wide administrative disable.
    pub enabled: bool,
    /// Telemetry sequence count, incremented once per successful send.
    pub seq_count: u16,
}

/// Outcome of a subscribe against an existing or fresh route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubscribeOutcome {
    /// A new destination node was appended.
    Added,
    /// The (key, pipe) pair already existed; qos/limit refreshed in place.
    Updated,
}

/// Outcome of an unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnsubscribeOutcome {
    Removed,
    /// No route exists for the key (notice, not a hard error).
    NoRoute,
    /// Route exists but the pipe was not subscribed (notice as well).
    NoMatch,
}

pub(crate) struct RouteTable {
    routes: Vec<Option<RouteRecord>>,
    by_key: std::collections::HashMap<RouteKey, RouteIdx>,
    idx: IndexStack,
    dests: Vec<Option<Destination>>,
    dest_free: Vec<u16>,
    max_dests_per_route: usize,
    max_subscriptions: usize,
}

impl RouteTable {
    pub(crate) fn new(
        max_routes: usize,
        max_dests_per_route: usize,
        max_subscriptions: usize,
    ) -> Self {
        let mut routes = Vec::with_capacity(max_routes);
        routes.resize_with(max_routes, || None);
        Self {
            routes,
            by_key: std::collections::HashMap::new(),
            idx: IndexStack::new(max_routes),
            dests: Vec::new(),
            dest_free: Vec::new(),
            max_dests_per_route,
            max_subscriptions,
        }
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub(crate) fn lookup(&self, key: RouteKey) -> Option<RouteIdx> {
        self.by_key.get(&key).copied()
    }

    pub(crate) fn route(&self, ridx: RouteIdx) -> &RouteRecord {
        self.routes[usize::from(ridx.0)]
            .as_ref()
            .expect("route index names a live route")
    }

    pub(crate) fn route_mut(&mut self, ridx: RouteIdx) -> &mut RouteRecord {
        self.routes[usize::from(ridx.0)]
            .as_mut()
            .expect("route index names a live route")
    }

    /// Iterate the destination list of a route in insertion (delivery)
    /// order.
    pub(crate) fn destinations(&self, ridx: RouteIdx) -> DestIter<'_> {
        DestIter {
            table: self,
            cursor: self.route(ridx).head,
        }
    }

    pub(crate) fn dest(&self, didx: DestIdx) -> &Destination {
        self.dests[usize::from(didx.0)]
            .as_ref()
            .expect("destination index names a live node")
    }

    pub(crate) fn dest_mut(&mut self, didx: DestIdx) -> &mut Destination {
        self.dests[usize::from(didx.0)]
            .as_mut()
            .expect("destination index names a live node")
    }

    /// Destination node for (key, pipe), if subscribed.
    pub(crate) fn find_dest(&self, key: RouteKey, pipe: PipeId) -> Option<DestIdx> {
        let ridx = self.lookup(key)?;
        self.destinations(ridx)
            .find(|&(_, d)| d.pipe == pipe)
            .map(|(didx, _)| didx)
    }

    pub(crate) fn routes_in_use(&self) -> usize {
        self.idx.in_use()
    }

    pub(crate) fn subscriptions_in_use(&self) -> usize {
        self.dests.iter().filter(|d| d.is_some()).count()
    }

    /// Iterate every live route, keyed, in arena order (snapshots).
    pub(crate) fn iter_routes(&self) -> impl Iterator<Item = (RouteIdx, &RouteRecord)> {
        self.routes
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().map(|r| (RouteIdx(i as u16), r)))
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Subscribe `pipe` to `key`, creating the route on first use.
    ///
    /// Duplicate (key, pipe) subscriptions are idempotent: the existing
    /// node's qos and limit are refreshed and no second node appears.
    pub(crate) fn subscribe(
        &mut self,
        key: RouteKey,
        pipe: PipeId,
        qos: Qos,
        msg_limit: u16,
        scope: SubscriptionScope,
    ) -> Result<SubscribeOutcome> {
        let ridx = match self.lookup(key) {
            Some(ridx) => ridx,
            None => {
                let slot = self.idx.pop().ok_or(Error::MaxRoutesMet)?;
                let ridx = RouteIdx(slot);
                self.routes[usize::from(slot)] = Some(RouteRecord {
                    key,
                    head: None,
                    dest_count: 0,
                    enabled: true,
                    seq_count: 0,
                });
                self.by_key.insert(key, ridx);
                ridx
            }
        };

        // Duplicate check and insert happen under the same engine lock, so
        // two racing subscribes cannot both append.
        if let Some(didx) = self.find_dest(key, pipe) {
            let dest = self.dest_mut(didx);
            dest.qos = qos;
            dest.msg_limit = msg_limit;
            return Ok(SubscribeOutcome::Updated);
        }

        if usize::from(self.route(ridx).dest_count) >= self.max_dests_per_route {
            return Err(Error::MaxDestinationsMet);
        }

        let didx = self.alloc_dest(Destination {
            pipe,
            qos,
            msg_limit,
            in_flight: 0,
            active: true,
            scope,
            next: None,
        })?;

        // Append at tail: deterministic delivery order.
        let head = self.route(ridx).head;
        match head {
            None => self.route_mut(ridx).head = Some(didx),
            Some(head) => {
                let mut cursor = head;
                while let Some(next) = self.dest(cursor).next {
                    cursor = next;
                }
                self.dest_mut(cursor).next = Some(didx);
            }
        }
        self.route_mut(ridx).dest_count += 1;
        Ok(SubscribeOutcome::Added)
    }

    /// Remove the (key, pipe) destination, tearing the route down when the
    /// list empties. A missing route or node is a notice, not an error.
    pub(crate) fn unsubscribe(&mut self, key: RouteKey, pipe: PipeId) -> UnsubscribeOutcome {
        let Some(ridx) = self.lookup(key) else {
            return UnsubscribeOutcome::NoRoute;
        };
        if self.unlink(ridx, pipe).is_none() {
            return UnsubscribeOutcome::NoMatch;
        }
        if self.route(ridx).head.is_none() {
            self.teardown_route(ridx);
        }
        UnsubscribeOutcome::Removed
    }

    /// Remove every destination referencing `pipe` across every route.
    ///
    /// The one O(total subscriptions) sweep in the design; used by
    /// delete-pipe and task cleanup.
    pub(crate) fn remove_pipe(&mut self, pipe: PipeId) -> usize {
        let live: Vec<RouteIdx> = self.iter_routes().map(|(ridx, _)| ridx).collect();
        let mut removed = 0;
        for ridx in live {
            while self.unlink(ridx, pipe).is_some() {
                removed += 1;
            }
            if self.route(ridx).head.is_none() {
                self.teardown_route(ridx);
            }
        }
        removed
    }

    /// Unlink the first destination for `pipe` from the route's list,
    /// relinking predecessor to successor whether the node is head, middle
    /// or tail. Returns the freed node's index.
    fn unlink(&mut self, ridx: RouteIdx, pipe: PipeId) -> Option<DestIdx> {
        let mut prev: Option<DestIdx> = None;
        let mut cursor = self.route(ridx).head;
        while let Some(didx) = cursor {
            let node = self.dest(didx);
            let (node_pipe, next) = (node.pipe, node.next);
            if node_pipe == pipe {
                match prev {
                    None => self.route_mut(ridx).head = next,
                    Some(p) => self.dest_mut(p).next = next,
                }
                self.route_mut(ridx).dest_count -= 1;
                self.free_dest(didx);
                return Some(didx);
            }
            prev = Some(didx);
            cursor = next;
        }
        None
    }

    fn teardown_route(&mut self, ridx: RouteIdx) {
        let record = self.routes[usize::from(ridx.0)]
            .take()
            .expect("tearing down a live route");
        self.by_key.remove(&record.key);
        self.idx.push(ridx.0);
    }

    fn alloc_dest(&mut self, dest: Destination) -> Result<DestIdx> {
        if let Some(slot) = self.dest_free.pop() {
            self.dests[usize::from(slot)] = Some(dest);
            return Ok(DestIdx(slot));
        }
        if self.dests.len() >= self.max_subscriptions {
            return Err(Error::BufAllocationError);
        }
        let slot = self.dests.len() as u16;
        self.dests.push(Some(dest));
        Ok(DestIdx(slot))
    }

    fn free_dest(&mut self, didx: DestIdx) {
        self.dests[usize::from(didx.0)] = None;
        self.dest_free.push(didx.0);
    }
}

/// Iterator over a route's destination list.
pub(crate) struct DestIter<'a> {
    table: &'a RouteTable,
    cursor: Option<DestIdx>,
}

impl<'a> Iterator for DestIter<'a> {
    type Item = (DestIdx, &'a Destination);

    fn next(&mut self) -> Option<Self::Item> {
        let didx = self.cursor?;
        let dest = self.table.dest(didx);
        self.cursor = dest.next;
        Some((didx, dest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        RouteTable::new(8, 4, 16)
    }

    fn key(v: u32) -> RouteKey {
        RouteKey::from_msg_id(MsgId::new(v))
    }

    fn sub(t: &mut RouteTable, k: u32, p: u8) -> SubscribeOutcome {
        t.subscribe(
            key(k),
            PipeId::from_raw(p),
            Qos::default(),
            4,
            SubscriptionScope::Global,
        )
        .expect("subscription within limits")
    }

    fn pipes_of(t: &RouteTable, k: u32) -> Vec<u8> {
        let ridx = t.lookup(key(k)).expect("route exists");
        t.destinations(ridx).map(|(_, d)| d.pipe.raw()).collect()
    }

    #[test]
    fn test_first_subscribe_creates_route() {
        let mut t = table();
        assert!(t.lookup(key(0x100)).is_none());
        assert_eq!(sub(&mut t, 0x100, 1), SubscribeOutcome::Added);
        assert_eq!(t.routes_in_use(), 1);
        assert_eq!(pipes_of(&t, 0x100), vec![1]);
    }

    #[test]
    fn test_duplicate_subscribe_is_idempotent() {
        let mut t = table();
        sub(&mut t, 0x100, 1);
        let outcome = t
            .subscribe(
                key(0x100),
                PipeId::from_raw(1),
                Qos {
                    priority: 9,
                    reliability: 1,
                },
                7,
                SubscriptionScope::Global,
            )
            .expect("duplicate is success");
        assert_eq!(outcome, SubscribeOutcome::Updated);

        let ridx = t.lookup(key(0x100)).expect("route");
        assert_eq!(t.route(ridx).dest_count, 1, "no second node");
        let (_, d) = t.destinations(ridx).next().expect("one node");
        assert_eq!(d.msg_limit, 7, "limit refreshed in place");
        assert_eq!(d.qos.priority, 9);
    }

    #[test]
    fn test_append_order_is_deterministic() {
        let mut t = table();
        for p in [3u8, 1, 2] {
            sub(&mut t, 0x200, p);
        }
        assert_eq!(pipes_of(&t, 0x200), vec![3, 1, 2], "tail append order");
    }

    #[test]
    fn test_unlink_head_middle_tail() {
        let mut t = table();
        for p in [1u8, 2, 3] {
            sub(&mut t, 0x300, p);
        }

        // Middle
        assert_eq!(
            t.unsubscribe(key(0x300), PipeId::from_raw(2)),
            UnsubscribeOutcome::Removed
        );
        assert_eq!(pipes_of(&t, 0x300), vec![1, 3]);

        // Tail
        assert_eq!(
            t.unsubscribe(key(0x300), PipeId::from_raw(3)),
            UnsubscribeOutcome::Removed
        );
        assert_eq!(pipes_of(&t, 0x300), vec![1]);

        // Head (last node): route torn down exactly when empty.
        assert_eq!(
            t.unsubscribe(key(0x300), PipeId::from_raw(1)),
            UnsubscribeOutcome::Removed
        );
        assert!(t.lookup(key(0x300)).is_none());
        assert_eq!(t.routes_in_use(), 0);
    }

    #[test]
    fn test_unsubscribe_missing_is_notice() {
        let mut t = table();
        assert_eq!(
            t.unsubscribe(key(0x400), PipeId::from_raw(1)),
            UnsubscribeOutcome::NoRoute
        );
        sub(&mut t, 0x400, 1);
        assert_eq!(
            t.unsubscribe(key(0x400), PipeId::from_raw(2)),
            UnsubscribeOutcome::NoMatch
        );
        // The real subscription is untouched.
        assert_eq!(pipes_of(&t, 0x400), vec![1]);
    }

    #[test]
    fn test_max_destinations_per_route() {
        let mut t = table();
        for p in 0..4u8 {
            sub(&mut t, 0x500, p);
        }
        let err = t
            .subscribe(
                key(0x500),
                PipeId::from_raw(9),
                Qos::default(),
                4,
                SubscriptionScope::Global,
            )
            .unwrap_err();
        assert!(matches!(err, Error::MaxDestinationsMet));
    }

    #[test]
    fn test_max_routes_met() {
        let mut t = table();
        for k in 0..8u32 {
            sub(&mut t, 0x600 + k, 1);
        }
        let err = t
            .subscribe(
                key(0x700),
                PipeId::from_raw(1),
                Qos::default(),
                4,
                SubscriptionScope::Global,
            )
            .unwrap_err();
        assert!(matches!(err, Error::MaxRoutesMet));

        // Tearing one down frees a slot for a new key.
        t.unsubscribe(key(0x600), PipeId::from_raw(1));
        sub(&mut t, 0x700, 1);
    }

    #[test]
    fn test_remove_pipe_sweeps_all_routes() {
        let mut t = table();
        sub(&mut t, 0x100, 1);
        sub(&mut t, 0x101, 1);
        sub(&mut t, 0x101, 2);
        sub(&mut t, 0x102, 2);

        let removed = t.remove_pipe(PipeId::from_raw(1));
        assert_eq!(removed, 2);
        assert!(t.lookup(key(0x100)).is_none(), "solo route torn down");
        assert_eq!(pipes_of(&t, 0x101), vec![2], "shared route survives");
        assert_eq!(pipes_of(&t, 0x102), vec![2]);
    }

    #[test]
    fn test_dest_slot_recycling() {
        let mut t = table();
        sub(&mut t, 0x100, 1);
        sub(&mut t, 0x100, 2);
        t.unsubscribe(key(0x100), PipeId::from_raw(1));
        assert_eq!(t.subscriptions_in_use(), 1);
        sub(&mut t, 0x100, 3);
        assert_eq!(t.subscriptions_in_use(), 2);
        assert_eq!(pipes_of(&t, 0x100), vec![2, 3]);
    }
}
