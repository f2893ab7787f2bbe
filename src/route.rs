//! Route table collaborator consulted when a first fragment must be
//! forwarded.

use std::net::Ipv6Addr;

use thiserror::Error;

use crate::{L2Addr, NetifId};

/// Where to send a datagram next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NextHop {
    /// Link-layer address of the next hop.
    pub l2addr: L2Addr,
    /// Interface leading to the next hop.
    pub netif: NetifId,
}

/// The route table has no next hop for the destination.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("no route to destination")]
pub struct NoRoute;

/// IPv6 next-hop resolution.
pub trait RouteTable: Send {
    /// Resolve the link-layer next hop for `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`NoRoute`] when the destination is unreachable.
    fn resolve_next_hop(&self, dst: &Ipv6Addr) -> Result<NextHop, NoRoute>;

    /// Whether `dst` is assigned to this node.
    fn is_local(&self, _dst: &Ipv6Addr) -> bool { false }
}

/// Route table that never forwards; every node using it is an endpoint.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRoutes;

impl RouteTable for NoRoutes {
    fn resolve_next_hop(&self, _dst: &Ipv6Addr) -> Result<NextHop, NoRoute> { Err(NoRoute) }
}
