//! Table-driven route lookup.

use std::net::Ipv6Addr;

use lowpan_frag::{L2Addr, NetifId, NextHop, NoRoute, RouteTable};

/// Route table with explicit host routes and local addresses.
#[derive(Clone, Debug, Default)]
pub struct StaticRoutes {
    routes: Vec<(Ipv6Addr, NextHop)>,
    local: Vec<Ipv6Addr>,
}

impl StaticRoutes {
    /// Empty table: every destination is unreachable.
    pub fn new() -> Self { Self::default() }

    /// Reach `dst` through `next_hop` on interface `netif`.
    #[must_use]
    pub fn route(mut self, dst: Ipv6Addr, netif: NetifId, next_hop: L2Addr) -> Self {
        self.routes.push((
            dst,
            NextHop {
                l2addr: next_hop,
                netif,
            },
        ));
        self
    }

    /// Treat `addr` as assigned to this node.
    #[must_use]
    pub fn local(mut self, addr: Ipv6Addr) -> Self {
        self.local.push(addr);
        self
    }
}

impl RouteTable for StaticRoutes {
    fn resolve_next_hop(&self, dst: &Ipv6Addr) -> Result<NextHop, NoRoute> {
        self.routes
            .iter()
            .find(|(addr, _)| addr == dst)
            .map(|(_, hop)| *hop)
            .ok_or(NoRoute)
    }

    fn is_local(&self, dst: &Ipv6Addr) -> bool { self.local.contains(dst) }
}
