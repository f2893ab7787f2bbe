#![doc(html_root_url = "https://docs.rs/lowpan-frag/latest")]
//! 6LoWPAN fragmentation, reassembly and fragment forwarding.
//!
//! The crate implements RFC 4944 fragmentation with minimal fragment
//! forwarding and RFC 8931 selective fragment recovery on top of three
//! bounded pools: the reassembly buffer, the virtual reassembly buffer used
//! by forwarding routers and the fragment send buffer.
//!
//! [`FragEngine`] is synchronous and clock-free; [`FragService`] drives one
//! from a tokio task. Interfaces, routing, header compression and the upper
//! layer are supplied as trait objects.

pub mod addr;
pub mod buffer;
pub mod config;
pub mod congestion;
pub mod datagram;
pub mod engine;
pub mod error;
pub mod interval;
pub mod iphc;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod netif;
pub mod pool;
pub mod route;
pub mod service;
pub mod stats;
pub mod timer;
pub mod wire;

mod test_helpers;

pub use addr::{DatagramKey, L2Addr, NetifId};
pub use config::{FragConfig, FragMode};
pub use congestion::{
    CongestionController,
    ControllerFactory,
    FixedWindow,
    InFlight,
    RenoController,
};
pub use datagram::{Datagram, DiscardUpper, ReassembledDatagram, UpperLayer};
pub use engine::{Disposition, FragEngine, FragEngineBuilder, FrameQueue, SendOutcome};
pub use error::{FragError, LinkError, Result};
pub use iphc::{Decompressed, HeaderCompressor, NotCompressible, Recompressed};
pub use netif::{LinkEvent, NetInterface, ReceivedFrame};
pub use pool::{Handle, PoolKind};
pub use route::{NextHop, NoRoute, NoRoutes, RouteTable};
pub use service::FragService;
pub use stats::Stats;
