//! Collaborators for driving a [`FragEngine`](lowpan_frag::FragEngine) in
//! tests without a radio.
//!
//! [`MockNetif`] records every frame an engine sends and can be told to fail;
//! [`Node`] bundles an engine with its recorded interface and upper layer so
//! that [`transfer`] can carry frames between nodes.
//!
//! ```rust
//! use lowpan_frag::FragConfig;
//! use lowpan_frag_testing::{Node, transfer};
//!
//! let now = std::time::Instant::now();
//! let sender = Node::new(1, 127, FragConfig::selective(), |b| b);
//! let mut receiver = Node::new(2, 127, FragConfig::selective(), |b| b);
//! let results = transfer(&sender, &mut receiver, now);
//! assert!(results.is_empty());
//! ```

pub mod congestion;
pub mod iphc;
pub mod logging;
pub mod mesh;
pub mod netif;
pub mod routes;
pub mod upper;

pub use congestion::{ControllerCalls, ControllerLog, RecordingController, recording_factory};
pub use iphc::{TOY_DISPATCH, TOY_HEADER_LEN, ToyCompressor, ipv6_header, ipv6_packet, toy_dst};
pub use logging::{LoggerHandle, logger};
pub use mesh::{Node, transfer, transfer_where};
pub use netif::{MockNetif, NetifHandle, SentFrame};
pub use routes::StaticRoutes;
pub use upper::{RecordingUpper, UpperLog};
