//! Engines wired together by recorded frames.

use std::time::Instant;

use lowpan_frag::{
    Disposition,
    FragConfig,
    FragEngine,
    FragEngineBuilder,
    FragError,
    L2Addr,
    ReceivedFrame,
};

use crate::{MockNetif, NetifHandle, RecordingUpper, UpperLog};

/// An engine with one recorded interface and a recording upper layer.
#[derive(Debug)]
pub struct Node {
    pub engine: FragEngine,
    pub radio: NetifHandle,
    pub upper: UpperLog,
}

impl Node {
    /// Build a node with short address `addr` on interface 1.
    ///
    /// `customise` receives the builder after the interface and upper layer
    /// are attached.
    pub fn new(
        addr: u16,
        max_frame: usize,
        config: FragConfig,
        customise: impl FnOnce(FragEngineBuilder) -> FragEngineBuilder,
    ) -> Self {
        let (netif, radio) = MockNetif::new(1, addr, max_frame);
        let (upper, log) = RecordingUpper::new();
        let builder = FragEngine::builder(config)
            .interface(netif)
            .upper_layer(upper);
        Self {
            engine: customise(builder).build(),
            radio,
            upper: log,
        }
    }

    /// Link-layer address of the node.
    pub fn addr(&self) -> L2Addr { self.radio.addr() }
}

/// Deliver every frame `from` sent to `to`'s address.
pub fn transfer(from: &Node, to: &mut Node, now: Instant) -> Vec<Result<Disposition, FragError>> {
    transfer_where(from, to, now, |_, _| true)
}

/// Like [`transfer`], but frames for which `keep` returns `false` are lost.
///
/// `keep` sees the frame's index among the transferred frames and its bytes.
pub fn transfer_where(
    from: &Node,
    to: &mut Node,
    now: Instant,
    mut keep: impl FnMut(usize, &[u8]) -> bool,
) -> Vec<Result<Disposition, FragError>> {
    let dst = to.addr();
    from.radio
        .take_frames_to(dst)
        .into_iter()
        .enumerate()
        .filter(|(i, sent)| keep(*i, &sent.frame))
        .map(|(_, sent)| {
            to.engine.receive(
                &ReceivedFrame {
                    netif: to.radio.id(),
                    src: from.addr(),
                    dst,
                    payload: &sent.frame,
                },
                now,
            )
        })
        .collect()
}
