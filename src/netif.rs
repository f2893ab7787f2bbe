//! Network interface collaborator.
//!
//! The engine never touches a radio. It asks a [`NetInterface`] for its
//! address and frame budget and hands it complete frames. Devices report
//! arrivals and transmit completions back through [`LinkEvent`].

use bytes::Bytes;

use crate::{
    L2Addr,
    NetifId,
    error::{FragError, LinkError, from_link},
};

/// A link-layer device able to carry 6LoWPAN frames.
pub trait NetInterface: Send {
    /// Identifier used to address this interface.
    fn id(&self) -> NetifId;

    /// Link-layer address of this interface.
    fn l2addr(&self) -> L2Addr;

    /// Largest 6LoWPAN payload (frame minus MAC overhead) the device accepts.
    fn max_frame_size(&self) -> usize;

    /// Transmit `frame` to `dst`, returning the number of bytes sent.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::NoBuffer`] when no buffer is available for the
    /// frame, or another [`LinkError`] when transmission fails.
    fn send(&mut self, dst: &L2Addr, frame: Bytes) -> Result<usize, LinkError>;
}

/// A frame handed to the engine by an interface.
#[derive(Clone, Copy, Debug)]
pub struct ReceivedFrame<'a> {
    /// Interface the frame arrived on.
    pub netif: NetifId,
    /// Link-layer sender.
    pub src: L2Addr,
    /// Link-layer receiver.
    pub dst: L2Addr,
    /// 6LoWPAN payload starting at the dispatch byte.
    pub payload: &'a [u8],
}

/// Events reported by interfaces.
#[derive(Clone, Debug)]
pub enum LinkEvent {
    /// A frame was received.
    FrameReceived {
        /// Interface the frame arrived on.
        netif: NetifId,
        /// Link-layer sender.
        src: L2Addr,
        /// Link-layer receiver.
        dst: L2Addr,
        /// 6LoWPAN payload.
        payload: Bytes,
    },
    /// The interface finished transmitting a frame.
    TransmitComplete {
        /// Interface that finished.
        netif: NetifId,
    },
}

/// Interfaces attached to an engine.
#[derive(Default)]
pub(crate) struct Interfaces {
    list: Vec<Box<dyn NetInterface>>,
}

impl Interfaces {
    pub(crate) fn attach(&mut self, netif: Box<dyn NetInterface>) {
        let id = netif.id();
        self.list.retain(|existing| existing.id() != id);
        self.list.push(netif);
    }

    fn find(&self, id: NetifId) -> Result<&dyn NetInterface, FragError> {
        self.list
            .iter()
            .find(|netif| netif.id() == id)
            .map(AsRef::as_ref)
            .ok_or(FragError::UnknownInterface(id))
    }

    pub(crate) fn max_frame_size(&self, id: NetifId) -> Result<usize, FragError> {
        Ok(self.find(id)?.max_frame_size())
    }

    /// Send a frame on interface `id`, mapping buffer exhaustion onto
    /// [`FragError::AllocationFailure`].
    pub(crate) fn send(&mut self, id: NetifId, dst: &L2Addr, frame: Bytes) -> Result<usize, FragError> {
        let netif = self
            .list
            .iter_mut()
            .find(|netif| netif.id() == id)
            .ok_or(FragError::UnknownInterface(id))?;
        netif.send(dst, frame).map_err(from_link)
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = NetifId> + '_ {
        self.list.iter().map(|netif| netif.id())
    }
}

impl std::fmt::Debug for Interfaces {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.ids()).finish()
    }
}
