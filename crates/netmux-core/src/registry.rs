//! Connection Registry
//!
//! Fixed-capacity table of socket slots. Each active slot owns the engine
//! handle of its connection and the received data the client has not read
//! yet. Slot indices double as the connection identifiers clients see.

use crate::config::RegistryConfig;
use crate::errors::{NetError, NetResult};
use crate::stack::{HandleOf, NetworkStack, StackHandle};
use crate::types::{ClientId, ConnectionId, ConnectionState, Protocol, SegmentId};
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::net::SocketAddr;

#[cfg(not(feature = "std"))]
use log::{debug, warn};
#[cfg(feature = "std")]
use tracing::{debug, warn};

// ----------------------------------------------------------------------------
// Buffered Data
// ----------------------------------------------------------------------------

/// One received delivery waiting to be read by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub id: SegmentId,
    pub payload: Vec<u8>,
    /// Sender of the segment, when the engine reported one
    pub remote: Option<SocketAddr>,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Snapshot of an active slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotInfo {
    pub id: ConnectionId,
    pub owner: ClientId,
    pub protocol: Protocol,
    pub state: ConnectionState,
    pub pending_segments: usize,
    pub pending_bytes: usize,
}

// ----------------------------------------------------------------------------
// Slot
// ----------------------------------------------------------------------------

struct Slot<S: NetworkStack> {
    owner: Option<ClientId>,
    /// `None` marks a free slot
    protocol: Option<Protocol>,
    handle: Option<HandleOf<S>>,
    state: ConnectionState,
    udp_peer: Option<SocketAddr>,
    pending: VecDeque<Segment>,
    client_data: u64,
    sent_notify_pending: bool,
}

impl<S: NetworkStack> Slot<S> {
    fn vacant() -> Self {
        Self {
            owner: None,
            protocol: None,
            handle: None,
            state: ConnectionState::Null,
            udp_peer: None,
            pending: VecDeque::new(),
            client_data: 0,
            sent_notify_pending: false,
        }
    }

    fn is_active(&self) -> bool {
        self.protocol.is_some()
    }

    fn pending_bytes(&self) -> usize {
        self.pending.iter().map(Segment::len).sum()
    }
}

// ----------------------------------------------------------------------------
// Connection Registry
// ----------------------------------------------------------------------------

/// Socket table shared by all clients
pub struct ConnectionRegistry<S: NetworkStack> {
    slots: Vec<Slot<S>>,
    /// Where the next `assign` starts scanning
    next_index: usize,
    next_segment: u64,
}

impl<S: NetworkStack> ConnectionRegistry<S> {
    /// Create a registry sized from configuration
    pub fn new(config: &RegistryConfig) -> Self {
        Self::with_capacity(config.capacity())
    }

    /// Create a registry with `capacity` slots
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::vacant);
        Self {
            slots,
            next_index: 0,
            next_segment: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_active()).count()
    }

    // ------------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------------

    /// Claim a free slot for `owner`
    ///
    /// Scanning starts one past the previously assigned index and wraps, so
    /// a just-freed identifier is not handed out again straight away.
    pub fn assign(&mut self, owner: ClientId, protocol: Protocol) -> NetResult<ConnectionId> {
        let capacity = self.slots.len();
        for offset in 0..capacity {
            let index = (self.next_index + offset) % capacity;
            let slot = &mut self.slots[index];
            if slot.is_active() {
                continue;
            }

            *slot = Slot::vacant();
            slot.owner = Some(owner);
            slot.protocol = Some(protocol);
            if protocol == Protocol::Udp {
                slot.state = ConnectionState::Connected;
            }
            self.next_index = (index + 1) % capacity;

            debug!("Assigned {} slot {} to {}", protocol, index, owner);
            return Ok(ConnectionId::from_index(index));
        }

        warn!("Connection registry full ({} slots)", capacity);
        Err(NetError::NoMemory)
    }

    /// Validate that `id` names an active slot owned by `owner`
    pub fn find(&self, owner: ClientId, id: ConnectionId) -> NetResult<ConnectionId> {
        let slot = self.slot(id)?;
        if slot.owner == Some(owner) {
            Ok(id)
        } else {
            Err(NetError::Invalid)
        }
    }

    /// Return a slot to the free pool
    ///
    /// Hands back the engine handle, if one was still attached, so the caller
    /// decides how to release it. Callers drain buffered data and purge
    /// queued events first; anything left behind is discarded here.
    pub fn free(&mut self, id: ConnectionId) -> NetResult<Option<HandleOf<S>>> {
        let slot = self.slot_mut(id)?;
        if !slot.pending.is_empty() {
            warn!(
                "Freeing {} with {} unread segment(s)",
                id,
                slot.pending.len()
            );
        }
        let handle = slot.handle.take();
        *slot = Slot::vacant();
        debug!("Freed slot {}", id);
        Ok(handle)
    }

    pub fn is_active(&self, id: ConnectionId) -> bool {
        self.slot(id).is_ok()
    }

    // ------------------------------------------------------------------------
    // Slot Attributes
    // ------------------------------------------------------------------------

    pub fn owner(&self, id: ConnectionId) -> NetResult<ClientId> {
        self.slot(id)?.owner.ok_or(NetError::Invalid)
    }

    pub fn protocol(&self, id: ConnectionId) -> NetResult<Protocol> {
        self.slot(id)?.protocol.ok_or(NetError::Invalid)
    }

    pub fn state(&self, id: ConnectionId) -> NetResult<ConnectionState> {
        Ok(self.slot(id)?.state)
    }

    pub fn set_state(&mut self, id: ConnectionId, state: ConnectionState) -> NetResult<()> {
        self.slot_mut(id)?.state = state;
        Ok(())
    }

    pub fn udp_peer(&self, id: ConnectionId) -> NetResult<Option<SocketAddr>> {
        Ok(self.slot(id)?.udp_peer)
    }

    pub fn set_udp_peer(&mut self, id: ConnectionId, peer: Option<SocketAddr>) -> NetResult<()> {
        let slot = self.slot_mut(id)?;
        if slot.protocol != Some(Protocol::Udp) {
            return Err(NetError::Invalid);
        }
        slot.udp_peer = peer;
        Ok(())
    }

    /// Opaque per-connection value the client attached, zero when unset
    pub fn client_data(&self, id: ConnectionId) -> NetResult<u64> {
        Ok(self.slot(id)?.client_data)
    }

    pub fn set_client_data(&mut self, id: ConnectionId, data: u64) -> NetResult<()> {
        self.slot_mut(id)?.client_data = data;
        Ok(())
    }

    pub fn sent_notify_pending(&self, id: ConnectionId) -> NetResult<bool> {
        Ok(self.slot(id)?.sent_notify_pending)
    }

    pub fn set_sent_notify_pending(&mut self, id: ConnectionId, pending: bool) -> NetResult<()> {
        self.slot_mut(id)?.sent_notify_pending = pending;
        Ok(())
    }

    /// Snapshot of one active slot
    pub fn info(&self, id: ConnectionId) -> NetResult<SlotInfo> {
        let slot = self.slot(id)?;
        Ok(SlotInfo {
            id,
            owner: slot.owner.ok_or(NetError::Invalid)?,
            protocol: slot.protocol.ok_or(NetError::Invalid)?,
            state: slot.state,
            pending_segments: slot.pending.len(),
            pending_bytes: slot.pending_bytes(),
        })
    }

    /// Snapshots of every active slot, in index order
    pub fn active_slots(&self) -> Vec<SlotInfo> {
        (0..self.slots.len())
            .filter_map(|index| self.info(ConnectionId::from_index(index)).ok())
            .collect()
    }

    // ------------------------------------------------------------------------
    // Engine Handles
    // ------------------------------------------------------------------------

    /// Attach a TCP engine handle
    ///
    /// The handle is given back if `id` is not an active TCP slot, so the
    /// caller can still release it to the engine.
    pub fn set_tcp_handle(&mut self, id: ConnectionId, pcb: S::TcpPcb) -> Result<(), S::TcpPcb> {
        match self.slot_mut(id) {
            Ok(slot) if slot.protocol == Some(Protocol::Tcp) => {
                slot.handle = Some(StackHandle::Tcp(pcb));
                Ok(())
            }
            _ => Err(pcb),
        }
    }

    /// Attach a UDP engine handle, giving it back on a protocol mismatch
    pub fn set_udp_handle(&mut self, id: ConnectionId, pcb: S::UdpPcb) -> Result<(), S::UdpPcb> {
        match self.slot_mut(id) {
            Ok(slot) if slot.protocol == Some(Protocol::Udp) => {
                slot.handle = Some(StackHandle::Udp(pcb));
                Ok(())
            }
            _ => Err(pcb),
        }
    }

    pub fn tcp_handle(&self, id: ConnectionId) -> NetResult<&S::TcpPcb> {
        match &self.slot(id)?.handle {
            Some(StackHandle::Tcp(pcb)) => Ok(pcb),
            _ => Err(NetError::Invalid),
        }
    }

    pub fn tcp_handle_mut(&mut self, id: ConnectionId) -> NetResult<&mut S::TcpPcb> {
        match &mut self.slot_mut(id)?.handle {
            Some(StackHandle::Tcp(pcb)) => Ok(pcb),
            _ => Err(NetError::Invalid),
        }
    }

    pub fn udp_handle(&self, id: ConnectionId) -> NetResult<&S::UdpPcb> {
        match &self.slot(id)?.handle {
            Some(StackHandle::Udp(pcb)) => Ok(pcb),
            _ => Err(NetError::Invalid),
        }
    }

    pub fn udp_handle_mut(&mut self, id: ConnectionId) -> NetResult<&mut S::UdpPcb> {
        match &mut self.slot_mut(id)?.handle {
            Some(StackHandle::Udp(pcb)) => Ok(pcb),
            _ => Err(NetError::Invalid),
        }
    }

    /// Detach the engine handle, leaving the slot active
    pub fn take_handle(&mut self, id: ConnectionId) -> NetResult<Option<HandleOf<S>>> {
        Ok(self.slot_mut(id)?.handle.take())
    }

    // ------------------------------------------------------------------------
    // Pending Receive Data
    // ------------------------------------------------------------------------

    /// Buffer a delivery at the tail of the slot's pending data
    pub fn append_received(
        &mut self,
        id: ConnectionId,
        remote: Option<SocketAddr>,
        payload: Vec<u8>,
    ) -> NetResult<SegmentId> {
        let segment_id = SegmentId(self.next_segment);
        let slot = self.slot_mut(id)?;
        slot.pending.push_back(Segment {
            id: segment_id,
            payload,
            remote,
        });
        self.next_segment = self.next_segment.wrapping_add(1);
        Ok(segment_id)
    }

    /// Length and sender of the oldest buffered segment
    pub fn peek_head(&self, id: ConnectionId) -> NetResult<Option<(usize, Option<SocketAddr>)>> {
        Ok(self
            .slot(id)?
            .pending
            .front()
            .map(|segment| (segment.len(), segment.remote)))
    }

    pub fn pending_segments(&self, id: ConnectionId) -> NetResult<usize> {
        Ok(self.slot(id)?.pending.len())
    }

    /// Release up to `max_len` bytes from the head of the pending data
    ///
    /// TCP is a byte stream: a head segment longer than `max_len` is split
    /// and its remainder stays at the head. Consumed TCP bytes are credited
    /// back to the engine's receive window. UDP keeps datagram boundaries, so
    /// the whole head is released and truncated to `max_len`.
    pub fn consume_head(
        &mut self,
        id: ConnectionId,
        max_len: usize,
        stack: &mut S,
    ) -> NetResult<Segment> {
        if max_len == 0 {
            return Err(NetError::Invalid);
        }
        let slot = self.slot_mut(id)?;
        let head_len = slot.pending.front().map(Segment::len).ok_or(NetError::Again)?;

        match slot.protocol {
            Some(Protocol::Tcp) => {
                let segment = if head_len > max_len {
                    let head = slot.pending.front_mut().ok_or(NetError::Again)?;
                    let rest = head.payload.split_off(max_len);
                    Segment {
                        id: head.id,
                        payload: core::mem::replace(&mut head.payload, rest),
                        remote: head.remote,
                    }
                } else {
                    slot.pending.pop_front().ok_or(NetError::Again)?
                };
                if let Some(StackHandle::Tcp(pcb)) = slot.handle.as_mut() {
                    stack.tcp_recved(pcb, segment.len());
                }
                Ok(segment)
            }
            Some(Protocol::Udp) => {
                let mut segment = slot.pending.pop_front().ok_or(NetError::Again)?;
                segment.payload.truncate(max_len);
                Ok(segment)
            }
            None => Err(NetError::Invalid),
        }
    }

    /// Remove one specific segment without consuming it
    ///
    /// No flow-control credit is returned; the caller decides what happens
    /// to the data.
    pub fn unlink(&mut self, id: ConnectionId, segment: SegmentId) -> NetResult<Segment> {
        let slot = self.slot_mut(id)?;
        let position = slot
            .pending
            .iter()
            .position(|s| s.id == segment)
            .ok_or(NetError::Invalid)?;
        slot.pending.remove(position).ok_or(NetError::Invalid)
    }

    /// Release all pending data, crediting TCP bytes back to the engine
    pub fn clear_pending(&mut self, id: ConnectionId, stack: &mut S) -> NetResult<usize> {
        let slot = self.slot_mut(id)?;
        let total = slot.pending_bytes();
        slot.pending.clear();
        if total > 0 {
            if let Some(StackHandle::Tcp(pcb)) = slot.handle.as_mut() {
                stack.tcp_recved(pcb, total);
            }
        }
        Ok(total)
    }

    /// Release all pending data without telling the engine
    ///
    /// Used once the engine has already destroyed the connection.
    pub fn drop_pending(&mut self, id: ConnectionId) -> NetResult<usize> {
        let slot = self.slot_mut(id)?;
        let total = slot.pending_bytes();
        slot.pending.clear();
        Ok(total)
    }

    // ------------------------------------------------------------------------
    // Internal Helpers
    // ------------------------------------------------------------------------

    fn slot(&self, id: ConnectionId) -> NetResult<&Slot<S>> {
        id.index()
            .and_then(|index| self.slots.get(index))
            .filter(|slot| slot.is_active())
            .ok_or(NetError::Invalid)
    }

    fn slot_mut(&mut self, id: ConnectionId) -> NetResult<&mut Slot<S>> {
        id.index()
            .and_then(|index| self.slots.get_mut(index))
            .filter(|slot| slot.is_active())
            .ok_or(NetError::Invalid)
    }
}
