//! Shared small value types used across the replay engine.

/// A single decoded record pulled from a capture file or the in-memory cache.
///
/// `capture_time_us` is microseconds since the Unix epoch, taken from the capture file's packet
/// header. `captured_length` is the number of bytes actually stored (`data.len()`);
/// `original_length` is the on-the-wire length the capturing tool reported, which may be larger if
/// the capture used a snaplen shorter than the packet.
#[derive(Debug, Clone)]
pub struct PacketRecord {
    pub capture_time_us: i64,
    pub captured_length: u32,
    pub original_length: u32,
    pub data: Vec<u8>,
}

impl PacketRecord {
    /// The length to use for rate computations: `original_length` when `use_pkthdr_len` is set,
    /// else `captured_length` (§3 "Packet record").
    pub fn effective_length(&self, use_pkthdr_len: bool) -> u32 {
        if use_pkthdr_len {
            self.original_length
        } else {
            self.captured_length
        }
    }
}

/// Informational direction tag passed to a sender's `open`. Carries no behavior in this crate;
/// concrete senders may use it for logging or interface-pair bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

/// Which of the two configured interfaces a packet was routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interface {
    A,
    B,
}
