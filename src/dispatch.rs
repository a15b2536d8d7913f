//! Dual-interface dispatcher (C3, §4.3): chooses interface A or B per packet from the
//! classification bitmap and enforces the MTU ceiling before handing a frame to a sender.
//!
//! Grounded on `protocol/registry.rs`'s dispatch-by-precomputed-key style in the teacher,
//! generalized from "route a packet to a protocol parser" to "route a packet to an interface".

use crate::bitmap::Bitmap;
use crate::sender::PacketSender;
use crate::types::{Interface, PacketRecord};

/// Result of attempting to dispatch one packet. The replay loop (C6) folds this directly into
/// `pkts_sent` / `bytes_sent` / `failed` / `skipped` (§3 "Statistics").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent { interface: Interface, bytes: usize },
    /// MTU ceiling exceeded, or the sender reported a write failure. Counted in `failed`.
    Failed { interface: Interface },
    /// The bitmap routed this packet to B, but B isn't configured. Counted in `skipped`, never
    /// coerced into `failed` (§9 "`skipped` counter").
    Skipped,
}

/// Pick an interface for this packet and hand it to the appropriate sender.
///
/// `bitmap` is `None` when no classification bitmap is bound to the current source, in which case
/// every packet routes to A. If the bitmap is exhausted mid-source (more packets than bits), the
/// remaining packets also route to A rather than erroring — the bitmap is an optional classifier,
/// not a packet count oracle.
pub fn dispatch(
    record: &PacketRecord,
    bitmap: Option<&mut Bitmap>,
    mtu: u32,
    use_pkthdr_len: bool,
    sender_a: &mut dyn PacketSender,
    sender_b: Option<&mut dyn PacketSender>,
) -> DispatchOutcome {
    let interface = match bitmap.and_then(|b| b.next_bit()) {
        Some(true) => Interface::B,
        Some(false) | None => Interface::A,
    };

    if record.effective_length(use_pkthdr_len) > mtu {
        return DispatchOutcome::Failed { interface };
    }

    match interface {
        Interface::A => match sender_a.send(&record.data) {
            Ok(bytes) => DispatchOutcome::Sent { interface, bytes },
            Err(_) => DispatchOutcome::Failed { interface },
        },
        Interface::B => match sender_b {
            Some(sender) => match sender.send(&record.data) {
                Ok(bytes) => DispatchOutcome::Sent { interface, bytes },
                Err(_) => DispatchOutcome::Failed { interface },
            },
            None => DispatchOutcome::Skipped,
        },
    }
}
