//! The sender collaborator (§6 "Sender (consumed)") plus two concrete implementations (A2):
//! `PcapSender`, backed by a live `pcap` injection handle, and `RecordingSender`, a
//! fault-injectable in-memory sender used by the engine's own tests.

use crate::error::ReplayError;
use crate::types::Direction;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Operations the dispatcher (C3) needs from a sending handle. Modeled directly on §6's
/// `open`/`get_link_type`/`send`/`abort`/`close` contract.
pub trait PacketSender: Send {
    /// Write one frame. Returns the number of bytes written, or a `ReplayError::Send` that the
    /// replay loop counts in `failed` without ending the replay.
    fn send(&mut self, bytes: &[u8]) -> Result<usize, ReplayError>;

    /// Link-layer type (DLT) this handle was opened with. Used by the context at configuration
    /// time to enforce "both interfaces, when both configured, must report the same link-layer
    /// type" (§3 invariants).
    fn link_type(&self) -> i32;

    /// Request that a blocked `send` unblock as soon as possible. Cooperative, not guaranteed
    /// instantaneous (§4.6, §5).
    fn abort(&mut self);

    /// Release the handle. Implementations should make repeat calls harmless.
    fn close(&mut self);
}

/// `pcap`-backed sender: writes frames out a live interface handle opened for packet injection.
#[cfg(feature = "pcap-io")]
pub struct PcapSender {
    capture: pcap::Capture<pcap::Active>,
    link_type: i32,
    aborted: Arc<AtomicBool>,
    closed: bool,
}

#[cfg(feature = "pcap-io")]
impl PcapSender {
    /// Open `interface` for packet injection. `direction` is informational only (§6).
    pub fn open(interface: &str, direction: Direction) -> Result<Self, ReplayError> {
        log::info!("opening sender on {interface} ({direction:?})");
        let capture = pcap::Capture::from_device(interface)
            .map_err(|e| ReplayError::resource(format!("device {interface}: {e}")))?
            .open()
            .map_err(|e| ReplayError::resource(format!("open {interface}: {e}")))?;
        let link_type = capture.get_datalink().0;
        Ok(PcapSender {
            capture,
            link_type,
            aborted: Arc::new(AtomicBool::new(false)),
            closed: false,
        })
    }
}

#[cfg(feature = "pcap-io")]
impl PacketSender for PcapSender {
    fn send(&mut self, bytes: &[u8]) -> Result<usize, ReplayError> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(ReplayError::send("sender aborted"));
        }
        // libpcap's sendpacket has no portable way to interrupt a blocked call from another OS
        // thread; the abort flag above is this crate's best-effort approximation, checked before
        // each attempt rather than mid-syscall (documented in SPEC_FULL.md §4.9).
        self.capture
            .sendpacket(bytes)
            .map_err(|e| ReplayError::send(e.to_string()))?;
        Ok(bytes.len())
    }

    fn link_type(&self) -> i32 {
        self.link_type
    }

    fn abort(&mut self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    fn close(&mut self) {
        if !self.closed {
            log::info!("closing sender");
            self.closed = true;
        }
    }
}

#[cfg(feature = "pcap-io")]
impl Drop for PcapSender {
    fn drop(&mut self) {
        self.close();
    }
}

/// In-memory sender used by the engine's own test suite: records every frame, can be told to fail
/// the Nth send, and reports a caller-chosen link type so DLT-mismatch configuration can be
/// exercised without real interfaces.
pub struct RecordingSender {
    pub sent: Vec<Vec<u8>>,
    pub link_type: i32,
    pub fail_at: Option<usize>,
    aborted: bool,
    closed: bool,
}

impl RecordingSender {
    pub fn new(link_type: i32) -> Self {
        RecordingSender {
            sent: Vec::new(),
            link_type,
            fail_at: None,
            aborted: false,
            closed: false,
        }
    }

    pub fn failing_at(link_type: i32, fail_at: usize) -> Self {
        RecordingSender {
            fail_at: Some(fail_at),
            ..RecordingSender::new(link_type)
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }
}

impl PacketSender for RecordingSender {
    fn send(&mut self, bytes: &[u8]) -> Result<usize, ReplayError> {
        if self.aborted {
            return Err(ReplayError::send("sender aborted"));
        }
        if self.fail_at == Some(self.sent.len()) {
            self.sent.push(bytes.to_vec());
            return Err(ReplayError::send("injected failure"));
        }
        self.sent.push(bytes.to_vec());
        Ok(bytes.len())
    }

    fn link_type(&self) -> i32 {
        self.link_type
    }

    fn abort(&mut self) {
        self.aborted = true;
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sender_records_frames() {
        let mut s = RecordingSender::new(1);
        s.send(&[1, 2, 3]).unwrap();
        s.send(&[4, 5]).unwrap();
        assert_eq!(s.sent, vec![vec![1, 2, 3], vec![4, 5]]);
    }

    #[test]
    fn recording_sender_fails_at_configured_index() {
        let mut s = RecordingSender::failing_at(1, 1);
        assert!(s.send(&[1]).is_ok());
        assert!(s.send(&[2]).is_err());
        assert!(s.send(&[3]).is_ok());
    }

    #[test]
    fn recording_sender_abort_rejects_further_sends() {
        let mut s = RecordingSender::new(1);
        s.abort();
        assert!(s.is_aborted());
        assert!(s.send(&[1]).is_err());
    }

    #[test]
    fn recording_sender_close_is_idempotent() {
        let mut s = RecordingSender::new(1);
        s.close();
        s.close();
        assert!(s.closed);
    }
}
