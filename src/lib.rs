//! `pcap_replay`: a deterministic packet-capture replay engine.
//!
//! The core (`timing`, `rate`, `dispatch`, `cache`, `source`, `context`, `replay`) has no
//! dependency on any particular capture or injection backend; `capfile` and `sender` supply the
//! concrete `pcap`-backed implementations used by the CLI binary (gated behind individual items,
//! not the whole module, since the fd-backed source reader needs no `pcap` crate at all), and
//! `config` supplies a TOML-backed way to build an [`context::Options`] without hand-writing one.

pub mod bitmap;
pub mod cache;
pub mod capfile;
#[cfg(feature = "config")]
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod rate;
pub mod replay;
pub mod sender;
pub mod source;
pub mod timing;
pub mod types;

pub use context::{Options, ReplayContext, Stats, StatsSnapshot};
pub use error::ReplayError;
pub use rate::SpeedMode;
pub use replay::{ReplayEngine, ReplayOutcome};
pub use sender::PacketSender;
pub use source::{PacketSource, SourceSpec};
pub use timing::TimingStrategy;
pub use types::{Direction, Interface, PacketRecord};
