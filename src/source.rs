//! Source iterator (C5, §4.5): owns one configured input (a capture file, a caller-supplied file
//! descriptor, or a cache) plus the optional classification bitmap bound to it, and presents the
//! replay loop (C6) with a single `next_record` call regardless of which is actually backing it.
//!
//! `PacketSource` is kept essentially as the teacher's own trait of the same name
//! (`capture/source.rs`); the teacher's companion `AsyncPacketSource` is dropped, since this
//! crate's scheduling model is synchronous and cooperative rather than `tokio`-driven.

use crate::bitmap::Bitmap;
use crate::cache::{CacheState, PacketCache};
use crate::capfile::FdSource;
#[cfg(feature = "pcap-io")]
use crate::capfile::PcapFileSource;
use crate::error::ReplayError;
use crate::types::PacketRecord;
use std::os::unix::io::RawFd;
use std::path::PathBuf;

/// Anything that can hand back decoded packets one at a time, in order, until exhausted.
pub trait PacketSource {
    fn next_packet(&mut self) -> Result<Option<PacketRecord>, ReplayError>;
}

/// What the user configured a source to read from (§4.5 "Source kinds").
#[derive(Debug, Clone)]
pub enum SourceSpec {
    /// Path to a capture file on disk. Re-opened at the start of every loop that isn't served
    /// entirely from the cache.
    Filename(PathBuf),
    /// A caller-supplied, already-open descriptor. Consumed once; a context must reject
    /// `loop != 1` for this variant at configuration time.
    Fd(RawFd),
}

impl SourceSpec {
    pub fn is_rewindable(&self) -> bool {
        matches!(self, SourceSpec::Filename(_))
    }
}

/// One configured source: its spec, the optional classification bitmap bound to it, the lazily
/// filled cache, and (once opened) the live reader.
pub struct SourceHandle {
    spec: SourceSpec,
    bitmap: Option<Bitmap>,
    cache: PacketCache,
    reader: Option<Box<dyn PacketSource>>,
    fd_consumed: bool,
}

impl SourceHandle {
    pub fn new(spec: SourceSpec, bitmap: Option<Bitmap>) -> Self {
        SourceHandle {
            spec,
            bitmap,
            cache: PacketCache::new(),
            reader: None,
            fd_consumed: false,
        }
    }

    pub fn is_rewindable(&self) -> bool {
        self.spec.is_rewindable()
    }

    pub fn bitmap_mut(&mut self) -> Option<&mut Bitmap> {
        self.bitmap.as_mut()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Prepare for one more pass: rewind the bitmap and cache cursors, and (re)open the
    /// underlying reader unless the cache is already filled and can serve the whole pass itself.
    pub fn begin_loop(&mut self) -> Result<(), ReplayError> {
        if let Some(bitmap) = &mut self.bitmap {
            bitmap.reset_cursor();
        }
        self.cache.reset_cursor();

        if self.cache.state() == CacheState::Filled {
            self.reader = None;
            return Ok(());
        }

        match &self.spec {
            SourceSpec::Filename(path) => {
                #[cfg(feature = "pcap-io")]
                {
                    log::info!("opening capture file {}", path.display());
                    self.reader = Some(Box::new(PcapFileSource::open(path)?));
                    Ok(())
                }
                #[cfg(not(feature = "pcap-io"))]
                {
                    let _ = path;
                    Err(ReplayError::config(
                        "filename sources require the pcap-io feature",
                    ))
                }
            }
            SourceSpec::Fd(fd) => {
                if self.fd_consumed {
                    return Err(ReplayError::config(
                        "fd source is not rewindable: loop count must be 1",
                    ));
                }
                self.fd_consumed = true;
                self.reader = Some(Box::new(FdSource::from_raw_fd(*fd)?));
                Ok(())
            }
        }
    }

    /// Pull the next record for this pass, filling the cache as it goes when `enable_file_cache`
    /// is set. Returns `Ok(None)` at source exhaustion.
    pub fn next_record(
        &mut self,
        enable_file_cache: bool,
    ) -> Result<Option<PacketRecord>, ReplayError> {
        if self.cache.state() == CacheState::Filled {
            return Ok(self.cache.next());
        }

        let reader = self
            .reader
            .as_mut()
            .expect("begin_loop must run before next_record");

        match reader.next_packet()? {
            Some(record) => {
                if enable_file_cache {
                    if self.cache.state() == CacheState::Absent {
                        self.cache.begin_filling();
                    }
                    self.cache.push(record.clone());
                }
                Ok(Some(record))
            }
            None => {
                if enable_file_cache && self.cache.state() == CacheState::Filling {
                    self.cache.finish_filling();
                }
                Ok(None)
            }
        }
    }
}
