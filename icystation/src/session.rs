//! Listener sessions: per-client mailboxes and the ICY splice.
//!
//! Each attached listener owns a bounded mailbox fed by the station's
//! dispatcher with non-blocking offers; a full mailbox drops that chunk for
//! that listener only.  The [`StationStream`] handed to the HTTP layer pulls
//! from the mailbox and, when the listener negotiated metadata, rewrites each
//! chunk so that an ICY block lands after every `metaint` payload bytes.

use crate::cell::MetaCell;
use crate::icy;
use bytes::{Bytes, BytesMut};
use futures::Stream;
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Interleaves ICY metadata blocks into the payload stream.
///
/// The counter is private to one session; between two emitted blocks exactly
/// `metaint` payload bytes pass through, regardless of how the source chunks
/// the data.
pub(crate) struct IcySplicer {
    metaint: usize,
    bytes_until_meta: usize,
    cell: Arc<MetaCell>,
}

impl IcySplicer {
    pub(crate) fn new(metaint: usize, cell: Arc<MetaCell>) -> Self {
        Self {
            metaint,
            bytes_until_meta: metaint,
            cell,
        }
    }

    /// Rewrite one payload chunk, inserting a block at every interval
    /// boundary it crosses.  The metadata cell is snapshotted once per block.
    pub(crate) fn splice(&mut self, chunk: &[u8]) -> Bytes {
        let mut out = BytesMut::with_capacity(chunk.len() + 64);
        let mut rest = chunk;

        while !rest.is_empty() {
            let take = rest.len().min(self.bytes_until_meta);
            out.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            self.bytes_until_meta -= take;

            if self.bytes_until_meta == 0 {
                let snapshot = self.cell.load();
                let text = snapshot.as_ref().map(|m| m.icy_text.as_str()).unwrap_or("");
                out.extend_from_slice(&icy::encode_block(text));
                self.bytes_until_meta = self.metaint;
            }
        }

        out.freeze()
    }
}

struct SessionEntry {
    tx: mpsc::Sender<Bytes>,
    consecutive_drops: u64,
}

/// Registry of attached listener mailboxes for one station.
///
/// The lock is held only around insert/remove/iterate; delivery itself is a
/// non-blocking `try_send` so one wedged listener can never stall the
/// dispatcher.
pub(crate) struct SessionSet {
    station_id: String,
    entries: Mutex<HashMap<u64, SessionEntry>>,
    next_id: AtomicU64,
    /// Consecutive drops after which a listener is evicted; 0 disables
    /// eviction and degraded listeners stay attached.
    evict_after_drops: u64,
}

impl SessionSet {
    pub(crate) fn new(station_id: impl Into<String>, evict_after_drops: u64) -> Self {
        Self {
            station_id: station_id.into(),
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            evict_after_drops,
        }
    }

    /// Register a new mailbox of `capacity` chunks.
    pub(crate) fn attach(&self, capacity: usize) -> (u64, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().expect("session lock").insert(
            id,
            SessionEntry {
                tx,
                consecutive_drops: 0,
            },
        );
        debug!(station = %self.station_id, session = id, "Listener attached");
        (id, rx)
    }

    /// Unregister; safe to call for an already-removed session.
    pub(crate) fn detach(&self, id: u64) {
        if self
            .entries
            .lock()
            .expect("session lock")
            .remove(&id)
            .is_some()
        {
            debug!(station = %self.station_id, session = id, "Listener detached");
        }
    }

    /// Offer one chunk to every mailbox, dropping per-listener when full.
    pub(crate) fn broadcast(&self, chunk: &Bytes) {
        let mut dead = Vec::new();
        let mut entries = self.entries.lock().expect("session lock");

        for (id, entry) in entries.iter_mut() {
            match entry.tx.try_send(chunk.clone()) {
                Ok(()) => {
                    if entry.consecutive_drops > 0 {
                        debug!(
                            station = %self.station_id,
                            session = id,
                            dropped = entry.consecutive_drops,
                            "Listener caught up"
                        );
                        entry.consecutive_drops = 0;
                    }
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    entry.consecutive_drops += 1;
                    if entry.consecutive_drops == 1 {
                        warn!(
                            station = %self.station_id,
                            session = id,
                            "Listener mailbox full, dropping chunks"
                        );
                    }
                    if self.evict_after_drops > 0
                        && entry.consecutive_drops >= self.evict_after_drops
                    {
                        warn!(
                            station = %self.station_id,
                            session = id,
                            drops = entry.consecutive_drops,
                            "Evicting listener after consecutive drops"
                        );
                        dead.push(*id);
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(*id);
                }
            }
        }

        for id in dead {
            entries.remove(&id);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().expect("session lock").len()
    }

    /// Drop every mailbox sender; attached streams observe end-of-stream.
    pub(crate) fn clear(&self) {
        self.entries.lock().expect("session lock").clear();
    }
}

/// Detaches the session when the listener's response body is dropped.
struct DetachGuard {
    sessions: Arc<SessionSet>,
    id: u64,
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        self.sessions.detach(self.id);
    }
}

/// Byte stream handed to one listener's HTTP response.
///
/// Yields payload chunks verbatim, or ICY-spliced when the listener sent
/// `Icy-MetaData: 1`.  The stream ends when the station shuts down (mailbox
/// sender dropped); a write failure on the response side drops the stream,
/// which detaches the session.
pub struct StationStream {
    rx: mpsc::Receiver<Bytes>,
    splicer: Option<IcySplicer>,
    _guard: Option<DetachGuard>,
}

impl StationStream {
    pub(crate) fn attach(
        sessions: Arc<SessionSet>,
        capacity: usize,
        splicer: Option<IcySplicer>,
    ) -> Self {
        let (id, rx) = sessions.attach(capacity);
        Self {
            rx,
            splicer,
            _guard: Some(DetachGuard { sessions, id }),
        }
    }

    /// Stream whose end has already been reached; used for attach attempts
    /// against a station that is no longer running.
    pub(crate) fn closed() -> Self {
        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        Self {
            rx,
            splicer: None,
            _guard: None,
        }
    }

    pub fn wants_meta(&self) -> bool {
        self.splicer.is_some()
    }
}

impl Stream for StationStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => {
                let out = match this.splicer.as_mut() {
                    Some(splicer) => splicer.splice(&chunk),
                    None => chunk,
                };
                Poll::Ready(Some(Ok(out)))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
