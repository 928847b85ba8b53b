//! Station supervisor.
//!
//! Owns one station's ring buffer, metadata cell, session set and the three
//! long-running tasks (source reader, metadata poller, fan-out dispatcher).
//! Everything a station mutates is confined to this struct; nothing is shared
//! across stations.

use crate::cell::{MetaCell, PublishedMeta};
use crate::error::Result;
use crate::meta::MetadataFetcher;
use crate::ring::RingBuffer;
use crate::session::{IcySplicer, SessionSet, StationStream};
use crate::source::{SourceReader, READ_CHUNK_BYTES};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use icyconfig::StationConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Chunk capacity of the source → dispatcher bus.
const BUS_CAPACITY: usize = 32;

/// Upper bound on waiting for one owned task during shutdown.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Initialized,
    Running,
    Stopping,
    Stopped,
}

/// Point-in-time view for the admin endpoints.
#[derive(Debug, Clone)]
pub struct StationStatus {
    pub healthy: bool,
    pub clients: usize,
    pub last_meta_at: Option<DateTime<Utc>>,
    pub ring_fill: usize,
}

pub struct Station {
    config: StationConfig,
    ring: Arc<RingBuffer>,
    cell: Arc<MetaCell>,
    sessions: Arc<SessionSet>,
    source_healthy: Arc<AtomicBool>,
    fetcher: Arc<MetadataFetcher>,
    source_client: reqwest::Client,
    bus_tx: mpsc::Sender<Bytes>,
    bus_rx: Mutex<Option<mpsc::Receiver<Bytes>>>,
    lifecycle: Mutex<Lifecycle>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stop: CancellationToken,
}

impl Station {
    pub fn new(config: StationConfig) -> Result<Arc<Self>> {
        let fetcher = Arc::new(MetadataFetcher::new(
            config.metadata.url.clone(),
            config.metadata.fetch_timeout(),
            config.metadata.build.clone(),
        )?);
        let source_client = SourceReader::build_client(&config.source)?;
        let (bus_tx, bus_rx) = mpsc::channel(BUS_CAPACITY);

        Ok(Arc::new(Self {
            ring: Arc::new(RingBuffer::new(config.buffering.ring_bytes)),
            cell: Arc::new(MetaCell::new()),
            sessions: Arc::new(SessionSet::new(config.id.clone(), config.buffering.evict_after_drops)),
            source_healthy: Arc::new(AtomicBool::new(false)),
            fetcher,
            source_client,
            bus_tx,
            bus_rx: Mutex::new(Some(bus_rx)),
            lifecycle: Mutex::new(Lifecycle::Initialized),
            tasks: Mutex::new(Vec::new()),
            stop: CancellationToken::new(),
            config,
        }))
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn icy_name(&self) -> &str {
        &self.config.icy.name
    }

    pub fn metaint(&self) -> usize {
        self.config.icy.metaint
    }

    pub fn bitrate_hint_kbps(&self) -> u32 {
        self.config.icy.bitrate_hint_kbps
    }

    pub fn source_healthy(&self) -> bool {
        self.source_healthy.load(Ordering::SeqCst)
    }

    /// Snapshot of the published metadata, if any.
    pub fn current_meta(&self) -> Option<Arc<PublishedMeta>> {
        self.cell.load()
    }

    /// Launch the source reader, metadata poller and dispatcher.  Idempotent.
    pub fn start(&self) {
        {
            let mut lifecycle = self.lifecycle.lock().expect("lifecycle lock");
            if *lifecycle != Lifecycle::Initialized {
                return;
            }
            *lifecycle = Lifecycle::Running;
        }

        info!(station = %self.config.id, "Starting station");

        let bus_rx = self
            .bus_rx
            .lock()
            .expect("bus lock")
            .take()
            .expect("bus receiver consumed twice");

        let reader = SourceReader::new(
            self.config.id.clone(),
            self.config.source.clone(),
            self.source_client.clone(),
            self.ring.clone(),
            self.bus_tx.clone(),
            self.source_healthy.clone(),
            self.stop.clone(),
        );

        let mut tasks = self.tasks.lock().expect("tasks lock");
        tasks.push(tokio::spawn(reader.run()));
        tasks.push(tokio::spawn(run_dispatcher(
            bus_rx,
            self.sessions.clone(),
            self.stop.clone(),
        )));
        tasks.push(tokio::spawn(run_poller(
            self.config.id.clone(),
            self.fetcher.clone(),
            self.cell.clone(),
            self.config.metadata.poll_interval(),
            self.config.metadata.stale_ttl(),
            self.config.metadata.debounce,
            self.stop.clone(),
        )));
    }

    /// Cancel all owned tasks, end every attached session, and wait for
    /// completion within a bounded timeout.
    pub async fn shutdown(&self) {
        {
            let mut lifecycle = self.lifecycle.lock().expect("lifecycle lock");
            match *lifecycle {
                Lifecycle::Running => *lifecycle = Lifecycle::Stopping,
                Lifecycle::Initialized => {
                    *lifecycle = Lifecycle::Stopped;
                    return;
                }
                Lifecycle::Stopping | Lifecycle::Stopped => return,
            }
        }

        info!(station = %self.config.id, "Stopping station");
        self.stop.cancel();
        self.sessions.clear();

        let handles: Vec<_> = self.tasks.lock().expect("tasks lock").drain(..).collect();
        for handle in handles {
            if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, handle).await.is_err() {
                warn!(station = %self.config.id, "Station task did not stop in time");
            }
        }

        *self.lifecycle.lock().expect("lifecycle lock") = Lifecycle::Stopped;
        info!(station = %self.config.id, "Station stopped");
    }

    /// Register a listener and hand back its byte stream.
    ///
    /// `wants_meta` reflects the listener's `Icy-MetaData: 1` negotiation;
    /// with it the stream splices an ICY block after every `metaint` payload
    /// bytes, without it the bytes pass through verbatim.
    pub fn attach(&self, wants_meta: bool) -> StationStream {
        if *self.lifecycle.lock().expect("lifecycle lock") != Lifecycle::Running {
            debug!(station = %self.config.id, "Attach refused, station not running");
            return StationStream::closed();
        }

        let capacity = mailbox_capacity(self.config.buffering.client_pending_max_bytes);
        let splicer =
            wants_meta.then(|| IcySplicer::new(self.config.icy.metaint, self.cell.clone()));
        StationStream::attach(self.sessions.clone(), capacity, splicer)
    }

    pub fn status(&self) -> StationStatus {
        StationStatus {
            healthy: self.source_healthy(),
            clients: self.sessions.len(),
            last_meta_at: self.cell.load().map(|meta| meta.updated_at),
            ring_fill: self.ring.len(),
        }
    }
}

/// Chunk slots granted to one listener's mailbox for a given byte budget.
fn mailbox_capacity(pending_max_bytes: usize) -> usize {
    (pending_max_bytes / READ_CHUNK_BYTES).max(4)
}

/// Drain the bus and offer each chunk to every attached session.
async fn run_dispatcher(
    mut bus: mpsc::Receiver<Bytes>,
    sessions: Arc<SessionSet>,
    stop: CancellationToken,
) {
    loop {
        let chunk = tokio::select! {
            _ = stop.cancelled() => break,
            chunk = bus.recv() => chunk,
        };
        match chunk {
            Some(chunk) => sessions.broadcast(&chunk),
            None => break,
        }
    }
}

/// Periodic metadata refresh.
///
/// Fetches immediately on start, then on a steady interval.  Failures keep
/// the previously published value until it has not been refreshable for
/// `stale_ttl`, after which the cell is emptied and listeners get `[0x00]`
/// blocks.
async fn run_poller(
    station_id: String,
    fetcher: Arc<MetadataFetcher>,
    cell: Arc<MetaCell>,
    poll_interval: Duration,
    stale_ttl: Duration,
    debounce: bool,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_success: Option<Instant> = None;
    let mut candidate: Option<String> = None;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match fetcher.fetch().await {
            Ok(text) => {
                last_success = Some(Instant::now());

                let publish = if debounce {
                    // Publish only once the same value was seen twice in a row.
                    if candidate.as_deref() == Some(text.as_str()) {
                        true
                    } else {
                        candidate = Some(text.clone());
                        false
                    }
                } else {
                    true
                };

                if publish {
                    let changed = cell
                        .load()
                        .map(|current| current.icy_text != text)
                        .unwrap_or(true);
                    if changed {
                        debug!(station = %station_id, meta = %text, "Publishing metadata");
                        cell.publish(text);
                    }
                }
            }
            Err(err) => {
                debug!(station = %station_id, "Metadata fetch failed: {err}");
                let expired = last_success
                    .map(|at| at.elapsed() > stale_ttl)
                    .unwrap_or(true);
                if expired && !cell.is_empty() {
                    warn!(station = %station_id, "Metadata stale beyond TTL, clearing");
                    cell.clear();
                }
            }
        }
    }
}
