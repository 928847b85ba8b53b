//! Upstream source reader.
//!
//! One long-running task per station keeps a single live connection to the
//! configured audio URL, feeding the smoothing ring and the fan-out bus.
//! Connection loss is recovered with exponential backoff; listeners stay
//! attached and simply observe a gap in the byte flow (no filler is ever
//! synthesized).

use crate::error::{Error, Result};
use crate::ring::RingBuffer;
use bytes::Bytes;
use icyconfig::SourceConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on one published chunk; larger transport reads are split.
pub(crate) const READ_CHUNK_BYTES: usize = 32 * 1024;

enum StreamEnd {
    Cancelled,
    /// The connection ended; `produced` tells whether it ever delivered data.
    Ended { produced: bool },
}

pub(crate) struct SourceReader {
    station_id: String,
    config: SourceConfig,
    client: reqwest::Client,
    ring: Arc<RingBuffer>,
    bus: mpsc::Sender<Bytes>,
    healthy: Arc<AtomicBool>,
    stop: CancellationToken,
}

impl SourceReader {
    pub(crate) fn new(
        station_id: impl Into<String>,
        config: SourceConfig,
        client: reqwest::Client,
        ring: Arc<RingBuffer>,
        bus: mpsc::Sender<Bytes>,
        healthy: Arc<AtomicBool>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            station_id: station_id.into(),
            config,
            client,
            ring,
            bus,
            healthy,
            stop,
        }
    }

    /// Build the streaming HTTP client for a station: connect deadline from
    /// the config, optional per-read deadline, no total timeout.
    pub(crate) fn build_client(config: &SourceConfig) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder().connect_timeout(config.connect_timeout());
        if let Some(read_timeout) = config.read_timeout() {
            builder = builder.read_timeout(read_timeout);
        }
        Ok(builder.build()?)
    }

    pub(crate) async fn run(self) {
        info!(station = %self.station_id, url = %self.config.url, "Source reader started");
        let mut backoff = self.config.backoff_initial();

        loop {
            if self.stop.is_cancelled() {
                break;
            }

            let produced = match self.connect().await {
                Ok(response) => {
                    debug!(station = %self.station_id, "Upstream connected");
                    let end = self.read_stream(response).await;
                    self.healthy.store(false, Ordering::SeqCst);
                    match end {
                        StreamEnd::Cancelled => break,
                        StreamEnd::Ended { produced } => produced,
                    }
                }
                Err(err) => {
                    debug!(station = %self.station_id, "Upstream connect failed: {err}");
                    false
                }
            };

            // A connection that actually served bytes counts as a clean
            // disconnect; rapid connect/die flaps keep backing off.
            if produced {
                backoff = self.config.backoff_initial();
            }

            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.config.backoff_max());
        }

        self.healthy.store(false, Ordering::SeqCst);
        info!(station = %self.station_id, "Source reader stopped");
    }

    async fn connect(&self) -> Result<reqwest::Response> {
        // Never let the upstream interleave its own ICY blocks.
        let mut request = self
            .client
            .get(&self.config.url)
            .header("Icy-MetaData", "0");
        for (name, value) in &self.config.request_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = tokio::select! {
            _ = self.stop.cancelled() => return Err(Error::other("cancelled")),
            result = request.send() => result?,
        };

        if response.status() != reqwest::StatusCode::OK {
            return Err(Error::UpstreamStatus(response.status().as_u16()));
        }
        Ok(response)
    }

    async fn read_stream(&self, mut response: reqwest::Response) -> StreamEnd {
        let mut produced = false;

        loop {
            let chunk = tokio::select! {
                _ = self.stop.cancelled() => return StreamEnd::Cancelled,
                chunk = response.chunk() => chunk,
            };

            match chunk {
                Ok(Some(data)) => {
                    if data.is_empty() {
                        continue;
                    }
                    if !produced {
                        produced = true;
                        self.healthy.store(true, Ordering::SeqCst);
                        info!(station = %self.station_id, "Upstream delivering");
                    }
                    self.publish(data);
                }
                Ok(None) => {
                    debug!(station = %self.station_id, "Upstream closed the stream");
                    return StreamEnd::Ended { produced };
                }
                Err(err) => {
                    warn!(station = %self.station_id, "Upstream read error: {err}");
                    return StreamEnd::Ended { produced };
                }
            }
        }
    }

    /// Feed the ring and offer to the bus without ever blocking the read
    /// loop; a full bus loses the chunk rather than the connection.
    fn publish(&self, data: Bytes) {
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + READ_CHUNK_BYTES).min(data.len());
            let chunk = data.slice(offset..end);
            self.ring.write(&chunk);
            let _ = self.bus.try_send(chunk);
            offset = end;
        }
    }
}
