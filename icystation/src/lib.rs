//! # icystation - Per-station streaming engine
//!
//! One [`Station`] proxies a single upstream audio stream to any number of
//! HTTP listeners, injecting Shoutcast/Icecast ICY metadata blocks at the
//! advertised `icy-metaint` interval.
//!
//! ## Architecture
//!
//! Per station, three long-running tasks cooperate through bounded queues:
//!
//! - the **source reader** keeps one upstream connection alive (exponential
//!   reconnect backoff) and feeds raw chunks into the smoothing ring and the
//!   fan-out bus;
//! - the **metadata poller** refreshes the "now playing" text and replaces
//!   the atomic metadata cell;
//! - the **dispatcher** drains the bus and offers each chunk to every
//!   attached listener's bounded mailbox, dropping per-listener when a
//!   mailbox is full.
//!
//! Each listener gets a [`StationStream`]: an independent byte stream with
//! its own interval counter, so a slow consumer never stalls the source, the
//! poller, or any other listener.
//!
//! ## Quick start
//!
//! ```no_run
//! use icystation::StationRegistry;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = icyconfig::Config::load("config.yaml")?;
//!     let registry = Arc::new(StationRegistry::from_config(&config)?);
//!     registry.start_all();
//!
//!     let station = registry.get("jazz").expect("configured station");
//!     let stream = station.attach(true); // Icy-MetaData: 1 negotiated
//!     // hand `stream` to the HTTP response body
//!     # drop(stream);
//!
//!     registry.shutdown_all().await;
//!     Ok(())
//! }
//! ```

pub mod cell;
pub mod error;
pub mod icy;
pub mod meta;
pub mod registry;
pub mod ring;
pub mod session;
pub mod station;

mod source;

// Re-exports for convenience
pub use cell::{MetaCell, PublishedMeta};
pub use error::{Error, Result};
pub use meta::MetadataFetcher;
pub use registry::StationRegistry;
pub use ring::RingBuffer;
pub use session::StationStream;
pub use station::{Station, StationStatus};
