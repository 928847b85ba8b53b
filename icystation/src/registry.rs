//! Station registry: identifier → supervisor.
//!
//! Built once from the configuration at startup and read concurrently
//! afterwards; nothing mutates the map while the process serves traffic.

use crate::error::Result;
use crate::station::Station;
use icyconfig::Config;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct StationRegistry {
    stations: HashMap<String, Arc<Station>>,
}

impl StationRegistry {
    /// Build every configured station.  The configuration is expected to be
    /// validated already (unique, URL-safe ids).
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut stations = HashMap::with_capacity(config.stations.len());
        for station_config in &config.stations {
            let station = Station::new(station_config.clone())?;
            stations.insert(station_config.id.clone(), station);
        }
        Ok(Self { stations })
    }

    pub fn get(&self, id: &str) -> Option<Arc<Station>> {
        self.stations.get(id).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Station>> {
        self.stations.values()
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn start_all(&self) {
        for station in self.stations.values() {
            station.start();
        }
    }

    pub async fn shutdown_all(&self) {
        for station in self.stations.values() {
            station.shutdown().await;
        }
    }
}
