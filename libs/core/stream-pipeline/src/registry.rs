//! Named producer daemons shared across an application.
//!
//! Every producer writing to the same logical stream should share one daemon.
//! The registry builds each daemon on first request and hands out the cached
//! instance afterwards.

use crate::daemon::ProducerDaemon;
use crate::supervisor::TaskGroup;
use messaging::StreamError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Default)]
pub struct ProducerDaemonRegistry {
    daemons: Mutex<HashMap<String, Arc<ProducerDaemon>>>,
}

impl ProducerDaemonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<ProducerDaemon>>> {
        self.daemons.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cached daemon for `name`, built with `factory` on first use.
    ///
    /// A failing factory caches nothing, so the next call tries again.
    pub fn provide<F>(&self, name: &str, factory: F) -> Result<Arc<ProducerDaemon>, StreamError>
    where
        F: FnOnce() -> Result<ProducerDaemon, StreamError>,
    {
        let mut daemons = self.lock();

        if let Some(daemon) = daemons.get(name) {
            return Ok(daemon.clone());
        }

        let daemon = Arc::new(factory()?);
        info!(daemon = %name, "registered producer daemon");
        daemons.insert(name.to_string(), daemon.clone());

        Ok(daemon)
    }

    pub fn get(&self, name: &str) -> Option<Arc<ProducerDaemon>> {
        self.lock().get(name).cloned()
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Forget every daemon. Running daemons keep running.
    pub fn reset(&self) {
        self.lock().clear();
    }

    /// Run every registered daemon until `cancel` fires or one of them fails.
    pub async fn run_all(&self, cancel: CancellationToken) -> Result<(), StreamError> {
        let daemons: Vec<_> = self.lock().values().cloned().collect();
        let mut group = TaskGroup::new(&cancel);

        for daemon in daemons {
            let name = format!("producer-daemon-{}", daemon.name());
            group.spawn(name, move |cancel| daemon.run(cancel));
        }

        group.wait().await
    }
}
