//! The monitor owns every streamer's state machine, arbitrates the shared
//! recording slots and routes control commands to the right machine.
//!
//! Each machine runs on its own task and keeps its own polling cadence, so a
//! slow site never delays any other streamer. The one resource they share is
//! the admission semaphore: at most `max_concurrent_recordings` sessions are
//! active, and streamers that go live while all slots are taken wait in the
//! order they were detected.

use std::{collections::BTreeMap, sync::Arc};

use chrono::Utc;
use futures::future::join_all;
use parking_lot::RwLock;
use tokio::sync::{broadcast, Mutex, Semaphore};

use crate::{
    adapter::SiteRegistry,
    config::Config,
    error::{CommandError, StoreError},
    events::{StreamerEvent, EVENT_CAPACITY},
    machine::{self, Desired, Shared, StreamerHandle, StreamerTask},
    notice::{ErrorNotice, Notices},
    stats::Totals,
    store::{StreamerRecord, StreamerStore},
    streamer::{StatusEntry, StreamerId, StreamerSnapshot},
};

pub struct Monitor {
    config: Arc<Config>,
    sites: SiteRegistry,
    shared: Shared,
    streamers: RwLock<BTreeMap<StreamerId, StreamerTask>>,
    store: Option<StreamerStore>,
    /// Held from snapshot to write so saves land in the order they were taken.
    saving: Mutex<()>,
}

impl Monitor {
    pub fn new(config: Arc<Config>, sites: SiteRegistry) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Shared {
            config: config.clone(),
            admission: Arc::new(Semaphore::new(config.max_concurrent_recordings)),
            notices: Notices::new(),
            events,
        };

        Self {
            config,
            sites,
            shared,
            streamers: RwLock::new(BTreeMap::new()),
            store: None,
            saving: Mutex::new(()),
        }
    }

    /// Persists the streamer list to `store` after every change.
    pub fn with_store(mut self, store: StreamerStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sites(&self) -> &SiteRegistry {
        &self.sites
    }

    /// Adds every streamer from the store with its saved run state. Entries
    /// for unknown sites are skipped.
    pub async fn load(&self) -> Result<usize, StoreError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let mut loaded = 0;
        for record in store.load().await? {
            match self.insert(&record.site, &record.username, record.running) {
                Ok(_) => loaded += 1,
                Err(e) => warn!("Skipping saved streamer {}: {}", record.username, e),
            }
        }
        info!("Loaded {} streamers from {}", loaded, store.path().display());
        Ok(loaded)
    }

    pub async fn add(
        &self,
        site: &str,
        username: &str,
        enabled: bool,
    ) -> Result<StreamerId, CommandError> {
        let id = self.insert(site, username, enabled)?;
        info!("Added {}", id);
        self.save().await;
        Ok(id)
    }

    fn insert(&self, site: &str, username: &str, enabled: bool) -> Result<StreamerId, CommandError> {
        let adapter = self
            .sites
            .resolve(site)
            .ok_or_else(|| CommandError::UnknownSite(site.to_string()))?;
        let id = StreamerId::new(adapter.slug(), username);

        let mut streamers = self.streamers.write();
        if streamers.contains_key(&id) {
            return Err(CommandError::AlreadyExists(id));
        }
        let task = machine::spawn(id.clone(), adapter, self.shared.clone(), enabled);
        streamers.insert(id.clone(), task);
        Ok(id)
    }

    /// Flips the desired run state.
    pub async fn toggle(&self, id: &StreamerId) -> Result<StreamerSnapshot, CommandError> {
        self.set_desired(id, Desired::Toggle).await
    }

    pub async fn start(&self, id: &StreamerId) -> Result<StreamerSnapshot, CommandError> {
        self.set_desired(id, Desired::Enable).await
    }

    pub async fn stop(&self, id: &StreamerId) -> Result<StreamerSnapshot, CommandError> {
        self.set_desired(id, Desired::Disable).await
    }

    async fn set_desired(
        &self,
        id: &StreamerId,
        desired: Desired,
    ) -> Result<StreamerSnapshot, CommandError> {
        let snapshot = self.handle(id)?.set_desired_state(desired).await?;
        self.save().await;
        Ok(snapshot)
    }

    /// Forces an out-of-cycle refresh of one streamer.
    pub async fn refresh_info(&self, id: &StreamerId) -> Result<StreamerSnapshot, CommandError> {
        self.handle(id)?.refresh().await
    }

    /// Stops and forgets a streamer. Its recordings stay on disk.
    pub async fn remove(&self, id: &StreamerId) -> Result<(), CommandError> {
        let task = self
            .streamers
            .write()
            .remove(id)
            .ok_or_else(|| CommandError::NotFound(id.clone()))?;

        task.cancel_and_remove().await;
        info!("Removed {}", id);
        let _ = self.shared.events.send(StreamerEvent::Removed {
            id: id.clone(),
            timestamp: Utc::now(),
        });
        self.save().await;
        Ok(())
    }

    pub fn handle(&self, id: &StreamerId) -> Result<StreamerHandle, CommandError> {
        self.streamers
            .read()
            .get(id)
            .map(|t| t.handle.clone())
            .ok_or_else(|| CommandError::NotFound(id.clone()))
    }

    pub fn snapshot(&self, id: &StreamerId) -> Result<StreamerSnapshot, CommandError> {
        self.handle(id).map(|h| h.snapshot())
    }

    /// Every streamer in identity order, one consistent snapshot each.
    pub fn snapshots(&self) -> Vec<StreamerSnapshot> {
        self.streamers
            .read()
            .values()
            .map(|t| t.handle.snapshot())
            .collect()
    }

    pub fn list_all(&self) -> Vec<StatusEntry> {
        self.snapshots().iter().map(StatusEntry::from).collect()
    }

    pub fn totals(&self) -> Totals {
        self.snapshots().iter().collect()
    }

    /// Number of sessions currently holding a recording slot.
    pub fn active_recordings(&self) -> usize {
        self.config.max_concurrent_recordings - self.shared.admission.available_permits()
    }

    pub fn error_notice(&self) -> Option<ErrorNotice> {
        self.shared.notices.current()
    }

    /// Clears the outstanding error notice. Does nothing if there is none.
    pub fn clear_error(&self) {
        if let Some(notice) = self.shared.notices.clear() {
            debug!("Cleared error notice for {}", notice.streamer);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamerEvent> {
        self.shared.events.subscribe()
    }

    /// Stops every machine. Active recordings are closed cleanly and kept.
    pub async fn shutdown(&self) {
        let tasks: Vec<StreamerTask> = {
            let mut streamers = self.streamers.write();
            std::mem::take(&mut *streamers).into_values().collect()
        };
        info!("Stopping {} streamers", tasks.len());
        join_all(tasks.into_iter().map(StreamerTask::cancel_and_remove)).await;
    }

    async fn save(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let _saving = self.saving.lock().await;
        let records: Vec<StreamerRecord> = self
            .snapshots()
            .into_iter()
            .map(|s| StreamerRecord {
                site: s.id.site,
                username: s.id.username,
                running: s.running,
            })
            .collect();

        if let Err(e) = store.save(&records).await {
            error!("Could not save streamers to {}: {}", store.path().display(), e);
        }
    }
}
