use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::io::common::loader::RawAssetLoader;
use crate::settings::StreamingSettings;
use crate::streaming::cache::StreamingCache;
use crate::streaming::clock::{Clock, SystemClock};
use crate::streaming::dispatcher::{JobDispatcher, JobId};
use crate::streaming::jobs::{AssetJobRunner, JobRunner};
use crate::streaming::resource::ExternalHandle;
use crate::world::assets::{M2Doodad, WmoGroup, WmoRoot};
use crate::world::context::StreamingContext;
use crate::world::counters::{Counter, Counters};
use crate::world::events::{NodeId, StreamingEvent};
use crate::world::map_object_entry::MapObjectEntry;
use crate::world::wmo_handler::WmoHandler;

/// Owns all map objects that are currently streamed in, keyed by their placement id, together
/// with the caches and the dispatcher that they share.
///
/// Nothing in here is shared between threads: the manager is driven from the control loop by
/// calling [`Self::update`] regularly.
pub struct WmoManager {
    settings: StreamingSettings,
    context: StreamingContext,
    handlers: BTreeMap<u32, WmoHandler>,
    pending_unloads: HashMap<u32, Duration>,
    reported_stalls: HashSet<JobId>,
    shut_down: bool,
}

impl WmoManager {
    pub fn new(settings: StreamingSettings, runner: Arc<dyn JobRunner>, clock: Rc<dyn Clock>) -> std::io::Result<Self> {
        let dispatcher = JobDispatcher::new(settings.worker_count, runner, clock.clone())?;
        let context = StreamingContext::new(dispatcher, settings.sweep_interval, clock);

        Ok(Self {
            settings,
            context,
            handlers: BTreeMap::new(),
            pending_unloads: HashMap::new(),
            reported_stalls: HashSet::new(),
            shut_down: false,
        })
    }

    pub fn with_loader(settings: StreamingSettings, loader: Arc<dyn RawAssetLoader>) -> std::io::Result<Self> {
        Self::new(
            settings,
            Arc::new(AssetJobRunner::new(loader)),
            Rc::new(SystemClock::new()),
        )
    }

    /// Starts streaming the entry. If it is already loaded, a scheduled unload is cancelled
    /// instead. Returns whether a new handler has been created.
    pub fn load_entry(&mut self, entry: MapObjectEntry) -> bool {
        if self.shut_down {
            warn!("Not loading {}, the manager has been shut down", entry.path);
            return false;
        }

        if self.handlers.contains_key(&entry.id) {
            trace!("Entry {} is already loaded", entry.id);
            self.cancel_unload(entry.id);
            return false;
        }

        let id = entry.id;
        let mut handler = WmoHandler::new(
            entry,
            self.settings.group_queue.clone(),
            self.settings.doodad_queue.clone(),
            self.context.clock.clone(),
        );
        handler.load(&mut self.context);
        self.handlers.insert(id, handler);
        self.context.counters.increment(Counter::LoadedEntries);
        true
    }

    pub fn unload_entry(&mut self, id: u32) -> bool {
        self.pending_unloads.remove(&id);
        let Some(mut handler) = self.handlers.remove(&id) else {
            warn!("Trying to unload entry {}, which is not loaded", id);
            return false;
        };

        handler.unload(&mut self.context);
        self.context
            .counters
            .decrement(Counter::LoadedEntries);
        true
    }

    /// Unloads the entry once `delay` passed, unless it is loaded again before.
    pub fn schedule_unload(&mut self, id: u32, delay: Duration) -> bool {
        if !self.handlers.contains_key(&id) {
            warn!("Trying to schedule the unload of entry {}, which is not loaded", id);
            return false;
        }

        let due = self.context.clock.now() + delay;
        debug!("Unloading entry {} in {:?}", id, delay);
        self.pending_unloads.insert(id, due);
        true
    }

    pub fn cancel_unload(&mut self, id: u32) -> bool {
        let cancelled = self.pending_unloads.remove(&id).is_some();
        if cancelled {
            debug!("Cancelled the scheduled unload of entry {}", id);
        }
        cancelled
    }

    pub fn is_unload_scheduled(&self, id: u32) -> bool {
        self.pending_unloads.contains_key(&id)
    }

    /// One iteration of the control loop.
    pub fn update(&mut self) {
        self.context.dispatcher.pump();
        self.context.update_caches();

        for handler in self.handlers.values_mut() {
            handler.update(&mut self.context);
        }

        let now = self.context.clock.now();
        let due = self
            .pending_unloads
            .iter()
            .filter(|(_, due)| **due <= now)
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();
        for id in due {
            self.unload_entry(id);
        }

        let stalled = self
            .context
            .dispatcher
            .stalled_slots(self.settings.stall_warning_threshold);
        self.reported_stalls
            .retain(|job_id| stalled.iter().any(|slot| slot.job_id == *job_id));
        for slot in stalled {
            if self.reported_stalls.insert(slot.job_id) {
                warn!(
                    "Streaming Worker #{} is busy with {} for {:?} already",
                    slot.slot, slot.description, slot.busy_for
                );
            }
        }
    }

    /// Whether all requested work completed. Sweeps may still be outstanding.
    pub fn is_idle(&self) -> bool {
        self.context.dispatcher.is_idle()
            && self
                .handlers
                .values()
                .all(|handler| !handler.has_pending_work())
    }

    pub fn counters(&self) -> &Counters {
        &self.context.counters
    }

    pub fn handler(&self, id: u32) -> Option<&WmoHandler> {
        self.handlers.get(&id)
    }

    pub fn entry_ids(&self) -> Vec<u32> {
        self.handlers.keys().copied().collect()
    }

    pub fn attached_handles(&self) -> Vec<(u32, NodeId, ExternalHandle)> {
        self.handlers
            .iter()
            .flat_map(|(id, handler)| {
                handler
                    .attached_handles()
                    .into_iter()
                    .map(move |(node, handle)| (*id, node, handle))
            })
            .collect()
    }

    pub fn subscribe(&mut self) -> Receiver<StreamingEvent> {
        self.context.events.subscribe()
    }

    pub fn release_doodad_reference(&mut self, id: u32, doodad: u32, group: u32) -> bool {
        match self.handlers.get_mut(&id) {
            Some(handler) => handler.release_doodad_reference(&mut self.context, doodad, group),
            None => false,
        }
    }

    pub fn unload_group(&mut self, id: u32, group: u32) -> bool {
        match self.handlers.get_mut(&id) {
            Some(handler) => handler.unload_group(&mut self.context, group),
            None => false,
        }
    }

    pub fn roots(&self) -> &StreamingCache<WmoRoot> {
        &self.context.roots
    }

    pub fn groups(&self) -> &StreamingCache<WmoGroup> {
        &self.context.groups
    }

    pub fn doodads(&self) -> &StreamingCache<M2Doodad> {
        &self.context.doodads
    }

    pub fn dispatcher(&self) -> &JobDispatcher {
        &self.context.dispatcher
    }

    /// Unloads every entry, stops the workers and disposes whatever the caches still hold.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        info!("Shutting down the streamer with {} entries loaded", self.handlers.len());
        for id in self.entry_ids() {
            self.unload_entry(id);
        }
        self.pending_unloads.clear();
        self.context.dispatcher.shutdown();
        self.context.dispose_caches();
    }
}

impl Drop for WmoManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
