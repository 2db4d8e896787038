use std::rc::Rc;
use std::time::Duration;

use crate::streaming::cache::StreamingCache;
use crate::streaming::clock::Clock;
use crate::streaming::dispatcher::JobDispatcher;
use crate::world::assets::{M2Doodad, WmoGroup, WmoRoot};
use crate::world::counters::Counters;
use crate::world::events::EventBus;

/// Everything the handlers share. Owned by the [`crate::world::wmo_manager::WmoManager`] and lent
/// to one handler at a time.
pub struct StreamingContext {
    pub clock: Rc<dyn Clock>,
    pub dispatcher: JobDispatcher,
    pub roots: StreamingCache<WmoRoot>,
    pub groups: StreamingCache<WmoGroup>,
    pub doodads: StreamingCache<M2Doodad>,
    /// The aggregate of all handlers.
    pub counters: Counters,
    pub events: EventBus,
}

impl StreamingContext {
    pub fn new(dispatcher: JobDispatcher, sweep_interval: Duration, clock: Rc<dyn Clock>) -> Self {
        Self {
            roots: StreamingCache::new("WMO root", sweep_interval, clock.clone()),
            groups: StreamingCache::new("WMO group", sweep_interval, clock.clone()),
            doodads: StreamingCache::new("doodad", sweep_interval, clock.clone()),
            clock,
            dispatcher,
            counters: Counters::default(),
            events: EventBus::new(),
        }
    }

    pub fn update_caches(&mut self) {
        self.roots.update();
        self.groups.update();
        self.doodads.update();
    }

    pub fn dispose_caches(&mut self) {
        self.roots.dispose_all();
        self.groups.dispose_all();
        self.doodads.dispose_all();
    }
}
