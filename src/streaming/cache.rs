use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use log::{debug, trace, warn};
use thiserror::Error;

use crate::io::common::loader::normalize_path;
use crate::streaming::clock::{Clock, Ticker};
use crate::streaming::dispatcher::{JobDispatcher, JobError, JobFuture};
use crate::streaming::jobs::JobRequest;
use crate::streaming::resource::StreamedResource;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(15);

/// What holders of a failed entry observe. Cloneable, as all holders of the entry share it.
#[derive(Error, Debug, Clone)]
#[error("Failed to load {key}")]
pub struct LoadError {
    pub key: String,
    pub source: Arc<JobError>,
}

enum LoadSlot<R> {
    Pending,
    Ready(Arc<R>),
    Failed(LoadError),
}

/// A resource that may not have been loaded yet. All acquisitions of the same key share the
/// underlying slot.
pub struct PendingResource<R> {
    key: String,
    slot: Rc<RefCell<LoadSlot<R>>>,
}

impl<R> PendingResource<R> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn poll(&self) -> Poll<Result<Arc<R>, LoadError>> {
        match &*self.slot.borrow() {
            LoadSlot::Pending => Poll::Pending,
            LoadSlot::Ready(resource) => Poll::Ready(Ok(resource.clone())),
            LoadSlot::Failed(err) => Poll::Ready(Err(err.clone())),
        }
    }
}

struct CacheEntry<R> {
    slot: Rc<RefCell<LoadSlot<R>>>,
    job: Option<JobFuture>,
    ref_count: usize,
    /// The sweep epoch in which the ref count dropped to zero.
    pending_since: Option<u64>,
}

type Disposer<R> = Box<dyn FnMut(&R)>;

/// Reference counted cache of streamed resources.
///
/// Loading the same key twice shares one job. Resources that are no longer referenced are not
/// disposed immediately but only when they stayed unreferenced for a whole sweep interval, so
/// that walking back and forth across a border does not reload everything.
pub struct StreamingCache<R: StreamedResource> {
    name: &'static str,
    entries: HashMap<String, CacheEntry<R>>,
    clock: Rc<dyn Clock>,
    sweep_ticker: Ticker,
    sweep_epoch: u64,
    disposer: Option<Disposer<R>>,
    jobs_submitted: u64,
}

impl<R: StreamedResource> StreamingCache<R> {
    pub fn new(name: &'static str, sweep_interval: Duration, clock: Rc<dyn Clock>) -> Self {
        Self {
            name,
            entries: HashMap::new(),
            clock,
            sweep_ticker: Ticker::new(sweep_interval),
            sweep_epoch: 0,
            disposer: None,
            jobs_submitted: 0,
        }
    }

    /// Called with every resource after its own [`StreamedResource::dispose`].
    pub fn with_disposer(mut self, disposer: impl FnMut(&R) + 'static) -> Self {
        self.disposer = Some(Box::new(disposer));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn acquire(
        &mut self,
        key: &str,
        dispatcher: &mut JobDispatcher,
        request: impl FnOnce() -> JobRequest,
    ) -> PendingResource<R> {
        let key = normalize_path(key);
        self.sweep_ticker.arm(self.clock.now());

        if let Some(entry) = self.entries.get_mut(&key) {
            entry.ref_count += 1;
            if entry.pending_since.take().is_some() {
                trace!("Revived {} {} before it was swept", self.name, key);
            }

            return PendingResource {
                key,
                slot: entry.slot.clone(),
            };
        }

        let job = dispatcher.submit(request());
        self.jobs_submitted += 1;
        trace!("Loading {} {} as job {}", self.name, key, job.id());

        let slot = Rc::new(RefCell::new(LoadSlot::Pending));
        self.entries.insert(
            key.clone(),
            CacheEntry {
                slot: slot.clone(),
                job: Some(job),
                ref_count: 1,
                pending_since: None,
            },
        );

        PendingResource { key, slot }
    }

    pub fn release(&mut self, key: &str) {
        let key = normalize_path(key);
        let Some(entry) = self.entries.get_mut(&key) else {
            warn!("Trying to release {} {}, which is not cached", self.name, key);
            return;
        };

        if entry.ref_count == 0 {
            warn!("Trying to release {} {}, which is not referenced anymore", self.name, key);
            return;
        }

        entry.ref_count -= 1;
        if entry.ref_count == 0 {
            trace!("{} {} is unreferenced, marking it for eviction", self.name, key);
            entry.pending_since = Some(self.sweep_epoch);
        }
    }

    pub fn release_resource(&mut self, resource: &R) {
        self.release(resource.cache_key());
    }

    /// Materializes finished jobs and sweeps when the sweep interval elapsed.
    pub fn update(&mut self) {
        for (key, entry) in self.entries.iter_mut() {
            let Some(outcome) = entry.job.as_mut().and_then(|job| job.try_take()) else {
                continue;
            };
            entry.job = None;

            let resource = outcome
                .and_then(|payload| R::from_payload(key, payload).map_err(JobError::from))
                .map_err(|err| LoadError {
                    key: key.clone(),
                    source: Arc::new(err),
                });

            *entry.slot.borrow_mut() = match resource {
                Ok(resource) => {
                    trace!("Loaded {} {}", self.name, key);
                    LoadSlot::Ready(Arc::new(resource))
                }
                Err(err) => {
                    debug!("Loading {} {} failed: {}", self.name, key, err.source);
                    LoadSlot::Failed(err)
                }
            };
        }

        if self.sweep_ticker.poll(self.clock.now()) {
            self.sweep();
        }
    }

    /// Evicts every entry that has been unreferenced since before the previous sweep, i.e. that
    /// stayed unreferenced for at least a whole interval. Returns the number of evicted entries.
    pub fn sweep(&mut self) -> usize {
        let epoch = self.sweep_epoch;
        self.sweep_epoch += 1;

        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.ref_count == 0 && entry.pending_since.is_some_and(|since| since < epoch))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            // removed before disposing, nothing can observe a disposed entry
            if let Some(entry) = self.entries.remove(key) {
                self.evict(key, entry);
            }
        }

        if !expired.is_empty() {
            debug!("Swept {} {} entries, {} remaining", expired.len(), self.name, self.entries.len());
        }

        if self.entries.is_empty() {
            self.sweep_ticker.disarm();
        }

        expired.len()
    }

    /// Disposes everything regardless of references, for teardown.
    pub fn dispose_all(&mut self) {
        let entries: Vec<_> = self.entries.drain().collect();
        for (key, entry) in entries {
            if entry.ref_count > 0 {
                debug!("Disposing {} {} with {} references left", self.name, key, entry.ref_count);
            }
            self.evict(&key, entry);
        }
        self.sweep_ticker.disarm();
    }

    fn evict(&mut self, key: &str, entry: CacheEntry<R>) {
        if entry.job.is_some() {
            trace!("Dropping {} {} while it is still loading", self.name, key);
        }

        let slot = entry.slot.replace(LoadSlot::Pending);
        if let LoadSlot::Ready(resource) = slot {
            trace!("Disposing {} {}", self.name, key);
            resource.dispose();
            if let Some(disposer) = self.disposer.as_mut() {
                disposer(&resource);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<R>> {
        let entry = self.entries.get(&normalize_path(key))?;
        match &*entry.slot.borrow() {
            LoadSlot::Ready(resource) => Some(resource.clone()),
            _ => None,
        }
    }

    pub fn ref_count(&self, key: &str) -> usize {
        self.entries
            .get(&normalize_path(key))
            .map_or(0, |entry| entry.ref_count)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(&normalize_path(key))
    }

    pub fn is_loading(&self, key: &str) -> bool {
        self.entries
            .get(&normalize_path(key))
            .is_some_and(|entry| entry.job.is_some())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn jobs_submitted(&self) -> u64 {
        self.jobs_submitted
    }
}
