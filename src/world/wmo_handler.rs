use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use std::task::Poll;

use log::{debug, info, trace, warn};

use crate::format::wmo::DoodadDefinition;
use crate::streaming::cache::{LoadError, PendingResource};
use crate::streaming::cancellation::CancellationToken;
use crate::streaming::clock::Clock;
use crate::streaming::jobs::{JobKind, JobRequest};
use crate::streaming::resource::{ExternalHandle, StreamedResource};
use crate::streaming::throttled_queue::{QueueConfig, ThrottledQueue};
use crate::world::assets::{DoodadSetSelection, M2Doodad, WmoGroup, WmoRoot};
use crate::world::context::StreamingContext;
use crate::world::counters::{Counter, Counters};
use crate::world::doodad_references::DoodadReferences;
use crate::world::events::{NodeId, Placement, StreamingEvent};
use crate::world::map_object_entry::MapObjectEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Idle,
    LoadingRoot,
    LoadingChildren,
    Loaded,
    /// The root could not be loaded, only unloading is left to do.
    Failed,
    Unloading,
    Disposed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub node: NodeId,
    pub reason: String,
}

/// An acquisition that has not resolved yet, together with the token of its owner.
struct InFlight<R> {
    pending: PendingResource<R>,
    token: CancellationToken,
    placement: Option<Placement>,
}

impl<R> InFlight<R> {
    fn new(pending: PendingResource<R>, token: &CancellationToken) -> Self {
        Self {
            pending,
            token: token.clone(),
            placement: None,
        }
    }

    /// `None` while pending, and forever once the owner has been cancelled.
    fn resume(&self) -> Option<Result<Arc<R>, LoadError>> {
        if self.token.is_cancelled() {
            trace!("Discarding the stale load of {}", self.pending.key());
            return None;
        }

        match self.pending.poll() {
            Poll::Ready(outcome) => Some(outcome),
            Poll::Pending => None,
        }
    }
}

fn resolved<R>(loads: &BTreeMap<u32, InFlight<R>>) -> Vec<(u32, Result<Arc<R>, LoadError>)> {
    loads
        .iter()
        .filter_map(|(index, load)| load.resume().map(|outcome| (*index, outcome)))
        .collect()
}

/// Streams one placed map object: its root first, then the groups the root lists (exterior
/// groups before interior ones) and finally the doodads the loaded groups reference.
///
/// A doodad can be referenced by several groups and is only loaded once, it stays loaded as long
/// as any of those groups references it.
pub struct WmoHandler {
    entry: MapObjectEntry,
    state: HandleState,
    token: CancellationToken,
    root: Option<Arc<WmoRoot>>,
    root_load: Option<InFlight<WmoRoot>>,
    doodad_set: DoodadSetSelection,
    groups: BTreeMap<u32, Arc<WmoGroup>>,
    group_loads: BTreeMap<u32, InFlight<WmoGroup>>,
    doodads: BTreeMap<u32, Arc<M2Doodad>>,
    doodad_loads: BTreeMap<u32, InFlight<M2Doodad>>,
    references: DoodadReferences,
    group_queue: ThrottledQueue<u32, String>,
    doodad_queue: ThrottledQueue<u32, DoodadDefinition>,
    counters: Counters,
    failures: Vec<LoadFailure>,
}

impl WmoHandler {
    pub fn new(
        entry: MapObjectEntry,
        group_queue: QueueConfig,
        doodad_queue: QueueConfig,
        clock: Rc<dyn Clock>,
    ) -> Self {
        Self {
            entry,
            state: HandleState::Idle,
            token: CancellationToken::new(),
            root: None,
            root_load: None,
            doodad_set: DoodadSetSelection::default(),
            groups: BTreeMap::new(),
            group_loads: BTreeMap::new(),
            doodads: BTreeMap::new(),
            doodad_loads: BTreeMap::new(),
            references: DoodadReferences::new(),
            group_queue: ThrottledQueue::new(group_queue, clock.clone()),
            doodad_queue: ThrottledQueue::new(doodad_queue, clock),
            counters: Counters::default(),
            failures: vec![],
        }
    }

    pub fn load(&mut self, ctx: &mut StreamingContext) {
        if self.state != HandleState::Idle {
            warn!("{} is already {:?}, not loading it again", self.entry.path, self.state);
            return;
        }

        debug!("Loading WMO {} (entry {})", self.entry.path, self.entry.id);
        let path = self.entry.path.clone();
        let pending = ctx.roots.acquire(&path, &mut ctx.dispatcher, || {
            JobRequest::new(JobKind::WmoRoot).with_path(path.clone())
        });
        self.root_load = Some(InFlight::new(pending, &self.token));
        self.state = HandleState::LoadingRoot;
    }

    /// Advances the handler: picks up resolved loads and works off the queues.
    pub fn update(&mut self, ctx: &mut StreamingContext) {
        match self.state {
            HandleState::LoadingRoot => self.poll_root(ctx),
            HandleState::LoadingChildren | HandleState::Loaded => {}
            _ => return,
        }

        if !matches!(self.state, HandleState::LoadingChildren | HandleState::Loaded) {
            return;
        }

        for (index, path) in self.group_queue.tick() {
            self.process_load_group(ctx, index, path);
        }
        self.poll_groups(ctx);

        for (doodad, definition) in self.doodad_queue.tick() {
            self.process_load_doodad(ctx, doodad, definition);
        }
        self.poll_doodads(ctx);

        if self.state == HandleState::LoadingChildren && !self.has_pending_work() {
            info!(
                "Loaded WMO {} with {} groups and {} doodads",
                self.entry.path,
                self.groups.len(),
                self.doodads.len()
            );
            self.state = HandleState::Loaded;
        }
    }

    fn poll_root(&mut self, ctx: &mut StreamingContext) {
        let Some(outcome) = self.root_load.as_ref().and_then(InFlight::resume) else {
            return;
        };
        let Some(load) = self.root_load.take() else {
            return;
        };

        let root = match outcome {
            Ok(root) => root,
            Err(err) => {
                ctx.roots.release(load.pending.key());
                self.record_failure(ctx, NodeId::Root, &err);
                self.state = HandleState::Failed;
                return;
            }
        };

        self.doodad_set = root.doodad_set(self.entry.doodad_set);
        ctx.events.publish(StreamingEvent::Attached {
            entry: self.entry.id,
            node: NodeId::Root,
            handle: root.external_handle(),
            placement: None,
        });

        let description = root.description();
        let group_order = description
            .exterior_group_indices
            .iter()
            .chain(description.interior_group_indices.iter())
            .copied()
            .collect::<Vec<_>>();
        for index in group_order {
            if self.group_queue.add(index, root.group_path(index)) {
                self.increment(ctx, Counter::LoadingGroups);
            }
        }

        debug!(
            "{} has {} groups, doodad set {} with {} doodads",
            self.entry.path,
            root.group_count(),
            self.doodad_set.name,
            self.doodad_set.len()
        );
        self.root = Some(root);
        self.state = HandleState::LoadingChildren;
    }

    /// Starts loading a dequeued group.
    pub fn process_load_group(&mut self, ctx: &mut StreamingContext, index: u32, path: String) {
        if self.groups.contains_key(&index) || self.group_loads.contains_key(&index) {
            trace!("Group {} of {} is already loaded", index, self.entry.path);
            self.decrement(ctx, Counter::LoadingGroups);
            return;
        }

        let pending = ctx.groups.acquire(&path, &mut ctx.dispatcher, || {
            JobRequest::new(JobKind::WmoGroup)
                .with_path(path.clone())
                .with_index(index)
        });
        self.group_loads
            .insert(index, InFlight::new(pending, &self.token));
    }

    fn poll_groups(&mut self, ctx: &mut StreamingContext) {
        for (index, outcome) in resolved(&self.group_loads) {
            let Some(load) = self.group_loads.remove(&index) else {
                continue;
            };

            match outcome {
                Ok(group) => self.attach_group(ctx, index, group),
                Err(err) => {
                    self.decrement(ctx, Counter::LoadingGroups);
                    ctx.groups.release(load.pending.key());
                    self.record_failure(ctx, NodeId::Group(index), &err);
                }
            }
        }
    }

    fn attach_group(&mut self, ctx: &mut StreamingContext, index: u32, group: Arc<WmoGroup>) {
        self.decrement(ctx, Counter::LoadingGroups);
        self.increment(ctx, Counter::LoadedGroups);
        ctx.events.publish(StreamingEvent::Attached {
            entry: self.entry.id,
            node: NodeId::Group(index),
            handle: group.external_handle(),
            placement: None,
        });

        for &doodad_ref in group.doodad_refs() {
            let doodad = doodad_ref as u32;
            // doodads of other sets
            let Some(definition) = self.doodad_set.entry(doodad).cloned() else {
                continue;
            };

            if definition.is_emitter() {
                trace!("Skipping emitter {}", definition.name);
                continue;
            }

            if self.references.add(doodad, index) == 1 && self.doodad_queue.add(doodad, definition) {
                self.increment(ctx, Counter::LoadingDoodads);
            }
        }

        self.groups.insert(index, group);
    }

    /// Starts loading a dequeued doodad.
    pub fn process_load_doodad(&mut self, ctx: &mut StreamingContext, doodad: u32, definition: DoodadDefinition) {
        if self.doodads.contains_key(&doodad) || self.doodad_loads.contains_key(&doodad) {
            trace!("Doodad {} of {} is already loaded", doodad, self.entry.path);
            self.decrement(ctx, Counter::LoadingDoodads);
            return;
        }

        let path = definition.name.clone();
        let pending = ctx.doodads.acquire(&path, &mut ctx.dispatcher, || {
            JobRequest::new(JobKind::M2).with_path(path.clone())
        });

        let mut load = InFlight::new(pending, &self.token);
        load.placement = Some(Placement {
            position: definition.position,
            orientation: definition.orientation,
            scale: definition.scale,
        });
        self.doodad_loads.insert(doodad, load);
    }

    fn poll_doodads(&mut self, ctx: &mut StreamingContext) {
        for (doodad, outcome) in resolved(&self.doodad_loads) {
            let Some(load) = self.doodad_loads.remove(&doodad) else {
                continue;
            };

            self.decrement(ctx, Counter::LoadingDoodads);
            match outcome {
                Ok(model) => {
                    self.increment(ctx, Counter::LoadedDoodads);
                    if model.is_animated() {
                        self.increment(ctx, Counter::AnimatedDoodads);
                    }

                    ctx.events.publish(StreamingEvent::Attached {
                        entry: self.entry.id,
                        node: NodeId::Doodad(doodad),
                        handle: model.external_handle(),
                        placement: load.placement,
                    });
                    self.doodads.insert(doodad, model);
                }
                Err(err) => {
                    ctx.doodads.release(load.pending.key());
                    self.record_failure(ctx, NodeId::Doodad(doodad), &err);
                }
            }
        }
    }

    /// Removes `group` from the groups referencing `doodad`. The doodad is unloaded when no group
    /// references it anymore. Returns false if the group did not reference the doodad.
    pub fn release_doodad_reference(&mut self, ctx: &mut StreamingContext, doodad: u32, group: u32) -> bool {
        if self.state == HandleState::Disposed {
            return false;
        }

        match self.references.remove(doodad, group) {
            None => {
                warn!(
                    "Group {} of {} does not reference doodad {}",
                    group, self.entry.path, doodad
                );
                false
            }
            Some(0) => {
                self.unload_doodad(ctx, doodad);
                true
            }
            Some(_) => true,
        }
    }

    fn unload_doodad(&mut self, ctx: &mut StreamingContext, doodad: u32) {
        if let Some(model) = self.doodads.remove(&doodad) {
            trace!("Unloading doodad {} ({}) of {}", doodad, model.name(), self.entry.path);
            ctx.events.publish(StreamingEvent::Detached {
                entry: self.entry.id,
                node: NodeId::Doodad(doodad),
                handle: model.external_handle(),
            });
            ctx.doodads.release_resource(&model);
            self.decrement(ctx, Counter::LoadedDoodads);
            if model.is_animated() {
                self.decrement(ctx, Counter::AnimatedDoodads);
            }
        } else if self.doodad_queue.remove(&doodad).is_some() {
            self.decrement(ctx, Counter::LoadingDoodads);
        } else if let Some(load) = self.doodad_loads.remove(&doodad) {
            ctx.doodads.release(load.pending.key());
            self.decrement(ctx, Counter::LoadingDoodads);
        }
    }

    /// Unloads a single group together with its doodad references. Returns false if the group
    /// was neither loaded nor loading.
    pub fn unload_group(&mut self, ctx: &mut StreamingContext, index: u32) -> bool {
        if self.state == HandleState::Disposed {
            return false;
        }

        if let Some(group) = self.groups.remove(&index) {
            ctx.events.publish(StreamingEvent::Detached {
                entry: self.entry.id,
                node: NodeId::Group(index),
                handle: group.external_handle(),
            });
            for doodad in self.references.doodads_for(index) {
                self.release_doodad_reference(ctx, doodad, index);
            }
            ctx.groups.release_resource(&group);
            self.decrement(ctx, Counter::LoadedGroups);
            true
        } else if self.group_queue.remove(&index).is_some() {
            self.decrement(ctx, Counter::LoadingGroups);
            true
        } else if let Some(load) = self.group_loads.remove(&index) {
            ctx.groups.release(load.pending.key());
            self.decrement(ctx, Counter::LoadingGroups);
            true
        } else {
            false
        }
    }

    /// Releases everything this handler holds or is waiting for and removes its contribution from
    /// the aggregate counters. Calling it again has no effect.
    pub fn unload(&mut self, ctx: &mut StreamingContext) {
        if self.state == HandleState::Disposed {
            return;
        }

        debug!("Unloading WMO {} (entry {})", self.entry.path, self.entry.id);
        self.state = HandleState::Unloading;
        self.token.cancel();
        self.group_queue.clear();
        self.doodad_queue.clear();

        if let Some(load) = self.root_load.take() {
            ctx.roots.release(load.pending.key());
        }

        for (_, load) in std::mem::take(&mut self.doodad_loads) {
            ctx.doodads.release(load.pending.key());
        }
        for (doodad, model) in std::mem::take(&mut self.doodads) {
            self.detach(ctx, NodeId::Doodad(doodad), model.external_handle());
            ctx.doodads.release_resource(&model);
        }

        for (_, load) in std::mem::take(&mut self.group_loads) {
            ctx.groups.release(load.pending.key());
        }
        for (index, group) in std::mem::take(&mut self.groups) {
            self.detach(ctx, NodeId::Group(index), group.external_handle());
            ctx.groups.release_resource(&group);
        }

        if let Some(root) = self.root.take() {
            self.detach(ctx, NodeId::Root, root.external_handle());
            ctx.roots.release_resource(&root);
        }

        self.references.clear();
        ctx.counters.subtract(&self.counters);
        self.counters = Counters::default();
        self.state = HandleState::Disposed;
    }

    fn detach(&self, ctx: &mut StreamingContext, node: NodeId, handle: ExternalHandle) {
        ctx.events.publish(StreamingEvent::Detached {
            entry: self.entry.id,
            node,
            handle,
        });
    }

    fn record_failure(&mut self, ctx: &mut StreamingContext, node: NodeId, err: &LoadError) {
        warn!("Failed to load {:?} of {}: {}: {}", node, self.entry.path, err, err.source);
        let reason = err.source.to_string();
        ctx.events.publish(StreamingEvent::LoadFailed {
            entry: self.entry.id,
            node,
            reason: reason.clone(),
        });
        self.failures.push(LoadFailure { node, reason });
    }

    fn increment(&mut self, ctx: &mut StreamingContext, counter: Counter) {
        self.counters.increment(counter);
        ctx.counters.increment(counter);
    }

    fn decrement(&mut self, ctx: &mut StreamingContext, counter: Counter) {
        self.counters.decrement(counter);
        ctx.counters.decrement(counter);
    }

    pub fn entry(&self) -> &MapObjectEntry {
        &self.entry
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn failures(&self) -> &[LoadFailure] {
        &self.failures
    }

    pub fn root(&self) -> Option<&Arc<WmoRoot>> {
        self.root.as_ref()
    }

    pub fn group(&self, index: u32) -> Option<&Arc<WmoGroup>> {
        self.groups.get(&index)
    }

    pub fn doodad(&self, doodad: u32) -> Option<&Arc<M2Doodad>> {
        self.doodads.get(&doodad)
    }

    pub fn attached_handles(&self) -> Vec<(NodeId, ExternalHandle)> {
        let root = self
            .root
            .iter()
            .map(|root| (NodeId::Root, root.external_handle()));
        let groups = self
            .groups
            .iter()
            .map(|(index, group)| (NodeId::Group(*index), group.external_handle()));
        let doodads = self
            .doodads
            .iter()
            .map(|(doodad, model)| (NodeId::Doodad(*doodad), model.external_handle()));

        root.chain(groups).chain(doodads).collect()
    }

    pub fn groups_for_doodad(&self, doodad: u32) -> Vec<u32> {
        self.references.groups_for(doodad)
    }

    pub fn doodads_for_group(&self, group: u32) -> Vec<u32> {
        self.references.doodads_for(group)
    }

    /// Whether anything is still queued or waiting for a worker.
    pub fn has_pending_work(&self) -> bool {
        self.root_load.is_some()
            || !self.group_queue.is_empty()
            || !self.doodad_queue.is_empty()
            || !self.group_loads.is_empty()
            || !self.doodad_loads.is_empty()
    }
}
