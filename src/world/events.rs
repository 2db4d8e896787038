use std::sync::mpsc::{Receiver, Sender, channel};

use glam::{Quat, Vec3};
use log::trace;

use crate::streaming::resource::ExternalHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeId {
    Root,
    Group(u32),
    /// Index into the root's doodad definitions.
    Doodad(u32),
}

/// Where a doodad is placed relative to its map object. Only carried, never applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub position: Vec3,
    pub orientation: Quat,
    pub scale: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamingEvent {
    Attached {
        entry: u32,
        node: NodeId,
        handle: ExternalHandle,
        placement: Option<Placement>,
    },
    Detached {
        entry: u32,
        node: NodeId,
        handle: ExternalHandle,
    },
    LoadFailed {
        entry: u32,
        node: NodeId,
        reason: String,
    },
}

/// Fans events out to every subscriber. Subscribers that dropped their receiver are forgotten on
/// the next publish.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<Sender<StreamingEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Receiver<StreamingEvent> {
        let (sender, receiver) = channel();
        self.subscribers.push(sender);
        receiver
    }

    pub fn publish(&mut self, event: StreamingEvent) {
        let before = self.subscribers.len();
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());

        if self.subscribers.len() != before {
            trace!("Pruned {} event subscribers", before - self.subscribers.len());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
