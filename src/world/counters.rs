use std::iter::Sum;
use std::ops::AddAssign;

use log::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    LoadingGroups,
    LoadedGroups,
    LoadingDoodads,
    LoadedDoodads,
    AnimatedDoodads,
    LoadedEntries,
}

/// Progress of the streamer. Every handler keeps its own set and mirrors each change into the
/// aggregate of its manager, so that the aggregate always equals the sum of all live handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub loading_groups: usize,
    pub loaded_groups: usize,
    pub loading_doodads: usize,
    pub loaded_doodads: usize,
    pub animated_doodads: usize,
    /// Only maintained by the manager.
    pub loaded_entries: usize,
}

impl Counters {
    pub fn get(&self, counter: Counter) -> usize {
        match counter {
            Counter::LoadingGroups => self.loading_groups,
            Counter::LoadedGroups => self.loaded_groups,
            Counter::LoadingDoodads => self.loading_doodads,
            Counter::LoadedDoodads => self.loaded_doodads,
            Counter::AnimatedDoodads => self.animated_doodads,
            Counter::LoadedEntries => self.loaded_entries,
        }
    }

    fn get_mut(&mut self, counter: Counter) -> &mut usize {
        match counter {
            Counter::LoadingGroups => &mut self.loading_groups,
            Counter::LoadedGroups => &mut self.loaded_groups,
            Counter::LoadingDoodads => &mut self.loading_doodads,
            Counter::LoadedDoodads => &mut self.loaded_doodads,
            Counter::AnimatedDoodads => &mut self.animated_doodads,
            Counter::LoadedEntries => &mut self.loaded_entries,
        }
    }

    pub fn increment(&mut self, counter: Counter) {
        *self.get_mut(counter) += 1;
    }

    pub fn decrement(&mut self, counter: Counter) {
        let value = self.get_mut(counter);
        debug_assert!(*value > 0, "Counter {:?} underflow", counter);
        match value.checked_sub(1) {
            Some(decremented) => *value = decremented,
            None => error!("Counter {:?} would become negative", counter),
        }
    }

    /// Removes the contribution of a handler from an aggregate.
    pub fn subtract(&mut self, other: &Counters) {
        for counter in Self::ALL {
            let delta = other.get(counter);
            let value = self.get_mut(counter);
            debug_assert!(*value >= delta, "Counter {:?} underflow", counter);
            if delta > *value {
                error!("Counter {:?} would become negative ({} - {})", counter, value, delta);
            }
            *value = value.saturating_sub(delta);
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Counters::default()
    }

    pub const ALL: [Counter; 6] = [
        Counter::LoadingGroups,
        Counter::LoadedGroups,
        Counter::LoadingDoodads,
        Counter::LoadedDoodads,
        Counter::AnimatedDoodads,
        Counter::LoadedEntries,
    ];
}

impl AddAssign<&Counters> for Counters {
    fn add_assign(&mut self, rhs: &Counters) {
        for counter in Self::ALL {
            *self.get_mut(counter) += rhs.get(counter);
        }
    }
}

impl<'a> Sum<&'a Counters> for Counters {
    fn sum<I: Iterator<Item = &'a Counters>>(iter: I) -> Self {
        iter.fold(Counters::default(), |mut acc, counters| {
            acc += counters;
            acc
        })
    }
}
