use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::rc::Rc;
use std::time::Duration;

use thiserror::Error;

use crate::streaming::clock::{Clock, Ticker};

/// Absorbs the representation error of products like `70 * 0.1`, which would otherwise round up
/// to one item too many.
const BATCH_EPSILON: f64 = 1e-9;

#[derive(Error, Debug, PartialEq)]
pub enum QueueConfigError {
    #[error("The work factor {0} is not within (0, 1]")]
    InvalidWorkFactor(f64),

    #[error("The minimum work per tick has to be at least 1")]
    InvalidMinWork,

    #[error("The tick interval must not be zero")]
    InvalidTickInterval,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub tick_interval: Duration,
    /// Fraction of the backlog processed per tick.
    pub work_factor: f64,
    pub min_work: usize,
}

impl QueueConfig {
    pub fn new(tick_interval: Duration, work_factor: f64, min_work: usize) -> Self {
        Self {
            tick_interval,
            work_factor,
            min_work,
        }
    }

    pub fn validate(&self) -> Result<(), QueueConfigError> {
        if !(self.work_factor > 0.0 && self.work_factor <= 1.0) {
            return Err(QueueConfigError::InvalidWorkFactor(self.work_factor));
        }

        if self.min_work == 0 {
            return Err(QueueConfigError::InvalidMinWork);
        }

        if self.tick_interval.is_zero() {
            return Err(QueueConfigError::InvalidTickInterval);
        }

        Ok(())
    }
}

/// A FIFO of unique keys that is worked off in time slices: every `tick_interval`, a share of the
/// backlog proportional to its length is handed out, but at least `min_work` items.
///
/// The processing callback is only supposed to kick off work, the next tick is scheduled
/// regardless of whether that work completed.
pub struct ThrottledQueue<K, P> {
    config: QueueConfig,
    clock: Rc<dyn Clock>,
    ticker: Ticker,
    items: VecDeque<(K, P)>,
    keys: HashSet<K>,
}

impl<K: Eq + Hash + Clone, P> ThrottledQueue<K, P> {
    /// # Panics
    /// When the configuration is invalid, see [`QueueConfig::validate`].
    pub fn new(config: QueueConfig, clock: Rc<dyn Clock>) -> Self {
        if let Err(err) = config.validate() {
            panic!("Invalid queue configuration {:?}: {}", config, err);
        }

        Self {
            ticker: Ticker::new(config.tick_interval),
            config,
            clock,
            items: VecDeque::new(),
            keys: HashSet::new(),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Returns false and leaves the queue untouched if the key is already queued.
    pub fn add(&mut self, key: K, payload: P) -> bool {
        if !self.keys.insert(key.clone()) {
            return false;
        }

        self.items.push_back((key, payload));
        self.ticker.arm(self.clock.now());
        true
    }

    pub fn has(&self, key: &K) -> bool {
        self.keys.contains(key)
    }

    pub fn remove(&mut self, key: &K) -> Option<P> {
        if !self.keys.remove(key) {
            return None;
        }

        let position = self.items.iter().position(|(queued, _)| queued == key)?;
        let (_, payload) = self.items.remove(position)?;
        if self.items.is_empty() {
            self.ticker.disarm();
        }
        Some(payload)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        let len = self.items.len();
        if len == 0 {
            return 0;
        }

        let share = (len as f64 * self.config.work_factor - BATCH_EPSILON).ceil() as usize;
        len.min(self.config.min_work.max(share))
    }

    /// Removes the next batch if a tick is due, otherwise returns nothing.
    pub fn tick(&mut self) -> Vec<(K, P)> {
        if !self.ticker.poll(self.clock.now()) {
            return vec![];
        }

        let batch: Vec<_> = self.items.drain(..self.batch_size()).collect();
        for (key, _) in &batch {
            self.keys.remove(key);
        }

        if self.items.is_empty() {
            self.ticker.disarm();
        }
        batch
    }

    /// Like [`Self::tick`], handing each item to `process`. Returns how many items were processed.
    pub fn run_tick(&mut self, mut process: impl FnMut(K, P)) -> usize {
        let batch = self.tick();
        let count = batch.len();
        for (key, payload) in batch {
            process(key, payload);
        }
        count
    }

    pub fn clear(&mut self) {
        self.ticker.disarm();
        self.items.clear();
        self.keys.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;
    use std::time::Duration;

    use crate::streaming::clock::ManualClock;
    use crate::streaming::throttled_queue::{QueueConfig, QueueConfigError, ThrottledQueue};

    fn queue(clock: &ManualClock) -> ThrottledQueue<u32, String> {
        ThrottledQueue::new(
            QueueConfig::new(Duration::from_millis(1), 0.1, 2),
            Rc::new(clock.clone()),
        )
    }

    #[test]
    pub fn batch_size_scales_with_backlog() {
        let clock = ManualClock::new();
        let mut queue = queue(&clock);
        assert_eq!(queue.batch_size(), 0);

        for i in 0..5 {
            queue.add(i, format!("item {}", i));
        }
        assert_eq!(queue.batch_size(), 2);

        for i in 5..100 {
            queue.add(i, format!("item {}", i));
        }
        assert_eq!(queue.batch_size(), 10);

        for i in 100..101 {
            queue.add(i, format!("item {}", i));
        }
        assert_eq!(queue.batch_size(), 11);

        queue.clear();
        for i in 0..70 {
            queue.add(i, String::new());
        }
        assert_eq!(queue.batch_size(), 7);
    }

    #[test]
    pub fn ticks_process_in_insertion_order() {
        let clock = ManualClock::new();
        let mut queue = queue(&clock);
        for i in (0..5).rev() {
            assert!(queue.add(i, format!("item {}", i)));
        }

        // not due yet
        assert_eq!(queue.run_tick(|_, _| panic!("Processed before the tick was due")), 0);

        let mut processed = vec![];
        clock.advance(Duration::from_millis(1));
        assert_eq!(queue.run_tick(|key, _| processed.push(key)), 2);
        assert_eq!(processed, vec![4, 3]);
        assert!(!queue.has(&4));
        assert!(queue.has(&2));

        clock.advance(Duration::from_millis(1));
        queue.run_tick(|key, _| processed.push(key));
        clock.advance(Duration::from_millis(1));
        queue.run_tick(|key, _| processed.push(key));
        assert_eq!(processed, vec![4, 3, 2, 1, 0]);
        assert!(queue.is_empty());

        // an empty queue does not tick
        clock.advance(Duration::from_millis(1));
        assert!(queue.tick().is_empty());
    }

    #[test]
    pub fn duplicate_keys_are_ignored() {
        let clock = ManualClock::new();
        let mut queue = queue(&clock);
        assert!(queue.add(1, "first".to_string()));
        assert!(!queue.add(1, "second".to_string()));
        assert_eq!(queue.len(), 1);

        clock.advance(Duration::from_millis(1));
        assert_eq!(queue.tick(), vec![(1, "first".to_string())]);
        // once processed, the key can be queued again
        assert!(queue.add(1, "third".to_string()));
    }

    #[test]
    pub fn remove_and_clear() {
        let clock = ManualClock::new();
        let mut queue = queue(&clock);
        queue.add(1, "one".into());
        queue.add(2, "two".into());

        assert_eq!(queue.remove(&1), Some("one".to_string()));
        assert_eq!(queue.remove(&1), None);
        assert_eq!(queue.len(), 1);

        queue.clear();
        assert!(queue.is_empty());
        assert!(!queue.has(&2));
        clock.advance(Duration::from_secs(1));
        assert_eq!(queue.run_tick(|_, _| panic!("Processed a cleared item")), 0);
    }

    #[test]
    pub fn validates_config() {
        assert_eq!(
            QueueConfig::new(Duration::from_millis(1), 0.0, 1).validate(),
            Err(QueueConfigError::InvalidWorkFactor(0.0))
        );
        assert_eq!(
            QueueConfig::new(Duration::from_millis(1), 1.5, 1).validate(),
            Err(QueueConfigError::InvalidWorkFactor(1.5))
        );
        assert_eq!(
            QueueConfig::new(Duration::from_millis(1), 0.5, 0).validate(),
            Err(QueueConfigError::InvalidMinWork)
        );
        assert_eq!(
            QueueConfig::new(Duration::ZERO, 0.5, 1).validate(),
            Err(QueueConfigError::InvalidTickInterval)
        );
        assert!(QueueConfig::new(Duration::from_millis(1), 1.0, 1).validate().is_ok());
    }

    #[test]
    #[should_panic]
    pub fn invalid_config_panics() {
        let _ = ThrottledQueue::<u32, ()>::new(
            QueueConfig::new(Duration::from_millis(1), f64::NAN, 2),
            Rc::new(ManualClock::new()),
        );
    }
}
