//! The generic streaming machinery: a pool of decode workers, time-sliced work queues and a
//! reference counted cache that defers the disposal of unreferenced resources.
//!
//! Everything in here except for the workers themselves lives on the control thread and is
//! driven by polling (`update()`/`pump()`), nothing blocks on I/O.

pub mod cache;
pub mod cancellation;
pub mod clock;
pub mod dispatcher;
pub mod jobs;
pub mod resource;
pub mod throttled_queue;
