//! Streaming of world map objects (WMOs): their roots, groups and the doodads placed inside of
//! them are decoded on a pool of workers and handed out through reference counted caches, while
//! the control loop never blocks.

pub mod format;
pub mod io;
pub mod settings;
pub mod streaming;
pub mod world;
