//! World map objects on top of the streaming machinery: every placed WMO is driven by a
//! [`wmo_handler::WmoHandler`] that loads its root, then its groups and finally the doodads that
//! those groups reference. The [`wmo_manager::WmoManager`] owns the handlers together with the
//! shared caches and the dispatcher.

pub mod assets;
pub mod context;
pub mod counters;
pub mod doodad_references;
pub mod events;
pub mod map_object_entry;
pub mod wmo_handler;
pub mod wmo_manager;
