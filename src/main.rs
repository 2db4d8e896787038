use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use log::{info, warn};

use sargerust_streaming::io::fs::loader::FsLoader;
use sargerust_streaming::settings::{CliArgs, StreamingSettings};
use sargerust_streaming::world::events::StreamingEvent;
use sargerust_streaming::world::map_object_entry::MapObjectEntry;
use sargerust_streaming::world::wmo_manager::WmoManager;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = CliArgs::parse();
    log::trace!("Starting with args: {:?}", args);

    let settings = StreamingSettings::from_args(&args)?;
    let loader = FsLoader::new(&args.data_dir).with_context(|| format!("Cannot use {} as data directory", args.data_dir))?;
    let mut manager = WmoManager::with_loader(settings, Arc::new(loader)).context("Failed to spawn the streaming workers")?;
    let events = manager.subscribe();

    for (id, path) in args.wmo_paths.iter().enumerate() {
        let entry = MapObjectEntry::new(id as u32, path.as_str())
            .with_doodad_set(args.doodad_set)
            .with_placement(args.position.into(), Default::default());
        manager.load_entry(entry);
    }

    let started = Instant::now();
    let timeout = Duration::from_millis(args.timeout_ms);
    while !manager.is_idle() {
        if started.elapsed() > timeout {
            warn!("The streamer did not settle within {:?}", timeout);
            break;
        }

        manager.update();
        std::thread::sleep(Duration::from_millis(1));
    }

    let mut failures = 0;
    for event in events.try_iter() {
        if let StreamingEvent::LoadFailed { entry, node, reason } = event {
            warn!("Entry {}: {:?} failed: {}", entry, node, reason);
            failures += 1;
        }
    }

    let counters = manager.counters();
    info!(
        "Streamed {} entries in {:?}: {} groups, {} doodads ({} animated), {} failures",
        counters.loaded_entries,
        started.elapsed(),
        counters.loaded_groups,
        counters.loaded_doodads,
        counters.animated_doodads,
        failures
    );

    manager.shutdown();
    Ok(())
}
