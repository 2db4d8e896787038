mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use sargerust_streaming::streaming::clock::ManualClock;
use sargerust_streaming::streaming::jobs::JobKind;
use sargerust_streaming::world::counters::Counters;
use sargerust_streaming::world::events::{NodeId, StreamingEvent};
use sargerust_streaming::world::map_object_entry::MapObjectEntry;
use sargerust_streaming::world::wmo_handler::HandleState;

use crate::common::{
    BARREL, CHAIR, FixtureRunner, LAMP, TORCH, TOWER, advance, definition, drain, drive_until, group, group_path,
    manager, settle, tower_runner,
};

#[test_log::test]
pub fn loads_root_groups_and_doodads() {
    let runner = Arc::new(tower_runner());
    let clock = ManualClock::new();
    let mut manager = manager(&runner, &clock, 2);
    let events = manager.subscribe();

    assert!(manager.load_entry(MapObjectEntry::new(1, TOWER)));
    settle(&mut manager, &clock);

    let handler = manager.handler(1).unwrap();
    assert_eq!(handler.state(), HandleState::Loaded);
    assert_eq!(
        *manager.counters(),
        Counters {
            loading_groups: 0,
            loaded_groups: 3,
            loading_doodads: 0,
            loaded_doodads: 3,
            animated_doodads: 1,
            loaded_entries: 1,
        }
    );

    assert_eq!(handler.groups_for_doodad(0), vec![0, 1]);
    assert_eq!(handler.doodads_for_group(0), vec![0, 1]);
    assert_eq!(handler.doodads_for_group(2), vec![2]);
    // the emitter of group 1 and the chair of group 0 belong to the other doodad set
    assert_eq!(handler.doodads_for_group(1), vec![0]);
    assert_eq!(runner.jobs_for(CHAIR), 0);

    // root, 3 groups, 3 doodads
    let handles = manager.attached_handles();
    assert_eq!(handles.len(), 7);
    let attached: Vec<_> = drain(&events)
        .into_iter()
        .filter_map(|event| match event {
            StreamingEvent::Attached { node, placement, .. } => Some((node, placement)),
            _ => None,
        })
        .collect();
    assert_eq!(attached.len(), 7);
    assert_eq!(attached[0].0, NodeId::Root);

    let (_, torch_placement) = attached
        .iter()
        .find(|(node, _)| *node == NodeId::Doodad(1))
        .unwrap();
    assert_eq!(torch_placement.unwrap().position.x, 1.0);
}

#[test_log::test]
pub fn exterior_groups_are_loaded_first() {
    let runner = Arc::new(tower_runner());
    let clock = ManualClock::new();
    let mut manager = manager(&runner, &clock, 1);

    manager.load_entry(MapObjectEntry::new(1, TOWER));
    settle(&mut manager, &clock);

    let group_jobs: Vec<_> = runner
        .jobs()
        .into_iter()
        .filter(|job| job.contains("TOWER_"))
        .collect();
    assert_eq!(
        group_jobs,
        vec![group_path(TOWER, 0), group_path(TOWER, 2), group_path(TOWER, 1)]
    );
}

#[test_log::test]
pub fn shared_doodad_is_loaded_once_and_released_once() {
    let runner = Arc::new(tower_runner());
    let clock = ManualClock::new();
    let mut manager = manager(&runner, &clock, 2);
    let events = manager.subscribe();

    manager.load_entry(MapObjectEntry::new(1, TOWER));
    settle(&mut manager, &clock);
    drain(&events);

    assert_eq!(runner.jobs_for(LAMP), 1);
    assert_eq!(manager.doodads().ref_count(LAMP), 1);
    assert_eq!(manager.handler(1).unwrap().groups_for_doodad(0).len(), 2);

    assert!(manager.release_doodad_reference(1, 0, 0));
    assert_eq!(manager.handler(1).unwrap().groups_for_doodad(0), vec![1]);
    assert_eq!(manager.doodads().ref_count(LAMP), 1);
    assert_eq!(manager.counters().loaded_doodads, 3);

    assert!(manager.release_doodad_reference(1, 0, 1));
    assert!(manager.handler(1).unwrap().groups_for_doodad(0).is_empty());
    assert_eq!(manager.doodads().ref_count(LAMP), 0);
    assert_eq!(manager.counters().loaded_doodads, 2);

    // neither group references it anymore
    assert!(!manager.release_doodad_reference(1, 0, 1));
    assert_eq!(manager.doodads().ref_count(LAMP), 0);

    let detached: Vec<_> = drain(&events)
        .into_iter()
        .filter(|event| matches!(event, StreamingEvent::Detached { .. }))
        .collect();
    assert_eq!(detached.len(), 1);
    assert!(matches!(
        detached[0],
        StreamingEvent::Detached {
            node: NodeId::Doodad(0),
            ..
        }
    ));
}

#[test_log::test]
pub fn unloading_a_group_releases_its_doodads() {
    let runner = Arc::new(tower_runner());
    let clock = ManualClock::new();
    let mut manager = manager(&runner, &clock, 2);

    manager.load_entry(MapObjectEntry::new(1, TOWER));
    settle(&mut manager, &clock);

    assert!(manager.unload_group(1, 0));
    let handler = manager.handler(1).unwrap();
    assert!(handler.group(0).is_none());
    // the lamp is still referenced by group 1, the torch was exclusive to group 0
    assert_eq!(handler.groups_for_doodad(0), vec![1]);
    assert!(handler.doodad(0).is_some());
    assert!(handler.doodad(1).is_none());
    assert_eq!(manager.doodads().ref_count(TORCH), 0);
    assert_eq!(manager.groups().ref_count(&group_path(TOWER, 0)), 0);

    assert_eq!(manager.counters().loaded_groups, 2);
    assert_eq!(manager.counters().loaded_doodads, 2);
    assert_eq!(manager.counters().animated_doodads, 0);

    assert!(!manager.unload_group(1, 0));
}

#[test_log::test]
pub fn doodad_set_selects_the_doodads() {
    let runner = Arc::new(tower_runner());
    let clock = ManualClock::new();
    let mut manager = manager(&runner, &clock, 2);

    manager.load_entry(MapObjectEntry::new(1, TOWER).with_doodad_set(1));
    settle(&mut manager, &clock);

    let handler = manager.handler(1).unwrap();
    assert_eq!(handler.doodads_for_group(0), vec![3]);
    assert!(handler.doodads_for_group(1).is_empty());
    assert_eq!(runner.jobs_for(CHAIR), 1);
    assert_eq!(runner.jobs_for(LAMP), 0);
    assert_eq!(manager.counters().loaded_doodads, 1);
}

#[test_log::test]
pub fn unload_during_root_load_changes_nothing() {
    let runner = Arc::new(tower_runner());
    runner.close_gate(JobKind::WmoRoot);
    let clock = ManualClock::new();
    let mut manager = manager(&runner, &clock, 2);
    let events = manager.subscribe();

    manager.load_entry(MapObjectEntry::new(1, TOWER));
    manager.update();
    assert_eq!(manager.roots().ref_count(TOWER), 1);

    assert!(manager.unload_entry(1));
    assert_eq!(manager.roots().ref_count(TOWER), 0);

    runner.open_gate(JobKind::WmoRoot);
    settle(&mut manager, &clock);
    // let the cache pick up the late result
    advance(&mut manager, &clock, Duration::from_millis(10));

    assert!(manager.counters().is_zero());
    assert_eq!(manager.roots().ref_count(TOWER), 0);
    assert!(manager.groups().is_empty());
    assert!(manager.doodads().is_empty());
    assert!(manager.attached_handles().is_empty());
    assert!(drain(&events).is_empty());
    assert_eq!(runner.jobs().len(), 1);
}

#[test_log::test]
pub fn unload_during_group_load_releases_in_flight_groups() {
    let runner = Arc::new(tower_runner());
    runner.close_gate(JobKind::WmoGroup);
    let clock = ManualClock::new();
    let mut manager = manager(&runner, &clock, 4);
    let events = manager.subscribe();

    manager.load_entry(MapObjectEntry::new(1, TOWER));
    drive_until(&mut manager, &clock, |manager| manager.groups().len() == 3);
    assert_eq!(manager.counters().loading_groups, 3);

    assert!(manager.unload_entry(1));
    for index in 0..3 {
        assert_eq!(manager.groups().ref_count(&group_path(TOWER, index)), 0);
    }
    assert!(manager.counters().is_zero());

    runner.open_gate(JobKind::WmoGroup);
    settle(&mut manager, &clock);
    advance(&mut manager, &clock, Duration::from_millis(10));

    assert!(manager.counters().is_zero());
    assert!(manager.doodads().is_empty());
    let group_attachments = drain(&events)
        .into_iter()
        .filter(|event| {
            matches!(
                event,
                StreamingEvent::Attached {
                    node: NodeId::Group(_),
                    ..
                }
            )
        })
        .count();
    assert_eq!(group_attachments, 0);
}

#[test_log::test]
pub fn unload_releases_everything_and_sweeps_dispose() {
    let runner = Arc::new(tower_runner());
    let clock = ManualClock::new();
    let mut manager = manager(&runner, &clock, 2);
    let events = manager.subscribe();

    manager.load_entry(MapObjectEntry::new(1, TOWER));
    settle(&mut manager, &clock);
    drain(&events);

    let handler = manager.handler(1).unwrap();
    let root = handler.root().unwrap().clone();
    let torch = handler.doodad(1).unwrap().clone();

    assert!(manager.unload_entry(1));
    assert!(manager.handler(1).is_none());
    assert!(manager.counters().is_zero());
    assert_eq!(manager.roots().ref_count(TOWER), 0);
    assert_eq!(manager.doodads().ref_count(TORCH), 0);
    assert_eq!(drain(&events).len(), 7);
    // unloading twice does nothing
    assert!(!manager.unload_entry(1));

    // disposed only once they stayed unreferenced for a whole interval
    advance(&mut manager, &clock, Duration::from_secs(15));
    assert!(!root.is_disposed());
    advance(&mut manager, &clock, Duration::from_secs(15));
    assert!(root.is_disposed());
    assert!(torch.is_disposed());
    assert!(manager.roots().is_empty());
    assert!(manager.groups().is_empty());
    assert!(manager.doodads().is_empty());
}

#[test_log::test]
pub fn reloading_before_the_sweep_reuses_resources() {
    let runner = Arc::new(tower_runner());
    let clock = ManualClock::new();
    let mut manager = manager(&runner, &clock, 2);

    manager.load_entry(MapObjectEntry::new(1, TOWER));
    settle(&mut manager, &clock);
    manager.unload_entry(1);

    manager.load_entry(MapObjectEntry::new(1, TOWER));
    settle(&mut manager, &clock);

    assert_eq!(runner.jobs_for(TOWER), 1);
    assert_eq!(runner.jobs_for(BARREL), 1);
    assert_eq!(manager.counters().loaded_groups, 3);
    assert_eq!(manager.counters().loaded_entries, 1);
}

#[test_log::test]
pub fn delayed_unload_can_be_cancelled() {
    let runner = Arc::new(tower_runner());
    let clock = ManualClock::new();
    let mut manager = manager(&runner, &clock, 2);

    manager.load_entry(MapObjectEntry::new(1, TOWER));
    settle(&mut manager, &clock);

    assert!(manager.schedule_unload(1, Duration::from_secs(5)));
    advance(&mut manager, &clock, Duration::from_secs(2));
    assert!(manager.handler(1).is_some());

    // loading it again cancels the unload instead of creating another handler
    assert!(!manager.load_entry(MapObjectEntry::new(1, TOWER)));
    assert!(!manager.is_unload_scheduled(1));
    advance(&mut manager, &clock, Duration::from_secs(10));
    assert!(manager.handler(1).is_some());
    assert_eq!(manager.counters().loaded_entries, 1);

    assert!(manager.schedule_unload(1, Duration::from_secs(5)));
    advance(&mut manager, &clock, Duration::from_secs(6));
    assert!(manager.handler(1).is_none());
    assert!(manager.counters().is_zero());

    assert!(!manager.schedule_unload(1, Duration::from_secs(5)));
}

#[test_log::test]
pub fn failed_children_do_not_stop_their_siblings() {
    let root = sargerust_streaming::format::wmo::WmoRootDescription::new(
        vec![0, 0, 0],
        vec![sargerust_streaming::format::wmo::DoodadSet {
            name: "Set_$DefaultGlobal".into(),
            start_index: 0,
            count: 2,
        }],
        vec![definition(LAMP, 0.0), definition("World\\Generic\\Missing.m2", 1.0)],
    );
    // group 1 does not exist
    let runner = Arc::new(
        FixtureRunner::new()
            .with_root(TOWER, root)
            .with_group(&group_path(TOWER, 0), group(0, &[0, 1]))
            .with_group(&group_path(TOWER, 2), group(0, &[0]))
            .with_model(LAMP, false),
    );
    let clock = ManualClock::new();
    let mut manager = manager(&runner, &clock, 2);
    let events = manager.subscribe();

    manager.load_entry(MapObjectEntry::new(1, TOWER));
    settle(&mut manager, &clock);

    let handler = manager.handler(1).unwrap();
    assert_eq!(handler.state(), HandleState::Loaded);
    let failed: Vec<_> = handler
        .failures()
        .iter()
        .map(|failure| failure.node)
        .collect();
    assert_eq!(failed.len(), 2);
    assert!(failed.contains(&NodeId::Group(1)));
    assert!(failed.contains(&NodeId::Doodad(1)));

    assert!(handler.group(0).is_some());
    assert!(handler.group(2).is_some());
    assert!(handler.doodad(0).is_some());
    assert_eq!(manager.groups().ref_count(&group_path(TOWER, 1)), 0);
    assert_eq!(manager.doodads().ref_count("World\\Generic\\Missing.m2"), 0);

    let counters = manager.counters();
    assert_eq!(counters.loading_groups, 0);
    assert_eq!(counters.loading_doodads, 0);
    assert_eq!(counters.loaded_groups, 2);
    assert_eq!(counters.loaded_doodads, 1);

    let failures = drain(&events)
        .into_iter()
        .filter(|event| matches!(event, StreamingEvent::LoadFailed { .. }))
        .count();
    assert_eq!(failures, 2);

    // unloading a handler with failures still balances everything
    manager.unload_entry(1);
    assert!(manager.counters().is_zero());
}

#[test_log::test]
pub fn missing_root_fails_the_handler() {
    let runner = Arc::new(FixtureRunner::new());
    let clock = ManualClock::new();
    let mut manager = manager(&runner, &clock, 1);

    manager.load_entry(MapObjectEntry::new(7, "World\\wmo\\Nowhere.wmo"));
    settle(&mut manager, &clock);

    let handler = manager.handler(7).unwrap();
    assert_eq!(handler.state(), HandleState::Failed);
    assert_eq!(handler.failures()[0].node, NodeId::Root);
    assert_eq!(manager.roots().ref_count("World\\wmo\\Nowhere.wmo"), 0);

    assert!(manager.unload_entry(7));
    assert!(manager.counters().is_zero());
}

#[test_log::test]
pub fn aggregate_counters_are_the_sum_of_all_handlers() {
    let runner = Arc::new(tower_runner());
    let clock = ManualClock::new();
    let mut manager = manager(&runner, &clock, 3);

    manager.load_entry(MapObjectEntry::new(1, TOWER));
    manager.load_entry(MapObjectEntry::new(2, TOWER).with_doodad_set(1));

    let sum_of_handlers = |manager: &sargerust_streaming::world::wmo_manager::WmoManager| {
        let mut sum: Counters = manager
            .entry_ids()
            .iter()
            .map(|id| *manager.handler(*id).unwrap().counters())
            .collect::<Vec<_>>()
            .iter()
            .sum();
        sum.loaded_entries = manager.entry_ids().len();
        sum
    };

    for _ in 0..5000 {
        manager.update();
        assert_eq!(*manager.counters(), sum_of_handlers(&manager));
        if manager.is_idle() {
            break;
        }
        clock.advance(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(manager.is_idle());

    // both placements share the root and the groups
    assert_eq!(runner.jobs_for(TOWER), 1);
    assert_eq!(runner.jobs_for(&group_path(TOWER, 0)), 1);
    assert_eq!(manager.roots().ref_count(TOWER), 2);
    assert_eq!(manager.counters().loaded_groups, 6);
    assert_eq!(manager.counters().loaded_doodads, 4);

    manager.unload_entry(1);
    assert_eq!(*manager.counters(), sum_of_handlers(&manager));
    assert_eq!(manager.roots().ref_count(TOWER), 1);

    manager.shutdown();
    assert!(manager.counters().is_zero());
    assert!(!manager.load_entry(MapObjectEntry::new(3, TOWER)));
}

#[test_log::test]
pub fn shutdown_does_not_wait_for_a_hung_worker() {
    let runner = Arc::new(tower_runner());
    runner.close_gate(JobKind::WmoRoot);
    let clock = ManualClock::new();
    let mut manager = manager(&runner, &clock, 1);

    manager.load_entry(MapObjectEntry::new(1, TOWER));
    manager.update();
    assert_eq!(manager.dispatcher().busy_slots(), 1);

    let started = Instant::now();
    manager.shutdown();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(manager.counters().is_zero());
    assert!(manager.roots().is_empty());

    runner.open_gate(JobKind::WmoRoot);
}

#[test_log::test]
pub fn dropping_the_manager_disposes_everything() {
    let runner = Arc::new(tower_runner());
    let clock = ManualClock::new();
    let mut manager = manager(&runner, &clock, 2);

    manager.load_entry(MapObjectEntry::new(1, TOWER));
    settle(&mut manager, &clock);

    let root = manager.roots().get(TOWER).unwrap();
    let group = manager.groups().get(&group_path(TOWER, 0)).unwrap();
    let lamp = manager.doodads().get(LAMP).unwrap();
    assert!(!root.is_disposed());

    drop(manager);
    assert!(root.is_disposed());
    assert!(group.is_disposed());
    assert!(lamp.is_disposed());
}
