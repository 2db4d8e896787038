#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use glam::{Quat, Vec3};

use sargerust_streaming::format::DecodeError;
use sargerust_streaming::format::m2::M2Description;
use sargerust_streaming::format::wmo::{
    DoodadDefinition, DoodadSet, GROUP_FLAG_EXTERIOR, GROUP_FLAG_INTERIOR, WmoGroupDescription, WmoRootDescription,
};
use sargerust_streaming::io::common::loader::{LoaderError, normalize_path};
use sargerust_streaming::settings::StreamingSettings;
use sargerust_streaming::streaming::clock::ManualClock;
use sargerust_streaming::streaming::jobs::{JobKind, JobRequest, JobRunner, Payload};
use sargerust_streaming::world::events::StreamingEvent;
use sargerust_streaming::world::wmo_manager::WmoManager;

pub const TOWER: &str = "World\\wmo\\Azeroth\\Tower.wmo";
pub const LAMP: &str = "World\\Generic\\Lamp.m2";
pub const TORCH: &str = "World\\Generic\\Torch.m2";
pub const BARREL: &str = "World\\Generic\\Barrel.m2";
pub const CHAIR: &str = "World\\Generic\\Chair.m2";

/// Serves prepared descriptions instead of decoding files, records which jobs ran and can hold
/// back all jobs of a kind until the test releases them.
#[derive(Default)]
pub struct FixtureRunner {
    roots: HashMap<String, WmoRootDescription>,
    groups: HashMap<String, WmoGroupDescription>,
    models: HashMap<String, M2Description>,
    jobs: Mutex<Vec<String>>,
    gates: Mutex<HashSet<JobKind>>,
    gate_changed: Condvar,
}

impl FixtureRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(mut self, path: &str, description: WmoRootDescription) -> Self {
        self.roots.insert(normalize_path(path), description);
        self
    }

    pub fn with_group(mut self, path: &str, description: WmoGroupDescription) -> Self {
        self.groups.insert(normalize_path(path), description);
        self
    }

    pub fn with_model(mut self, path: &str, animated: bool) -> Self {
        self.models.insert(
            normalize_path(path),
            M2Description {
                name: path.to_string(),
                version: 264,
                animated,
                ..Default::default()
            },
        );
        self
    }

    /// Jobs of this kind block until [`Self::open_gate`] is called.
    pub fn close_gate(&self, kind: JobKind) {
        self.gates.lock().unwrap().insert(kind);
    }

    pub fn open_gate(&self, kind: JobKind) {
        self.gates.lock().unwrap().remove(&kind);
        self.gate_changed.notify_all();
    }

    /// The normalized paths of all jobs, in the order the workers picked them up.
    pub fn jobs(&self) -> Vec<String> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn jobs_for(&self, path: &str) -> usize {
        let path = normalize_path(path);
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|job| **job == path)
            .count()
    }

    fn wait_for_gate(&self, kind: JobKind) {
        let mut gates = self.gates.lock().unwrap();
        while gates.contains(&kind) {
            let (guard, timeout) = self
                .gate_changed
                .wait_timeout(gates, Duration::from_secs(10))
                .unwrap();
            gates = guard;
            if timeout.timed_out() {
                panic!("Gate for {:?} has never been opened", kind);
            }
        }
    }
}

impl JobRunner for FixtureRunner {
    fn run(&self, request: &JobRequest) -> Result<Payload, DecodeError> {
        self.wait_for_gate(request.kind);

        let path = normalize_path(request.path()?);
        self.jobs.lock().unwrap().push(path.clone());

        let missing = || DecodeError::LoaderError(LoaderError::NotFound { path: path.clone() });
        Ok(match request.kind {
            JobKind::WmoRoot => Payload::WmoRoot(self.roots.get(&path).cloned().ok_or_else(missing)?),
            JobKind::WmoGroup => Payload::WmoGroup {
                index: request.index()?,
                description: self.groups.get(&path).cloned().ok_or_else(missing)?,
            },
            JobKind::M2 => Payload::M2(self.models.get(&path).cloned().ok_or_else(missing)?),
        })
    }
}

pub fn definition(name: &str, x: f32) -> DoodadDefinition {
    DoodadDefinition {
        name: name.to_string(),
        flags: 0,
        position: Vec3::new(x, 0.0, 0.0),
        orientation: Quat::IDENTITY,
        scale: 1.0,
        color: 0,
    }
}

pub fn group(flags: u32, doodad_refs: &[u16]) -> WmoGroupDescription {
    WmoGroupDescription {
        flags,
        vertex_count: 3,
        doodad_refs: doodad_refs.to_vec(),
    }
}

pub fn group_path(root: &str, index: u32) -> String {
    format!("{}_{:0>3}.WMO", normalize_path(root).trim_end_matches(".WMO"), index)
}

/// The tower: groups 0 and 2 are exterior, group 1 is interior.
///
/// Doodad set 0 holds LAMP (0), TORCH (1) and BARREL (2), doodad set 1 holds CHAIR (3) and an
/// emitter (4). Group 0 references 0, 1 and 3, group 1 references 0 and 4, group 2 references 2.
pub fn tower_runner() -> FixtureRunner {
    let root = WmoRootDescription::new(
        vec![GROUP_FLAG_EXTERIOR, GROUP_FLAG_INTERIOR, GROUP_FLAG_EXTERIOR],
        vec![
            DoodadSet {
                name: "Set_$DefaultGlobal".into(),
                start_index: 0,
                count: 3,
            },
            DoodadSet {
                name: "Set_Furniture".into(),
                start_index: 3,
                count: 2,
            },
        ],
        vec![
            definition(LAMP, 0.0),
            definition(TORCH, 1.0),
            definition(BARREL, 2.0),
            definition(CHAIR, 3.0),
            definition("World\\Generic\\FireEmitter.m2", 4.0),
        ],
    );

    FixtureRunner::new()
        .with_root(TOWER, root)
        .with_group(&group_path(TOWER, 0), group(GROUP_FLAG_EXTERIOR, &[0, 1, 3]))
        .with_group(&group_path(TOWER, 1), group(GROUP_FLAG_INTERIOR, &[0, 4]))
        .with_group(&group_path(TOWER, 2), group(GROUP_FLAG_EXTERIOR, &[2]))
        .with_model(LAMP, false)
        .with_model(TORCH, true)
        .with_model(BARREL, false)
        .with_model(CHAIR, false)
}

pub fn settings(worker_count: usize) -> StreamingSettings {
    StreamingSettings {
        worker_count,
        ..Default::default()
    }
}

pub fn manager(runner: &Arc<FixtureRunner>, clock: &ManualClock, worker_count: usize) -> WmoManager {
    WmoManager::new(settings(worker_count), runner.clone(), Rc::new(clock.clone())).unwrap()
}

/// Drives the control loop until all work completed, advancing the virtual clock by a
/// millisecond per iteration.
pub fn settle(manager: &mut WmoManager, clock: &ManualClock) {
    for _ in 0..5000 {
        manager.update();
        if manager.is_idle() {
            return;
        }
        clock.advance(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(1));
    }
    panic!("The streamer did not settle");
}

/// Drives the control loop until `condition` holds.
pub fn drive_until(manager: &mut WmoManager, clock: &ManualClock, mut condition: impl FnMut(&WmoManager) -> bool) {
    for _ in 0..5000 {
        manager.update();
        if condition(manager) {
            return;
        }
        clock.advance(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(1));
    }
    panic!("The condition never held");
}

/// Lets time pass in big steps, e.g. to get a sweep going.
pub fn advance(manager: &mut WmoManager, clock: &ManualClock, delta: Duration) {
    clock.advance(delta);
    manager.update();
}

pub fn drain(events: &std::sync::mpsc::Receiver<StreamingEvent>) -> Vec<StreamingEvent> {
    events.try_iter().collect()
}
