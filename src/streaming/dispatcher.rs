use std::collections::VecDeque;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, trace, warn};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::format::DecodeError;
use crate::streaming::clock::Clock;
use crate::streaming::jobs::{JobRequest, JobRunner, Payload};

pub type JobId = u64;

#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("The worker panicked while running the job")]
    WorkerPanicked,

    #[error("The job has been cancelled before it could complete")]
    Cancelled,
}

pub type JobResult = Result<Payload, JobError>;

/// The receiving end of a submitted job. Can be polled without blocking through [`Self::try_take`]
/// or awaited like any other future.
#[derive(Debug)]
pub struct JobFuture {
    id: JobId,
    receiver: oneshot::Receiver<JobResult>,
}

impl JobFuture {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Returns the outcome once the job completed. Must not be called again after it returned
    /// `Some`.
    pub fn try_take(&mut self) -> Option<JobResult> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(JobError::Cancelled)),
        }
    }
}

impl Future for JobFuture {
    type Output = JobResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Err(JobError::Cancelled)))
    }
}

struct QueuedJob {
    id: JobId,
    request: JobRequest,
    reply: oneshot::Sender<JobResult>,
}

struct SlotCompletion {
    slot: usize,
    job_id: JobId,
}

struct InFlightJob {
    job_id: JobId,
    description: String,
    dispatched_at: Duration,
}

struct WorkerSlot {
    commands: Option<Sender<QueuedJob>>,
    thread: Option<JoinHandle<()>>,
    current: Option<InFlightJob>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledSlot {
    pub slot: usize,
    pub job_id: JobId,
    pub description: String,
    pub busy_for: Duration,
}

/// Distributes decode jobs across a fixed pool of worker threads, one job per worker at a time.
/// Jobs that find no idle worker wait in a FIFO and are handed out by [`Self::pump`] as soon as
/// workers report back.
///
/// There is no timeout: a job that never finishes occupies its worker forever, see
/// [`Self::stalled_slots`].
pub struct JobDispatcher {
    clock: Rc<dyn Clock>,
    slots: Vec<WorkerSlot>,
    overflow: VecDeque<QueuedJob>,
    completions: Receiver<SlotCompletion>,
    cursor: usize,
    next_job_id: JobId,
    shut_down: bool,
}

impl JobDispatcher {
    pub fn new(worker_count: usize, runner: Arc<dyn JobRunner>, clock: Rc<dyn Clock>) -> std::io::Result<Self> {
        assert!(worker_count > 0, "The dispatcher needs at least one worker");
        let (completion_tx, completions) = channel();

        let mut slots = Vec::with_capacity(worker_count);
        for slot in 0..worker_count {
            let (commands, worker_rx) = channel();
            let runner = runner.clone();
            let completion_tx = completion_tx.clone();
            let thread = std::thread::Builder::new()
                .name(format!("Streaming Worker #{}", slot))
                .spawn(move || worker_loop(slot, runner, worker_rx, completion_tx))?;

            slots.push(WorkerSlot {
                commands: Some(commands),
                thread: Some(thread),
                current: None,
            });
        }

        debug!("Spawned {} streaming workers", worker_count);
        Ok(Self {
            clock,
            slots,
            overflow: VecDeque::new(),
            completions,
            cursor: 0,
            next_job_id: 0,
            shut_down: false,
        })
    }

    pub fn submit(&mut self, request: JobRequest) -> JobFuture {
        let (reply, receiver) = oneshot::channel();
        let id = self.next_job_id;
        self.next_job_id += 1;

        let job = QueuedJob { id, request, reply };
        if self.shut_down {
            warn!("Rejecting {} as the dispatcher has been shut down", job.request);
            let _ = job.reply.send(Err(JobError::Cancelled));
        } else if let Some(slot) = self.idle_slot() {
            self.assign(slot, job);
        } else {
            trace!("All workers busy, queueing {}", job.request);
            self.overflow.push_back(job);
        }

        JobFuture { id, receiver }
    }

    /// Processes the completion notices of the workers: frees their slots and hands out queued
    /// jobs. Returns the number of jobs that completed since the last call.
    pub fn pump(&mut self) -> usize {
        let mut completed = 0;
        while let Ok(completion) = self.completions.try_recv() {
            completed += 1;
            let slot = &mut self.slots[completion.slot];
            if slot
                .current
                .as_ref()
                .is_some_and(|current| current.job_id == completion.job_id)
            {
                slot.current = None;
            }

            if !self.shut_down {
                self.assign_overflow(completion.slot);
            }
        }

        completed
    }

    pub fn worker_count(&self) -> usize {
        self.slots.len()
    }

    pub fn busy_slots(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.current.is_some())
            .count()
    }

    pub fn queued(&self) -> usize {
        self.overflow.len()
    }

    pub fn jobs_submitted(&self) -> u64 {
        self.next_job_id
    }

    pub fn is_idle(&self) -> bool {
        self.busy_slots() == 0 && self.overflow.is_empty()
    }

    pub fn stalled_slots(&self, threshold: Duration) -> Vec<StalledSlot> {
        let now = self.clock.now();
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, worker)| {
                let current = worker.current.as_ref()?;
                let busy_for = now.saturating_sub(current.dispatched_at);
                (busy_for >= threshold).then(|| StalledSlot {
                    slot,
                    job_id: current.job_id,
                    description: current.description.clone(),
                    busy_for,
                })
            })
            .collect()
    }

    /// Cancels all queued jobs and joins the idle workers. Workers that are still busy are
    /// detached instead of waited for, the futures of their jobs resolve whenever they finish.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        if !self.overflow.is_empty() {
            debug!("Cancelling {} queued jobs", self.overflow.len());
        }
        for job in self.overflow.drain(..) {
            let _ = job.reply.send(Err(JobError::Cancelled));
        }

        // closing the command channels ends the worker loops once their current job is done
        for slot in &mut self.slots {
            slot.commands = None;
        }

        self.pump();
        let now = self.clock.now();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let Some(thread) = slot.thread.take() else {
                continue;
            };

            if let Some(current) = slot.current.take() {
                warn!(
                    "Streaming Worker #{} is still busy with {} after {:?}, detaching it",
                    index,
                    current.description,
                    now.saturating_sub(current.dispatched_at)
                );
                continue;
            }

            if thread.join().is_err() {
                error!("Streaming Worker #{} terminated abnormally", index);
            }
        }
    }

    fn idle_slot(&mut self) -> Option<usize> {
        let count = self.slots.len();
        let slot = (0..count)
            .map(|offset| (self.cursor + offset) % count)
            .find(|&slot| self.slots[slot].current.is_none())?;
        self.cursor = (slot + 1) % count;
        Some(slot)
    }

    fn assign_overflow(&mut self, slot: usize) {
        while self.slots[slot].current.is_none() {
            let Some(job) = self.overflow.pop_front() else {
                return;
            };

            if job.reply.is_closed() {
                trace!("Skipping {}, nobody is waiting for it anymore", job.request);
                continue;
            }

            self.assign(slot, job);
        }
    }

    fn assign(&mut self, slot: usize, job: QueuedJob) {
        let worker = &mut self.slots[slot];
        let Some(commands) = worker.commands.as_ref() else {
            let _ = job.reply.send(Err(JobError::Cancelled));
            return;
        };

        trace!("Dispatching {} to Streaming Worker #{}", job.request, slot);
        let current = InFlightJob {
            job_id: job.id,
            description: job.request.to_string(),
            dispatched_at: self.clock.now(),
        };

        match commands.send(job) {
            Ok(()) => worker.current = Some(current),
            Err(err) => {
                error!("Streaming Worker #{} is gone, failing {}", slot, current.description);
                let _ = err.0.reply.send(Err(JobError::WorkerPanicked));
            }
        }
    }
}

impl Drop for JobDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    slot: usize,
    runner: Arc<dyn JobRunner>,
    commands: Receiver<QueuedJob>,
    completions: Sender<SlotCompletion>,
) {
    while let Ok(job) = commands.recv() {
        let outcome = match catch_unwind(AssertUnwindSafe(|| runner.run(&job.request))) {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(err)) => {
                debug!("{} failed: {}", job.request, err);
                Err(JobError::Decode(err))
            }
            Err(_) => {
                error!("Streaming Worker #{} panicked while running {}", slot, job.request);
                Err(JobError::WorkerPanicked)
            }
        };

        if job.reply.send(outcome).is_err() {
            trace!("Result of {} has been discarded", job.request);
        }

        if completions
            .send(SlotCompletion {
                slot,
                job_id: job.id,
            })
            .is_err()
        {
            break;
        }
    }
}
