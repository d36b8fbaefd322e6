//! Cancellable polling of backend jobs.
//!
//! Each submitted poll runs as a tokio task that owns its interval timer and
//! listens on a [`CancellationToken`]. The poller keeps at most one active
//! poll per [`OperationKey`]; submitting again under the same key cancels the
//! previous poll first. Dropping the poller cancels everything it owns.

use std::collections::HashMap;
use std::future::Future;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::types::{JobHandle, JobOutcome, JobState, JobStatusReport, OperationKey, PollConfig, PollState};
use crate::error::Result;

/// Identifies one submission. Stale handles are ignored by [`JobPoller::cancel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollHandle {
    key: OperationKey,
    id: u64,
}

impl PollHandle {
    pub fn key(&self) -> &OperationKey {
        &self.key
    }
}

struct ActivePoll {
    id: u64,
    token: CancellationToken,
    state: watch::Receiver<PollState>,
    task: JoinHandle<()>,
}

impl ActivePoll {
    fn state(&self) -> PollState {
        *self.state.borrow()
    }
}

pub struct JobPoller {
    config: PollConfig,
    active: HashMap<OperationKey, ActivePoll>,
    next_id: u64,
}

impl JobPoller {
    pub fn new(config: PollConfig) -> Self {
        Self {
            config,
            active: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn config(&self) -> PollConfig {
        self.config
    }

    /// Starts polling `job` under `key`.
    ///
    /// `poll_fn` is awaited once per tick. The first terminal report (or the
    /// timeout) stops the task and hands the outcome to `on_complete`, which
    /// runs at most once and never after a cancellation.
    ///
    /// The cancellation check and the callback are not atomic. The guarantee
    /// holds on a current-thread runtime, where `cancel` cannot run between
    /// them; on a multi-thread runtime a `cancel` racing the final report may
    /// still see its callback.
    pub fn submit<F, Fut, C>(
        &mut self,
        key: OperationKey,
        job: JobHandle,
        poll_fn: F,
        on_complete: C,
    ) -> PollHandle
    where
        F: FnMut(JobHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<JobStatusReport>> + Send + 'static,
        C: FnOnce(JobHandle, JobOutcome) + Send + 'static,
    {
        if let Some(stale) = self.active.remove(&key) {
            if stale.state() == PollState::Polling {
                info!(operation = %key, "superseding active poll");
            }
            stale.token.cancel();
        }

        self.next_id += 1;
        let id = self.next_id;
        let token = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(PollState::Polling);
        debug!(operation = %key, task = %job.task_id, "poll submitted");

        let task = tokio::spawn(run_poll(
            job,
            poll_fn,
            on_complete,
            self.config,
            token.clone(),
            state_tx,
        ));

        self.active.insert(
            key.clone(),
            ActivePoll {
                id,
                token,
                state: state_rx,
                task,
            },
        );
        PollHandle { key, id }
    }

    /// Stops the poll behind `handle` without invoking its callback.
    ///
    /// Returns `true` if a poll was still running. Unknown, finished or
    /// superseded handles are a no-op.
    pub fn cancel(&mut self, handle: &PollHandle) -> bool {
        match self.active.get(&handle.key) {
            Some(poll) if poll.id == handle.id => {
                let was_polling = poll.state() == PollState::Polling;
                poll.token.cancel();
                self.active.remove(&handle.key);
                if was_polling {
                    debug!(operation = %handle.key, "poll cancelled");
                }
                was_polling
            }
            _ => false,
        }
    }

    /// Cancels every poll; used on teardown.
    pub fn cancel_all(&mut self) {
        for (key, poll) in self.active.drain() {
            if poll.state() == PollState::Polling {
                debug!(operation = %key, "poll cancelled on teardown");
            }
            poll.token.cancel();
        }
    }

    pub fn state(&self, key: &OperationKey) -> PollState {
        self.active
            .get(key)
            .map(ActivePoll::state)
            .unwrap_or(PollState::Idle)
    }

    pub fn is_polling(&self, key: &OperationKey) -> bool {
        self.state(key) == PollState::Polling
    }

    pub fn active_count(&self) -> usize {
        self.active
            .values()
            .filter(|p| p.state() == PollState::Polling)
            .count()
    }

    pub fn any_polling(&self) -> bool {
        self.active_count() > 0
    }

    /// Forgets polls whose task has finished.
    pub fn reap(&mut self) {
        self.active
            .retain(|_, poll| !(poll.state().is_terminal() && poll.task.is_finished()));
    }
}

impl Drop for JobPoller {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

async fn run_poll<F, Fut, C>(
    job: JobHandle,
    mut poll_fn: F,
    on_complete: C,
    config: PollConfig,
    token: CancellationToken,
    state: watch::Sender<PollState>,
) where
    F: FnMut(JobHandle) -> Fut + Send + 'static,
    Fut: Future<Output = Result<JobStatusReport>> + Send + 'static,
    C: FnOnce(JobHandle, JobOutcome) + Send + 'static,
{
    let started = Instant::now();
    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let outcome = loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let report = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            report = poll_fn(job.clone()) => report,
        };

        match report {
            Ok(report) => match report.state {
                JobState::Pending => debug!(task = %job.task_id, kind = %job.kind, "job pending"),
                JobState::Succeeded => {
                    break JobOutcome::Succeeded {
                        result: report.result,
                    };
                }
                JobState::Failed => {
                    break JobOutcome::Failed {
                        detail: report.detail,
                    };
                }
            },
            Err(err) => warn!(task = %job.task_id, kind = %job.kind, error = %err, "poll tick failed, retrying next tick"),
        }

        let elapsed = started.elapsed();
        if elapsed >= config.timeout {
            break JobOutcome::TimedOut {
                elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            };
        }
    };

    if token.is_cancelled() {
        return;
    }
    state.send_replace(outcome.poll_state());
    info!(task = %job.task_id, kind = %job.kind, outcome = ?outcome.poll_state(), "job finished");
    on_complete(job, outcome);
}
