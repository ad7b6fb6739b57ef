//! Per-task poll loops.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use crate::schema_change::{actions::ActionOutput, domain::ScheduleTaskId};

use super::{OscStateMachine, PollOutcome};

struct Poller {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct SchedulerInner {
    machine: Arc<OscStateMachine>,
    interval: Duration,
    shutdown: CancellationToken,
    pollers: Mutex<HashMap<ScheduleTaskId, Poller>>,
    handoffs: mpsc::UnboundedSender<ScheduleTaskId>,
}

impl SchedulerInner {
    fn pollers(&self) -> MutexGuard<'_, HashMap<ScheduleTaskId, Poller>> {
        self.pollers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn submit(&self, id: ScheduleTaskId) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        let mut pollers = self.pollers();
        if pollers
            .get(&id)
            .is_some_and(|poller| !poller.handle.is_finished())
        {
            return false;
        }
        let token = self.shutdown.child_token();
        let handle = tokio::spawn(
            poll_loop(
                Arc::clone(&self.machine),
                self.handoffs.clone(),
                id,
                self.interval,
                token.clone(),
            )
            .instrument(info_span!("osc_task", task_id = %id)),
        );
        pollers.insert(id, Poller { token, handle });
        true
    }
}

async fn poll_loop(
    machine: Arc<OscStateMachine>,
    handoffs: mpsc::UnboundedSender<ScheduleTaskId>,
    id: ScheduleTaskId,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match machine.poll(id).await {
            Ok(outcome) => {
                if let PollOutcome::Stepped {
                    output: Some(ActionOutput::Handoff { task_id, .. }),
                    ..
                } = &outcome
                {
                    if handoffs.send(*task_id).is_err() {
                        warn!(next_task_id = %task_id, "scheduler stopped before hand-over");
                    }
                }
                if outcome.stops_polling() {
                    debug!(?outcome, "polling stopped");
                    break;
                }
            }
            Err(err) => warn!(error = %err, "poll failed"),
        }
    }
}

async fn dispatch_handoffs(
    inner: Arc<SchedulerInner>,
    mut receiver: mpsc::UnboundedReceiver<ScheduleTaskId>,
) {
    loop {
        tokio::select! {
            () = inner.shutdown.cancelled() => break,
            received = receiver.recv() => {
                let Some(id) = received else { break };
                inner.submit(id);
            }
        }
    }
}

/// Registry of single-flight poll loops, one per task.
///
/// A task handed over by its sibling's yield is submitted automatically.
pub struct ActionScheduler {
    inner: Arc<SchedulerInner>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl ActionScheduler {
    /// Creates a scheduler polling every `interval`.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(machine: Arc<OscStateMachine>, interval: Duration) -> Self {
        let (handoffs, receiver) = mpsc::unbounded_channel();
        let inner = Arc::new(SchedulerInner {
            machine,
            interval,
            shutdown: CancellationToken::new(),
            pollers: Mutex::new(HashMap::new()),
            handoffs,
        });
        let dispatcher = tokio::spawn(dispatch_handoffs(Arc::clone(&inner), receiver));
        Self {
            inner,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Starts polling `id`; returns `false` when it is already polled or
    /// the scheduler shut down.
    pub fn submit(&self, id: ScheduleTaskId) -> bool {
        self.inner.submit(id)
    }

    /// Stops polling `id`; returns whether a poll loop was running.
    pub fn cancel(&self, id: ScheduleTaskId) -> bool {
        let Some(poller) = self.inner.pollers().remove(&id) else {
            return false;
        };
        poller.token.cancel();
        !poller.handle.is_finished()
    }

    /// Returns whether `id` is being polled.
    #[must_use]
    pub fn is_running(&self, id: ScheduleTaskId) -> bool {
        self.inner
            .pollers()
            .get(&id)
            .is_some_and(|poller| !poller.handle.is_finished())
    }

    /// Stops every poll loop and waits for them to exit.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let pollers: Vec<Poller> = self
            .inner
            .pollers()
            .drain()
            .map(|(_, poller)| poller)
            .collect();
        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        for handle in pollers
            .into_iter()
            .map(|poller| poller.handle)
            .chain(dispatcher)
        {
            if let Err(err) = handle.await {
                warn!(error = %err, "poll loop ended abnormally");
            }
        }
    }
}

impl std::fmt::Debug for ActionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionScheduler")
            .field("interval", &self.inner.interval)
            .finish_non_exhaustive()
    }
}
