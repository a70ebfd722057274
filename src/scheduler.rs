//! Update scheduler.
//!
//! Pure policy state machine deciding when an edited document is rebuilt
//! and reloaded. It owns no tasks and no channels; the driver feeds it
//! edits, run requests and timer wakeups, and executes the actions it
//! returns. Time comes from a [`Clock`] so the debounce window is testable
//! without sleeping.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::clock::Clock;
use crate::source::SourceDocument;

/// How edits turn into document loads.
#[derive(Clone, Debug)]
pub enum RunPolicy {
    /// Rebuild automatically once edits have gone quiet for the window.
    DebouncedAuto { quiet: Duration },
    /// Script runs only on explicit request; markup and style edits still
    /// reload the document, with script execution suppressed.
    ManualRun,
}

impl RunPolicy {
    pub const DEFAULT_QUIET: Duration = Duration::from_millis(400);
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self::DebouncedAuto {
            quiet: Self::DEFAULT_QUIET,
        }
    }
}

/// What the driver must do in response to an input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchedulerAction {
    /// Assemble `document` and load it, executing its script or not.
    Load {
        document: SourceDocument,
        include_script: bool,
    },
    /// Nothing to do right now.
    None,
}

#[derive(Clone, Debug)]
enum State {
    Idle,
    Pending {
        deadline: Instant,
        document: SourceDocument,
        include_script: bool,
    },
}

/// Debounce state for one playground.
pub struct Scheduler {
    policy: RunPolicy,
    clock: Arc<dyn Clock>,
    state: State,
}

impl Scheduler {
    pub fn new(policy: RunPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            state: State::Idle,
        }
    }

    /// An edit produced a new document snapshot. Auto mode (re)arms the
    /// quiet window, so a burst of edits collapses into one load. Manual
    /// mode schedules an immediate script-less reload.
    pub fn on_change(&mut self, document: SourceDocument) -> SchedulerAction {
        match self.policy {
            RunPolicy::DebouncedAuto { quiet } => {
                self.state = State::Pending {
                    deadline: self.clock.now() + quiet,
                    document,
                    include_script: true,
                };
                SchedulerAction::None
            }
            RunPolicy::ManualRun => {
                self.state = State::Idle;
                SchedulerAction::Load {
                    document,
                    include_script: false,
                }
            }
        }
    }

    /// Explicit run request. Bypasses any pending window and loads with
    /// script execution enabled.
    pub fn on_run_request(&mut self, document: SourceDocument) -> SchedulerAction {
        self.state = State::Idle;
        SchedulerAction::Load {
            document,
            include_script: true,
        }
    }

    /// Timer wakeup. Emits the pending load when its deadline has been
    /// reached; spurious wakeups are ignored.
    pub fn on_timer(&mut self) -> SchedulerAction {
        match &self.state {
            State::Pending {
                deadline,
                document,
                include_script,
            } if *deadline <= self.clock.now() => {
                let action = SchedulerAction::Load {
                    document: document.clone(),
                    include_script: *include_script,
                };
                self.state = State::Idle;
                action
            }
            _ => SchedulerAction::None,
        }
    }

    /// Emit any pending load immediately, regardless of its deadline.
    pub fn flush_now(&mut self) -> SchedulerAction {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Pending {
                document,
                include_script,
                ..
            } => SchedulerAction::Load {
                document,
                include_script,
            },
            State::Idle => SchedulerAction::None,
        }
    }

    /// Deadline the driver should sleep until, if any load is pending.
    pub fn next_deadline(&self) -> Option<Instant> {
        match &self.state {
            State::Pending { deadline, .. } => Some(*deadline),
            State::Idle => None,
        }
    }
}
