use tracing::{debug, warn};

use crate::session::GraphSession;

/// Ticks to wait after a graph opens before measuring or formatting.
pub const GRAPH_INIT_DELAY_TICKS: u32 = 2;
/// Consecutive passes that format nothing before the queue is dropped.
const MAX_FORMAT_ERRORS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SchedulerState {
    Idle,
    WaitingForGraphInit { ticks_left: u32 },
    /// Waiting for the host to report sizes; `waited` is in seconds.
    CachingSizes { waited: f32 },
    Formatting { ticks_left: u32 },
}

/// Drives a [`GraphSession`] from the host's frame tick. Formatting waits
/// for the graph to settle and for measured sizes, so one request may take
/// several ticks to complete.
#[derive(Debug, Clone)]
pub struct TickScheduler {
    state: SchedulerState,
    error_count: u32,
}

impl Default for TickScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TickScheduler {
    pub fn new() -> Self {
        Self {
            state: SchedulerState::WaitingForGraphInit {
                ticks_left: GRAPH_INIT_DELAY_TICKS,
            },
            error_count: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == SchedulerState::Idle
    }

    /// Starts over after the host switches to another graph.
    pub fn restart(&mut self) {
        *self = Self::new();
    }

    /// Advances one frame. Returns the number of nodes formatted this tick.
    pub fn tick(&mut self, session: &mut GraphSession, dt: f32) -> usize {
        let mut formatted = 0;
        self.state = match self.state {
            SchedulerState::WaitingForGraphInit { ticks_left } if ticks_left > 1 => {
                SchedulerState::WaitingForGraphInit {
                    ticks_left: ticks_left - 1,
                }
            }
            SchedulerState::WaitingForGraphInit { .. } => {
                session.request_missing_sizes();
                debug!(
                    awaiting = session.nodes_awaiting_size().len(),
                    "graph initialised"
                );
                SchedulerState::Idle
            }
            SchedulerState::Idle => {
                if session.has_pending() || !session.nodes_awaiting_size().is_empty() {
                    SchedulerState::CachingSizes { waited: 0.0 }
                } else {
                    SchedulerState::Idle
                }
            }
            SchedulerState::CachingSizes { waited } => {
                let ready = SchedulerState::Formatting {
                    ticks_left: session.settings().auto_format_delay_ticks,
                };
                if session.nodes_awaiting_size().is_empty() {
                    ready
                } else if waited + dt >= session.settings().size_timeout {
                    warn!(
                        awaiting = session.nodes_awaiting_size().len(),
                        "timed out waiting for node sizes"
                    );
                    session.discard_size_requests();
                    ready
                } else {
                    SchedulerState::CachingSizes { waited: waited + dt }
                }
            }
            SchedulerState::Formatting { ticks_left } if ticks_left > 0 => SchedulerState::Formatting {
                ticks_left: ticks_left - 1,
            },
            SchedulerState::Formatting { .. } => {
                let had_pending = session.has_pending();
                formatted = session.format_pending();
                self.record_pass(session, had_pending, formatted);
                SchedulerState::Idle
            }
        };
        formatted
    }

    fn record_pass(&mut self, session: &mut GraphSession, had_pending: bool, formatted: usize) {
        if !had_pending || formatted > 0 {
            self.error_count = 0;
            return;
        }
        self.error_count += 1;
        if self.error_count > MAX_FORMAT_ERRORS {
            warn!("Failed to format all nodes");
            session.clear_pending();
            self.error_count = 0;
        }
    }
}
