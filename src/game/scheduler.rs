//! Per-match heartbeat: countdown, final-phase trigger and win-check timers
//!
//! | Match state            | Armed timers          |
//! |------------------------|-----------------------|
//! | WAITING                | none                  |
//! | STARTING               | countdown             |
//! | ACTIVE / FINAL_PHASE   | tick + win-check      |
//! | ENDING                 | none (scheduler stops)|
//!
//! Every transition disarms everything and re-arms from the table. Each
//! armed timer carries the epoch it was armed in and goes quiet as soon
//! as the epoch moves on, so callbacks already in flight never act on a
//! state they were not armed for.

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::events::{is_countdown_checkpoint, MatchEvent};
use super::r#match::{Match, StateListener};
use super::state::MatchState;

/// Every timer fires once per second
pub const TIMER_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Countdown,
    Tick,
    WinCheck,
}

enum TimerFlow {
    Continue,
    Finished,
}

pub struct MatchScheduler {
    me: Weak<MatchScheduler>,
    game: Weak<Match>,
    countdown_secs: u32,
    running: AtomicBool,
    epoch: AtomicU64,
    countdown_remaining: AtomicU32,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

impl MatchScheduler {
    /// Build a scheduler for `game` and register it as the match's state
    /// listener. The scheduler only holds a weak reference to the match.
    pub fn attach(game: &Arc<Match>) -> Arc<Self> {
        let countdown_secs = game.config().countdown_secs;
        let scheduler = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            game: Arc::downgrade(game),
            countdown_secs,
            running: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            countdown_remaining: AtomicU32::new(countdown_secs),
            timers: Mutex::new(Vec::new()),
        });

        if !game.attach_listener(scheduler.clone()) {
            warn!(match_id = %game.id(), "Match already has a state listener");
        }
        scheduler
    }

    /// Arm the timers for the match's current state. A second call while
    /// running is a no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Scheduler already running");
            return;
        }

        let Some(game) = self.game.upgrade() else {
            self.running.store(false, Ordering::SeqCst);
            return;
        };
        debug!(match_id = %game.id(), state = %game.state(), "Scheduler started");
        self.arm(&game, game.state());
    }

    /// Cancel every timer. Idempotent.
    pub fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.disarm();
        if was_running {
            debug!("Scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn countdown_remaining(&self) -> u32 {
        self.countdown_remaining.load(Ordering::SeqCst)
    }

    /// Number of timer tasks currently alive
    pub fn armed_timers(&self) -> usize {
        self.timers
            .lock()
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.is_running() && self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn disarm(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        for handle in self.timers.lock().drain(..) {
            handle.abort();
        }
    }

    fn arm(&self, game: &Match, state: MatchState) {
        let kinds: &[TimerKind] = match state {
            MatchState::Waiting | MatchState::Ending => &[],
            MatchState::Starting => &[TimerKind::Countdown],
            MatchState::Active | MatchState::FinalPhase => &[TimerKind::Tick, TimerKind::WinCheck],
        };
        if kinds.is_empty() {
            return;
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!(match_id = %game.id(), state = %state, "No async runtime; timers not armed");
            return;
        };

        if state == MatchState::Starting {
            self.countdown_remaining.store(self.countdown_secs, Ordering::SeqCst);
            if is_countdown_checkpoint(self.countdown_secs) {
                game.emit(MatchEvent::Countdown {
                    match_id: game.id().clone(),
                    seconds_remaining: self.countdown_secs,
                });
            }
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let mut timers = self.timers.lock();
        for kind in kinds {
            timers.push(self.spawn_timer(&runtime, epoch, *kind));
        }
    }

    fn spawn_timer(&self, runtime: &Handle, epoch: u64, kind: TimerKind) -> JoinHandle<()> {
        let me = self.me.clone();
        runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + TIMER_PERIOD, TIMER_PERIOD);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let Some(scheduler) = me.upgrade() else {
                    break;
                };
                if !scheduler.is_current(epoch) {
                    break;
                }

                // A failing callback must not take the heartbeat down with it
                match catch_unwind(AssertUnwindSafe(|| scheduler.fire(kind))) {
                    Ok(TimerFlow::Continue) => {}
                    Ok(TimerFlow::Finished) => break,
                    Err(_) => {
                        error!(timer = ?kind, "Timer callback panicked; timer keeps running");
                    }
                }
            }
        })
    }

    fn fire(&self, kind: TimerKind) -> TimerFlow {
        let Some(game) = self.game.upgrade() else {
            return TimerFlow::Finished;
        };

        match kind {
            TimerKind::Countdown => self.countdown_tick(&game),
            TimerKind::Tick => {
                if game.state() == MatchState::Active && game.should_trigger_final_phase() {
                    info!(match_id = %game.id(), "Final phase triggered");
                    game.advance(MatchState::Active, MatchState::FinalPhase);
                }
                TimerFlow::Continue
            }
            TimerKind::WinCheck => {
                if game.state().is_in_progress() && game.alive_count() <= 1 {
                    debug!(
                        match_id = %game.id(),
                        alive = game.alive_count(),
                        "Win-check ending match"
                    );
                    game.end_if_decided();
                    return TimerFlow::Finished;
                }
                TimerFlow::Continue
            }
        }
    }

    fn countdown_tick(&self, game: &Match) -> TimerFlow {
        if game.state() != MatchState::Starting {
            debug!(
                match_id = %game.id(),
                state = %game.state(),
                "Countdown cancelled: state moved on"
            );
            return TimerFlow::Finished;
        }

        let previous = self
            .countdown_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        let remaining = previous.saturating_sub(1);

        if remaining > 0 {
            if is_countdown_checkpoint(remaining) {
                game.emit(MatchEvent::Countdown {
                    match_id: game.id().clone(),
                    seconds_remaining: remaining,
                });
            }
            return TimerFlow::Continue;
        }

        // Activation re-arms the tick and win-check timers via on_state_change
        game.advance(MatchState::Starting, MatchState::Active);
        TimerFlow::Finished
    }
}

impl StateListener for MatchScheduler {
    fn on_state_change(&self, state: MatchState) {
        if !self.is_running() {
            return;
        }

        if state == MatchState::Ending {
            self.stop();
            return;
        }

        self.disarm();
        if let Some(game) = self.game.upgrade() {
            self.arm(&game, state);
        }
    }

    fn halt(&self) {
        self.stop();
    }
}

impl Drop for MatchScheduler {
    fn drop(&mut self) {
        for handle in self.timers.get_mut().drain(..) {
            handle.abort();
        }
    }
}
