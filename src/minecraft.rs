//! Minecraft mode: pause on every track change, resume after a fixed delay.
//!
//! The timer never looks at track metadata itself. The session mirror reports
//! whether the last refresh crossed a track-change edge and the timer reacts to
//! that flag, so nothing about a track outlives the countdown it started.

use std::time::Duration;
use tracing::{debug, info};

/// Commands the timer issues. Implemented by the session mirror.
pub trait Transport {
    fn play(&mut self);
    fn pause(&mut self);

    /// Whether a `play()` issued now would reach the session. The countdown
    /// holds at zero while this is false.
    fn can_resume(&self) -> bool {
        true
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerState {
    /// Minecraft mode is switched off.
    Disabled,
    /// Switched on, waiting for the next track change.
    Idle,
    /// Playback was paused by the timer; resumes when `remaining` runs out.
    PausedCounting { remaining: Duration },
}

#[derive(Debug, Clone)]
pub struct MinecraftTimer {
    state: TimerState,
    delay: Duration,
    suppress_next_change: bool,
}

impl MinecraftTimer {
    const EXPIRED: TimerState = TimerState::PausedCounting {
        remaining: Duration::ZERO,
    };

    pub fn new(delay: Duration) -> Self {
        Self {
            state: TimerState::Disabled,
            delay,
            suppress_next_change: false,
        }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_enabled(&self) -> bool {
        self.state != TimerState::Disabled
    }

    /// Time left before playback resumes; `None` outside a countdown.
    pub fn remaining(&self) -> Option<Duration> {
        match self.state {
            TimerState::PausedCounting { remaining } => Some(remaining),
            TimerState::Disabled | TimerState::Idle => None,
        }
    }

    /// Fraction of the delay already waited, for the countdown bar.
    pub fn progress(&self) -> Option<f32> {
        let remaining = self.remaining()?;
        if self.delay.is_zero() {
            return Some(1.0);
        }
        let waited = self.delay.saturating_sub(remaining);
        Some((waited.as_secs_f32() / self.delay.as_secs_f32()).clamp(0.0, 1.0))
    }

    /// Applies the UI toggle. Switching off always wins and drops any
    /// countdown without resuming playback; switching on never revives one.
    pub fn set_enabled(&mut self, enabled: bool) {
        match (enabled, self.state) {
            (false, TimerState::PausedCounting { remaining }) => {
                info!(
                    remaining_secs = remaining.as_secs_f64(),
                    "minecraft mode off; countdown abandoned"
                );
                self.state = TimerState::Disabled;
                self.suppress_next_change = false;
            }
            (false, TimerState::Idle) => {
                info!("minecraft mode off");
                self.state = TimerState::Disabled;
                self.suppress_next_change = false;
            }
            (true, TimerState::Disabled) => {
                info!(delay_secs = self.delay.as_secs_f64(), "minecraft mode on");
                self.state = TimerState::Idle;
            }
            (false, TimerState::Disabled) | (true, _) => {}
        }
    }

    /// Advances the state machine by one UI tick.
    ///
    /// `track_changed` is only honoured from `Idle`; while counting, the
    /// timer's own pause would otherwise look like a fresh change.
    pub fn tick<T>(&mut self, track_changed: bool, elapsed: Duration, transport: &mut T)
    where
        T: Transport + ?Sized,
    {
        match self.state {
            TimerState::Disabled => {}
            TimerState::Idle => {
                if !track_changed {
                    return;
                }
                if self.suppress_next_change {
                    self.suppress_next_change = false;
                    debug!("track change follows a user skip; not pausing");
                    return;
                }
                transport.pause();
                self.state = TimerState::PausedCounting {
                    remaining: self.delay,
                };
                info!(
                    delay_secs = self.delay.as_secs_f64(),
                    "track changed; paused for minecraft mode"
                );
            }
            TimerState::PausedCounting { remaining } => {
                let remaining = remaining.saturating_sub(elapsed);
                if !remaining.is_zero() {
                    self.state = TimerState::PausedCounting { remaining };
                    return;
                }
                if !transport.can_resume() {
                    if self.state != Self::EXPIRED {
                        info!("minecraft delay elapsed; waiting for the session to accept play");
                    }
                    self.state = Self::EXPIRED;
                    return;
                }
                transport.play();
                self.state = TimerState::Idle;
                info!("minecraft delay elapsed; resuming playback");
            }
        }
    }

    /// The user skipped a track from this overlay. Any countdown is cancelled
    /// and playback resumes at once; the change the skip causes is not paused.
    pub fn user_skip<T>(&mut self, transport: &mut T)
    where
        T: Transport + ?Sized,
    {
        match self.state {
            TimerState::Disabled => {}
            TimerState::Idle => self.suppress_next_change = true,
            TimerState::PausedCounting { .. } => {
                self.state = TimerState::Idle;
                self.suppress_next_change = true;
                transport.play();
                info!("countdown cancelled by skip; resuming playback");
            }
        }
    }

    /// The user pressed play on this overlay during a countdown.
    pub fn user_resume(&mut self) {
        if let TimerState::PausedCounting { .. } = self.state {
            self.state = TimerState::Idle;
            info!("countdown cancelled by user");
        }
    }
}

/// `m:ss`, rounded down like the countdown label.
pub fn format_countdown(remaining: Duration) -> String {
    let total = remaining.as_secs();
    format!("{}:{:02}", total / 60, total % 60)
}
