//! Voice turn state machine.
//!
//! One authoritative [`TurnPhase`] replaces scattered guard and busy flags.
//! Every transition is a compare-and-set on that phase: it checks the phase
//! it expects and moves in one step, so the finalize-and-post transition can
//! succeed at most once per turn no matter how many stop triggers arrive.
//!
//! ```text
//! Idle ──start──▶ Recording ──stop (early)──▶ StopArmed ──deadline──▶ Posting
//!                     └──────stop (late)──────────────────────────────▶ Posting
//! Posting ──ok──▶ Done        Posting ──error──▶ Failed
//! Done / Failed accept the next start, like Idle.
//! ```
//!
//! Pure: the caller supplies `now`, owns the device and timers, and acts on
//! the returned decisions.

use std::time::{Duration, Instant};

use crate::types::TurnPhase;

/// Outcome of a stop trigger (button press or deadline firing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDecision {
    /// Nothing to do: not capturing, or a deferred stop is already scheduled.
    Ignored,
    /// Capture is too short. Schedule one deferred stop after `wait`.
    Armed { wait: Duration },
    /// The turn moved to Posting. Finalize capture and post exactly once.
    Finalize,
}

#[derive(Debug)]
pub struct TurnMachine {
    phase: TurnPhase,
    min_capture: Duration,
    started_at: Option<Instant>,
    deadline: Option<Instant>,
    fragments: Vec<Vec<i16>>,
    turns_completed: u64,
}

impl TurnMachine {
    pub fn new(min_capture: Duration) -> Self {
        Self {
            phase: TurnPhase::Idle,
            min_capture,
            started_at: None,
            deadline: None,
            fragments: Vec::new(),
            turns_completed: 0,
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn is_busy(&self) -> bool {
        self.phase.is_busy()
    }

    pub fn turns_completed(&self) -> u64 {
        self.turns_completed
    }

    /// Minimum capture deadline of the current turn.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time since capture started, if a turn has started.
    pub fn capture_elapsed(&self, now: Instant) -> Option<Duration> {
        self.started_at.map(|t| now.saturating_duration_since(t))
    }

    /// Whether a start action would be honored right now.
    pub fn can_start(&self) -> bool {
        self.phase.accepts_start()
    }

    /// The capture device was acquired: enter Recording.
    ///
    /// Supersedes the previous turn's session. Returns `false` (and changes
    /// nothing) while a turn is capturing or posting.
    pub fn recording_started(&mut self, now: Instant) -> bool {
        if !self.phase.accepts_start() {
            return false;
        }
        self.phase = TurnPhase::Recording;
        self.started_at = Some(now);
        self.deadline = Some(now + self.min_capture);
        self.fragments.clear();
        true
    }

    /// Device acquisition failed: leave no partial turn behind.
    pub fn acquisition_failed(&mut self) {
        if self.phase.accepts_start() {
            self.phase = TurnPhase::Idle;
            self.started_at = None;
            self.deadline = None;
            self.fragments.clear();
        }
    }

    /// Append one capture fragment. Only accepted while capturing.
    pub fn append_fragment(&mut self, fragment: Vec<i16>) -> bool {
        if !self.phase.is_capturing() {
            return false;
        }
        if !fragment.is_empty() {
            self.fragments.push(fragment);
        }
        true
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    /// A stop action from the user.
    pub fn request_stop(&mut self, now: Instant) -> StopDecision {
        match self.phase {
            TurnPhase::Recording => match self.remaining(now) {
                Some(wait) => {
                    self.phase = TurnPhase::StopArmed;
                    StopDecision::Armed { wait }
                }
                None => self.finalize(),
            },
            // One scheduled stop per turn; duplicates are dropped.
            _ => StopDecision::Ignored,
        }
    }

    /// The deferred stop timer fired.
    pub fn deadline_reached(&mut self, now: Instant) -> StopDecision {
        if self.phase != TurnPhase::StopArmed {
            return StopDecision::Ignored;
        }
        match self.remaining(now) {
            Some(wait) => StopDecision::Armed { wait },
            None => self.finalize(),
        }
    }

    /// Concatenate every captured fragment into one payload. Posting only.
    ///
    /// `trailing` holds fragments the device delivered after the stop
    /// decision; they were recorded during the turn and are appended last.
    pub fn take_payload(&mut self, trailing: Vec<Vec<i16>>) -> Vec<i16> {
        if self.phase != TurnPhase::Posting {
            return Vec::new();
        }
        self.fragments.extend(trailing.into_iter().filter(|f| !f.is_empty()));
        let total = self.fragments.iter().map(Vec::len).sum();
        let mut payload = Vec::with_capacity(total);
        for fragment in self.fragments.drain(..) {
            payload.extend_from_slice(&fragment);
        }
        payload
    }

    /// The post resolved. Releases the busy state.
    pub fn complete(&mut self, ok: bool) -> bool {
        if self.phase != TurnPhase::Posting {
            return false;
        }
        self.phase = if ok { TurnPhase::Done } else { TurnPhase::Failed };
        self.turns_completed += 1;
        true
    }

    fn remaining(&self, now: Instant) -> Option<Duration> {
        let deadline = self.deadline?;
        (now < deadline).then(|| deadline - now)
    }

    // Recording | StopArmed → Posting, the only way into Posting.
    fn finalize(&mut self) -> StopDecision {
        if !self.phase.is_capturing() {
            return StopDecision::Ignored;
        }
        self.phase = TurnPhase::Posting;
        StopDecision::Finalize
    }
}
