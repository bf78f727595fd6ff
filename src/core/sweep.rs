//! Parameter sweep controller
//!
//! Walks every combo from a [`ComboSource`], tries each one
//! `repeats_per_combo` times and classifies every attempt:
//!
//! ```text
//! Idle -> Configuring -> Triggering -> Checking -> Recorded | Skipped
//! ```
//!
//! Invalid combos and transport faults skip the attempt and the sweep goes
//! on. Only an encoding invariant violation ends it early with an error.

use super::combo::{Combo, ComboSource};
use super::error::GlitchError;
use super::results::{ResultSink, RunResult};
use super::session::DeviceSession;
use super::transport::Channel;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where an attempt was when it stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// Not started
    Idle,
    /// Resetting and loading the combo
    Configuring,
    /// Arming the trigger
    Triggering,
    /// Reading the target's response
    Checking,
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Configuring => write!(f, "configuring"),
            Self::Triggering => write!(f, "triggering"),
            Self::Checking => write!(f, "checking"),
        }
    }
}

/// Why an attempt produced no result
#[derive(Debug)]
pub enum SkipReason {
    /// The target stayed silent
    NoResponse,
    /// The combo failed range validation
    InvalidParameters(GlitchError),
    /// The channel failed mid-attempt
    TransportFault {
        /// Phase the fault hit
        state: AttemptState,
        /// The fault
        error: GlitchError,
    },
}

/// Result of a single attempt
#[derive(Debug)]
pub enum AttemptOutcome {
    /// The target answered; hand to the sink
    Recorded(RunResult),
    /// Nothing to record
    Skipped(SkipReason),
}

/// Why the sweep ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every repeat of every combo ran
    Completed,
    /// The cancel flag was raised
    Cancelled,
    /// Too many back-to-back transport faults
    FaultLimit,
}

/// Counters for a finished sweep
#[derive(Debug, Clone, PartialEq)]
pub struct SweepSummary {
    /// Combos produced by the source
    pub combos_total: usize,
    /// Combos whose repeats all ran
    pub combos_completed: usize,
    /// Attempts run
    pub attempts: usize,
    /// Attempts that produced a result
    pub recorded: usize,
    /// Attempts with an empty response
    pub empty: usize,
    /// Attempts skipped for invalid parameters
    pub invalid: usize,
    /// Attempts skipped for transport faults
    pub faults: usize,
    /// Results the sink failed to store
    pub sink_errors: usize,
    /// Progress reports emitted
    pub progress_reports: usize,
    /// Why the sweep ended
    pub stop_reason: StopReason,
    /// The closing safe-idle reset could not be written
    pub safe_reset_failed: bool,
    /// Wall time
    pub elapsed: Duration,
}

impl SweepSummary {
    fn new(combos_total: usize) -> Self {
        Self {
            combos_total,
            combos_completed: 0,
            attempts: 0,
            recorded: 0,
            empty: 0,
            invalid: 0,
            faults: 0,
            sink_errors: 0,
            progress_reports: 0,
            stop_reason: StopReason::Completed,
            safe_reset_failed: false,
            elapsed: Duration::ZERO,
        }
    }
}

impl fmt::Display for SweepSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}: {}/{} combos, {} attempts, {} recorded, {} empty, {} invalid, {} faults in {:.1}s",
            self.stop_reason,
            self.combos_completed,
            self.combos_total,
            self.attempts,
            self.recorded,
            self.empty,
            self.invalid,
            self.faults,
            self.elapsed.as_secs_f64()
        )?;
        if self.safe_reset_failed {
            write!(f, " (safe reset failed)")?;
        }
        Ok(())
    }
}

/// Mutable run bookkeeping, owned by the controller for one sweep
#[derive(Debug)]
pub struct SweepState {
    combos: Vec<Combo>,
    index: usize,
    current: Option<Combo>,
    window_start: Instant,
    window_attempts: usize,
}

impl SweepState {
    /// Start a sweep over `combos` in the given order
    pub fn new(combos: Vec<Combo>) -> Self {
        Self {
            combos,
            index: 0,
            current: None,
            window_start: Instant::now(),
            window_attempts: 0,
        }
    }

    /// Move to the next combo. The first call yields index 0.
    pub fn advance(&mut self) -> Option<Combo> {
        let next = match self.current {
            None => 0,
            Some(_) => self.index + 1,
        };
        let combo = *self.combos.get(next)?;
        self.index = next;
        self.current = Some(combo);
        Some(combo)
    }

    /// Index of the current combo
    pub fn index(&self) -> usize {
        self.index
    }

    /// Current combo
    pub fn current(&self) -> Option<Combo> {
        self.current
    }

    /// Number of combos in the sweep
    pub fn total(&self) -> usize {
        self.combos.len()
    }

    /// Percentage of combos before the current one
    pub fn percent(&self) -> f64 {
        if self.combos.is_empty() {
            return 100.0;
        }
        100.0 * self.index as f64 / self.combos.len() as f64
    }

    /// `<pct>% i=<index> <combo>` context line
    pub fn status(&self) -> String {
        match self.current {
            Some(combo) => format!("{:.2}% i={} {}", self.percent(), self.index, combo),
            None => format!("{:.2}% i=-", self.percent()),
        }
    }

    fn close_window(&mut self, repeats: u32) -> ProgressReport {
        let remaining = self.combos.len().saturating_sub(self.index) * repeats as usize;
        let report = ProgressReport::new(
            self.status(),
            self.window_attempts,
            self.window_start.elapsed(),
            remaining,
        );
        self.window_start = Instant::now();
        self.window_attempts = 0;
        report
    }
}

/// Rate and ETA over the reporting window just completed. Advisory only.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    /// Status line of the combo about to run
    pub status: String,
    /// Attempts per second over the window
    pub attempts_per_sec: f64,
    /// Estimated time for the remaining attempts
    pub eta: Option<Duration>,
}

impl ProgressReport {
    /// Derive rate and ETA from a window's attempt count and length
    pub fn new(status: String, window_attempts: usize, window: Duration, remaining_attempts: usize) -> Self {
        let secs = window.as_secs_f64();
        let attempts_per_sec = if secs > 0.0 {
            window_attempts as f64 / secs
        } else {
            0.0
        };
        let eta = (attempts_per_sec > 0.0)
            .then(|| Duration::from_secs_f64(remaining_attempts as f64 / attempts_per_sec));

        Self {
            status,
            attempts_per_sec,
            eta,
        }
    }
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:.2}/s, ETA: ", self.status, self.attempts_per_sec)?;
        match self.eta {
            Some(eta) => {
                let secs = eta.as_secs();
                write!(f, "{}:{:02}m", secs / 60, secs % 60)
            }
            None => write!(f, "--:--m"),
        }
    }
}

/// Drives a sweep over one device session
pub struct SweepController<'a, C: Channel> {
    session: &'a mut DeviceSession<C>,
    sink: &'a mut dyn ResultSink,
    cancel: Arc<AtomicBool>,
}

impl<'a, C: Channel> SweepController<'a, C> {
    /// Controller recording hits into `sink`
    pub fn new(session: &'a mut DeviceSession<C>, sink: &'a mut dyn ResultSink) -> Self {
        Self {
            session,
            sink,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop between attempts once `flag` is set
    #[must_use]
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// Run the whole sweep.
    ///
    /// Per-attempt failures are reported and skipped. Returns an error only
    /// for an encoding invariant violation. Does not reset the device on
    /// exit; see [`run_sweep`].
    pub async fn run(&mut self, source: &dyn ComboSource) -> Result<SweepSummary, GlitchError> {
        let config = self.session.config().clone();
        let started = Instant::now();

        let mut combos = source.produce();
        if config.randomize {
            let seed = config.seed.unwrap_or_else(rand::random);
            combos.shuffle(&mut StdRng::seed_from_u64(seed));
            tracing::info!("Shuffled combo order (seed {})", seed);
        }

        let mut state = SweepState::new(combos);
        let mut summary = SweepSummary::new(state.total());
        let mut consecutive_faults = 0u32;

        tracing::info!(
            "Sweeping {} x {} repeats on {}",
            source.describe(),
            config.repeats_per_combo,
            self.session.channel().connection_info()
        );

        'combos: while let Some(combo) = state.advance() {
            let interval = config.progress_interval as usize;
            if interval > 0 && state.index() > 0 && state.index() % interval == 0 {
                let report = state.close_window(config.repeats_per_combo);
                summary.progress_reports += 1;
                tracing::info!("{}", report);
            }

            for repeat in 0..config.repeats_per_combo {
                if self.cancel.load(Ordering::SeqCst) {
                    tracing::warn!("{} cancelled before repeat {}", state.status(), repeat);
                    summary.stop_reason = StopReason::Cancelled;
                    break 'combos;
                }

                let outcome = self.attempt(combo).await?;
                summary.attempts += 1;
                state.window_attempts += 1;

                match outcome {
                    AttemptOutcome::Recorded(result) => {
                        consecutive_faults = 0;
                        summary.recorded += 1;
                        tracing::info!(
                            "HIT {} repeat {}: {:?}",
                            state.status(),
                            repeat,
                            result.response_text()
                        );
                        if let Err(e) = self.sink.record(&result) {
                            summary.sink_errors += 1;
                            tracing::error!("Failed to record result for {}: {}", combo, e);
                        }
                    }
                    AttemptOutcome::Skipped(SkipReason::NoResponse) => {
                        consecutive_faults = 0;
                        summary.empty += 1;
                    }
                    AttemptOutcome::Skipped(SkipReason::InvalidParameters(e)) => {
                        summary.invalid += 1;
                        tracing::warn!("{} repeat {}: {}", state.status(), repeat, e);
                    }
                    AttemptOutcome::Skipped(SkipReason::TransportFault { state: phase, error }) => {
                        summary.faults += 1;
                        consecutive_faults += 1;
                        tracing::warn!(
                            "{} repeat {}: {} while {}",
                            state.status(),
                            repeat,
                            error,
                            phase
                        );
                        if let Err(e) = self.session.drain_input().await {
                            tracing::warn!("Resync drain failed: {}", e);
                        }
                        if config
                            .max_consecutive_faults
                            .is_some_and(|limit| consecutive_faults >= limit)
                        {
                            tracing::error!(
                                "Giving up after {} consecutive transport faults",
                                consecutive_faults
                            );
                            summary.stop_reason = StopReason::FaultLimit;
                            break 'combos;
                        }
                    }
                }
            }

            summary.combos_completed += 1;
        }

        summary.elapsed = started.elapsed();
        tracing::info!("Sweep finished. {}", summary);
        Ok(summary)
    }

    /// Run one attempt on `combo` and classify the result
    pub async fn attempt(&mut self, combo: Combo) -> Result<AttemptOutcome, GlitchError> {
        let mut phase = AttemptState::Idle;

        match self.drive(&combo, &mut phase).await {
            Ok(response) if response.is_empty() => Ok(AttemptOutcome::Skipped(SkipReason::NoResponse)),
            Ok(response) => Ok(AttemptOutcome::Recorded(RunResult::new(response, combo))),
            Err(e) if !e.is_recoverable() => {
                tracing::error!("Aborting sweep at {}: {}", combo, e);
                Err(e)
            }
            Err(e @ GlitchError::InvalidParameterRange { .. }) => {
                Ok(AttemptOutcome::Skipped(SkipReason::InvalidParameters(e)))
            }
            Err(e) => Ok(AttemptOutcome::Skipped(SkipReason::TransportFault {
                state: phase,
                error: e,
            })),
        }
    }

    async fn drive(&mut self, combo: &Combo, phase: &mut AttemptState) -> Result<bytes::Bytes, GlitchError> {
        *phase = AttemptState::Configuring;
        self.session.apply(combo).await?;

        *phase = AttemptState::Triggering;
        self.session.arm_trigger().await?;

        *phase = AttemptState::Checking;
        self.session.check().await
    }
}

/// Run a sweep and then return the device to its safe idle state, whether
/// the sweep completed, was cancelled, hit the fault limit or failed.
///
/// A failed safe reset after a finished sweep is logged and flagged in
/// [`SweepSummary::safe_reset_failed`]; the summary is still returned.
pub async fn run_sweep<C: Channel>(
    session: &mut DeviceSession<C>,
    sink: &mut dyn ResultSink,
    source: &dyn ComboSource,
    cancel: Arc<AtomicBool>,
) -> Result<SweepSummary, GlitchError> {
    let outcome = SweepController::new(session, sink)
        .with_cancel(cancel)
        .run(source)
        .await;
    let reset = session.shutdown().await;

    match (outcome, reset) {
        (Ok(summary), Ok(())) => Ok(summary),
        (Ok(mut summary), Err(reset_err)) => {
            tracing::error!(
                "Device may not be in safe idle, reset failed after {:?} sweep: {}",
                summary.stop_reason,
                reset_err
            );
            summary.safe_reset_failed = true;
            Ok(summary)
        }
        (Err(e), Err(reset_err)) => {
            tracing::error!("Safe reset after failed sweep also failed: {}", reset_err);
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
    }
}
