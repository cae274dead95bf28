//! Relay-feedback auto-tuning (Ziegler–Nichols ultimate-gain method).
//!
//! The tuner forces a limit cycle by switching the actuator between two
//! relay levels around a weight setpoint, records the oscillation peaks and
//! derives `Ku`/`Pu` from them:
//!
//! - `Pu` = mean interval between consecutive peaks
//! - `a`  = largest absolute difference between consecutive peak values
//! - `Ku` = 4·d / (π·a), with `d` the relay step
//! - `kp = 0.6·Ku`, `ki = 1.2·Ku/Pu`, `kd = 0.075·Ku·Pu`
//!
//! All timing is driven by the `now` passed into [`AutoTuner::tick`].

use std::f32::consts::PI;
use std::time::Instant;

use crate::config::AutoTuneCfg;
use crate::error::FillError;
use crate::pid::PidGains;

/// Capacity of the peak buffer.
pub const PEAK_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TunePhase {
    #[default]
    Idle,
    Init,
    Settling,
    RelayTest,
    Calculating,
    Complete,
    Timeout,
    Cancelled,
}

impl TunePhase {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Init | Self::Settling | Self::RelayTest | Self::Calculating
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Init => "INIT",
            Self::Settling => "SETTLING",
            Self::RelayTest => "RELAY_TEST",
            Self::Calculating => "CALCULATING",
            Self::Complete => "COMPLETE",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// A detected local maximum, time in seconds since session start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub time_s: f32,
    pub value: f32,
}

/// Outcome of pushing into the peak buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeakPush {
    Stored,
    Full,
}

/// Fixed-capacity peak storage. A full buffer drops new peaks and says so.
#[derive(Debug, Clone, Default)]
pub struct PeakBuffer {
    peaks: heapless::Vec<Peak, PEAK_CAPACITY>,
    dropped: usize,
}

impl PeakBuffer {
    pub fn push(&mut self, peak: Peak) -> PeakPush {
        match self.peaks.push(peak) {
            Ok(()) => PeakPush::Stored,
            Err(_) => {
                self.dropped += 1;
                PeakPush::Full
            }
        }
    }

    pub fn as_slice(&self) -> &[Peak] {
        &self.peaks
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.peaks.is_full()
    }

    /// Peaks discarded because the buffer was full.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.peaks.clear();
        self.dropped = 0;
    }
}

/// Identified plant parameters and the derived gains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuneResult {
    pub ultimate_gain: f32,
    pub ultimate_period: f32,
    pub gains: PidGains,
}

/// What the supervisor should do after a tuner tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TuneStatus {
    /// Keep going and command this output.
    Running { output_pct: f32 },
    /// Finished; output must be zero.
    Complete(TuneResult),
    /// Timed out or not enough data; output must be zero.
    Failed(FillError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relay {
    High,
    Low,
}

/// Ziegler–Nichols gains from a peak sequence.
///
/// Needs at least `required` peaks and a non-zero amplitude; anything less is
/// `AutoTuneInsufficientData`.
pub fn compute_gains(
    peaks: &[Peak],
    relay_step: f32,
    required: usize,
) -> Result<TuneResult, FillError> {
    let insufficient = FillError::AutoTuneInsufficientData {
        peaks: peaks.len(),
        required,
    };
    if peaks.len() < required.max(2) {
        return Err(insufficient);
    }

    let intervals = peaks.len() - 1;
    let total_period: f32 = peaks.windows(2).map(|w| w[1].time_s - w[0].time_s).sum();
    let ultimate_period = total_period / intervals as f32;

    let amplitude = peaks
        .windows(2)
        .map(|w| (w[1].value - w[0].value).abs())
        .fold(0.0f32, f32::max);

    if !(amplitude > 0.0 && ultimate_period > 0.0) {
        return Err(insufficient);
    }

    let ultimate_gain = (4.0 * relay_step) / (PI * amplitude);
    Ok(TuneResult {
        ultimate_gain,
        ultimate_period,
        gains: PidGains {
            kp: 0.6 * ultimate_gain,
            ki: 1.2 * ultimate_gain / ultimate_period,
            kd: 0.075 * ultimate_gain * ultimate_period,
        },
    })
}

#[derive(Debug, Clone)]
pub struct AutoTuner {
    cfg: AutoTuneCfg,
    phase: TunePhase,
    start: Option<Instant>,
    relay: Relay,
    baseline: f32,
    peaks: PeakBuffer,
    /// Previous sample (seconds, value) and the one before it.
    prev: Option<(f32, f32)>,
    prev_prev: Option<f32>,
    result: Option<TuneResult>,
}

impl AutoTuner {
    pub fn new(cfg: AutoTuneCfg) -> Self {
        Self {
            cfg,
            phase: TunePhase::Idle,
            start: None,
            relay: Relay::High,
            baseline: 0.0,
            peaks: PeakBuffer::default(),
            prev: None,
            prev_prev: None,
            result: None,
        }
    }

    pub fn cfg(&self) -> &AutoTuneCfg {
        &self.cfg
    }

    pub fn phase(&self) -> TunePhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase.is_active()
    }

    pub fn peaks(&self) -> &PeakBuffer {
        &self.peaks
    }

    pub fn result(&self) -> Option<&TuneResult> {
        self.result.as_ref()
    }

    /// Begin a new session; any earlier results are discarded.
    pub fn start(&mut self, now: Instant) {
        self.phase = TunePhase::Init;
        self.start = Some(now);
        self.relay = Relay::High;
        self.baseline = 0.0;
        self.peaks.clear();
        self.prev = None;
        self.prev_prev = None;
        self.result = None;
        tracing::info!(
            relay_high = self.cfg.relay_high_pct(),
            relay_low = self.cfg.relay_low_pct(),
            setpoint = self.cfg.setpoint,
            "auto-tune session started"
        );
    }

    /// Abort an active session. Output must be zeroed by the caller.
    pub fn cancel(&mut self) {
        if self.phase.is_active() {
            tracing::warn!(phase = self.phase.as_str(), "auto-tune cancelled");
            self.phase = TunePhase::Cancelled;
            self.result = None;
            self.peaks.clear();
        }
    }

    /// Advance the session with one measurement.
    pub fn tick(&mut self, measurement: f32, now: Instant) -> TuneStatus {
        let Some(start) = self.start.filter(|_| self.phase.is_active()) else {
            return TuneStatus::Running { output_pct: 0.0 };
        };

        let elapsed = now.saturating_duration_since(start);
        if elapsed.as_millis() > u128::from(self.cfg.timeout_ms) {
            tracing::error!(elapsed_ms = elapsed.as_millis() as u64, "auto-tune timeout");
            self.phase = TunePhase::Timeout;
            return TuneStatus::Failed(FillError::AutoTuneTimeout);
        }
        let t = elapsed.as_secs_f32();

        match self.phase {
            TunePhase::Init => {
                self.baseline = measurement;
                self.relay = Relay::High;
                self.phase = TunePhase::Settling;
                TuneStatus::Running {
                    output_pct: self.cfg.relay_high_pct(),
                }
            }
            TunePhase::Settling => {
                if measurement - self.baseline >= self.cfg.settle_delta {
                    tracing::info!(measurement, "auto-tune: starting relay test");
                    self.phase = TunePhase::RelayTest;
                    self.prev = Some((t, measurement));
                }
                TuneStatus::Running {
                    output_pct: self.relay_output(),
                }
            }
            TunePhase::RelayTest => self.relay_step(t, measurement),
            TunePhase::Calculating => {
                match compute_gains(
                    self.peaks.as_slice(),
                    self.cfg.effective_step_pct(),
                    self.cfg.required_peaks(),
                ) {
                    Ok(res) => {
                        tracing::info!(
                            ku = res.ultimate_gain,
                            pu = res.ultimate_period,
                            kp = res.gains.kp,
                            ki = res.gains.ki,
                            kd = res.gains.kd,
                            "auto-tune complete"
                        );
                        self.phase = TunePhase::Complete;
                        self.result = Some(res);
                        TuneStatus::Complete(res)
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "auto-tune failed");
                        self.phase = TunePhase::Timeout;
                        TuneStatus::Failed(e)
                    }
                }
            }
            TunePhase::Idle
            | TunePhase::Complete
            | TunePhase::Timeout
            | TunePhase::Cancelled => TuneStatus::Running { output_pct: 0.0 },
        }
    }

    fn relay_output(&self) -> f32 {
        match self.relay {
            Relay::High => self.cfg.relay_high_pct(),
            Relay::Low => self.cfg.relay_low_pct(),
        }
    }

    fn relay_step(&mut self, t: f32, measurement: f32) -> TuneStatus {
        // The previous sample is a peak when it tops both neighbours.
        if let (Some((pt, pv)), Some(ppv)) = (self.prev, self.prev_prev)
            && pv > measurement
            && pv > ppv
        {
            let peak = Peak {
                time_s: pt,
                value: pv,
            };
            match self.peaks.push(peak) {
                PeakPush::Stored => {
                    tracing::debug!(n = self.peaks.len(), value = pv, time_s = pt, "peak detected");
                }
                PeakPush::Full => {
                    tracing::warn!(dropped = self.peaks.dropped(), "peak buffer full, peak dropped");
                }
            }
        }
        self.prev_prev = self.prev.map(|(_, v)| v);
        self.prev = Some((t, measurement));

        let sp = self.cfg.setpoint;
        if measurement < sp && self.relay == Relay::Low {
            self.relay = Relay::High;
            tracing::debug!(measurement, "relay -> high");
        } else if measurement > sp && self.relay == Relay::High {
            self.relay = Relay::Low;
            tracing::debug!(measurement, "relay -> low");
        }

        if self.peaks.len() >= self.cfg.required_peaks() || measurement >= self.cfg.test_target {
            tracing::info!(peaks = self.peaks.len(), measurement, "auto-tune: calculating");
            self.phase = TunePhase::Calculating;
            return TuneStatus::Running { output_pct: 0.0 };
        }

        TuneStatus::Running {
            output_pct: self.relay_output(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn peaks(pts: &[(f32, f32)]) -> Vec<Peak> {
        pts.iter()
            .map(|&(time_s, value)| Peak { time_s, value })
            .collect()
    }

    #[test]
    fn closed_form_gains() {
        let p = peaks(&[(5.0, 30.0), (15.0, 35.0), (25.0, 30.0), (35.0, 35.0)]);
        let r = compute_gains(&p, 20.0, 4).expect("enough peaks");
        assert!((r.ultimate_period - 10.0).abs() < 1e-5);
        assert!((r.ultimate_gain - 80.0 / (PI * 5.0)).abs() < 1e-4);
        assert!((r.gains.kp - 3.056).abs() < 1e-2);
        assert!((r.gains.ki - 0.611).abs() < 1e-3);
        assert!((r.gains.kd - 3.82).abs() < 1e-2);
    }

    #[test]
    fn too_few_peaks_is_insufficient_data() {
        let p = peaks(&[(5.0, 30.0), (15.0, 35.0), (25.0, 30.0)]);
        assert_eq!(
            compute_gains(&p, 20.0, 4),
            Err(FillError::AutoTuneInsufficientData {
                peaks: 3,
                required: 4
            })
        );
    }

    #[test]
    fn flat_peaks_are_insufficient_data() {
        let p = peaks(&[(5.0, 30.0), (15.0, 30.0), (25.0, 30.0), (35.0, 30.0)]);
        assert!(matches!(
            compute_gains(&p, 20.0, 4),
            Err(FillError::AutoTuneInsufficientData { .. })
        ));
    }

    #[test]
    fn peak_buffer_signals_full() {
        let mut b = PeakBuffer::default();
        for i in 0..PEAK_CAPACITY {
            assert_eq!(
                b.push(Peak {
                    time_s: i as f32,
                    value: 1.0
                }),
                PeakPush::Stored
            );
        }
        assert!(b.is_full());
        assert_eq!(
            b.push(Peak {
                time_s: 99.0,
                value: 1.0
            }),
            PeakPush::Full
        );
        assert_eq!(b.len(), PEAK_CAPACITY);
        assert_eq!(b.dropped(), 1);
    }

    #[test]
    fn init_commands_relay_high_then_settles() {
        let mut t = AutoTuner::new(AutoTuneCfg::default());
        let t0 = Instant::now();
        t.start(t0);
        assert_eq!(t.tick(0.0, t0), TuneStatus::Running { output_pct: 70.0 });
        assert_eq!(t.phase(), TunePhase::Settling);
        t.tick(2.0, t0 + Duration::from_secs(1));
        assert_eq!(t.phase(), TunePhase::Settling);
        t.tick(6.0, t0 + Duration::from_secs(2));
        assert_eq!(t.phase(), TunePhase::RelayTest);
    }

    #[test]
    fn relay_switches_around_setpoint() {
        let mut t = AutoTuner::new(AutoTuneCfg::default());
        let t0 = Instant::now();
        t.start(t0);
        t.tick(0.0, t0);
        t.tick(10.0, t0 + Duration::from_secs(1));
        assert_eq!(t.phase(), TunePhase::RelayTest);
        // Above setpoint (25) while high -> low.
        assert_eq!(
            t.tick(26.0, t0 + Duration::from_secs(2)),
            TuneStatus::Running { output_pct: 30.0 }
        );
        // Still above, stays low.
        assert_eq!(
            t.tick(27.0, t0 + Duration::from_secs(3)),
            TuneStatus::Running { output_pct: 30.0 }
        );
        // Below setpoint while low -> high.
        assert_eq!(
            t.tick(24.0, t0 + Duration::from_secs(4)),
            TuneStatus::Running { output_pct: 70.0 }
        );
    }

    #[test]
    fn reaching_test_target_without_peaks_fails() {
        let mut t = AutoTuner::new(AutoTuneCfg::default());
        let t0 = Instant::now();
        t.start(t0);
        t.tick(0.0, t0);
        let mut status = TuneStatus::Running { output_pct: 0.0 };
        for k in 1..=20u64 {
            status = t.tick(k as f32 * 5.0, t0 + Duration::from_secs(k));
            if !matches!(status, TuneStatus::Running { .. }) {
                break;
            }
        }
        assert_eq!(
            status,
            TuneStatus::Failed(FillError::AutoTuneInsufficientData {
                peaks: 0,
                required: 4
            })
        );
        assert!(!t.is_active());
    }

    #[test]
    fn session_timeout_fails() {
        let mut t = AutoTuner::new(AutoTuneCfg::default());
        let t0 = Instant::now();
        t.start(t0);
        t.tick(0.0, t0);
        let status = t.tick(0.0, t0 + Duration::from_millis(120_001));
        assert_eq!(status, TuneStatus::Failed(FillError::AutoTuneTimeout));
        assert_eq!(t.phase(), TunePhase::Timeout);
    }

    #[test]
    fn cancel_discards_session() {
        let mut t = AutoTuner::new(AutoTuneCfg::default());
        let t0 = Instant::now();
        t.start(t0);
        t.tick(0.0, t0);
        t.cancel();
        assert_eq!(t.phase(), TunePhase::Cancelled);
        assert!(t.result().is_none());
        assert!(t.peaks().is_empty());
        assert_eq!(
            t.tick(10.0, t0 + Duration::from_secs(1)),
            TuneStatus::Running { output_pct: 0.0 }
        );
    }
}
