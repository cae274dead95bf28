//! Background weight sampling.
//!
//! A `Sampler` owns the `WeightSensor` on its own thread and keeps only the
//! newest reading in a one-slot channel, so the control tick never waits on
//! the sensor. The thread is shut down and joined when the `Sampler` drops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel as xch;
use filler_traits::{BoxError, Clock, WeightSensor};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SampleError {
    #[error("no weight sample received yet")]
    NoSample,
    #[error("weight sample is stale ({age_ms} ms old)")]
    Stale { age_ms: u64 },
}

pub struct Sampler {
    rx: xch::Receiver<f32>,
    last_ok: Arc<AtomicU64>,
    epoch: Instant,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl Sampler {
    pub fn spawn<S, C>(mut sensor: S, hz: u32, clock: C) -> Self
    where
        S: WeightSensor + Send + 'static,
        C: Clock + Send + Sync + 'static,
    {
        let (tx, rx) = xch::bounded(1);
        let stale_rx = rx.clone();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let last_ok = Arc::new(AtomicU64::new(0));
        let last_ok_clone = last_ok.clone();
        let period = Duration::from_millis(crate::util::period_ms(hz));
        let epoch = clock.now();

        let join_handle = std::thread::spawn(move || {
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("sampler thread received shutdown signal");
                    break;
                }

                match sensor.read() {
                    Ok(v) => {
                        // Keep only the newest reading.
                        if let Err(xch::TrySendError::Full(v)) = tx.try_send(v) {
                            let _ = stale_rx.try_recv();
                            let _ = tx.try_send(v);
                        }
                        last_ok_clone.store(clock.ms_since(epoch), Ordering::Relaxed);
                    }
                    Err(e) => tracing::trace!(error = %e, "sample failed"),
                }

                if shutdown_clone.load(Ordering::Relaxed) {
                    break;
                }
                clock.sleep(period);
            }
            tracing::trace!("sampler thread exiting cleanly");
        });

        Self {
            rx,
            last_ok,
            epoch,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    pub fn latest(&self) -> Option<f32> {
        self.rx.try_iter().last()
    }

    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    /// Milliseconds since the last successful read, measured against `now_ms`
    /// on the sampler's epoch.
    pub fn stalled_for(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_ok.load(Ordering::Relaxed))
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("sampler thread joined"),
                Err(e) => tracing::warn!(?e, "sampler thread panicked during shutdown"),
            }
        }
    }
}

/// Stale threshold that tolerates at least one missed sample period.
#[inline]
pub fn stale_threshold_ms(stale_ms: u64, hz: u32) -> u64 {
    stale_ms.max(crate::util::period_ms(hz).saturating_mul(2)).max(1)
}

/// `WeightSensor` view of a [`Sampler`]: returns the newest reading, or an
/// error once no fresh sample arrived within `stale_ms`.
pub struct SampledSensor<C> {
    sampler: Sampler,
    clock: C,
    stale_ms: u64,
    last: Option<f32>,
}

impl<C: Clock> SampledSensor<C> {
    pub fn new(sampler: Sampler, clock: C, stale_ms: u64) -> Self {
        Self {
            sampler,
            clock,
            stale_ms,
            last: None,
        }
    }
}

impl<C: Clock> WeightSensor for SampledSensor<C> {
    fn read(&mut self) -> Result<f32, BoxError> {
        if let Some(v) = self.sampler.latest() {
            self.last = Some(v);
        }
        let Some(v) = self.last else {
            return Err(Box::new(SampleError::NoSample));
        };
        let age_ms = self
            .sampler
            .stalled_for(self.clock.ms_since(self.sampler.epoch()));
        if age_ms > self.stale_ms {
            return Err(Box::new(SampleError::Stale { age_ms }));
        }
        Ok(v)
    }
}
