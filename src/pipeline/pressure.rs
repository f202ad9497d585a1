//! Resource-pressure sampling
//!
//! A single `ResourceSampler` task periodically reads CPU load and available
//! memory from a `PressureSource`, publishes the reading to a `PressureGauge`
//! (read-only for everyone else) and nudges the stage limiters: shrink under
//! pressure, grow back when headroom returns.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::System;
use tokio::task::JoinHandle;

use super::limiter::AdaptiveLimiter;
use crate::constants::{
    DEFAULT_CPU_HIGH_WATERMARK, DEFAULT_CPU_LOW_WATERMARK, DEFAULT_MIN_AVAILABLE_MEMORY_RATIO,
};
use crate::logging::EventLogger;

/// One sample of system resource usage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureReading {
    /// Global CPU usage, 0..=100
    pub cpu_percent: f32,
    pub available_memory: u64,
    pub total_memory: u64,
}

impl PressureReading {
    pub fn available_ratio(&self) -> f64 {
        if self.total_memory == 0 {
            1.0
        } else {
            self.available_memory as f64 / self.total_memory as f64
        }
    }
}

/// Anything that can report current resource usage
pub trait PressureSource: Send + Sync {
    fn sample(&self) -> PressureReading;
}

/// Live readings from the operating system
pub struct SystemPressure {
    system: Mutex<System>,
}

impl SystemPressure {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SystemPressure {
    fn default() -> Self {
        Self::new()
    }
}

impl PressureSource for SystemPressure {
    fn sample(&self) -> PressureReading {
        match self.system.lock() {
            Ok(mut system) => {
                system.refresh_cpu_usage();
                system.refresh_memory();
                PressureReading {
                    cpu_percent: system.global_cpu_usage(),
                    available_memory: system.available_memory(),
                    total_memory: system.total_memory(),
                }
            }
            Err(_) => PressureReading {
                cpu_percent: 0.0,
                available_memory: 0,
                total_memory: 0,
            },
        }
    }
}

/// How a reading translates into pool adjustments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureLevel {
    /// Shrink pools
    High,
    /// Leave pools alone
    Steady,
    /// Grow pools back toward their ceilings
    Headroom,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureThresholds {
    pub cpu_high: f32,
    pub cpu_low: f32,
    pub min_available_memory_ratio: f64,
}

impl Default for PressureThresholds {
    fn default() -> Self {
        Self {
            cpu_high: DEFAULT_CPU_HIGH_WATERMARK,
            cpu_low: DEFAULT_CPU_LOW_WATERMARK,
            min_available_memory_ratio: DEFAULT_MIN_AVAILABLE_MEMORY_RATIO,
        }
    }
}

impl PressureThresholds {
    pub fn classify(&self, reading: &PressureReading) -> PressureLevel {
        let memory_tight = reading.available_ratio() < self.min_available_memory_ratio;
        if reading.cpu_percent > self.cpu_high || memory_tight {
            PressureLevel::High
        } else if reading.cpu_percent < self.cpu_low {
            PressureLevel::Headroom
        } else {
            PressureLevel::Steady
        }
    }
}

/// Latest published reading; written only by the sampler
#[derive(Debug, Default)]
pub struct PressureGauge {
    cpu_bits: AtomicU32,
    available_memory: AtomicU64,
    total_memory: AtomicU64,
    samples: AtomicU64,
}

impl PressureGauge {
    fn publish(&self, reading: &PressureReading) {
        self.cpu_bits.store(reading.cpu_percent.to_bits(), Ordering::Relaxed);
        self.available_memory
            .store(reading.available_memory, Ordering::Relaxed);
        self.total_memory.store(reading.total_memory, Ordering::Relaxed);
        self.samples.fetch_add(1, Ordering::Release);
    }

    /// Most recent reading, if the sampler has run at least once
    pub fn snapshot(&self) -> Option<PressureReading> {
        if self.samples.load(Ordering::Acquire) == 0 {
            return None;
        }
        Some(PressureReading {
            cpu_percent: f32::from_bits(self.cpu_bits.load(Ordering::Relaxed)),
            available_memory: self.available_memory.load(Ordering::Relaxed),
            total_memory: self.total_memory.load(Ordering::Relaxed),
        })
    }

    pub fn sample_count(&self) -> u64 {
        self.samples.load(Ordering::Acquire)
    }
}

/// Periodic single-writer sampler driving the stage limiters
pub struct ResourceSampler {
    source: Arc<dyn PressureSource>,
    thresholds: PressureThresholds,
    interval: Duration,
    limiters: Vec<Arc<AdaptiveLimiter>>,
    gauge: Arc<PressureGauge>,
    events: EventLogger,
}

impl ResourceSampler {
    pub fn new(
        source: Arc<dyn PressureSource>,
        thresholds: PressureThresholds,
        interval: Duration,
        limiters: Vec<Arc<AdaptiveLimiter>>,
    ) -> Self {
        Self {
            source,
            thresholds,
            interval,
            limiters,
            gauge: Arc::new(PressureGauge::default()),
            events: EventLogger::default(),
        }
    }

    pub fn gauge(&self) -> Arc<PressureGauge> {
        Arc::clone(&self.gauge)
    }

    /// Take one sample and adjust every limiter
    pub fn tick(&self) -> PressureLevel {
        let reading = self.source.sample();
        self.gauge.publish(&reading);

        let level = self.thresholds.classify(&reading);
        for limiter in &self.limiters {
            let before = limiter.current();
            let changed = match level {
                PressureLevel::High => limiter.shrink(),
                PressureLevel::Headroom => limiter.grow(),
                PressureLevel::Steady => false,
            };
            if changed {
                self.events
                    .concurrency_adjusted(limiter.name(), before, limiter.current(), &reading);
            }
        }
        level
    }

    /// Run until the returned handle is aborted
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.tick();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pressure source replaying a fixed script of readings
    struct Scripted {
        readings: Mutex<Vec<PressureReading>>,
    }

    impl PressureSource for Scripted {
        fn sample(&self) -> PressureReading {
            let mut readings = self.readings.lock().unwrap();
            if readings.len() > 1 {
                readings.remove(0)
            } else {
                readings[0]
            }
        }
    }

    fn reading(cpu: f32, available: u64) -> PressureReading {
        PressureReading {
            cpu_percent: cpu,
            available_memory: available,
            total_memory: 100,
        }
    }

    #[test]
    fn test_classification() {
        let thresholds = PressureThresholds::default();
        assert_eq!(thresholds.classify(&reading(95.0, 50)), PressureLevel::High);
        assert_eq!(thresholds.classify(&reading(10.0, 5)), PressureLevel::High);
        assert_eq!(thresholds.classify(&reading(80.0, 50)), PressureLevel::Steady);
        assert_eq!(thresholds.classify(&reading(10.0, 50)), PressureLevel::Headroom);
    }

    #[test]
    fn test_zero_total_memory_is_not_pressure() {
        let empty = PressureReading {
            cpu_percent: 0.0,
            available_memory: 0,
            total_memory: 0,
        };
        assert_eq!(empty.available_ratio(), 1.0);
    }

    #[tokio::test]
    async fn test_sampler_shrinks_then_grows() {
        let source = Arc::new(Scripted {
            readings: Mutex::new(vec![
                reading(99.0, 50),
                reading(99.0, 50),
                reading(99.0, 50),
                reading(5.0, 50),
            ]),
        });
        let decode = AdaptiveLimiter::new("decode", 1, 3);
        let compare = AdaptiveLimiter::new("compare", 2, 4);
        let sampler = ResourceSampler::new(
            source,
            PressureThresholds::default(),
            Duration::from_millis(10),
            vec![Arc::clone(&decode), Arc::clone(&compare)],
        );

        for _ in 0..3 {
            assert_eq!(sampler.tick(), PressureLevel::High);
        }
        assert_eq!(decode.current(), 1);
        assert_eq!(compare.current(), 2);

        assert_eq!(sampler.tick(), PressureLevel::Headroom);
        assert_eq!(decode.current(), 2);
        assert_eq!(compare.current(), 3);

        let gauge = sampler.gauge();
        assert_eq!(gauge.sample_count(), 4);
        assert_eq!(gauge.snapshot().unwrap().cpu_percent, 5.0);
    }

    #[test]
    fn test_system_pressure_reports_memory() {
        let reading = SystemPressure::new().sample();
        assert!(reading.available_memory <= reading.total_memory || reading.total_memory == 0);
    }
}
