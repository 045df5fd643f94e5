//! Room climate simulator for local development.
//!
//! Models a temperature/humidity sensor in a heated room:
//! - Temporal coherence via random walk with mean reversion
//! - Diurnal (day/night) temperature swing
//! - Humidity loosely anti-correlated with temperature
//! - Per-reading sensor noise
//! - Occasional dropouts where the sensor returns garbage (flaky scenario)

use std::fmt;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured profiles selectable via `SIM_SCENARIO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Mild room, moderate noise.
    Indoor,
    /// Bathroom-like: warm and humid, larger swings.
    Humid,
    /// High noise and ~5% dropout rate. Exercises the relay's malformed
    /// telemetry handling.
    Flaky,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "humid" => Self::Humid,
            "flaky" => Self::Flaky,
            _ => Self::Indoor,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Indoor => write!(f, "indoor"),
            Self::Humid => write!(f, "humid"),
            Self::Flaky => write!(f, "flaky"),
        }
    }
}

/// One instantaneous sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    Climate { humidity: f64, temperature: f64 },
    /// The sensor failed to read this tick.
    Dropout,
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct ClimateSim {
    temperature: f64,
    humidity: f64,

    temp_center: f64,
    humidity_center: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    noise_sigma: f64,
    dropout_prob: f32,

    diurnal_amplitude: f64,
    diurnal_period_s: f64,
    /// Simulated seconds elapsed; advanced by `step_s` per sample.
    clock_s: f64,
    step_s: f64,
}

impl ClimateSim {
    /// `step_s` is the sampling period; `diurnal_period_s` the length of a
    /// simulated day (600 for fast iteration, 86400 for real time).
    pub fn new(scenario: Scenario, step_s: f64, diurnal_period_s: f64) -> Self {
        let (temp_center, humidity_center, walk_sigma, noise_sigma, dropout_prob, amplitude) =
            match scenario {
                Scenario::Indoor => (21.0, 50.0, 0.10, 0.05, 0.0_f32, 1.5),
                Scenario::Humid => (25.0, 75.0, 0.25, 0.10, 0.0, 3.0),
                Scenario::Flaky => (21.0, 50.0, 0.40, 0.50, 0.05, 1.5),
            };

        Self {
            temperature: temp_center + gaussian(0.0, 0.5),
            humidity: humidity_center + gaussian(0.0, 2.0),
            temp_center,
            humidity_center,
            walk_sigma,
            mean_reversion: 0.05,
            noise_sigma,
            dropout_prob,
            diurnal_amplitude: amplitude,
            diurnal_period_s,
            clock_s: 0.0,
            step_s,
        }
    }

    /// Advance one sampling period and return the reading.
    pub fn sample(&mut self) -> Sample {
        self.clock_s += self.step_s;

        let pull_t = self.mean_reversion * (self.temp_center - self.temperature);
        self.temperature += pull_t + gaussian(0.0, self.walk_sigma);

        // Warmer air holds more water, so relative humidity drops as it heats.
        let pull_h = self.mean_reversion * (self.humidity_center - self.humidity);
        let coupling = -1.5 * (self.temperature - self.temp_center) * self.mean_reversion;
        self.humidity = (self.humidity + pull_h + coupling + gaussian(0.0, self.walk_sigma * 4.0))
            .clamp(5.0, 99.0);

        if fastrand::f32() < self.dropout_prob {
            return Sample::Dropout;
        }

        let phase = 2.0 * std::f64::consts::PI * self.clock_s / self.diurnal_period_s;
        let diurnal = self.diurnal_amplitude * phase.sin();

        Sample::Climate {
            humidity: (self.humidity + gaussian(0.0, self.noise_sigma * 4.0)).clamp(0.0, 100.0),
            temperature: self.temperature + diurnal + gaussian(0.0, self.noise_sigma),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn climates(sim: &mut ClimateSim, n: usize) -> Vec<(f64, f64)> {
        (0..n)
            .filter_map(|_| match sim.sample() {
                Sample::Climate {
                    humidity,
                    temperature,
                } => Some((humidity, temperature)),
                Sample::Dropout => None,
            })
            .collect()
    }

    #[test]
    fn humidity_stays_in_percent_range() {
        let mut sim = ClimateSim::new(Scenario::Humid, 60.0, 600.0);
        for (h, _) in climates(&mut sim, 1000) {
            assert!((0.0..=100.0).contains(&h), "humidity out of range: {h}");
        }
    }

    #[test]
    fn temperature_stays_plausible() {
        let mut sim = ClimateSim::new(Scenario::Indoor, 60.0, 600.0);
        for (_, t) in climates(&mut sim, 1000) {
            assert!((5.0..=40.0).contains(&t), "temperature implausible: {t}");
        }
    }

    #[test]
    fn temporal_coherence() {
        let mut sim = ClimateSim::new(Scenario::Indoor, 1.0, 86_400.0);
        let samples = climates(&mut sim, 200);
        let max_jump = samples
            .windows(2)
            .map(|w| (w[1].1 - w[0].1).abs())
            .fold(0.0_f64, f64::max);
        assert!(max_jump < 2.0, "max consecutive jump too large: {max_jump}");
    }

    #[test]
    fn indoor_never_drops_out() {
        let mut sim = ClimateSim::new(Scenario::Indoor, 60.0, 600.0);
        assert!((0..500).all(|_| sim.sample() != Sample::Dropout));
    }

    #[test]
    fn flaky_drops_out_sometimes() {
        let mut sim = ClimateSim::new(Scenario::Flaky, 60.0, 600.0);
        let dropouts = (0..2000).filter(|_| sim.sample() == Sample::Dropout).count();
        // ~100 expected; all-or-nothing would be a bug.
        assert!(dropouts > 0 && dropouts < 400, "dropouts: {dropouts}");
    }

    #[test]
    fn humid_scenario_is_more_humid() {
        let mean_h = |s: Scenario| {
            let mut sim = ClimateSim::new(s, 60.0, 600.0);
            let v = climates(&mut sim, 200);
            v.iter().map(|(h, _)| h).sum::<f64>() / v.len() as f64
        };
        assert!(mean_h(Scenario::Humid) > mean_h(Scenario::Indoor));
    }

    #[test]
    fn scenario_from_str_lossy() {
        assert_eq!(Scenario::from_str_lossy("indoor"), Scenario::Indoor);
        assert_eq!(Scenario::from_str_lossy("HUMID"), Scenario::Humid);
        assert_eq!(Scenario::from_str_lossy("Flaky"), Scenario::Flaky);
        assert_eq!(Scenario::from_str_lossy(""), Scenario::Indoor);
    }

    #[test]
    fn scenario_display() {
        assert_eq!(Scenario::Indoor.to_string(), "indoor");
        assert_eq!(Scenario::Humid.to_string(), "humid");
        assert_eq!(Scenario::Flaky.to_string(), "flaky");
    }

    #[test]
    fn approx_std_normal_has_zero_mean() {
        let n = 5000;
        let mean: f64 = (0..n).map(|_| approx_std_normal()).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.15, "mean should be near zero: {mean}");
    }
}
