//! Tuning recommendations derived from a hardware snapshot.
//!
//! Pure functions over GPU readings: no state, no I/O. Per-model
//! thresholds come from a [`ProfileTable`] that falls back to a
//! conservative default profile for model tags it has never heard of.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::rig::HardwareSnapshot;

/// Core temperature (Celsius) above which power is cut regardless of
/// efficiency.
pub const HIGH_TEMPERATURE: f64 = 80.0;

/// Power delta in percent recommended for an overheating GPU.
pub const TEMPERATURE_POWER_DELTA: f64 = -10.0;

/// Fraction of current power suggested when a GPU mines inefficiently.
const POWER_BACKOFF: f64 = 0.9;

// ============================================================================
// Profiles
// ============================================================================

/// Tuning limits for one GPU model.
///
/// Fields omitted in a config file fall back to the conservative
/// defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuProfile {
    /// Minimum acceptable hashrate-per-watt for this model.
    pub efficiency_threshold: f64,
    /// Hard power cap in watts.
    pub max_power: f64,
    /// Recommended core clock setting.
    pub core_clock: f64,
    /// Recommended memory clock setting.
    pub memory_clock: f64,
}

impl GpuProfile {
    /// Fallback used for unknown model tags.
    pub const CONSERVATIVE: GpuProfile = GpuProfile {
        efficiency_threshold: 0.5,
        max_power: 250.0,
        core_clock: 1200.0,
        memory_clock: 2100.0,
    };
}

impl Default for GpuProfile {
    fn default() -> Self {
        Self::CONSERVATIVE
    }
}

/// Lookup table from GPU model tag to tuning profile.
///
/// Starts from a built-in set of common cards; deployments add or
/// override entries from the daemon config file.
#[derive(Debug, Clone, Default)]
pub struct ProfileTable {
    profiles: HashMap<String, GpuProfile>,
}

impl ProfileTable {
    /// Creates an empty table; every lookup falls back to
    /// [`GpuProfile::CONSERVATIVE`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table pre-seeded with profiles for common cards.
    pub fn builtin() -> Self {
        let mut table = Self::new();
        table.insert(
            "NVIDIA RTX 3080",
            GpuProfile {
                efficiency_threshold: 0.45,
                max_power: 320.0,
                core_clock: 1440.0,
                memory_clock: 2700.0,
            },
        );
        table.insert(
            "NVIDIA RTX 3090",
            GpuProfile {
                efficiency_threshold: 0.40,
                max_power: 350.0,
                core_clock: 1395.0,
                memory_clock: 2500.0,
            },
        );
        table.insert(
            "AMD RX 6800 XT",
            GpuProfile {
                efficiency_threshold: 0.55,
                max_power: 250.0,
                core_clock: 1350.0,
                memory_clock: 2100.0,
            },
        );
        table
    }

    /// Adds or replaces the profile for a model tag.
    pub fn insert(&mut self, model: impl Into<String>, profile: GpuProfile) {
        self.profiles.insert(model.into(), profile);
    }

    /// Returns the profile for a model tag, falling back to the
    /// conservative default.
    #[must_use]
    pub fn get(&self, model: &str) -> GpuProfile {
        self.profiles
            .get(model)
            .copied()
            .unwrap_or(GpuProfile::CONSERVATIVE)
    }

    /// Number of explicit (non-fallback) entries.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Returns true if no explicit entries exist.
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

// ============================================================================
// Recommendations
// ============================================================================

/// Action attached to a recommendation frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TuningAction {
    DecreasePower,
    OptimizeSettings,
}

/// Suggested settings for an inefficient GPU.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClockSuggestion {
    pub power: f64,
    pub core: f64,
    pub memory: f64,
}

/// One per-GPU tuning recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Recommendation {
    /// GPU is running hot: cut its power limit by a fixed percentage.
    Temperature { action: TuningAction, value: f64 },

    /// GPU mines below its efficiency floor: suggest reduced power and
    /// model-tuned clock settings.
    Efficiency {
        action: TuningAction,
        suggestions: ClockSuggestion,
    },
}

impl Recommendation {
    /// The fixed power cut for an overheating GPU.
    pub fn decrease_power() -> Self {
        Self::Temperature {
            action: TuningAction::DecreasePower,
            value: TEMPERATURE_POWER_DELTA,
        }
    }

    /// Settings suggestion for an inefficient GPU.
    pub fn optimize(suggestions: ClockSuggestion) -> Self {
        Self::Efficiency {
            action: TuningAction::OptimizeSettings,
            suggestions,
        }
    }
}

/// Analyzes a snapshot and returns at most one recommendation per GPU,
/// keyed by unit-index label (`gpu0`, `gpu1`, ...).
///
/// The temperature rule wins: an overheating GPU never also receives an
/// efficiency recommendation. An empty map means nothing to send.
pub fn analyze(
    snapshot: &HardwareSnapshot,
    profiles: &ProfileTable,
) -> BTreeMap<String, Recommendation> {
    let mut recommendations = BTreeMap::new();

    for (index, gpu) in snapshot.gpus.iter().enumerate() {
        let label = format!("gpu{index}");

        if gpu.temperature > HIGH_TEMPERATURE {
            debug!(
                gpu = %label,
                model = %gpu.model,
                temperature = gpu.temperature,
                "GPU over temperature limit"
            );
            recommendations.insert(label, Recommendation::decrease_power());
            continue;
        }

        // Readings without a power draw cannot be scored for efficiency.
        if gpu.power <= 0.0 {
            continue;
        }

        let profile = profiles.get(&gpu.model);
        let efficiency = gpu.hashrate / gpu.power;
        if efficiency < profile.efficiency_threshold {
            debug!(
                gpu = %label,
                model = %gpu.model,
                efficiency,
                threshold = profile.efficiency_threshold,
                "GPU below efficiency floor"
            );
            recommendations.insert(
                label,
                Recommendation::optimize(ClockSuggestion {
                    power: (gpu.power * POWER_BACKOFF).min(profile.max_power),
                    core: profile.core_clock,
                    memory: profile.memory_clock,
                }),
            );
        }
    }

    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::GpuReading;

    fn gpu(model: &str, temperature: f64, hashrate: f64, power: f64) -> GpuReading {
        GpuReading {
            model: model.to_string(),
            temperature,
            fan_speed: 60.0,
            hashrate,
            power,
            memory: 0.0,
            core: 0.0,
        }
    }

    fn snapshot(gpus: Vec<GpuReading>) -> HardwareSnapshot {
        HardwareSnapshot {
            gpus,
            ..Default::default()
        }
        .normalized()
    }

    #[test]
    fn test_hot_gpu_gets_exactly_one_power_cut() {
        // Efficiency is nominal (1.0 >= 0.5) but the card runs at 85C:
        // only the temperature rule may fire.
        let snap = snapshot(vec![gpu("Unknown Card", 85.0, 200.0, 200.0)]);
        let recs = analyze(&snap, &ProfileTable::new());

        assert_eq!(recs.len(), 1);
        match recs.get("gpu0") {
            Some(Recommendation::Temperature { action, value }) => {
                assert_eq!(*action, TuningAction::DecreasePower);
                assert_eq!(*value, TEMPERATURE_POWER_DELTA);
            }
            other => panic!("expected temperature recommendation, got {other:?}"),
        }
    }

    #[test]
    fn test_hot_and_inefficient_gpu_still_gets_temperature_only() {
        let snap = snapshot(vec![gpu("Unknown Card", 91.0, 10.0, 200.0)]);
        let recs = analyze(&snap, &ProfileTable::new());

        assert_eq!(recs.len(), 1);
        assert!(matches!(
            recs.get("gpu0"),
            Some(Recommendation::Temperature { .. })
        ));
    }

    #[test]
    fn test_inefficient_gpu_gets_settings_suggestion() {
        // efficiency = 80/200 = 0.4 < 0.5 fallback threshold
        let snap = snapshot(vec![gpu("Unknown Card", 65.0, 80.0, 200.0)]);
        let recs = analyze(&snap, &ProfileTable::new());

        match recs.get("gpu0") {
            Some(Recommendation::Efficiency {
                action,
                suggestions,
            }) => {
                assert_eq!(*action, TuningAction::OptimizeSettings);
                assert_eq!(suggestions.power, 180.0); // 200 * 0.9, under the 250 cap
                assert_eq!(suggestions.core, GpuProfile::CONSERVATIVE.core_clock);
            }
            other => panic!("expected efficiency recommendation, got {other:?}"),
        }
    }

    #[test]
    fn test_power_suggestion_is_capped_at_model_max() {
        let mut profiles = ProfileTable::new();
        profiles.insert(
            "Hungry Card",
            GpuProfile {
                efficiency_threshold: 0.5,
                max_power: 150.0,
                core_clock: 1000.0,
                memory_clock: 2000.0,
            },
        );

        // 400 * 0.9 = 360 would exceed the 150W cap.
        let snap = snapshot(vec![gpu("Hungry Card", 65.0, 100.0, 400.0)]);
        let recs = analyze(&snap, &profiles);

        match recs.get("gpu0") {
            Some(Recommendation::Efficiency { suggestions, .. }) => {
                assert_eq!(suggestions.power, 150.0);
            }
            other => panic!("expected efficiency recommendation, got {other:?}"),
        }
    }

    #[test]
    fn test_nominal_snapshot_yields_nothing() {
        let snap = snapshot(vec![
            gpu("Unknown Card", 65.0, 200.0, 200.0),
            gpu("Unknown Card", 70.0, 300.0, 250.0),
        ]);
        assert!(analyze(&snap, &ProfileTable::new()).is_empty());
    }

    #[test]
    fn test_empty_snapshot_yields_nothing() {
        assert!(analyze(&HardwareSnapshot::default(), &ProfileTable::new()).is_empty());
    }

    #[test]
    fn test_zero_power_reading_is_skipped() {
        let snap = snapshot(vec![gpu("Unknown Card", 65.0, 100.0, 0.0)]);
        assert!(analyze(&snap, &ProfileTable::new()).is_empty());
    }

    #[test]
    fn test_units_are_scored_independently() {
        let snap = snapshot(vec![
            gpu("Unknown Card", 85.0, 200.0, 200.0), // hot
            gpu("Unknown Card", 65.0, 80.0, 200.0),  // inefficient
            gpu("Unknown Card", 65.0, 200.0, 200.0), // fine
        ]);
        let recs = analyze(&snap, &ProfileTable::new());

        assert_eq!(recs.len(), 2);
        assert!(matches!(
            recs.get("gpu0"),
            Some(Recommendation::Temperature { .. })
        ));
        assert!(matches!(
            recs.get("gpu1"),
            Some(Recommendation::Efficiency { .. })
        ));
        assert!(!recs.contains_key("gpu2"));
    }

    #[test]
    fn test_unknown_model_falls_back_to_conservative() {
        let table = ProfileTable::builtin();
        assert_eq!(table.get("Never Heard Of It"), GpuProfile::CONSERVATIVE);
        assert_ne!(table.get("NVIDIA RTX 3080"), GpuProfile::CONSERVATIVE);
    }

    #[test]
    fn test_recommendation_wire_shape() {
        let rec = Recommendation::decrease_power();
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["type"], "temperature");
        assert_eq!(json["action"], "decrease_power");
        assert_eq!(json["value"], -10.0);

        let rec = Recommendation::optimize(ClockSuggestion {
            power: 180.0,
            core: 1200.0,
            memory: 2100.0,
        });
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["type"], "efficiency");
        assert_eq!(json["action"], "optimize_settings");
        assert_eq!(json["suggestions"]["power"], 180.0);
    }
}
