//! Commodity tuning: typed configuration loaded from JSON and validated once.
//!
//! Validation splits problems in two. Structural errors that leave no sane
//! interpretation (non-finite numbers, an empty range, malformed JSON) are
//! returned as [`ConfigError`] to whoever loaded the tuning. Everything else
//! is a [`TuningIssue`]: logged, replaced by a fallback, and recorded on the
//! [`ValidatedConfig`] so the engine can keep running on live data.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::ops::Deref;

use crate::auto_satisfy::AutoSatisfyCurve;
use crate::constants::{FALLBACK_STATE_NAME, HOURS_PER_DAY, VALUE_EPSILON};
use crate::policy::CommodityKind;
use crate::threshold::{Comparator, Threshold};
use crate::value::DecayDirection;

fn default_decay_enabled() -> bool {
    true
}

/// One band of the value range, starting at `lower_bound`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateConfig {
    pub name: String,
    pub lower_bound: f64,
    /// Buff applied while in this state.
    #[serde(default)]
    pub buff: Option<String>,
    /// Defer the buff until this threshold also holds. Must lie inside the band.
    #[serde(default)]
    pub buff_add_threshold: Option<Threshold>,
    /// Loot actions run once on each entry.
    #[serde(default)]
    pub loot_on_enter: Vec<String>,
}

impl StateConfig {
    pub fn new(name: impl Into<String>, lower_bound: f64) -> Self {
        Self {
            name: name.into(),
            lower_bound,
            buff: None,
            buff_add_threshold: None,
            loot_on_enter: Vec::new(),
        }
    }

    pub fn with_buff(mut self, buff: impl Into<String>) -> Self {
        self.buff = Some(buff.into());
        self
    }

    pub fn with_buff_threshold(mut self, threshold: Threshold) -> Self {
        self.buff_add_threshold = Some(threshold);
        self
    }

    pub fn with_loot(mut self, loot: impl Into<String>) -> Self {
        self.loot_on_enter.push(loot.into());
        self
    }
}

/// Reversible distress automaton tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistressConfig {
    pub threshold: Threshold,
    #[serde(default)]
    pub buff: Option<String>,
    /// Corrective interaction pushed on entering distress.
    #[serde(default)]
    pub interaction: Option<String>,
}

/// One-way failure tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureConfig {
    pub threshold: Threshold,
    /// Candidates in priority order; the first whose preconditions hold is pushed.
    #[serde(default)]
    pub interactions: Vec<String>,
}

/// Full tuning for one commodity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommodityConfig {
    /// Stable type id, reported to clients.
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub kind: CommodityKind,
    pub min_value: f64,
    pub max_value: f64,
    pub initial_value: f64,
    pub convergence_value: f64,
    pub decay_rate: f64,
    #[serde(default)]
    pub decay_direction: DecayDirection,
    #[serde(default = "default_decay_enabled")]
    pub decay_enabled: bool,
    /// Ascending by `lower_bound`; the first must start at or below `min_value`.
    #[serde(default)]
    pub states: Vec<StateConfig>,
    #[serde(default)]
    pub distress: Option<DistressConfig>,
    #[serde(default)]
    pub failure: Option<FailureConfig>,
    #[serde(default)]
    pub auto_satisfy: Option<AutoSatisfyCurve>,
}

impl CommodityConfig {
    /// A non-decaying commodity that starts at its maximum.
    pub fn new(id: u64, name: impl Into<String>, min_value: f64, max_value: f64) -> Self {
        Self {
            id,
            name: name.into(),
            kind: CommodityKind::Core,
            min_value,
            max_value,
            initial_value: max_value,
            convergence_value: max_value,
            decay_rate: 0.0,
            decay_direction: DecayDirection::default(),
            decay_enabled: true,
            states: Vec::new(),
            distress: None,
            failure: None,
            auto_satisfy: None,
        }
    }

    pub fn with_kind(mut self, kind: CommodityKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_initial(mut self, value: f64) -> Self {
        self.initial_value = value;
        self
    }

    pub fn with_decay(mut self, rate: f64, convergence: f64, direction: DecayDirection) -> Self {
        self.decay_rate = rate;
        self.convergence_value = convergence;
        self.decay_direction = direction;
        self
    }

    pub fn with_states(mut self, states: Vec<StateConfig>) -> Self {
        self.states = states;
        self
    }

    pub fn with_distress(mut self, distress: DistressConfig) -> Self {
        self.distress = Some(distress);
        self
    }

    pub fn with_failure(mut self, failure: FailureConfig) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn with_auto_satisfy(mut self, curve: AutoSatisfyCurve) -> Self {
        self.auto_satisfy = Some(curve);
        self
    }

    /// Parse and validate a single commodity.
    pub fn from_json(json: &str) -> Result<ValidatedConfig, ConfigError> {
        let config: CommodityConfig = serde_json::from_str(json)?;
        config.validate()
    }

    pub fn validate(mut self) -> Result<ValidatedConfig, ConfigError> {
        self.check_finite()?;
        if self.min_value >= self.max_value {
            return Err(ConfigError::InvalidRange {
                commodity: self.name,
                min: self.min_value,
                max: self.max_value,
            });
        }

        let mut issues = Vec::new();
        let (min, max) = (self.min_value, self.max_value);

        if !(min..=max).contains(&self.initial_value) {
            issues.push(TuningIssue::InitialOutOfRange(self.initial_value));
            self.initial_value = self.initial_value.clamp(min, max);
        }
        if !(min..=max).contains(&self.convergence_value) {
            issues.push(TuningIssue::ConvergenceOutOfRange(self.convergence_value));
            self.convergence_value = self.convergence_value.clamp(min, max);
        }

        self.validate_states(&mut issues);

        if self
            .distress
            .as_ref()
            .is_some_and(|d| d.threshold.comparator == Comparator::Equal)
        {
            issues.push(TuningIssue::DistressEquality);
            self.distress = None;
        }
        if self
            .failure
            .as_ref()
            .is_some_and(|f| f.threshold.comparator == Comparator::Equal)
        {
            issues.push(TuningIssue::FailureEquality);
            self.failure = None;
        }

        if let Some(mut curve) = self.auto_satisfy.take() {
            curve.points.retain(|p| {
                let ok = p.hour.is_finite()
                    && p.value.is_finite()
                    && (0.0..HOURS_PER_DAY).contains(&p.hour);
                if !ok {
                    issues.push(TuningIssue::CurvePointOutOfDay(p.hour));
                }
                ok
            });
            if curve.points.is_empty() {
                issues.push(TuningIssue::CurveEmpty);
            } else {
                self.auto_satisfy = Some(AutoSatisfyCurve::new(
                    curve.points,
                    curve.max_catch_up_duration,
                    curve.random_time_jitter,
                ));
            }
        }

        for issue in &issues {
            log::error!("tuning '{}' ({}): {}", self.name, self.id, issue);
        }

        Ok(ValidatedConfig { config: self, issues })
    }

    fn check_finite(&self) -> Result<(), ConfigError> {
        let fields = [
            ("min_value", self.min_value),
            ("max_value", self.max_value),
            ("initial_value", self.initial_value),
            ("convergence_value", self.convergence_value),
            ("decay_rate", self.decay_rate),
        ];
        let states = self.states.iter().map(|s| ("states.lower_bound", s.lower_bound));
        for (field, value) in fields.into_iter().chain(states) {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite {
                    commodity: self.name.clone(),
                    field,
                });
            }
        }
        Ok(())
    }

    fn validate_states(&mut self, issues: &mut Vec<TuningIssue>) {
        let min = self.min_value;
        let fallback = || StateConfig::new(FALLBACK_STATE_NAME, min);

        if self.states.is_empty() {
            issues.push(TuningIssue::EmptyStates);
            self.states = vec![fallback()];
            return;
        }
        if let Some(pair) = self.states.windows(2).find(|w| w[0].lower_bound >= w[1].lower_bound) {
            issues.push(TuningIssue::StatesNotAscending {
                state: pair[1].name.clone(),
            });
            self.states = vec![fallback()];
            return;
        }
        if self.states[0].lower_bound > min + VALUE_EPSILON {
            issues.push(TuningIssue::FirstStateAboveMin(self.states[0].lower_bound));
            self.states.insert(0, fallback());
        }

        let uppers: Vec<f64> = self
            .states
            .iter()
            .skip(1)
            .map(|s| s.lower_bound)
            .chain(std::iter::once(self.max_value))
            .collect();
        for (state, upper) in self.states.iter_mut().zip(uppers) {
            let outside = state
                .buff_add_threshold
                .is_some_and(|t| t.value < state.lower_bound || t.value > upper);
            if outside {
                issues.push(TuningIssue::BuffThresholdOutsideBand {
                    state: state.name.clone(),
                });
                state.buff_add_threshold = None;
            }
        }
    }
}

/// Tuning that passed validation, with any fallbacks already applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig {
    config: CommodityConfig,
    issues: Vec<TuningIssue>,
}

impl ValidatedConfig {
    pub fn config(&self) -> &CommodityConfig {
        &self.config
    }

    /// Recoverable problems found while validating.
    pub fn issues(&self) -> &[TuningIssue] {
        &self.issues
    }
}

impl Deref for ValidatedConfig {
    type Target = CommodityConfig;

    fn deref(&self) -> &CommodityConfig {
        &self.config
    }
}

/// A recoverable tuning problem; the engine substitutes a safe default.
#[derive(Debug, Clone, PartialEq)]
pub enum TuningIssue {
    EmptyStates,
    FirstStateAboveMin(f64),
    StatesNotAscending { state: String },
    BuffThresholdOutsideBand { state: String },
    InitialOutOfRange(f64),
    ConvergenceOutOfRange(f64),
    DistressEquality,
    FailureEquality,
    CurvePointOutOfDay(f64),
    CurveEmpty,
}

impl fmt::Display for TuningIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TuningIssue::EmptyStates => write!(f, "no states tuned; using synthetic bottom state"),
            TuningIssue::FirstStateAboveMin(lower) => {
                write!(
                    f,
                    "first state starts at {} above min_value; prepending synthetic bottom state",
                    lower
                )
            }
            TuningIssue::StatesNotAscending { state } => {
                write!(
                    f,
                    "states not strictly ascending at '{}'; using synthetic bottom state",
                    state
                )
            }
            TuningIssue::BuffThresholdOutsideBand { state } => {
                write!(
                    f,
                    "buff_add_threshold of '{}' lies outside its band; applying buff on entry",
                    state
                )
            }
            TuningIssue::InitialOutOfRange(v) => {
                write!(f, "initial_value {} out of range; clamped", v)
            }
            TuningIssue::ConvergenceOutOfRange(v) => {
                write!(f, "convergence_value {} out of range; clamped", v)
            }
            TuningIssue::DistressEquality => {
                write!(f, "distress threshold cannot use '=='; distress disabled")
            }
            TuningIssue::FailureEquality => {
                write!(f, "failure threshold cannot use '=='; failure disabled")
            }
            TuningIssue::CurvePointOutOfDay(hour) => {
                write!(f, "auto-satisfy point at hour {} dropped", hour)
            }
            TuningIssue::CurveEmpty => {
                write!(f, "auto-satisfy curve has no points; catch-up disabled")
            }
        }
    }
}

/// Tuning that cannot be loaded at all.
#[derive(Debug)]
pub enum ConfigError {
    Json(serde_json::Error),
    NonFinite { commodity: String, field: &'static str },
    InvalidRange { commodity: String, min: f64, max: f64 },
    DuplicateId(u64),
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Json(e)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Json(e) => write!(f, "Tuning parse error: {}", e),
            ConfigError::NonFinite { commodity, field } => {
                write!(
                    f,
                    "Tuning '{}': {} is not a finite number",
                    commodity, field
                )
            }
            ConfigError::InvalidRange { commodity, min, max } => {
                write!(
                    f,
                    "Tuning '{}': min_value {} must be below max_value {}",
                    commodity, min, max
                )
            }
            ConfigError::DuplicateId(id) => write!(f, "Tuning id {} declared twice", id),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Deserialize)]
struct TuningFile {
    commodities: Vec<CommodityConfig>,
}

/// Load a tuning table of the form `{ "commodities": [ ... ] }`.
pub fn load_tuning_json(json: &str) -> Result<Vec<ValidatedConfig>, ConfigError> {
    let file: TuningFile = serde_json::from_str(json)?;
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(file.commodities.len());
    for config in file.commodities {
        if !seen.insert(config.id) {
            return Err(ConfigError::DuplicateId(config.id));
        }
        out.push(config.validate()?);
    }
    log::info!("Loaded {} commodity tunings", out.len());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hunger() -> CommodityConfig {
        CommodityConfig::new(1, "hunger", -100.0, 100.0)
            .with_initial(50.0)
            .with_decay(-1.0, 100.0, DecayDirection::Signed)
            .with_states(vec![
                StateConfig::new("starving", -100.0),
                StateConfig::new("hungry", -20.0),
                StateConfig::new("fine", 40.0),
            ])
    }

    #[test]
    fn test_valid_config_has_no_issues() {
        let validated = hunger().validate().unwrap();
        assert!(validated.issues().is_empty());
        assert_eq!(validated.states.len(), 3);
    }

    #[test]
    fn test_first_state_above_min_gets_bottom_state() {
        let mut config = hunger();
        config.states.remove(0);
        let validated = config.validate().unwrap();
        assert_eq!(
            validated.issues(),
            &[TuningIssue::FirstStateAboveMin(-20.0)]
        );
        assert_eq!(validated.states[0].name, FALLBACK_STATE_NAME);
        assert_eq!(validated.states[0].lower_bound, -100.0);
        assert_eq!(validated.states.len(), 3);
    }

    #[test]
    fn test_non_ascending_states_fall_back() {
        let mut config = hunger();
        config.states.swap(1, 2);
        let validated = config.validate().unwrap();
        assert!(matches!(validated.issues()[0], TuningIssue::StatesNotAscending { .. }));
        assert_eq!(validated.states.len(), 1);
        assert_eq!(validated.states[0].name, FALLBACK_STATE_NAME);
    }

    #[test]
    fn test_buff_threshold_outside_band_is_dropped() {
        let mut config = hunger();
        config.states[1] = StateConfig::new("hungry", -20.0)
            .with_buff("buff_hungry")
            .with_buff_threshold(Threshold::at_or_below(60.0));
        config.states[2] = StateConfig::new("fine", 40.0)
            .with_buff("buff_fine")
            .with_buff_threshold(Threshold::at_or_above(80.0));
        let validated = config.validate().unwrap();
        assert_eq!(
            validated.issues(),
            &[TuningIssue::BuffThresholdOutsideBand {
                state: "hungry".to_string()
            }]
        );
        assert!(validated.states[1].buff_add_threshold.is_none());
        assert!(validated.states[2].buff_add_threshold.is_some());
    }

    #[test]
    fn test_fatal_errors() {
        let config = CommodityConfig::new(2, "broken", 10.0, 10.0);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRange { .. })));
        let config = CommodityConfig::new(3, "nan", 0.0, 10.0).with_initial(f64::NAN);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonFinite {
                field: "initial_value",
                ..
            })
        ));
    }

    #[test]
    fn test_clamps_out_of_range_values() {
        let config = hunger().with_initial(250.0);
        let validated = config.validate().unwrap();
        assert_eq!(validated.initial_value, 100.0);
        assert_eq!(validated.issues(), &[TuningIssue::InitialOutOfRange(250.0)]);
    }

    #[test]
    fn test_equality_failure_is_disabled() {
        let config = hunger().with_failure(FailureConfig {
            threshold: Threshold::equal_to(-100.0),
            interactions: vec!["eat".to_string()],
        });
        let validated = config.validate().unwrap();
        assert!(validated.failure.is_none());
        assert_eq!(validated.issues(), &[TuningIssue::FailureEquality]);
    }

    #[test]
    fn test_load_table_from_json() {
        let json = r#"{
            "commodities": [
                {
                    "id": 10, "name": "boredom", "kind": "Transient",
                    "min_value": 0.0, "max_value": 100.0,
                    "initial_value": 60.0, "convergence_value": 0.0, "decay_rate": 0.5,
                    "states": [ { "name": "calm", "lower_bound": 0.0 },
                                { "name": "bored", "lower_bound": 50.0, "buff": "buff_bored" } ],
                    "distress": { "threshold": { "value": 90.0, "comparator": "GreaterOrEqual" } },
                    "auto_satisfy": {
                        "points": [ { "hour": 30.0, "value": 1.0 } ],
                        "max_catch_up_duration": 60
                    }
                }
            ]
        }"#;
        let table = load_tuning_json(json).unwrap();
        assert_eq!(table.len(), 1);
        let boredom = &table[0];
        assert_eq!(boredom.kind, CommodityKind::Transient);
        assert!(boredom.decay_enabled);
        assert_eq!(boredom.decay_direction, DecayDirection::TowardConvergence);
        assert_eq!(boredom.states[1].buff.as_deref(), Some("buff_bored"));
        assert!(boredom.auto_satisfy.is_none());
        assert_eq!(
            boredom.issues(),
            &[TuningIssue::CurvePointOutOfDay(30.0), TuningIssue::CurveEmpty]
        );
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let one = serde_json::to_value(hunger()).unwrap();
        let json = serde_json::json!({ "commodities": [one.clone(), one] }).to_string();
        assert!(matches!(load_tuning_json(&json), Err(ConfigError::DuplicateId(1))));
    }
}
