//
// slicetemplate - Unbiased group template construction from slice images
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Registration settings and their per-iteration/per-slice overrides.
//!

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use strum::IntoEnumIterator;
use super::{IterationNumber, SliceIndex, SliceIndexRange};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, strum_macros::EnumIter)]
pub enum Metric {
    /// Cross-correlation.
    CC,
    /// Mutual information.
    MI,
    /// Probabilistic (normalized) cross-correlation.
    PR,
    /// Mean square difference.
    MSQ
}

impl From<Metric> for &str {
    fn from(metric: Metric) -> &'static str {
        match metric {
            Metric::CC => "CC",
            Metric::MI => "MI",
            Metric::PR => "PR",
            Metric::MSQ => "MSQ"
        }
    }
}

impl std::str::FromStr for Metric {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Metric, ()> {
        Metric::iter().find(|m| s == Into::<&str>::into(*m)).ok_or(())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, strum_macros::EnumIter)]
pub enum RegularizationType {
    /// Gaussian smoothing of the deformation field.
    Gauss,
    /// Directly manipulated free-form deformation (smoothing of the update).
    DMFFD
}

impl From<RegularizationType> for &str {
    fn from(regularization: RegularizationType) -> &'static str {
        match regularization {
            RegularizationType::Gauss => "Gauss",
            RegularizationType::DMFFD => "DMFFD"
        }
    }
}

impl std::str::FromStr for RegularizationType {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<RegularizationType, ()> {
        RegularizationType::iter().find(|r| s == Into::<&str>::into(*r)).ok_or(())
    }
}

/// Iteration counts per resolution level, coarsest first; written as e.g. "30x90x20".
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Schedule(Vec<u32>);

impl Schedule {
    pub fn new(levels: Vec<u32>) -> Schedule { Schedule(levels) }

    pub fn levels(&self) -> &[u32] { &self.0 }

    pub fn total(&self) -> u32 { self.0.iter().sum() }
}

impl std::str::FromStr for Schedule {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Schedule, String> {
        let levels = s.split('x')
            .map(|level| level.trim().parse::<u32>())
            .collect::<std::result::Result<Vec<u32>, _>>()
            .map_err(|_| format!("invalid iteration schedule: \"{}\"", s))?;

        Ok(Schedule(levels))
    }
}

impl std::convert::TryFrom<String> for Schedule {
    type Error = String;
    fn try_from(s: String) -> std::result::Result<Schedule, String> { s.parse() }
}

impl From<Schedule> for String {
    fn from(schedule: Schedule) -> String { schedule.to_string() }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let levels: Vec<String> = self.0.iter().map(|l| l.to_string()).collect();
        write!(f, "{}", levels.join("x"))
    }
}

/// Parameters of a single registration.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RegistrationSettings {
    pub metric: Metric,
    /// Radius for CC/PR, number of bins for MI.
    pub metric_param: f64,
    pub deformable_iterations: Schedule,
    pub affine_iterations: Schedule,
    pub gradient_step: f64,
    pub regularization: RegularizationType,
    pub regularization_amount: f64,
    pub mask: Option<PathBuf>
}

impl Default for RegistrationSettings {
    fn default() -> RegistrationSettings {
        RegistrationSettings{
            metric: Metric::CC,
            metric_param: 4.0,
            deformable_iterations: Schedule(vec![30, 90, 20]),
            affine_iterations: Schedule(vec![10000, 10000, 10000]),
            gradient_step: 0.25,
            regularization: RegularizationType::Gauss,
            regularization_amount: 3.0,
            mask: None
        }
    }
}

impl RegistrationSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.metric_param > 0.0) {
            return Err(Error::configuration(format!("metric parameter must be positive: {}", self.metric_param)));
        }
        if !(self.gradient_step > 0.0) {
            return Err(Error::configuration(format!("gradient step must be positive: {}", self.gradient_step)));
        }
        if !(self.regularization_amount >= 0.0) {
            return Err(Error::configuration(
                format!("regularization amount must not be negative: {}", self.regularization_amount)
            ));
        }
        if self.deformable_iterations.levels().is_empty() || self.affine_iterations.levels().is_empty() {
            return Err(Error::configuration("empty iteration schedule"));
        }

        Ok(())
    }
}

/// Replacement values for selected fields of `RegistrationSettings`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsOverride {
    pub metric: Option<Metric>,
    pub metric_param: Option<f64>,
    pub deformable_iterations: Option<Schedule>,
    pub affine_iterations: Option<Schedule>,
    pub gradient_step: Option<f64>,
    pub regularization: Option<RegularizationType>,
    pub regularization_amount: Option<f64>
}

impl SettingsOverride {
    pub fn apply_to(&self, settings: &mut RegistrationSettings) {
        if let Some(metric) = self.metric { settings.metric = metric; }
        if let Some(param) = self.metric_param { settings.metric_param = param; }
        if let Some(schedule) = &self.deformable_iterations { settings.deformable_iterations = schedule.clone(); }
        if let Some(schedule) = &self.affine_iterations { settings.affine_iterations = schedule.clone(); }
        if let Some(step) = self.gradient_step { settings.gradient_step = step; }
        if let Some(regularization) = self.regularization { settings.regularization = regularization; }
        if let Some(amount) = self.regularization_amount { settings.regularization_amount = amount; }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IterationOverride {
    #[serde(default)]
    pub defaults: SettingsOverride,
    #[serde(default)]
    pub slices: BTreeMap<SliceIndex, SettingsOverride>
}

/// Contents of the settings override file.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverrideFile {
    /// Apply to all iterations.
    #[serde(default)]
    pub slices: BTreeMap<SliceIndex, SettingsOverride>,
    #[serde(default)]
    pub iterations: BTreeMap<IterationNumber, IterationOverride>
}

impl OverrideFile {
    pub fn load(path: &Path) -> Result<OverrideFile> {
        crate::error::require_file(path)?;
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::configuration(format!("cannot read {}: {}", path.display(), e)))?;

        OverrideFile::parse(&contents)
            .map_err(|e| Error::configuration(format!("invalid settings override file {}: {}", path.display(), e)))
    }

    pub fn parse(contents: &str) -> std::result::Result<OverrideFile, serde_json::Error> {
        serde_json::from_str(contents)
    }
}

/// Resolves the registration settings of every (iteration, slice) pair.
///
/// Precedence (lowest first): run defaults, iteration defaults, `slices`, iteration `slices`.
///
#[derive(Clone, Debug, PartialEq)]
pub struct RegistrationPlan {
    defaults: RegistrationSettings,
    overrides: OverrideFile
}

impl RegistrationPlan {
    pub fn new(defaults: RegistrationSettings, overrides: OverrideFile) -> RegistrationPlan {
        RegistrationPlan{ defaults, overrides }
    }

    pub fn defaults(&self) -> &RegistrationSettings { &self.defaults }

    /// Checks that overrides refer to existing slices and iterations, and that every resolved setting is valid.
    pub fn validate(&self, range: &SliceIndexRange, iterations: IterationNumber) -> Result<()> {
        self.defaults.validate()?;

        let check_slices = |slices: &BTreeMap<SliceIndex, SettingsOverride>| -> Result<()> {
            match slices.keys().find(|index| !range.contains(**index)) {
                Some(index) => Err(Error::configuration(
                    format!("settings override for slice {} outside of range {}", index, range)
                )),
                None => Ok(())
            }
        };

        check_slices(&self.overrides.slices)?;
        for (&iteration, iter_override) in &self.overrides.iterations {
            if iteration >= iterations {
                return Err(Error::configuration(format!(
                    "settings override for iteration {}, but only {} iteration(s) requested", iteration, iterations
                )));
            }
            check_slices(&iter_override.slices)?;
        }

        for iteration in 0..iterations {
            for slice in self.overridden_slices(iteration) {
                self.settings_for(iteration, slice).validate()
                    .map_err(|e| Error::configuration(format!("iteration {}, slice {}: {}", iteration, slice, e)))?;
            }
            self.round_defaults(iteration).validate()?;
        }

        Ok(())
    }

    pub fn settings_for(&self, iteration: IterationNumber, slice: SliceIndex) -> RegistrationSettings {
        let mut settings = self.round_defaults(iteration);
        if let Some(o) = self.overrides.slices.get(&slice) {
            o.apply_to(&mut settings);
        }
        if let Some(o) = self.overrides.iterations.get(&iteration).and_then(|i| i.slices.get(&slice)) {
            o.apply_to(&mut settings);
        }

        settings
    }

    fn round_defaults(&self, iteration: IterationNumber) -> RegistrationSettings {
        let mut settings = self.defaults.clone();
        if let Some(iter_override) = self.overrides.iterations.get(&iteration) {
            iter_override.defaults.apply_to(&mut settings);
        }

        settings
    }

    fn overridden_slices(&self, iteration: IterationNumber) -> Vec<SliceIndex> {
        let mut slices: Vec<SliceIndex> = self.overrides.slices.keys().cloned().collect();
        if let Some(iter_override) = self.overrides.iterations.get(&iteration) {
            slices.extend(iter_override.slices.keys());
        }

        slices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OVERRIDES: &str = r#"{
        "slices": { "7": { "metric": "MI", "metric_param": 32 } },
        "iterations": {
            "2": { "defaults": { "deformable_iterations": "50x50" },
                   "slices":   { "3": { "regularization_amount": 1.5 }, "7": { "metric": "PR" } } }
        }
    }"#;

    fn plan() -> RegistrationPlan {
        RegistrationPlan::new(RegistrationSettings::default(), OverrideFile::parse(OVERRIDES).unwrap())
    }

    #[test]
    fn given_schedule_string_parse_levels() {
        let schedule: Schedule = "30x90x20".parse().unwrap();
        assert_eq!(&[30, 90, 20], schedule.levels());
        assert_eq!(140, schedule.total());
        assert_eq!("30x90x20", schedule.to_string());
        assert!("30xx20".parse::<Schedule>().is_err());
        assert!("".parse::<Schedule>().is_err());
    }

    #[test]
    fn given_no_override_use_defaults() {
        assert_eq!(RegistrationSettings::default(), plan().settings_for(0, 4));
    }

    #[test]
    fn given_slice_override_apply_to_all_iterations() {
        let settings = plan().settings_for(1, 7);
        assert_eq!(Metric::MI, settings.metric);
        assert_eq!(32.0, settings.metric_param);
        assert_eq!(RegistrationSettings::default().deformable_iterations, settings.deformable_iterations);
    }

    #[test]
    fn given_iteration_slice_override_take_precedence() {
        let plan = plan();

        let settings = plan.settings_for(2, 7);
        assert_eq!(Metric::PR, settings.metric);
        assert_eq!(32.0, settings.metric_param);
        assert_eq!(&[50, 50], settings.deformable_iterations.levels());

        let settings = plan.settings_for(2, 3);
        assert_eq!(1.5, settings.regularization_amount);
        assert_eq!(Metric::CC, settings.metric);

        assert_eq!(&[50, 50], plan.settings_for(2, 0).deformable_iterations.levels());
    }

    #[test]
    fn when_override_slice_outside_range_fail() {
        let err = plan().validate(&SliceIndexRange::new(0, 5).unwrap(), 3).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(plan().validate(&SliceIndexRange::new(0, 10).unwrap(), 3).is_ok());
    }

    #[test]
    fn when_override_iteration_not_run_fail() {
        let err = plan().validate(&SliceIndexRange::new(0, 10).unwrap(), 2).unwrap_err();
        assert!(err.to_string().contains("iteration 2"));
    }

    #[test]
    fn when_unknown_field_fail() {
        assert!(OverrideFile::parse(r#"{ "slices": { "1": { "metric": "CC", "radius": 2 } } }"#).is_err());
        assert!(OverrideFile::parse(r#"{ "slice": {} }"#).is_err());
        assert!(OverrideFile::parse(r#"{ "slices": { "1": { "metric": "NCC" } } }"#).is_err());
    }

    #[test]
    fn when_overridden_value_invalid_fail() {
        let overrides = OverrideFile::parse(r#"{ "slices": { "1": { "gradient_step": -1.0 } } }"#).unwrap();
        let plan = RegistrationPlan::new(RegistrationSettings::default(), overrides);
        assert!(matches!(plan.validate(&SliceIndexRange::new(0, 3).unwrap(), 1), Err(Error::Configuration(_))));
    }

    #[test]
    fn when_override_file_missing_fail_with_input_not_found() {
        let err = OverrideFile::load(Path::new("/nonexistent/overrides.json")).unwrap_err();
        assert!(matches!(err, Error::InputNotFound(_)));
    }
}
