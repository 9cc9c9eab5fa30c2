//
// slicetemplate - Unbiased group template construction from slice images
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Per-iteration context and cross-iteration records.
//!

use crate::error::{require_file, Error, Result};
use crate::tools::Interpolation;
use serde::Serialize;
use std::path::PathBuf;
use super::{ArtifactKey, IterationNumber, RoundArtifact, SliceArtifact, SliceIndex, SliceIndexRange, Workspace};
use super::settings::RegistrationPlan;

/// Source of the moving image of a slice in iterations > 0.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MovingImageSource {
    /// The bias-corrected input slice.
    Preprocessed,
    /// The slice resliced in the previous iteration.
    PreviousRound
}

impl From<MovingImageSource> for &str {
    fn from(source: MovingImageSource) -> &'static str {
        match source {
            MovingImageSource::Preprocessed => "preprocessed",
            MovingImageSource::PreviousRound => "previous"
        }
    }
}

impl std::str::FromStr for MovingImageSource {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<MovingImageSource, ()> {
        [MovingImageSource::Preprocessed, MovingImageSource::PreviousRound].iter()
            .cloned()
            .find(|m| s == Into::<&str>::into(*m))
            .ok_or(())
    }
}

/// Template shape correction constants.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CorrectionSettings {
    /// Multiplier of the mean forward warp.
    pub factor: f64,
    /// Number of times the corrected warp is applied to the template.
    pub repeats: u32
}

impl Default for CorrectionSettings {
    fn default() -> CorrectionSettings {
        CorrectionSettings{ factor: -0.25, repeats: 4 }
    }
}

impl CorrectionSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.factor.is_finite() {
            return Err(Error::configuration(format!("invalid correction factor: {}", self.factor)));
        }

        Ok(())
    }
}

/// What the next iteration needs from a completed one.
#[derive(Clone, Debug, PartialEq)]
pub struct PriorRound {
    pub iteration: IterationNumber,
    pub template: PathBuf,
    /// Fixed image of the next iteration.
    pub shaped_template: PathBuf,
    pub variance_map: PathBuf
}

impl PriorRound {
    /// Reconstructs the record of a completed `iteration` from the workspace (used when resuming).
    ///
    /// Fails with `InputNotFound` if any artifact needed by the next iteration is missing.
    ///
    pub fn from_workspace(
        workspace: &Workspace,
        iteration: IterationNumber,
        range: &SliceIndexRange,
        moving_source: MovingImageSource
    ) -> Result<PriorRound> {
        let prior = PriorRound{
            iteration,
            template: workspace.round_artifact(RoundArtifact::Template, iteration),
            shaped_template: workspace.round_artifact(RoundArtifact::ShapedTemplate, iteration),
            variance_map: workspace.round_artifact(RoundArtifact::VarianceMap, iteration)
        };
        require_file(&prior.template)?;
        require_file(&prior.shaped_template)?;
        require_file(&prior.variance_map)?;

        for slice in range.iter() {
            let moving = match moving_source {
                MovingImageSource::Preprocessed => ArtifactKey::Preprocessed{ slice },
                MovingImageSource::PreviousRound => ArtifactKey::Slice{ kind: SliceArtifact::Resliced, iteration, slice }
            };
            require_file(&workspace.resolve(moving))?;
        }

        Ok(prior)
    }
}

/// Terminal artifacts of an iteration.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoundArtifacts {
    pub iteration: IterationNumber,
    pub template: PathBuf,
    pub shaped_template: PathBuf,
    pub corrected_forward_warp: PathBuf,
    pub corrected_inverse_warp: PathBuf,
    pub mean_affine: PathBuf,
    pub variance_map: PathBuf
}

impl RoundArtifacts {
    pub fn to_prior(&self) -> PriorRound {
        PriorRound{
            iteration: self.iteration,
            template: self.template.clone(),
            shaped_template: self.shaped_template.clone(),
            variance_map: self.variance_map.clone()
        }
    }
}

/// Everything a stage of one iteration may read; built once per iteration and never modified.
pub struct IterationContext<'a> {
    pub iteration: IterationNumber,
    pub range: SliceIndexRange,
    pub workspace: &'a Workspace,
    pub plan: &'a RegistrationPlan,
    pub correction: CorrectionSettings,
    pub moving_source: MovingImageSource,
    pub interpolation: Interpolation,
    /// `None` in iteration 0.
    pub prior: Option<PriorRound>
}

impl<'a> IterationContext<'a> {
    /// Fixed image of registrations: the initial template or the previous shaped template.
    pub fn fixed_image(&self) -> PathBuf {
        match &self.prior {
            Some(prior) => prior.shaped_template.clone(),
            None => self.workspace.resolve(ArtifactKey::InitialTemplate)
        }
    }

    pub fn moving_image(&self, slice: SliceIndex) -> PathBuf {
        match (&self.prior, self.moving_source) {
            (Some(prior), MovingImageSource::PreviousRound) => self.workspace.resolve(
                ArtifactKey::Slice{ kind: SliceArtifact::Resliced, iteration: prior.iteration, slice }
            ),
            _ => self.workspace.resolve(ArtifactKey::Preprocessed{ slice })
        }
    }

    pub fn slice_artifact(&self, kind: SliceArtifact, slice: SliceIndex) -> PathBuf {
        self.workspace.resolve(ArtifactKey::Slice{ kind, iteration: self.iteration, slice })
    }

    pub fn slice_artifacts(&self, kind: SliceArtifact) -> Vec<PathBuf> {
        self.workspace.slice_artifacts(kind, self.iteration, &self.range)
    }

    pub fn round_artifact(&self, kind: RoundArtifact) -> PathBuf {
        self.workspace.round_artifact(kind, self.iteration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::settings::{OverrideFile, RegistrationSettings};
    use crate::tools::ArtifactFormat;

    fn workspace(root: PathBuf) -> Workspace {
        Workspace::new(root, "in_##.fits".to_string(), ArtifactFormat::NATIVE).unwrap()
    }

    #[test]
    fn given_prior_round_use_its_shaped_template_and_resliced_images() {
        let ws = workspace(PathBuf::from("/ws"));
        let plan = RegistrationPlan::new(RegistrationSettings::default(), OverrideFile::default());
        let prior = PriorRound{
            iteration: 1,
            template: ws.round_artifact(RoundArtifact::Template, 1),
            shaped_template: ws.round_artifact(RoundArtifact::ShapedTemplate, 1),
            variance_map: ws.round_artifact(RoundArtifact::VarianceMap, 1)
        };
        let mut ctx = IterationContext{
            iteration: 2,
            range: SliceIndexRange::new(0, 2).unwrap(),
            workspace: &ws,
            plan: &plan,
            correction: CorrectionSettings::default(),
            moving_source: MovingImageSource::PreviousRound,
            interpolation: Interpolation::Linear,
            prior: Some(prior)
        };

        assert_eq!(PathBuf::from("/ws/iteration_001/shaped_template.fits"), ctx.fixed_image());
        assert_eq!(PathBuf::from("/ws/iteration_001/resliced_0002.fits"), ctx.moving_image(2));

        ctx.moving_source = MovingImageSource::Preprocessed;
        assert_eq!(PathBuf::from("/ws/slices/preprocessed_0002.fits"), ctx.moving_image(2));

        ctx.prior = None;
        assert_eq!(PathBuf::from("/ws/slices/initial_template.fits"), ctx.fixed_image());
    }

    #[test]
    fn when_prior_artifacts_missing_fail_with_input_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(dir.path().to_path_buf());
        ws.create_layout().unwrap();
        ws.create_iteration_dir(0).unwrap();
        for kind in &[RoundArtifact::Template, RoundArtifact::ShapedTemplate, RoundArtifact::VarianceMap] {
            std::fs::write(ws.round_artifact(*kind, 0), b"").unwrap();
        }
        let range = SliceIndexRange::new(0, 1).unwrap();

        let err = PriorRound::from_workspace(&ws, 0, &range, MovingImageSource::Preprocessed).unwrap_err();
        assert!(matches!(err, Error::InputNotFound(_)));

        for slice in range.iter() {
            std::fs::write(ws.resolve(ArtifactKey::Preprocessed{ slice }), b"").unwrap();
        }
        let prior = PriorRound::from_workspace(&ws, 0, &range, MovingImageSource::Preprocessed).unwrap();
        assert_eq!(ws.round_artifact(RoundArtifact::ShapedTemplate, 0), prior.shaped_template);
    }

    #[test]
    fn given_moving_source_names_parse() {
        assert_eq!(Ok(MovingImageSource::PreviousRound), "previous".parse());
        assert_eq!(Ok(MovingImageSource::Preprocessed), "preprocessed".parse());
        assert!("resliced".parse::<MovingImageSource>().is_err());
    }
}
