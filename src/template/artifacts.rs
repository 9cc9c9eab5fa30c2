//
// slicetemplate - Unbiased group template construction from slice images
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Artifact naming and workspace layout.
//!
//! Every file produced by a run is identified by an `ArtifactKey`; `Workspace::resolve` is the only place
//! that turns keys into paths.
//!

use crate::error::{Error, Result};
use crate::tools::ArtifactFormat;
use crate::utils;
use std::path::{Path, PathBuf};
use super::{IterationNumber, SliceIndex, SliceIndexRange};

/// Per-slice artifact of an iteration.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SliceArtifact {
    ForwardWarp,
    InverseWarp,
    Affine,
    /// Moving image brought into the template frame.
    Resliced,
    /// Corrected mean inverse warp composed with the forward warp.
    ComposedWarp,
    WarpMagnitude
}

impl SliceArtifact {
    fn name(self) -> &'static str {
        match self {
            SliceArtifact::ForwardWarp => "forward_warp",
            SliceArtifact::InverseWarp => "inverse_warp",
            SliceArtifact::Affine => "affine",
            SliceArtifact::Resliced => "resliced",
            SliceArtifact::ComposedWarp => "composed_warp",
            SliceArtifact::WarpMagnitude => "warp_magnitude"
        }
    }
}

/// Aggregate artifact of an iteration.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RoundArtifact {
    Template,
    /// Template after the bias correction reslice; fixed image of the next iteration.
    ShapedTemplate,
    MeanForwardWarp,
    ScaledForwardWarp,
    CorrectedForwardWarp,
    MeanInverseWarp,
    CorrectedInverseWarp,
    MeanAffine,
    VarianceMap
}

impl RoundArtifact {
    fn name(self) -> &'static str {
        match self {
            RoundArtifact::Template => "template",
            RoundArtifact::ShapedTemplate => "shaped_template",
            RoundArtifact::MeanForwardWarp => "mean_forward_warp",
            RoundArtifact::ScaledForwardWarp => "scaled_forward_warp",
            RoundArtifact::CorrectedForwardWarp => "corrected_forward_warp",
            RoundArtifact::MeanInverseWarp => "mean_inverse_warp",
            RoundArtifact::CorrectedInverseWarp => "corrected_inverse_warp",
            RoundArtifact::MeanAffine => "mean_affine",
            RoundArtifact::VarianceMap => "variance_map"
        }
    }
}

/// Post-processing step of a final jacobian image.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum JacobianStep {
    Determinant,
    Smoothed,
    Resampled
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ArtifactKey {
    /// Bias-corrected input slice.
    Preprocessed{ slice: SliceIndex },
    /// Average of the preprocessed slices; fixed image of iteration 0.
    InitialTemplate,
    Slice{ kind: SliceArtifact, iteration: IterationNumber, slice: SliceIndex },
    Round{ kind: RoundArtifact, iteration: IterationNumber },
    Jacobian{ slice: SliceIndex, step: JacobianStep },
    MeanJacobian,
    ConvergenceReport,
    Summary
}

const SLICES_DIR: &str = "slices";
const FINAL_DIR: &str = "final";

fn iteration_dir(iteration: IterationNumber) -> String { format!("iteration_{:03}", iteration) }

pub struct Workspace {
    root: PathBuf,
    input_pattern: String,
    format: ArtifactFormat
}

impl Workspace {
    /// `input_pattern` must contain a run of '#' characters (the slice index placeholder).
    pub fn new(root: PathBuf, input_pattern: String, format: ArtifactFormat) -> Result<Workspace> {
        if !utils::has_index_placeholder(&input_pattern) {
            return Err(Error::configuration(
                format!("input pattern \"{}\" lacks a slice index placeholder (#)", input_pattern)
            ));
        }

        Ok(Workspace{ root, input_pattern, format })
    }

    pub fn root(&self) -> &Path { &self.root }

    /// Raw input slice (outside the workspace).
    pub fn input_path(&self, slice: SliceIndex) -> PathBuf {
        PathBuf::from(utils::expand_index_pattern(&self.input_pattern, slice))
    }

    pub fn resolve(&self, key: ArtifactKey) -> PathBuf {
        let img = self.format.image_ext;
        match key {
            ArtifactKey::Preprocessed{ slice } =>
                self.root.join(SLICES_DIR).join(format!("preprocessed_{:04}.{}", slice, img)),

            ArtifactKey::InitialTemplate => self.root.join(SLICES_DIR).join(format!("initial_template.{}", img)),

            ArtifactKey::Slice{ kind, iteration, slice } => {
                let ext = if kind == SliceArtifact::Affine { self.format.affine_ext } else { img };
                self.root.join(iteration_dir(iteration)).join(format!("{}_{:04}.{}", kind.name(), slice, ext))
            },

            ArtifactKey::Round{ kind, iteration } => {
                let ext = if kind == RoundArtifact::MeanAffine { self.format.affine_ext } else { img };
                self.root.join(iteration_dir(iteration)).join(format!("{}.{}", kind.name(), ext))
            },

            ArtifactKey::Jacobian{ slice, step } => {
                let suffix = match step {
                    JacobianStep::Determinant => "",
                    JacobianStep::Smoothed => "_smoothed",
                    JacobianStep::Resampled => "_resampled"
                };
                self.root.join(FINAL_DIR).join(format!("jacobian_{:04}{}.{}", slice, suffix, img))
            },

            ArtifactKey::MeanJacobian => self.root.join(FINAL_DIR).join(format!("mean_jacobian.{}", img)),

            ArtifactKey::ConvergenceReport => self.root.join("convergence.txt"),

            ArtifactKey::Summary => self.root.join(FINAL_DIR).join("summary.json")
        }
    }

    pub fn slice_artifacts(
        &self,
        kind: SliceArtifact,
        iteration: IterationNumber,
        range: &SliceIndexRange
    ) -> Vec<PathBuf> {
        range.iter().map(|slice| self.resolve(ArtifactKey::Slice{ kind, iteration, slice })).collect()
    }

    pub fn round_artifact(&self, kind: RoundArtifact, iteration: IterationNumber) -> PathBuf {
        self.resolve(ArtifactKey::Round{ kind, iteration })
    }

    /// Creates the root, slice and final directories.
    pub fn create_layout(&self) -> Result<()> {
        for dir in &[self.root.clone(), self.root.join(SLICES_DIR), self.root.join(FINAL_DIR)] {
            create_dir(dir)?;
        }

        Ok(())
    }

    pub fn create_iteration_dir(&self, iteration: IterationNumber) -> Result<()> {
        create_dir(&self.root.join(iteration_dir(iteration)))
    }
}

fn create_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| Error::workspace(dir, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> Workspace {
        Workspace::new(PathBuf::from("/ws"), "data/slice_###.nii.gz".to_string(), ArtifactFormat::ANTS).unwrap()
    }

    #[test]
    fn given_keys_resolve_to_layout_paths() {
        let ws = workspace();
        assert_eq!(
            PathBuf::from("/ws/iteration_002/forward_warp_0017.nii.gz"),
            ws.resolve(ArtifactKey::Slice{ kind: SliceArtifact::ForwardWarp, iteration: 2, slice: 17 })
        );
        assert_eq!(
            PathBuf::from("/ws/iteration_000/affine_0003.txt"),
            ws.resolve(ArtifactKey::Slice{ kind: SliceArtifact::Affine, iteration: 0, slice: 3 })
        );
        assert_eq!(
            PathBuf::from("/ws/iteration_010/mean_affine.txt"),
            ws.round_artifact(RoundArtifact::MeanAffine, 10)
        );
        assert_eq!(
            PathBuf::from("/ws/slices/preprocessed_0005.nii.gz"),
            ws.resolve(ArtifactKey::Preprocessed{ slice: 5 })
        );
        assert_eq!(
            PathBuf::from("/ws/final/jacobian_0001_smoothed.nii.gz"),
            ws.resolve(ArtifactKey::Jacobian{ slice: 1, step: JacobianStep::Smoothed })
        );
        assert_eq!(PathBuf::from("/ws/convergence.txt"), ws.resolve(ArtifactKey::ConvergenceReport));
        assert_eq!(PathBuf::from("data/slice_042.nii.gz"), ws.input_path(42));
    }

    #[test]
    fn given_distinct_keys_paths_are_distinct() {
        let ws = workspace();
        let mut paths = std::collections::HashSet::new();
        for iteration in 0..2 {
            for slice in 0..3 {
                for &kind in &[
                    SliceArtifact::ForwardWarp, SliceArtifact::InverseWarp, SliceArtifact::Affine,
                    SliceArtifact::Resliced, SliceArtifact::ComposedWarp, SliceArtifact::WarpMagnitude
                ] {
                    assert!(paths.insert(ws.resolve(ArtifactKey::Slice{ kind, iteration, slice })));
                }
            }
        }
        assert_eq!(36, paths.len());
    }

    #[test]
    fn when_pattern_lacks_placeholder_fail() {
        let result = Workspace::new(PathBuf::from("/ws"), "slice.fits".to_string(), ArtifactFormat::NATIVE);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn given_temp_root_create_layout_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path().join("ws"), "s_#.fits".to_string(), ArtifactFormat::NATIVE).unwrap();
        ws.create_layout().unwrap();
        ws.create_iteration_dir(3).unwrap();
        assert!(dir.path().join("ws/slices").is_dir());
        assert!(dir.path().join("ws/final").is_dir());
        assert!(dir.path().join("ws/iteration_003").is_dir());
    }
}
