//
// slicetemplate - Unbiased group template construction from slice images
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Registration and image algebra collaborators.
//!
//! The template loop talks to them only through the `Registration` and `ImageAlgebra` traits and typed,
//! file-addressed requests. Implementations must be stateless between calls; every call writes its
//! declared outputs or fails.
//!

pub mod ants;
pub mod dry_run;
pub mod native;
#[cfg(test)]
pub mod testing;

use crate::error::Result;
use crate::template::settings::RegistrationSettings;
use std::path::{Path, PathBuf};
use strum::IntoEnumIterator;

#[derive(Copy, Clone, Debug, Eq, PartialEq, strum_macros::EnumIter)]
pub enum Interpolation {
    Linear,
    NearestNeighbor,
    BSpline
}

impl From<Interpolation> for &str {
    fn from(interpolation: Interpolation) -> &'static str {
        match interpolation {
            Interpolation::Linear => "Linear",
            Interpolation::NearestNeighbor => "NearestNeighbor",
            Interpolation::BSpline => "BSpline"
        }
    }
}

impl std::str::FromStr for Interpolation {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Interpolation, ()> {
        Interpolation::iter().find(|i| s == Into::<&str>::into(*i)).ok_or(())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransformKind {
    /// Displacement field image.
    Warp,
    Affine
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransformRef {
    pub path: PathBuf,
    pub kind: TransformKind,
    /// Use the inverse of the transform (affine only).
    pub inverse: bool
}

impl TransformRef {
    pub fn warp(path: PathBuf) -> TransformRef {
        TransformRef{ path, kind: TransformKind::Warp, inverse: false }
    }

    pub fn affine(path: PathBuf) -> TransformRef {
        TransformRef{ path, kind: TransformKind::Affine, inverse: false }
    }

    pub fn inverse_affine(path: PathBuf) -> TransformRef {
        TransformRef{ path, kind: TransformKind::Affine, inverse: true }
    }
}

/// Transforms in command-line order: a reference point is mapped by the last one first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransformChain(pub Vec<TransformRef>);

impl TransformChain {
    pub fn new(transforms: Vec<TransformRef>) -> TransformChain { TransformChain(transforms) }

    pub fn transforms(&self) -> &[TransformRef] { &self.0 }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RegistrationOutputs {
    pub forward_warp: PathBuf,
    pub inverse_warp: PathBuf,
    pub affine: PathBuf
}

impl RegistrationOutputs {
    pub fn paths(&self) -> [&Path; 3] { [self.forward_warp.as_path(), self.inverse_warp.as_path(), self.affine.as_path()] }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RegistrationRequest {
    pub fixed: PathBuf,
    pub moving: PathBuf,
    pub settings: RegistrationSettings,
    pub outputs: RegistrationOutputs
}

/// Kind of values stored in an image.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ImageType {
    Scalar,
    /// Displacement field.
    Vector
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResliceRequest {
    pub input: PathBuf,
    pub image_type: ImageType,
    /// Defines the output geometry.
    pub reference: PathBuf,
    pub chain: TransformChain,
    pub interpolation: Interpolation,
    pub output: PathBuf
}

/// Merges `chain` into a single displacement field in the geometry of `reference`.
#[derive(Clone, Debug, PartialEq)]
pub struct ComposeRequest {
    pub chain: TransformChain,
    pub reference: PathBuf,
    pub output: PathBuf
}

#[derive(Clone, Debug, PartialEq)]
pub struct AverageRequest {
    pub inputs: Vec<PathBuf>,
    /// If specified, must have the same length as `inputs`.
    pub weights: Option<Vec<f64>>,
    /// Normalize intensities of inputs before averaging.
    pub normalize: bool,
    pub output: PathBuf
}

pub trait Registration: Sync {
    /// Registers `moving` to `fixed`, writing forward warp, inverse warp and affine transform.
    fn register(&self, request: &RegistrationRequest) -> Result<()>;

    fn reslice(&self, request: &ResliceRequest) -> Result<()>;

    fn compose(&self, request: &ComposeRequest) -> Result<()>;
}

pub trait ImageAlgebra: Sync {
    fn average(&self, request: &AverageRequest) -> Result<()>;

    /// Multiplies every value by `factor`.
    fn scale(&self, input: &Path, factor: f64, output: &Path) -> Result<()>;

    /// Pixelwise length of the vectors of a displacement field.
    fn vector_magnitude(&self, input: &Path, output: &Path) -> Result<()>;

    /// Pixelwise sqrt(Σ x² / denominator) over `inputs`.
    fn rms_aggregate(&self, inputs: &[PathBuf], denominator: f64, output: &Path) -> Result<()>;

    fn average_affine(&self, inputs: &[PathBuf], output: &Path) -> Result<()>;

    /// Removes the intensity bias field of a raw slice.
    fn bias_correct(&self, input: &Path, output: &Path) -> Result<()>;

    /// Determinant of the jacobian of a displacement field.
    fn jacobian(&self, warp: &Path, output: &Path) -> Result<()>;

    fn smooth(&self, input: &Path, sigma: f64, output: &Path) -> Result<()>;

    /// Resamples to the given pixel spacing (in input pixels).
    fn resample(&self, input: &Path, spacing: f64, output: &Path) -> Result<()>;

    fn mean_square_difference(&self, image1: &Path, image2: &Path) -> Result<f64>;
}

/// Collaborators used by one run.
#[derive(Copy, Clone)]
pub struct Toolset<'a> {
    pub registration: &'a dyn Registration,
    pub algebra: &'a dyn ImageAlgebra
}

/// File extensions of the artifacts produced by a backend.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ArtifactFormat {
    pub image_ext: &'static str,
    pub affine_ext: &'static str
}

impl ArtifactFormat {
    pub const ANTS: ArtifactFormat = ArtifactFormat{ image_ext: "nii.gz", affine_ext: "txt" };

    pub const NATIVE: ArtifactFormat = ArtifactFormat{ image_ext: "fits", affine_ext: "json" };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_interpolation_names_parse_all_methods() {
        for interpolation in Interpolation::iter() {
            assert_eq!(Ok(interpolation), Into::<&str>::into(interpolation).parse::<Interpolation>());
        }
        assert!("Cubic".parse::<Interpolation>().is_err());
    }
}
