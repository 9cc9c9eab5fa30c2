//
// slicetemplate - Unbiased group template construction from slice images
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! In-process implementation of both collaborators (2D FITS images, JSON affine transforms).
//!

use crate::align::{self, comp, comp::filter, Affine2, PairParams, Regularization, Sampling, Transform};
use crate::error::{require_file, Error, Result};
use crate::image::{self, Border, Image};
use crate::logging::Logger;
use crate::template::settings::{Metric, RegistrationSettings, RegularizationType};
use std::path::{Path, PathBuf};
use super::*;

const TOOL: &str = "native";

pub struct NativeTools<'a> {
    logger: &'a Logger
}

impl<'a> NativeTools<'a> {
    pub fn new(logger: &'a Logger) -> NativeTools<'a> { NativeTools{ logger } }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| Error::configuration(format!("path is not valid UTF-8: {}", path.display())))
}

fn load_image(path: &Path) -> Result<Image> {
    require_file(path)?;
    Image::load(path_str(path)?).map_err(|e| Error::tool(TOOL, format!("cannot load {}: {}", path.display(), e)))
}

fn load_scalar(path: &Path) -> Result<Image> {
    let image = load_image(path)?;
    if image.components() != 1 {
        return Err(Error::tool(TOOL, format!("{} is not a scalar image", path.display())));
    }
    Ok(image)
}

fn load_field(path: &Path) -> Result<Image> {
    let image = load_image(path)?;
    if image.components() != 2 {
        return Err(Error::tool(TOOL, format!("{} is not a 2D displacement field", path.display())));
    }
    Ok(image)
}

fn save_image(image: &Image, path: &Path) -> Result<()> {
    image.save(path_str(path)?).map_err(|e| Error::tool(TOOL, format!("cannot save {}: {}", path.display(), e)))
}

fn load_affine(path: &Path) -> Result<Affine2> {
    require_file(path)?;
    Affine2::load(path_str(path)?).map_err(|e| Error::tool(TOOL, format!("cannot load {}: {}", path.display(), e)))
}

fn save_affine(affine: &Affine2, path: &Path) -> Result<()> {
    affine.save(path_str(path)?).map_err(|e| Error::tool(TOOL, format!("cannot save {}: {}", path.display(), e)))
}

/// Returns width and height of the image at `path`.
fn geometry_of(path: &Path) -> Result<(u32, u32)> {
    require_file(path)?;
    let (width, height, _) = Image::image_metadata(path_str(path)?)
        .map_err(|e| Error::tool(TOOL, format!("cannot read {}: {}", path.display(), e)))?;
    Ok((width, height))
}

fn mismatch(a: &Path, b: &Path) -> Error {
    Error::tool(TOOL, format!("images {} and {} differ in size", a.display(), b.display()))
}

/// Maps run settings to the parameters of the in-process registration.
///
/// The metric parameter has no counterpart here; every metric except MSQ standardizes the intensities.
///
pub fn pair_params(settings: &RegistrationSettings) -> PairParams {
    let amount = settings.regularization_amount as f32;
    PairParams{
        standardize: settings.metric != Metric::MSQ,
        affine_iterations: settings.affine_iterations.total(),
        deformable_iterations: settings.deformable_iterations.levels().to_vec(),
        gradient_step: settings.gradient_step as f32,
        regularization: match settings.regularization {
            RegularizationType::Gauss => Regularization::Field(amount),
            RegularizationType::DMFFD => Regularization::Update(amount)
        }
    }
}

fn load_chain(chain: &TransformChain) -> Result<Vec<Transform>> {
    chain.transforms().iter().map(|t| match t.kind {
        TransformKind::Warp => load_field(&t.path).map(Transform::Warp),
        TransformKind::Affine => {
            let affine = load_affine(&t.path)?;
            if t.inverse {
                affine.inverse()
                    .map(Transform::Affine)
                    .map_err(|e| Error::tool(TOOL, format!("{}: {}", t.path.display(), e)))
            } else {
                Ok(Transform::Affine(affine))
            }
        }
    }).collect()
}

fn sampling(interpolation: Interpolation) -> Sampling {
    match interpolation {
        Interpolation::NearestNeighbor => Sampling::Nearest,
        Interpolation::Linear | Interpolation::BSpline => Sampling::Bilinear
    }
}

impl<'a> Registration for NativeTools<'a> {
    fn register(&self, request: &RegistrationRequest) -> Result<()> {
        let fixed = load_scalar(&request.fixed)?;
        let moving = load_scalar(&request.moving)?;
        let mask = match &request.settings.mask {
            Some(path) => {
                let mask = load_scalar(path)?;
                if !mask.same_geometry(&fixed) { return Err(mismatch(path, &request.fixed)); }
                Some(mask)
            },
            None => None
        };

        self.logger.verbose(&format!("registering {} to {}", request.moving.display(), request.fixed.display()));
        let result = align::register_pair(
            &fixed, &moving, mask.as_ref(), &pair_params(&request.settings), self.logger
        );

        save_image(&result.forward, &request.outputs.forward_warp)?;
        save_image(&result.inverse, &request.outputs.inverse_warp)?;
        save_affine(&result.affine, &request.outputs.affine)
    }

    fn reslice(&self, request: &ResliceRequest) -> Result<()> {
        let input = match request.image_type {
            ImageType::Scalar => load_scalar(&request.input)?,
            ImageType::Vector => load_field(&request.input)?
        };
        let (width, height) = geometry_of(&request.reference)?;
        let chain = load_chain(&request.chain)?;
        let border = match request.image_type {
            ImageType::Scalar => Border::Zero,
            ImageType::Vector => Border::Clamp
        };

        let output = comp::warp_image(
            &input,
            width,
            height,
            |p| align::map_through(&chain, p),
            sampling(request.interpolation),
            border
        );

        save_image(&output, &request.output)
    }

    fn compose(&self, request: &ComposeRequest) -> Result<()> {
        let (width, height) = geometry_of(&request.reference)?;
        let chain = load_chain(&request.chain)?;

        let mut field = Image::new(width, height, 2);
        for y in 0..height {
            let line = field.line_mut(y);
            for x in 0..width {
                let p = cgmath::Vector2{ x: x as f32, y: y as f32 };
                let u = align::map_through(&chain, &p) - p;
                line[2 * x as usize] = u.x;
                line[2 * x as usize + 1] = u.y;
            }
        }

        save_image(&field, &request.output)
    }
}

impl<'a> ImageAlgebra for NativeTools<'a> {
    fn average(&self, request: &AverageRequest) -> Result<()> {
        if request.inputs.is_empty() {
            return Err(Error::tool(TOOL, "no images to average"));
        }
        let weights = match &request.weights {
            Some(weights) => {
                if weights.len() != request.inputs.len() {
                    return Err(Error::tool(TOOL, format!(
                        "{} weights given for {} images", weights.len(), request.inputs.len()
                    )));
                }
                weights.clone()
            },
            None => vec![1.0; request.inputs.len()]
        };
        let weight_sum: f64 = weights.iter().sum();
        if !(weight_sum > 0.0) {
            return Err(Error::tool(TOOL, "sum of weights must be positive"));
        }

        let first = load_image(&request.inputs[0])?;
        let geometry = (first.width(), first.height(), first.components());
        let mut sum = vec![0.0f64; first.pixels().len()];
        let mut sum_of_means = 0.0;
        let mut accumulate = |image: &Image, weight: f64| {
            let mean = image.mean();
            let factor = if request.normalize && mean.abs() > 1.0e-12 { 1.0 / mean } else { 1.0 };
            sum_of_means += weight * mean;
            for (s, &v) in sum.iter_mut().zip(image.pixels().iter()) {
                *s += weight * factor * v as f64;
            }
        };

        accumulate(&first, weights[0]);
        for (path, &weight) in request.inputs.iter().zip(weights.iter()).skip(1) {
            let image = load_image(path)?;
            if (image.width(), image.height(), image.components()) != geometry {
                return Err(mismatch(path, &request.inputs[0]));
            }
            accumulate(&image, weight);
        }

        // normalized inputs are brought back to the mean intensity of the group
        let scale = (if request.normalize { sum_of_means / weight_sum } else { 1.0 }) / weight_sum;
        let pixels = sum.iter().map(|&s| (s * scale) as f32).collect();

        let (width, height, components) = geometry;
        save_image(&Image::new_from_pixels(width, height, components, pixels), &request.output)
    }

    fn scale(&self, input: &Path, factor: f64, output: &Path) -> Result<()> {
        let mut image = load_image(input)?;
        for v in image.pixels_mut() {
            *v = (*v as f64 * factor) as f32;
        }

        save_image(&image, output)
    }

    fn vector_magnitude(&self, input: &Path, output: &Path) -> Result<()> {
        save_image(&comp::vector_magnitude(&load_field(input)?), output)
    }

    fn rms_aggregate(&self, inputs: &[PathBuf], denominator: f64, output: &Path) -> Result<()> {
        if inputs.is_empty() {
            return Err(Error::tool(TOOL, "no images to aggregate"));
        }
        if !(denominator > 0.0) {
            return Err(Error::tool(TOOL, format!("invalid denominator: {}", denominator)));
        }

        let first = load_scalar(&inputs[0])?;
        let (width, height) = (first.width(), first.height());
        let mut sum_sq: Vec<f64> = first.pixels().iter().map(|&v| (v as f64).powi(2)).collect();
        for path in &inputs[1..] {
            let image = load_scalar(path)?;
            if (image.width(), image.height()) != (width, height) { return Err(mismatch(path, &inputs[0])); }
            for (s, &v) in sum_sq.iter_mut().zip(image.pixels().iter()) {
                *s += (v as f64).powi(2);
            }
        }

        let pixels = sum_sq.iter().map(|&s| (s / denominator).sqrt() as f32).collect();
        save_image(&Image::new_from_pixels(width, height, 1, pixels), output)
    }

    fn average_affine(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let transforms = inputs.iter().map(|path| load_affine(path)).collect::<Result<Vec<_>>>()?;
        let mean = Affine2::average(&transforms).map_err(|e| Error::tool(TOOL, e.to_string()))?;

        save_affine(&mean, output)
    }

    /// Replaces NaNs, clips negative values and scales the foreground to unit mean.
    fn bias_correct(&self, input: &Path, output: &Path) -> Result<()> {
        let mut image = image::replace_nans(load_scalar(input)?);
        let mut fg_sum = 0.0f64;
        let mut fg_count = 0usize;
        for v in image.pixels_mut() {
            if *v < 0.0 { *v = 0.0; }
            if *v > 0.0 {
                fg_sum += *v as f64;
                fg_count += 1;
            }
        }

        if fg_count > 0 {
            let inv_mean = fg_count as f64 / fg_sum;
            for v in image.pixels_mut() {
                *v = (*v as f64 * inv_mean) as f32;
            }
        } else {
            self.logger.verbose(&format!("{} has no foreground", input.display()));
        }

        save_image(&image, output)
    }

    fn jacobian(&self, warp: &Path, output: &Path) -> Result<()> {
        save_image(&comp::jacobian_determinant(&load_field(warp)?), output)
    }

    fn smooth(&self, input: &Path, sigma: f64, output: &Path) -> Result<()> {
        if !(sigma >= 0.0) {
            return Err(Error::tool(TOOL, format!("invalid smoothing sigma: {}", sigma)));
        }
        save_image(&filter::gaussian_blur(&load_image(input)?, sigma as f32), output)
    }

    fn resample(&self, input: &Path, spacing: f64, output: &Path) -> Result<()> {
        if !(spacing > 0.0) {
            return Err(Error::tool(TOOL, format!("invalid pixel spacing: {}", spacing)));
        }
        let image = load_image(input)?;
        let new_size = |size: u32| ((size as f64 / spacing).round() as u32).max(1);

        save_image(&image.scale(new_size(image.width()), new_size(image.height())), output)
    }

    fn mean_square_difference(&self, image1: &Path, image2: &Path) -> Result<f64> {
        let a = load_image(image1)?;
        let b = load_image(image2)?;
        if !a.same_geometry(&b) || a.components() != b.components() {
            return Err(mismatch(image1, image2));
        }

        Ok(comp::mean_square_difference(&a, &b))
    }
}
