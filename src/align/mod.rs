//
// slicetemplate - Unbiased group template construction from slice images
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! In-process pairwise registration of 2D images.
//!
//! Each registration yields a rigid affine transform `A` and a displacement field `u` such that
//! a fixed-image point `p` corresponds to the moving-image point `q + u(q)`, where `q = A(p)`.
//!

use cgmath::{InnerSpace, Matrix3, SquareMatrix, Vector2, Vector3, Zero};
use crate::image::{Border, Image};
use crate::logging::Logger;

pub mod affine;
pub mod comp;

pub use affine::{Affine2, AffineError};
pub use comp::Sampling;

/// Regularization of the deformable stage; the value is the Gaussian sigma in pixels.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Regularization {
    /// Smooths the accumulated field after each update.
    Field(f32),
    /// Smooths each update before accumulation.
    Update(f32)
}

#[derive(Clone, Debug, PartialEq)]
pub struct PairParams {
    /// If true, both images are brought to zero mean and unit variance first.
    pub standardize: bool,
    pub affine_iterations: u32,
    /// Iterations per resolution level, coarsest first; each level halves the resolution of the next one.
    pub deformable_iterations: Vec<u32>,
    pub gradient_step: f32,
    pub regularization: Regularization
}

pub struct PairResult {
    pub forward: Image,
    pub inverse: Image,
    pub affine: Affine2
}

/// Component of a transform chain.
pub enum Transform {
    /// Displacement field.
    Warp(Image),
    Affine(Affine2)
}

impl Transform {
    pub fn apply(&self, p: &Vector2<f32>) -> Vector2<f32> {
        match self {
            Transform::Warp(field) => *p + field.sample_vector(p),
            Transform::Affine(affine) => affine.apply(p)
        }
    }
}

/// Maps `p` through `chain`; the last transform is applied first.
pub fn map_through(chain: &[Transform], p: &Vector2<f32>) -> Vector2<f32> {
    chain.iter().rev().fold(*p, |q, t| t.apply(&q))
}

const MAX_AFFINE_ITERATIONS: u32 = 20;
/// Pixels; for the angle, the displacement at the image border.
const AFFINE_STOP_STEP: f32 = 0.01;
/// Radians.
const MAX_ANGLE_STEP: f32 = 0.05;
const MAX_DEMONS_STEP: f32 = 1.0;
const MIN_LEVEL_SIZE: u32 = 8;
const FIELD_INVERSION_ITERATIONS: usize = 15;

/// Registers `moving` to `fixed`; the resulting fields have the geometry of `fixed`.
///
/// The affine stage estimates a rotation and a translation.
///
/// # Parameters
///
/// * `mask` - If specified, only pixels of `fixed` with positive mask values drive the registration.
///
/// # Panics
///
/// Panics if `fixed` or `moving` is not a scalar image.
///
pub fn register_pair(
    fixed: &Image,
    moving: &Image,
    mask: Option<&Image>,
    params: &PairParams,
    logger: &Logger
) -> PairResult {
    assert!(fixed.components() == 1 && moving.components() == 1);
    let (width, height) = (fixed.width(), fixed.height());

    let initial_translation = match (fixed.centroid(), moving.centroid()) {
        (Some(c_fixed), Some(c_moving)) => c_moving - c_fixed,
        _ => Vector2::zero()
    };

    let (fixed, moving) = if params.standardize {
        (comp::standardize(fixed.clone()), comp::standardize(moving.clone()))
    } else {
        (fixed.clone(), moving.clone())
    };

    let affine = refine_rigid(
        &fixed,
        &moving,
        mask,
        initial_translation,
        params.affine_iterations.min(MAX_AFFINE_ITERATIONS)
    );
    logger.verbose(&format!(
        "rigid estimate: angle {:.2}°, offset ({:.2}, {:.2})",
        affine.matrix.x.y.atan2(affine.matrix.x.x).to_degrees(), affine.translation.x, affine.translation.y
    ));

    let moving_affine = comp::warp_image(
        &moving, width, height, |p| affine.apply(p), Sampling::Bilinear, Border::Clamp
    );
    let fixed_space_field = demons(&fixed, &moving_affine, mask, params);

    // re-express the field at affine-mapped points
    let forward = match affine.inverse() {
        Ok(inv) => comp::warp_image(
            &fixed_space_field, width, height, |q| inv.apply(q), Sampling::Bilinear, Border::Clamp
        ),
        Err(_) => fixed_space_field
    };
    let inverse = invert_field(&forward);

    PairResult{ forward, inverse, affine }
}

fn is_masked_out(mask: Option<&Image>, pos: &Vector2<f32>) -> bool {
    match mask {
        Some(mask) => mask.sample_nearest(pos, 0, Border::Zero) <= 0.0,
        None => false
    }
}

/// Gauss-Newton refinement of the rigid transform `q = R(angle) (p - c) + c + t` (`c`: image center)
/// minimizing Σ(moving(q) - fixed(p))², starting from zero angle and translation `initial`.
#[allow(non_snake_case)]
fn refine_rigid(
    fixed: &Image,
    moving: &Image,
    mask: Option<&Image>,
    initial: Vector2<f32>,
    max_iterations: u32
) -> Affine2 {
    let moving_grad = comp::gradient(moving);
    let (mw, mh) = (moving.width() as f32, moving.height() as f32);
    let center = Vector2{ x: (fixed.width() as f32 - 1.0) / 2.0, y: (fixed.height() as f32 - 1.0) / 2.0 };
    let max_radius = center.x.max(center.y);
    let mut angle = 0.0f32;
    let mut t = initial;

    for _ in 0..max_iterations {
        let affine = Affine2::rigid(angle, &center, t);
        let (sin, cos) = angle.sin_cos();
        let mut Jt_J = Matrix3::<f64>::zero();
        let mut Jt_R = Vector3::<f64>::zero();

        for y in 0..fixed.height() {
            for x in 0..fixed.width() {
                let p = Vector2{ x: x as f32, y: y as f32 };
                if is_masked_out(mask, &p) { continue; }
                let q = affine.apply(&p);
                if q.x < 0.0 || q.y < 0.0 || q.x > mw - 1.0 || q.y > mh - 1.0 { continue; }

                let residual = (moving.sample(&q, 0, Border::Clamp) - fixed.value(x, y, 0)) as f64;
                let grad = moving_grad.sample_vector(&q);
                let d = p - center;
                // derivative of `q` with respect to the angle
                let dq = Vector2{ x: -sin * d.x - cos * d.y, y: cos * d.x - sin * d.y };
                let j = Vector3{ x: grad.dot(dq) as f64, y: grad.x as f64, z: grad.y as f64 };

                Jt_J += Matrix3::from_cols(j * j.x, j * j.y, j * j.z);
                Jt_R += j * residual;
            }
        }

        if Jt_J.determinant().abs() < 1.0e-12 { break; }
        let step = match Jt_J.invert() {
            Some(inv) => inv * Jt_R,
            None => break
        };

        let angle_step = (step.x as f32).max(-MAX_ANGLE_STEP).min(MAX_ANGLE_STEP);
        let translation_step = Vector2{ x: step.y as f32, y: step.z as f32 };
        angle -= angle_step;
        t -= translation_step;

        if translation_step.magnitude() < AFFINE_STOP_STEP && angle_step.abs() * max_radius < AFFINE_STOP_STEP {
            break;
        }
    }

    Affine2::rigid(angle, &center, t)
}

/// Returns field `u` such that `moving(p + u(p))` approximates `fixed(p)`.
fn demons(fixed: &Image, moving: &Image, mask: Option<&Image>, params: &PairParams) -> Image {
    let (width, height) = (fixed.width(), fixed.height());
    let num_levels = params.deformable_iterations.len();

    let mut field: Option<Image> = None;
    for (level, &iterations) in params.deformable_iterations.iter().enumerate() {
        let mut factor = 1u32 << (num_levels - 1 - level).min(16);
        while factor > 1 && (width / factor < MIN_LEVEL_SIZE || height / factor < MIN_LEVEL_SIZE) {
            factor /= 2;
        }
        let (lw, lh) = (width / factor, height / factor);

        let mut level_field = match field.take() {
            Some(f) => upsample_field(&f, lw, lh),
            None => Image::new(lw, lh, 2)
        };
        if iterations > 0 {
            let level_fixed = if factor > 1 { fixed.scale(lw, lh) } else { fixed.clone() };
            let level_moving = if factor > 1 { moving.scale(lw, lh) } else { moving.clone() };
            demons_level(&level_fixed, &level_moving, mask, factor as f32, &mut level_field, iterations, params);
        }
        field = Some(level_field);
    }

    match field {
        Some(f) if f.width() == width && f.height() == height => f,
        Some(f) => upsample_field(&f, width, height),
        None => Image::new(width, height, 2)
    }
}

fn demons_level(
    fixed: &Image,
    moving: &Image,
    mask: Option<&Image>,
    factor: f32,
    field: &mut Image,
    iterations: u32,
    params: &PairParams
) {
    let (w, h) = (fixed.width(), fixed.height());
    let fixed_grad = comp::gradient(fixed);

    for _ in 0..iterations {
        let warped = comp::warp_image(
            moving, w, h, |p| *p + field.sample_vector(p), Sampling::Bilinear, Border::Clamp
        );

        let mut update = Image::new(w, h, 2);
        for y in 0..h {
            let line = update.line_mut(y);
            for x in 0..w {
                if is_masked_out(mask, &Vector2{ x: x as f32 * factor, y: y as f32 * factor }) { continue; }

                let diff = fixed.value(x, y, 0) - warped.value(x, y, 0);
                let grad = fixed_grad.vector(x, y);
                let denominator = grad.magnitude2() + diff * diff;
                if denominator < 1.0e-9 { continue; }

                let mut step = grad * (params.gradient_step * diff / denominator);
                let len = step.magnitude();
                if len > MAX_DEMONS_STEP { step *= MAX_DEMONS_STEP / len; }

                line[2 * x as usize] = step.x;
                line[2 * x as usize + 1] = step.y;
            }
        }

        if let Regularization::Update(sigma) = params.regularization {
            comp::filter::gaussian_blur_in_place(&mut update, sigma);
        }
        for (v, u) in field.pixels_mut().iter_mut().zip(update.pixels().iter()) {
            *v += u;
        }
        if let Regularization::Field(sigma) = params.regularization {
            comp::filter::gaussian_blur_in_place(field, sigma);
        }
    }
}

/// Resizes displacement field and scales its vectors accordingly.
fn upsample_field(field: &Image, width: u32, height: u32) -> Image {
    let sx = width as f32 / field.width() as f32;
    let sy = height as f32 / field.height() as f32;
    let mut result = field.scale(width, height);
    for v in result.pixels_mut().chunks_exact_mut(2) {
        v[0] *= sx;
        v[1] *= sy;
    }

    result
}

/// Returns field `v` satisfying `v(p) = -u(p + v(p))`, found by fixed-point iteration.
///
/// # Panics
///
/// Panics if `field` does not have 2 components.
///
#[must_use]
pub fn invert_field(field: &Image) -> Image {
    assert!(field.components() == 2);

    let (w, h) = (field.width(), field.height());
    let mut inverse = Image::new(w, h, 2);
    for _ in 0..FIELD_INVERSION_ITERATIONS {
        let mut next = Image::new(w, h, 2);
        for y in 0..h {
            let line = next.line_mut(y);
            for x in 0..w {
                let p = Vector2{ x: x as f32, y: y as f32 };
                let v = -field.sample_vector(&(p + inverse.vector(x, y)));
                line[2 * x as usize] = v.x;
                line[2 * x as usize + 1] = v.y;
            }
        }
        inverse = next;
    }

    inverse
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn disk(size: u32, center: Vector2<f32>, radius: f32) -> Image {
        let mut image = Image::new(size, size, 1);
        for y in 0..size {
            let line = image.line_mut(y);
            for x in 0..size {
                let dist = (Vector2{ x: x as f32, y: y as f32 } - center).magnitude();
                // soft edge
                line[x as usize] = (radius + 0.5 - dist).max(0.0).min(1.0);
            }
        }
        image
    }

    /// Disk with a notch on the +x side, rotated by `angle` about its center.
    fn notched_disk(size: u32, center: Vector2<f32>, radius: f32, angle: f32) -> Image {
        let mut image = Image::new(size, size, 1);
        let (sin, cos) = angle.sin_cos();
        for y in 0..size {
            let line = image.line_mut(y);
            for x in 0..size {
                let d = Vector2{ x: x as f32, y: y as f32 } - center;
                let r = Vector2{ x: cos * d.x + sin * d.y, y: -sin * d.x + cos * d.y };
                let dist = r.magnitude();
                line[x as usize] = (radius + 0.5 - dist).max(0.0).min(1.0);
                if r.x > radius * 0.5 && r.y.abs() < 2.0 { line[x as usize] *= 0.5; }
            }
        }
        image
    }

    fn params() -> PairParams {
        PairParams{
            standardize: true,
            affine_iterations: 100,
            deformable_iterations: vec![10, 10],
            gradient_step: 0.25,
            regularization: Regularization::Field(1.0)
        }
    }

    #[test]
    fn given_shifted_disk_recover_translation() {
        let fixed = disk(40, Vector2{ x: 20.0, y: 20.0 }, 8.0);
        let moving = disk(40, Vector2{ x: 22.5, y: 18.0 }, 8.0);
        let result = register_pair(&fixed, &moving, None, &params(), &Logger::new(crate::logging::Level::Quiet));

        // rotation of a plain disk is undetermined; its center must still be matched
        let center = result.affine.apply(&Vector2{ x: 20.0, y: 20.0 });
        assert_relative_eq!(22.5, center.x, epsilon = 0.2);
        assert_relative_eq!(18.0, center.y, epsilon = 0.2);
        assert_eq!((40, 40, 2), (result.forward.width(), result.forward.height(), result.forward.components()));
    }

    #[test]
    fn given_rotated_notched_disk_recover_rotation_direction() {
        let fixed = notched_disk(48, Vector2{ x: 24.0, y: 24.0 }, 10.0, 0.0);
        let moving = notched_disk(48, Vector2{ x: 25.0, y: 23.0 }, 10.0, 4.0f32.to_radians());
        let result = register_pair(&fixed, &moving, None, &params(), &Logger::new(crate::logging::Level::Quiet));

        let angle = result.affine.matrix.x.y.atan2(result.affine.matrix.x.x).to_degrees();
        assert!(angle > 1.0 && angle < 6.0, "angle: {}", angle);
        let center = result.affine.apply(&Vector2{ x: 24.0, y: 24.0 });
        assert_relative_eq!(25.0, center.x, epsilon = 0.2);
        assert_relative_eq!(23.0, center.y, epsilon = 0.2);
    }

    #[test]
    fn given_constant_field_inverse_is_negated() {
        let field = Image::new_from_pixels(4, 4, 2, [1.5f32, -0.5].iter().cloned().cycle().take(32).collect());
        let inverse = invert_field(&field);
        for v in inverse.pixels().chunks_exact(2) {
            assert_relative_eq!(-1.5, v[0], epsilon = 1.0e-4);
            assert_relative_eq!(0.5, v[1], epsilon = 1.0e-4);
        }
    }

    #[test]
    fn given_chain_apply_last_transform_first() {
        let field = Image::new_from_pixels(8, 8, 2, [1.0f32, 0.0].iter().cloned().cycle().take(128).collect());
        let scaling = Affine2{ matrix: cgmath::Matrix2::new(2.0, 0.0, 0.0, 2.0), translation: Vector2::zero() };
        let chain = [Transform::Warp(field), Transform::Affine(scaling)];

        // (1, 1) -> affine (2, 2) -> warp (3, 2)
        let q = map_through(&chain, &Vector2{ x: 1.0, y: 1.0 });
        assert_relative_eq!(3.0, q.x);
        assert_relative_eq!(2.0, q.y);
    }

    #[test]
    fn given_masked_out_fixed_image_field_stays_zero() {
        let fixed = disk(32, Vector2{ x: 16.0, y: 16.0 }, 6.0);
        let moving = disk(32, Vector2{ x: 16.0, y: 16.0 }, 7.0);
        let mask = Image::new(32, 32, 1);
        let result = register_pair(&fixed, &moving, Some(&mask), &params(), &Logger::new(crate::logging::Level::Quiet));
        assert!(result.forward.pixels().iter().all(|&v| v == 0.0));
    }
}
