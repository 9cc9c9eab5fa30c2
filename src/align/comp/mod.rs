//
// slicetemplate - Unbiased group template construction from slice images
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Computations module.
//!

use cgmath::{InnerSpace, Vector2};
use crate::image::{Border, Image};
use rayon::prelude::*;

pub mod filter;

/// Sampling method used when warping images.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Sampling {
    Bilinear,
    Nearest
}

/// Returns a `width`x`height` image whose pixel at `p` is the value of `src` at `mapping(p)`; multithreaded.
#[must_use]
pub fn warp_image<F>(
    src: &Image,
    width: u32,
    height: u32,
    mapping: F,
    sampling: Sampling,
    border: Border
) -> Image
where F: Fn(&Vector2<f32>) -> Vector2<f32> + Sync {
    let components = src.components();
    let mut output = Image::new(width, height, components);
    let values_per_line = output.values_per_line();

    output.pixels_mut().par_chunks_mut(values_per_line).enumerate().for_each(|(y, line)| {
        for x in 0..width as usize {
            let src_pos = mapping(&Vector2{ x: x as f32, y: y as f32 });
            for c in 0..components {
                line[x * components + c] = match sampling {
                    Sampling::Bilinear => src.sample(&src_pos, c, border),
                    Sampling::Nearest => src.sample_nearest(&src_pos, c, border)
                };
            }
        }
    });

    output
}

/// Returns the intensity gradient (2 components) of a scalar image; uses central differences.
///
/// # Panics
///
/// Panics if `image` is not a scalar image.
///
#[must_use]
pub fn gradient(image: &Image) -> Image {
    assert!(image.components() == 1);

    let (w, h) = (image.width(), image.height());
    let mut result = Image::new(w, h, 2);
    for y in 0..h {
        let y_lo = y.saturating_sub(1);
        let y_hi = (y + 1).min(h - 1);
        let line = result.line_mut(y);
        for x in 0..w {
            let x_lo = x.saturating_sub(1);
            let x_hi = (x + 1).min(w - 1);
            let dx = if x_hi > x_lo {
                (image.value(x_hi, y, 0) - image.value(x_lo, y, 0)) / (x_hi - x_lo) as f32
            } else { 0.0 };
            let dy = if y_hi > y_lo {
                (image.value(x, y_hi, 0) - image.value(x, y_lo, 0)) / (y_hi - y_lo) as f32
            } else { 0.0 };
            line[2 * x as usize] = dx;
            line[2 * x as usize + 1] = dy;
        }
    }

    result
}

/// Returns det(I + ∇u) of displacement field `u`.
///
/// # Panics
///
/// Panics if `field` does not have 2 components.
///
#[must_use]
pub fn jacobian_determinant(field: &Image) -> Image {
    assert!(field.components() == 2);

    let (w, h) = (field.width(), field.height());
    let mut result = Image::new(w, h, 1);
    for y in 0..h {
        let y_lo = y.saturating_sub(1);
        let y_hi = (y + 1).min(h - 1);
        let dy = (y_hi - y_lo).max(1) as f32;
        let line = result.line_mut(y);
        for x in 0..w {
            let x_lo = x.saturating_sub(1);
            let x_hi = (x + 1).min(w - 1);
            let dx = (x_hi - x_lo).max(1) as f32;

            let du_dx = (field.vector(x_hi, y) - field.vector(x_lo, y)) / dx;
            let du_dy = (field.vector(x, y_hi) - field.vector(x, y_lo)) / dy;

            line[x as usize] = (1.0 + du_dx.x) * (1.0 + du_dy.y) - du_dy.x * du_dx.y;
        }
    }

    result
}

/// Returns per-pixel lengths of the vectors of `field`.
///
/// # Panics
///
/// Panics if `field` does not have 2 components.
///
#[must_use]
pub fn vector_magnitude(field: &Image) -> Image {
    assert!(field.components() == 2);

    let pixels = field.pixels().chunks_exact(2).map(|v| Vector2{ x: v[0], y: v[1] }.magnitude()).collect();
    Image::new_from_pixels(field.width(), field.height(), 1, pixels)
}

/// Returns mean of squared differences of corresponding values.
///
/// # Panics
///
/// Panics if the images differ in size or number of components.
///
pub fn mean_square_difference(image1: &Image, image2: &Image) -> f64 {
    assert!(image1.same_geometry(image2) && image1.components() == image2.components());
    if image1.pixels().is_empty() { return 0.0; }

    image1.pixels().iter().zip(image2.pixels().iter())
        .map(|(&a, &b)| (a as f64 - b as f64).powi(2))
        .sum::<f64>() / image1.pixels().len() as f64
}

/// Returns `image` shifted and scaled to zero mean and unit standard deviation.
#[must_use]
pub fn standardize(mut image: Image) -> Image {
    let mean = image.mean();
    let variance = image.pixels().iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>()
        / image.pixels().len().max(1) as f64;
    let std_dev = variance.sqrt();
    let inv_std_dev = if std_dev > 1.0e-12 { 1.0 / std_dev } else { 1.0 };

    for v in image.pixels_mut() {
        *v = ((*v as f64 - mean) * inv_std_dev) as f32;
    }

    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(w: u32, h: u32) -> Image {
        let pixels = (0..h).flat_map(|y| (0..w).map(move |x| (2 * x + 3 * y) as f32)).collect();
        Image::new_from_pixels(w, h, 1, pixels)
    }

    #[test]
    fn given_ramp_gradient_is_constant() {
        let grad = gradient(&ramp(5, 4));
        for y in 0..4 {
            for x in 0..5 {
                assert_relative_eq!(2.0, grad.value(x, y, 0));
                assert_relative_eq!(3.0, grad.value(x, y, 1));
            }
        }
    }

    #[test]
    fn given_translation_mapping_warp_shifts_image() {
        let src = ramp(6, 6);
        let shifted = warp_image(&src, 6, 6, |p| *p + Vector2{ x: 1.0, y: 0.0 }, Sampling::Bilinear, Border::Zero);
        assert_relative_eq!(src.value(3, 2, 0), shifted.value(2, 2, 0));
        assert_relative_eq!(0.0, shifted.value(5, 2, 0));
    }

    #[test]
    fn given_zero_field_jacobian_is_one() {
        let jac = jacobian_determinant(&Image::new(4, 4, 2));
        assert!(jac.pixels().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn given_uniform_expansion_jacobian_is_squared_factor() {
        // u(p) = 0.5 * p
        let mut field = Image::new(4, 4, 2);
        for y in 0..4 {
            let line = field.line_mut(y);
            for x in 0..4 {
                line[2 * x] = 0.5 * x as f32;
                line[2 * x + 1] = 0.5 * y as f32;
            }
        }
        assert_relative_eq!(2.25, jacobian_determinant(&field).value(2, 2, 0));
    }

    #[test]
    fn given_vectors_magnitude_is_length() {
        let field = Image::new_from_pixels(2, 1, 2, vec![3.0, 4.0, 0.0, -2.0]);
        assert_eq!(&[5.0, 2.0], vector_magnitude(&field).pixels());
    }

    #[test]
    fn given_standardized_image_mean_is_zero() {
        let image = standardize(ramp(4, 4));
        assert_relative_eq!(0.0, image.mean(), epsilon = 1.0e-6);
        assert_relative_eq!(0.0, mean_square_difference(&image, &image));
    }
}
