//
// slicetemplate - Unbiased group template construction from slice images
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Image data structure, I/O and basic operations.
//!
//! An `Image` holds 32-bit float values; a pixel has 1 component (scalar image) or 2 components
//! (displacement field: x, y). Components of a pixel are stored next to each other.
//!

mod fits;

use cgmath::Vector2;
use std::path::Path;
use thiserror::Error;

pub use fits::FitsError;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FileType {
    Fits
}

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("unrecognized file type of {0}")]
    UnrecognizedFileType(String),
    #[error(transparent)]
    Fits(#[from] FitsError)
}

fn file_type_from_ext(file_name: &str) -> Result<FileType, ImageError> {
    match Path::new(file_name).extension().and_then(|ext| ext.to_str()).map(|ext| ext.to_lowercase()) {
        Some(ext) if ext == "fit" || ext == "fits" => Ok(FileType::Fits),
        _ => Err(ImageError::UnrecognizedFileType(file_name.to_string()))
    }
}

/// Treatment of sampling positions outside the image.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Border {
    /// Values outside are 0.
    Zero,
    /// Values outside are those of the nearest edge pixel.
    Clamp
}

#[derive(Clone, PartialEq)]
pub struct Image {
    width: u32,
    height: u32,
    components: usize,
    pixels: Vec<f32>
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Image {}x{}, components = {}, pixels = {:?}...",
            self.width,
            self.height,
            self.components,
            &self.pixels[..self.pixels.len().min(8)]
        )
    }
}

impl Image {
    /// Creates a new zero-filled image.
    pub fn new(width: u32, height: u32, components: usize) -> Image {
        assert!(components > 0);
        Image{ width, height, components, pixels: vec![0.0; width as usize * height as usize * components] }
    }

    pub fn new_from_pixels(width: u32, height: u32, components: usize, pixels: Vec<f32>) -> Image {
        assert!(components > 0);
        assert!(pixels.len() == width as usize * height as usize * components);
        Image{ width, height, components, pixels }
    }

    pub fn load(file_name: &str) -> Result<Image, ImageError> {
        match file_type_from_ext(file_name)? {
            FileType::Fits => Ok(fits::load_fits(file_name)?)
        }
    }

    /// Overwrites existing file.
    pub fn save(&self, file_name: &str) -> Result<(), ImageError> {
        match file_type_from_ext(file_name)? {
            FileType::Fits => Ok(fits::save_fits(self, file_name)?)
        }
    }

    /// Returns width, height, components.
    pub fn image_metadata(file_name: &str) -> Result<(u32, u32, usize), ImageError> {
        match file_type_from_ext(file_name)? {
            FileType::Fits => Ok(fits::fits_metadata(file_name)?)
        }
    }

    pub fn width(&self) -> u32 { self.width }

    pub fn height(&self) -> u32 { self.height }

    pub fn components(&self) -> usize { self.components }

    pub fn values_per_line(&self) -> usize { self.width as usize * self.components }

    pub fn pixels(&self) -> &[f32] { &self.pixels }

    pub fn pixels_mut(&mut self) -> &mut [f32] { &mut self.pixels }

    pub fn line(&self, y: u32) -> &[f32] {
        let vpl = self.values_per_line();
        &self.pixels[y as usize * vpl..(y as usize + 1) * vpl]
    }

    pub fn line_mut(&mut self, y: u32) -> &mut [f32] {
        let vpl = self.values_per_line();
        &mut self.pixels[y as usize * vpl..(y as usize + 1) * vpl]
    }

    pub fn value(&self, x: u32, y: u32, component: usize) -> f32 {
        self.pixels[(x as usize + y as usize * self.width as usize) * self.components + component]
    }

    pub fn vector(&self, x: u32, y: u32) -> Vector2<f32> {
        assert!(self.components == 2);
        Vector2{ x: self.value(x, y, 0), y: self.value(x, y, 1) }
    }

    pub fn same_geometry(&self, other: &Image) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Returns the value of `component` at `pos`, using bilinear interpolation.
    pub fn sample(&self, pos: &Vector2<f32>, component: usize, border: Border) -> f32 {
        let x_lo = pos.x.floor();
        let y_lo = pos.y.floor();
        let tx = pos.x - x_lo;
        let ty = pos.y - y_lo;
        let (x_lo, y_lo) = (x_lo as i64, y_lo as i64);

        let v_00 = self.value_at(x_lo,     y_lo,     component, border);
        let v_10 = self.value_at(x_lo + 1, y_lo,     component, border);
        let v_11 = self.value_at(x_lo + 1, y_lo + 1, component, border);
        let v_01 = self.value_at(x_lo,     y_lo + 1, component, border);

        v_00 * (1.0 - tx) * (1.0 - ty) +
        v_10 * tx         * (1.0 - ty) +
        v_11 * tx         * ty +
        v_01 * (1.0 - tx) * ty
    }

    /// Returns the value of `component` of the pixel nearest to `pos`.
    pub fn sample_nearest(&self, pos: &Vector2<f32>, component: usize, border: Border) -> f32 {
        self.value_at(pos.x.round() as i64, pos.y.round() as i64, component, border)
    }

    /// Returns the displacement vector at `pos` (image must have 2 components); outside values are clamped.
    pub fn sample_vector(&self, pos: &Vector2<f32>) -> Vector2<f32> {
        Vector2{ x: self.sample(pos, 0, Border::Clamp), y: self.sample(pos, 1, Border::Clamp) }
    }

    fn value_at(&self, x: i64, y: i64, component: usize, border: Border) -> f32 {
        let (w, h) = (self.width as i64, self.height as i64);
        if x >= 0 && x < w && y >= 0 && y < h {
            self.value(x as u32, y as u32, component)
        } else {
            match border {
                Border::Zero => 0.0,
                Border::Clamp => self.value(x.max(0).min(w - 1) as u32, y.max(0).min(h - 1) as u32, component)
            }
        }
    }

    /// Returns the intensity-weighted centroid (image must have 1 component).
    pub fn centroid(&self) -> Option<Vector2<f32>> {
        assert!(self.components == 1);
        let mut sum = 0.0f64;
        let mut sum_x = 0.0f64;
        let mut sum_y = 0.0f64;
        for y in 0..self.height {
            for (x, &value) in self.line(y).iter().enumerate() {
                let value = value.max(0.0) as f64;
                sum += value;
                sum_x += x as f64 * value;
                sum_y += y as f64 * value;
            }
        }

        if sum > 0.0 {
            Some(Vector2{ x: (sum_x / sum) as f32, y: (sum_y / sum) as f32 })
        } else {
            None
        }
    }

    pub fn mean(&self) -> f64 {
        if self.pixels.is_empty() { return 0.0; }
        self.pixels.iter().map(|&v| v as f64).sum::<f64>() / self.pixels.len() as f64
    }

    /// Returns the image scaled to new size using linear interpolation.
    pub fn scale(&self, new_width: u32, new_height: u32) -> Image {
        assert!(new_width > 0 && new_height > 0);

        let mut new_img = Image::new(new_width, new_height, self.components);
        let num_channels = self.components;

        for y in 0..new_height {
            let src_y = y as f64 * self.height as f64 / new_height as f64;
            let src_y_lo = src_y.floor() as u32;
            let src_row_lo = self.line(src_y_lo);
            let src_row_hi = self.line((src_y_lo + 1).min(self.height - 1));
            let ty = src_y.fract() as f32;

            let dest_row = new_img.line_mut(y);

            for x in 0..new_width as usize {
                let src_x = x as f64 * self.width as f64 / new_width as f64;
                let src_x_lo = src_x.floor() as usize;
                let src_x_hi = (src_x_lo + 1).min(self.width as usize - 1);
                let tx = src_x.fract() as f32;

                for ch in 0..num_channels {
                    let v_00 = src_row_lo[src_x_lo * num_channels + ch];
                    let v_10 = src_row_lo[src_x_hi * num_channels + ch];
                    let v_11 = src_row_hi[src_x_hi * num_channels + ch];
                    let v_01 = src_row_hi[src_x_lo * num_channels + ch];

                    dest_row[x * num_channels + ch] =
                        v_00 * (1.0 - tx) * (1.0 - ty) +
                        v_10 * tx * (1.0 - ty) +
                        v_11 * tx * ty +
                        v_01 * (1.0 - tx) * ty;
                }
            }
        }

        new_img
    }
}

/// Replaces all NaN values with the largest non-NaN value.
#[must_use]
pub fn replace_nans(mut image: Image) -> Image {
    let max = image.pixels().iter().cloned().filter(|p| !p.is_nan()).fold(std::f32::NEG_INFINITY, f32::max);
    let max = if max.is_finite() { max } else { 0.0 };
    for p in image.pixels_mut() {
        if p.is_nan() { *p = max; }
    }

    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn given_integer_position_sample_returns_pixel() {
        let image = Image::new_from_pixels(2, 2, 1, vec![1.0, 2.0, 3.0, 4.0]);
        assert_relative_eq!(4.0, image.sample(&Vector2{ x: 1.0, y: 1.0 }, 0, Border::Zero));
        assert_relative_eq!(2.5, image.sample(&Vector2{ x: 0.5, y: 0.5 }, 0, Border::Zero));
    }

    #[test]
    fn given_outside_position_sample_uses_border_mode() {
        let image = Image::new_from_pixels(2, 1, 1, vec![5.0, 7.0]);
        assert_relative_eq!(0.0, image.sample(&Vector2{ x: -3.0, y: 0.0 }, 0, Border::Zero));
        assert_relative_eq!(5.0, image.sample(&Vector2{ x: -3.0, y: 0.0 }, 0, Border::Clamp));
        assert_relative_eq!(7.0, image.sample_nearest(&Vector2{ x: 9.0, y: 0.0 }, 0, Border::Clamp));
    }

    #[test]
    fn given_single_bright_pixel_centroid_is_its_position() {
        let mut image = Image::new(5, 4, 1);
        image.line_mut(3)[2] = 10.0;
        let centroid = image.centroid().unwrap();
        assert_relative_eq!(2.0, centroid.x);
        assert_relative_eq!(3.0, centroid.y);
        assert!(Image::new(3, 3, 1).centroid().is_none());
    }

    #[test]
    fn when_unknown_extension_fail() {
        assert!(matches!(Image::load("slice.png"), Err(ImageError::UnrecognizedFileType(_))));
    }

    #[test]
    fn given_nans_replace_with_max() {
        let image = replace_nans(Image::new_from_pixels(3, 1, 1, vec![1.0, std::f32::NAN, 3.0]));
        assert_eq!(&[1.0, 3.0, 3.0], image.pixels());
    }
}
