//
// slicetemplate - Unbiased group template construction from slice images
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! FITS image format handling code.
//!
//! Images are 32-bit float primary arrays with 2 axes (scalar image) or 3 axes (NAXIS3 = number of vector
//! components, stored as consecutive planes).
//!

use super::Image;
use fitsio::FitsFile;
use fitsio::hdu::{FitsHdu, HduInfo};
use fitsio::images::{ImageDescription, ImageType};
use std::convert::TryFrom;
use std::sync::Mutex;
use thiserror::Error;

/// cfitsio is not guaranteed to be built reentrant; worker threads take turns.
static FITS_ACCESS: Mutex<()> = Mutex::new(());

#[derive(Error, Debug)]
pub enum FitsError {
    #[error(transparent)]
    Internal(#[from] fitsio::errors::Error),
    #[error("no image in file")]
    NoImageInFile,
    #[error("unsupported image shape: {0:?}")]
    UnsupportedShape(Vec<usize>),
    #[error("expected {expected} values, read {actual}")]
    TruncatedData{ expected: usize, actual: usize }
}

/// Returns (width, height, components).
fn image_shape(hdu: &FitsHdu) -> Result<(u32, u32, usize), FitsError> {
    let shape = match &hdu.info {
        HduInfo::ImageInfo{ shape, .. } => shape,
        _ => return Err(FitsError::NoImageInFile)
    };
    let (components, height, width) = match shape.as_slice() {
        &[height, width] => (1, height, width),
        &[components, height, width] => (components, height, width),
        _ => return Err(FitsError::UnsupportedShape(shape.clone()))
    };
    if components == 0 || height == 0 || width == 0 {
        return Err(FitsError::UnsupportedShape(shape.clone()));
    }
    let to_u32 = |n: usize| u32::try_from(n).map_err(|_| FitsError::UnsupportedShape(shape.clone()));

    Ok((to_u32(width)?, to_u32(height)?, components))
}

fn load_primary_hdu(file_name: &str) -> Result<(FitsFile, FitsHdu), FitsError> {
    let mut fits_file = FitsFile::open(file_name)?;
    let hdu = fits_file.primary_hdu()?;
    Ok((fits_file, hdu))
}

pub fn load_fits(file_name: &str) -> Result<Image, FitsError> {
    let _access = FITS_ACCESS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    let (mut fits_file, hdu) = load_primary_hdu(file_name)?;
    let (width, height, components) = image_shape(&hdu)?;
    let fits_pixels: Vec<f32> = hdu.read_image(&mut fits_file)?;

    let (w, h) = (width as usize, height as usize);
    let plane_size = w * h;
    if fits_pixels.len() != plane_size * components {
        return Err(FitsError::TruncatedData{ expected: plane_size * components, actual: fits_pixels.len() });
    }

    let mut image = Image::new(width, height, components);
    // planes of components; FITS rows are stored in reverse order
    for (c, plane) in fits_pixels.chunks_exact(plane_size).enumerate() {
        for (row, fits_line) in plane.chunks_exact(w).enumerate() {
            let line = image.line_mut((h - 1 - row) as u32);
            for (x, &value) in fits_line.iter().enumerate() {
                line[x * components + c] = value;
            }
        }
    }

    Ok(image)
}

/// Returns (width, height, components) without reading the pixel data.
pub fn fits_metadata(file_name: &str) -> Result<(u32, u32, usize), FitsError> {
    let _access = FITS_ACCESS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    let (_, hdu) = load_primary_hdu(file_name)?;
    image_shape(&hdu)
}

/// Overwrites existing file.
pub fn save_fits(image: &Image, file_name: &str) -> Result<(), FitsError> {
    let (w, h, components) = (image.width() as usize, image.height() as usize, image.components());

    let mut fits_pixels = Vec::<f32>::with_capacity(w * h * components);
    for c in 0..components {
        for y in (0..h).rev() {
            fits_pixels.extend(image.line(y as u32).iter().skip(c).step_by(components));
        }
    }

    let shape_3d = [components, h, w];
    let descr = ImageDescription{
        data_type: ImageType::Float,
        dimensions: if components > 1 { &shape_3d[..] } else { &shape_3d[1..] }
    };

    let _access = FITS_ACCESS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    let mut fits_file = FitsFile::create(file_name)
        .with_custom_primary(&descr)
        .overwrite()
        .open()?;
    let hdu = fits_file.primary_hdu()?;
    hdu.write_image(&mut fits_file, &fits_pixels)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_vector_image_preserve_components_and_row_order() {
        let dir = tempfile::tempdir().unwrap();
        let file_name = dir.path().join("field.fits");
        let file_name = file_name.to_str().unwrap();

        let mut image = Image::new(3, 2, 2);
        image.line_mut(0).copy_from_slice(&[0.0, 0.5, 1.0, 1.5, 2.0, 2.5]);
        image.line_mut(1).copy_from_slice(&[-1.0, -1.5, -2.0, -2.5, -3.0, -3.5]);
        save_fits(&image, file_name).unwrap();

        assert_eq!((3, 2, 2), fits_metadata(file_name).unwrap());
        let loaded = load_fits(file_name).unwrap();
        assert_eq!(image.pixels(), loaded.pixels());
    }

    #[test]
    fn given_existing_file_overwrite_it() {
        let dir = tempfile::tempdir().unwrap();
        let file_name = dir.path().join("image.fits");
        let file_name = file_name.to_str().unwrap();

        save_fits(&Image::new(4, 4, 1), file_name).unwrap();
        save_fits(&Image::new_from_pixels(2, 1, 1, vec![7.0, 8.0]), file_name).unwrap();

        assert_eq!((2, 1, 1), fits_metadata(file_name).unwrap());
        assert_eq!(&[7.0, 8.0], load_fits(file_name).unwrap().pixels());
    }

    #[test]
    fn when_not_fits_fail() {
        let dir = tempfile::tempdir().unwrap();
        let file_name = dir.path().join("bogus.fits");
        std::fs::write(&file_name, vec![b'x'; 2880]).unwrap();
        assert!(matches!(load_fits(file_name.to_str().unwrap()), Err(FitsError::Internal(_))));
    }

    #[test]
    fn when_header_has_non_ascii_byte_fail_without_panic() {
        let dir = tempfile::tempdir().unwrap();
        let file_name = dir.path().join("damaged.fits");
        let file_name = file_name.to_str().unwrap();
        save_fits(&Image::new(2, 2, 1), file_name).unwrap();

        let mut bytes = std::fs::read(file_name).unwrap();
        bytes[0] = 0xFF;
        std::fs::write(file_name, bytes).unwrap();

        assert!(load_fits(file_name).is_err());
        assert!(fits_metadata(file_name).is_err());
    }
}
