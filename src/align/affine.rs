//
// slicetemplate - Unbiased group template construction from slice images
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! 2D affine transform and its file format.
//!

use cgmath::{Matrix2, SquareMatrix, Vector2, Zero};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AffineError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid affine transform file: {0}")]
    Format(#[from] serde_json::Error),
    #[error("affine transform is not invertible")]
    Singular,
    #[error("no transforms to average")]
    Empty
}

/// Maps `p` to `matrix * p + translation` (pixel coordinates).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Affine2 {
    pub matrix: Matrix2<f32>,
    pub translation: Vector2<f32>
}

/// On-disk representation; `matrix` is row-major.
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct AffineFile {
    matrix: [[f32; 2]; 2],
    translation: [f32; 2]
}

impl Affine2 {
    pub fn identity() -> Affine2 {
        Affine2{ matrix: Matrix2::identity(), translation: Vector2::zero() }
    }

    pub fn from_translation(translation: Vector2<f32>) -> Affine2 {
        Affine2{ matrix: Matrix2::identity(), translation }
    }

    /// Returns the transform `p -> R(angle) (p - center) + center + translation`.
    pub fn rigid(angle: f32, center: &Vector2<f32>, translation: Vector2<f32>) -> Affine2 {
        let (sin, cos) = angle.sin_cos();
        // `Matrix2::new` takes columns
        let matrix = Matrix2::new(cos, sin, -sin, cos);
        Affine2{ matrix, translation: *center + translation - matrix * *center }
    }

    pub fn apply(&self, p: &Vector2<f32>) -> Vector2<f32> {
        self.matrix * *p + self.translation
    }

    pub fn inverse(&self) -> Result<Affine2, AffineError> {
        let inv = self.matrix.invert().ok_or(AffineError::Singular)?;
        Ok(Affine2{ matrix: inv, translation: -(inv * self.translation) })
    }

    /// Returns the element-wise mean of matrices and translations.
    pub fn average(transforms: &[Affine2]) -> Result<Affine2, AffineError> {
        if transforms.is_empty() { return Err(AffineError::Empty); }

        let n = transforms.len() as f32;
        let mut matrix = Matrix2::zero();
        let mut translation = Vector2::zero();
        for t in transforms {
            matrix += t.matrix;
            translation += t.translation;
        }

        Ok(Affine2{ matrix: matrix / n, translation: translation / n })
    }

    pub fn load(file_name: &str) -> Result<Affine2, AffineError> {
        let contents = std::fs::read_to_string(file_name)?;
        let file: AffineFile = serde_json::from_str(&contents)?;
        let m = file.matrix;

        // `Matrix2::new` takes columns
        Ok(Affine2{
            matrix: Matrix2::new(m[0][0], m[1][0], m[0][1], m[1][1]),
            translation: Vector2{ x: file.translation[0], y: file.translation[1] }
        })
    }

    /// Overwrites existing file.
    pub fn save(&self, file_name: &str) -> Result<(), AffineError> {
        let m = &self.matrix;
        let file = AffineFile{
            matrix: [[m.x.x, m.y.x], [m.x.y, m.y.y]],
            translation: [self.translation.x, self.translation.y]
        };
        std::fs::write(file_name, serde_json::to_string_pretty(&file)?)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sheared() -> Affine2 {
        Affine2{ matrix: Matrix2::new(1.0, 0.2, 0.0, 1.0), translation: Vector2{ x: 3.0, y: -1.0 } }
    }

    #[test]
    fn given_transform_inverse_restores_point() {
        let t = sheared();
        let p = Vector2{ x: 4.0, y: 7.0 };
        let q = t.inverse().unwrap().apply(&t.apply(&p));
        assert_relative_eq!(p.x, q.x, epsilon = 1.0e-5);
        assert_relative_eq!(p.y, q.y, epsilon = 1.0e-5);
    }

    #[test]
    fn given_rigid_transform_rotate_about_center() {
        let center = Vector2{ x: 10.0, y: 5.0 };
        let t = Affine2::rigid(90.0f32.to_radians(), &center, Vector2{ x: 1.0, y: 0.0 });

        let c = t.apply(&center);
        assert_relative_eq!(11.0, c.x, epsilon = 1.0e-5);
        assert_relative_eq!(5.0, c.y, epsilon = 1.0e-5);

        // (12, 5) is 2 px right of the center; rotated by 90° it lands 2 px below
        let q = t.apply(&Vector2{ x: 12.0, y: 5.0 });
        assert_relative_eq!(11.0, q.x, epsilon = 1.0e-5);
        assert_relative_eq!(7.0, q.y, epsilon = 1.0e-5);
    }

    #[test]
    fn when_singular_fail() {
        let t = Affine2{ matrix: Matrix2::zero(), translation: Vector2::zero() };
        assert!(matches!(t.inverse(), Err(AffineError::Singular)));
    }

    #[test]
    fn given_opposite_translations_average_is_identity() {
        let avg = Affine2::average(&[
            Affine2::from_translation(Vector2{ x: 2.0, y: -1.0 }),
            Affine2::from_translation(Vector2{ x: -2.0, y: 1.0 })
        ]).unwrap();
        assert_eq!(Affine2::identity(), avg);
        assert!(matches!(Affine2::average(&[]), Err(AffineError::Empty)));
    }

    #[test]
    fn given_saved_transform_load_returns_same_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let file_name = dir.path().join("affine.json");
        let file_name = file_name.to_str().unwrap();
        let t = sheared();
        t.save(file_name).unwrap();
        let loaded = Affine2::load(file_name).unwrap();
        let p = Vector2{ x: 1.0, y: 2.0 };
        assert_relative_eq!(t.apply(&p).x, loaded.apply(&p).x);
        assert_relative_eq!(t.apply(&p).y, loaded.apply(&p).y);
    }
}
