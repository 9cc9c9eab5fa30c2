//
// slicetemplate - Unbiased group template construction from slice images
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Group template construction loop.
//!

pub mod artifacts;
pub mod context;
pub mod controller;
pub mod convergence;
pub mod driver;
pub mod pool;
pub mod settings;

use crate::error::{Error, Result};

pub use artifacts::{ArtifactKey, JacobianStep, RoundArtifact, SliceArtifact, Workspace};
pub use context::{CorrectionSettings, IterationContext, MovingImageSource, PriorRound, RoundArtifacts};
pub use controller::Stage;
pub use driver::{JacobianSettings, RunSummary, Workflow, WorkflowSettings};

pub type IterationNumber = u32;

pub type SliceIndex = u32;

/// Contiguous range of slice indices `first..=last`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SliceIndexRange {
    first: SliceIndex,
    last: SliceIndex
}

impl SliceIndexRange {
    pub fn new(first: SliceIndex, last: SliceIndex) -> Result<SliceIndexRange> {
        if first > last {
            Err(Error::configuration(format!("first slice ({}) is after last slice ({})", first, last)))
        } else {
            Ok(SliceIndexRange{ first, last })
        }
    }

    pub fn first(&self) -> SliceIndex { self.first }

    pub fn last(&self) -> SliceIndex { self.last }

    pub fn len(&self) -> usize { (self.last - self.first) as usize + 1 }

    pub fn contains(&self, index: SliceIndex) -> bool { index >= self.first && index <= self.last }

    pub fn iter(&self) -> impl Iterator<Item = SliceIndex> { self.first..=self.last }

    pub fn to_vec(&self) -> Vec<SliceIndex> { self.iter().collect() }
}

impl std::fmt::Display for SliceIndexRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.first, self.last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_valid_bounds_iterate_all_indices() {
        let range = SliceIndexRange::new(3, 6).unwrap();
        assert_eq!(vec![3, 4, 5, 6], range.to_vec());
        assert_eq!(4, range.len());
        assert!(range.contains(3) && range.contains(6) && !range.contains(7));

        assert_eq!(1, SliceIndexRange::new(5, 5).unwrap().len());
    }

    #[test]
    fn when_first_after_last_fail() {
        assert!(matches!(SliceIndexRange::new(4, 2), Err(Error::Configuration(_))));
    }
}
