//
// slicetemplate - Unbiased group template construction from slice images
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Collaborators which only log the requests they receive.
//!

use crate::error::Result;
use crate::logging::Logger;
use std::path::{Path, PathBuf};
use super::*;

pub struct DryRunTools<'a> {
    logger: &'a Logger
}

impl<'a> DryRunTools<'a> {
    pub fn new(logger: &'a Logger) -> DryRunTools<'a> { DryRunTools{ logger } }

    fn log(&self, operation: &str, output: &Path) {
        self.logger.verbose(&format!("[dry run] {} -> {}", operation, output.display()));
    }
}

fn chain_label(chain: &TransformChain) -> String {
    let labels: Vec<String> = chain.transforms().iter().map(|t| {
        if t.inverse { format!("inv({})", t.path.display()) } else { t.path.display().to_string() }
    }).collect();
    labels.join(" <- ")
}

impl<'a> Registration for DryRunTools<'a> {
    fn register(&self, request: &RegistrationRequest) -> Result<()> {
        self.log(
            &format!("register {} to {} ({:?})", request.moving.display(), request.fixed.display(), request.settings.metric),
            &request.outputs.forward_warp
        );
        Ok(())
    }

    fn reslice(&self, request: &ResliceRequest) -> Result<()> {
        self.log(&format!("reslice {} through {}", request.input.display(), chain_label(&request.chain)), &request.output);
        Ok(())
    }

    fn compose(&self, request: &ComposeRequest) -> Result<()> {
        self.log(&format!("compose {}", chain_label(&request.chain)), &request.output);
        Ok(())
    }
}

impl<'a> ImageAlgebra for DryRunTools<'a> {
    fn average(&self, request: &AverageRequest) -> Result<()> {
        self.log(&format!("average {} image(s)", request.inputs.len()), &request.output);
        Ok(())
    }

    fn scale(&self, input: &Path, factor: f64, output: &Path) -> Result<()> {
        self.log(&format!("scale {} by {}", input.display(), factor), output);
        Ok(())
    }

    fn vector_magnitude(&self, input: &Path, output: &Path) -> Result<()> {
        self.log(&format!("magnitude of {}", input.display()), output);
        Ok(())
    }

    fn rms_aggregate(&self, inputs: &[PathBuf], denominator: f64, output: &Path) -> Result<()> {
        self.log(&format!("RMS of {} image(s), denominator {}", inputs.len(), denominator), output);
        Ok(())
    }

    fn average_affine(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        self.log(&format!("average {} affine transform(s)", inputs.len()), output);
        Ok(())
    }

    fn bias_correct(&self, input: &Path, output: &Path) -> Result<()> {
        self.log(&format!("bias-correct {}", input.display()), output);
        Ok(())
    }

    fn jacobian(&self, warp: &Path, output: &Path) -> Result<()> {
        self.log(&format!("jacobian of {}", warp.display()), output);
        Ok(())
    }

    fn smooth(&self, input: &Path, sigma: f64, output: &Path) -> Result<()> {
        self.log(&format!("smooth {} (sigma {})", input.display(), sigma), output);
        Ok(())
    }

    fn resample(&self, input: &Path, spacing: f64, output: &Path) -> Result<()> {
        self.log(&format!("resample {} (spacing {})", input.display(), spacing), output);
        Ok(())
    }

    /// Always 0.
    fn mean_square_difference(&self, image1: &Path, image2: &Path) -> Result<f64> {
        self.logger.verbose(&format!("[dry run] compare {} and {}", image1.display(), image2.display()));
        Ok(0.0)
    }
}
