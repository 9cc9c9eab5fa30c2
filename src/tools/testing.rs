//
// slicetemplate - Unbiased group template construction from slice images
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Test double of both collaborators: records requests and creates empty output files.
//!

use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use super::*;

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Register(RegistrationRequest),
    Reslice(ResliceRequest),
    Compose(ComposeRequest),
    Average(AverageRequest),
    Scale{ input: PathBuf, factor: f64, output: PathBuf },
    VectorMagnitude{ input: PathBuf, output: PathBuf },
    RmsAggregate{ inputs: Vec<PathBuf>, denominator: f64, output: PathBuf },
    AverageAffine{ inputs: Vec<PathBuf>, output: PathBuf },
    BiasCorrect{ input: PathBuf, output: PathBuf },
    Jacobian{ warp: PathBuf, output: PathBuf },
    Smooth{ input: PathBuf, sigma: f64, output: PathBuf },
    Resample{ input: PathBuf, spacing: f64, output: PathBuf },
    MeanSquareDifference{ image1: PathBuf, image2: PathBuf }
}

#[derive(Default)]
pub struct RecordingTools {
    calls: Mutex<Vec<Call>>,
    /// Any call that would write this path fails.
    fail_on: Option<PathBuf>,
    /// Returned by consecutive `mean_square_difference` calls (0 when exhausted).
    msd_values: Mutex<VecDeque<f64>>
}

impl RecordingTools {
    pub fn new() -> RecordingTools { RecordingTools::default() }

    pub fn failing_on(output: PathBuf) -> RecordingTools {
        RecordingTools{ fail_on: Some(output), ..RecordingTools::default() }
    }

    pub fn with_msd_values(values: Vec<f64>) -> RecordingTools {
        RecordingTools{ msd_values: Mutex::new(values.into()), ..RecordingTools::default() }
    }

    pub fn calls(&self) -> Vec<Call> { self.calls.lock().unwrap().clone() }

    pub fn registrations(&self) -> Vec<RegistrationRequest> {
        self.calls().into_iter().filter_map(|c| match c {
            Call::Register(request) => Some(request),
            _ => None
        }).collect()
    }

    fn record(&self, call: Call, outputs: &[&Path]) -> Result<()> {
        self.calls.lock().unwrap().push(call);

        if let Some(failing) = &self.fail_on {
            if outputs.iter().any(|o| *o == failing.as_path()) {
                return Err(Error::tool("recording", format!("injected failure for {}", failing.display())));
            }
        }
        for output in outputs {
            std::fs::write(output, b"").map_err(|e| Error::workspace(output, e))?;
        }

        Ok(())
    }
}

impl Registration for RecordingTools {
    fn register(&self, request: &RegistrationRequest) -> Result<()> {
        self.record(Call::Register(request.clone()), &request.outputs.paths())
    }

    fn reslice(&self, request: &ResliceRequest) -> Result<()> {
        self.record(Call::Reslice(request.clone()), &[request.output.as_path()])
    }

    fn compose(&self, request: &ComposeRequest) -> Result<()> {
        self.record(Call::Compose(request.clone()), &[request.output.as_path()])
    }
}

impl ImageAlgebra for RecordingTools {
    fn average(&self, request: &AverageRequest) -> Result<()> {
        self.record(Call::Average(request.clone()), &[request.output.as_path()])
    }

    fn scale(&self, input: &Path, factor: f64, output: &Path) -> Result<()> {
        self.record(Call::Scale{ input: input.into(), factor, output: output.into() }, &[output])
    }

    fn vector_magnitude(&self, input: &Path, output: &Path) -> Result<()> {
        self.record(Call::VectorMagnitude{ input: input.into(), output: output.into() }, &[output])
    }

    fn rms_aggregate(&self, inputs: &[PathBuf], denominator: f64, output: &Path) -> Result<()> {
        self.record(Call::RmsAggregate{ inputs: inputs.to_vec(), denominator, output: output.into() }, &[output])
    }

    fn average_affine(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        self.record(Call::AverageAffine{ inputs: inputs.to_vec(), output: output.into() }, &[output])
    }

    fn bias_correct(&self, input: &Path, output: &Path) -> Result<()> {
        self.record(Call::BiasCorrect{ input: input.into(), output: output.into() }, &[output])
    }

    fn jacobian(&self, warp: &Path, output: &Path) -> Result<()> {
        self.record(Call::Jacobian{ warp: warp.into(), output: output.into() }, &[output])
    }

    fn smooth(&self, input: &Path, sigma: f64, output: &Path) -> Result<()> {
        self.record(Call::Smooth{ input: input.into(), sigma, output: output.into() }, &[output])
    }

    fn resample(&self, input: &Path, spacing: f64, output: &Path) -> Result<()> {
        self.record(Call::Resample{ input: input.into(), spacing, output: output.into() }, &[output])
    }

    fn mean_square_difference(&self, image1: &Path, image2: &Path) -> Result<f64> {
        self.record(Call::MeanSquareDifference{ image1: image1.into(), image2: image2.into() }, &[])?;
        Ok(self.msd_values.lock().unwrap().pop_front().unwrap_or(0.0))
    }
}
