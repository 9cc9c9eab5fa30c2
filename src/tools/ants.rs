//
// slicetemplate - Unbiased group template construction from slice images
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Collaborators implemented by running the ANTs command-line programs.
//!

use crate::error::{require_file, Error, Result};
use crate::logging::Logger;
use crate::template::settings::{Metric, RegistrationSettings};
use std::path::{Path, PathBuf};
use super::*;

const IMAGE_EXT: &str = ".nii.gz";

/// Single program run with its argument vector.
#[derive(Clone, Debug, PartialEq)]
pub struct Invocation {
    pub program: &'static str,
    pub args: Vec<String>
}

impl Invocation {
    fn new(program: &'static str) -> Invocation { Invocation{ program, args: vec![] } }

    fn arg<T: ToString>(mut self, value: T) -> Invocation {
        self.args.push(value.to_string());
        self
    }

    fn path(self, path: &Path) -> Invocation {
        let value = path.display().to_string();
        self.arg(value)
    }

    fn paths(mut self, paths: &[PathBuf]) -> Invocation {
        for path in paths {
            self = self.path(path);
        }
        self
    }

    fn command_line(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

pub struct AntsTools<'a> {
    /// Directory of the ANTs binaries; if `None`, they are looked up in PATH.
    bin_dir: Option<PathBuf>,
    dimension: u32,
    logger: &'a Logger
}

/// Removes the image extension from the file name of `path`.
fn stem(path: &Path) -> String {
    let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    match name.strip_suffix(IMAGE_EXT) {
        Some(stripped) => stripped.to_string(),
        None => match name.rfind('.') {
            Some(pos) => name[..pos].to_string(),
            None => name
        }
    }
}

/// Returns a temporary image path next to `output`.
fn sibling(output: &Path, tag: &str) -> PathBuf {
    output.with_file_name(format!("{}_{}{}", stem(output), tag, IMAGE_EXT))
}

/// Output prefix passed to `ANTS`; the program appends "Warp.nii.gz" etc.
fn registration_prefix(outputs: &RegistrationOutputs) -> PathBuf {
    outputs.forward_warp.with_file_name(format!("{}_", stem(&outputs.forward_warp)))
}

fn prefixed(prefix: &Path, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}{}", prefix.display(), suffix))
}

fn metric_arg(request: &RegistrationRequest) -> String {
    let name: &str = request.settings.metric.into();
    let param = match request.settings.metric {
        Metric::MSQ => 0.0,
        _ => request.settings.metric_param
    };
    format!("{}[{},{},1,{}]", name, request.fixed.display(), request.moving.display(), param)
}

fn regularization_arg(settings: &RegistrationSettings) -> String {
    let name: &str = settings.regularization.into();
    format!("{}[{},0]", name, settings.regularization_amount)
}

fn transform_args(mut invocation: Invocation, chain: &TransformChain) -> Invocation {
    for t in chain.transforms() {
        invocation = invocation.arg("-t");
        invocation = if t.inverse {
            invocation.arg(format!("[{},1]", t.path.display()))
        } else {
            invocation.path(&t.path)
        };
    }
    invocation
}

impl<'a> AntsTools<'a> {
    pub fn new(bin_dir: Option<PathBuf>, dimension: u32, logger: &'a Logger) -> Result<AntsTools<'a>> {
        if dimension != 2 && dimension != 3 {
            return Err(Error::configuration(format!("unsupported image dimension: {}", dimension)));
        }

        Ok(AntsTools{ bin_dir, dimension, logger })
    }

    pub fn registration_invocation(&self, request: &RegistrationRequest) -> Invocation {
        let s = &request.settings;
        let mut invocation = Invocation::new("ANTS")
            .arg(self.dimension)
            .arg("-m").arg(metric_arg(request))
            .arg("-i").arg(&s.deformable_iterations)
            .arg("-o").path(&registration_prefix(&request.outputs))
            .arg("-t").arg(format!("SyN[{}]", s.gradient_step))
            .arg("-r").arg(regularization_arg(s))
            .arg("--number-of-affine-iterations").arg(&s.affine_iterations);
        if let Some(mask) = &s.mask {
            invocation = invocation.arg("-x").path(mask);
        }
        invocation
    }

    pub fn reslice_invocation(&self, request: &ResliceRequest) -> Invocation {
        let interpolation: &str = request.interpolation.into();
        let mut invocation = Invocation::new("antsApplyTransforms")
            .arg("-d").arg(self.dimension)
            .arg("-i").path(&request.input)
            .arg("-r").path(&request.reference)
            .arg("-o").path(&request.output)
            .arg("-n").arg(interpolation);
        if request.image_type == ImageType::Vector {
            invocation = invocation.arg("-e").arg(1);
        }
        transform_args(invocation, &request.chain)
    }

    pub fn compose_invocation(&self, request: &ComposeRequest) -> Invocation {
        let invocation = Invocation::new("antsApplyTransforms")
            .arg("-d").arg(self.dimension)
            .arg("-r").path(&request.reference)
            .arg("-o").arg(format!("[{},1]", request.output.display()));
        transform_args(invocation, &request.chain)
    }

    pub fn average_invocation(&self, request: &AverageRequest) -> Result<Invocation> {
        if request.weights.is_some() {
            return Err(Error::tool("AverageImages", "weighted averages are not supported"));
        }

        Ok(Invocation::new("AverageImages")
            .arg(self.dimension)
            .path(&request.output)
            .arg(if request.normalize { 1 } else { 0 })
            .paths(&request.inputs))
    }

    fn scale_invocation(&self, input: &Path, factor: f64, output: &Path) -> Invocation {
        Invocation::new("MultiplyImages").arg(self.dimension).path(input).arg(factor).path(output)
    }

    fn image_math(&self, output: &Path, operation: &str) -> Invocation {
        Invocation::new("ImageMath").arg(self.dimension).path(output).arg(operation)
    }

    /// Appends the steps adding `term` to the running sum; the first term is the sum itself.
    fn accumulate(&self, steps: &mut Vec<Invocation>, sum: &Path, current: Option<PathBuf>, term: &Path) -> PathBuf {
        match current {
            None => term.to_path_buf(),
            Some(current) => {
                steps.push(self.image_math(sum, "+").path(&current).path(term));
                sum.to_path_buf()
            }
        }
    }

    /// Squares the components of the field, sums them and takes the square root.
    pub fn vector_magnitude_invocations(&self, input: &Path, output: &Path) -> (Vec<Invocation>, Vec<PathBuf>) {
        let mut steps = vec![];
        let mut temporaries = vec![];
        let sum = sibling(output, "sum");
        let mut current = None;

        for c in 0..self.dimension {
            let component = sibling(output, &format!("c{}", c));
            let squared = sibling(output, &format!("c{}sq", c));
            steps.push(self.image_math(&component, "ExtractVectorComponent").path(input).arg(c));
            steps.push(self.image_math(&squared, "m").path(&component).path(&component));
            current = Some(self.accumulate(&mut steps, &sum, current, &squared));
            temporaries.push(component);
            temporaries.push(squared);
        }
        let total = current.unwrap_or_else(|| sum.clone());
        steps.push(self.image_math(output, "^").path(&total).arg(0.5));
        temporaries.push(sum);

        (steps, temporaries)
    }

    pub fn rms_aggregate_invocations(
        &self,
        inputs: &[PathBuf],
        denominator: f64,
        output: &Path
    ) -> (Vec<Invocation>, Vec<PathBuf>) {
        let mut steps = vec![];
        let mut temporaries = vec![];
        let sum = sibling(output, "sum");
        let mean = sibling(output, "mean");
        let mut current = None;

        for (i, input) in inputs.iter().enumerate() {
            let squared = sibling(output, &format!("sq{}", i));
            steps.push(self.image_math(&squared, "m").path(input).path(input));
            current = Some(self.accumulate(&mut steps, &sum, current, &squared));
            temporaries.push(squared);
        }
        let total = current.unwrap_or_else(|| sum.clone());
        steps.push(self.scale_invocation(&total, 1.0 / denominator, &mean));
        steps.push(self.image_math(output, "^").path(&mean).arg(0.5));
        temporaries.push(sum);
        temporaries.push(mean);

        (steps, temporaries)
    }

    fn resample_invocation(&self, input: &Path, spacing: f64, output: &Path) -> Invocation {
        let spacings: Vec<String> = (0..self.dimension).map(|_| spacing.to_string()).collect();
        Invocation::new("ResampleImage")
            .arg(self.dimension)
            .path(input)
            .path(output)
            .arg(spacings.join("x"))
            .arg(0)
    }

    fn similarity_invocation(&self, image1: &Path, image2: &Path) -> Invocation {
        Invocation::new("MeasureImageSimilarity")
            .arg("-d").arg(self.dimension)
            .arg("-m").arg(format!("MeanSquares[{},{},1]", image1.display(), image2.display()))
    }

    /// Runs `invocation` and returns its standard output.
    fn run(&self, invocation: &Invocation) -> Result<String> {
        let program = match &self.bin_dir {
            Some(dir) => dir.join(invocation.program),
            None => PathBuf::from(invocation.program)
        };
        self.logger.verbose(&invocation.command_line());

        let output = std::process::Command::new(&program)
            .args(&invocation.args)
            .output()
            .map_err(|e| Error::tool(invocation.program, format!("cannot start {}: {}", program.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last_line = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
            return Err(Error::tool(invocation.program, format!("{}; {}", output.status, last_line.trim())));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Runs `invocation` and checks that it created `outputs`.
    fn run_with_outputs(&self, invocation: &Invocation, outputs: &[&Path]) -> Result<()> {
        self.run(invocation)?;
        for output in outputs {
            if !output.exists() {
                return Err(Error::tool(invocation.program, format!("did not produce {}", output.display())));
            }
        }

        Ok(())
    }

    fn run_steps(&self, steps: &[Invocation], temporaries: &[PathBuf], output: &Path) -> Result<()> {
        for (i, step) in steps.iter().enumerate() {
            if i + 1 == steps.len() {
                self.run_with_outputs(step, &[output])?;
            } else {
                self.run(step)?;
            }
        }
        for temporary in temporaries {
            // leftovers do not affect correctness
            let _ = std::fs::remove_file(temporary);
        }

        Ok(())
    }
}

/// Parses the similarity value (the last number printed).
fn parse_similarity(stdout: &str) -> Option<f64> {
    stdout.split_whitespace().rev().find_map(|token| token.parse::<f64>().ok())
}

impl<'a> Registration for AntsTools<'a> {
    fn register(&self, request: &RegistrationRequest) -> Result<()> {
        require_file(&request.fixed)?;
        require_file(&request.moving)?;

        let invocation = self.registration_invocation(request);
        self.run(&invocation)?;

        let prefix = registration_prefix(&request.outputs);
        let produced = [
            (prefixed(&prefix, "Warp.nii.gz"), &request.outputs.forward_warp),
            (prefixed(&prefix, "InverseWarp.nii.gz"), &request.outputs.inverse_warp),
            (prefixed(&prefix, "Affine.txt"), &request.outputs.affine)
        ];
        for (from, to) in &produced {
            if !from.exists() {
                return Err(Error::tool(invocation.program, format!("did not produce {}", from.display())));
            }
            std::fs::rename(from, to).map_err(|e| Error::workspace(to, e))?;
        }

        Ok(())
    }

    fn reslice(&self, request: &ResliceRequest) -> Result<()> {
        require_file(&request.input)?;
        self.run_with_outputs(&self.reslice_invocation(request), &[request.output.as_path()])
    }

    fn compose(&self, request: &ComposeRequest) -> Result<()> {
        self.run_with_outputs(&self.compose_invocation(request), &[request.output.as_path()])
    }
}

impl<'a> ImageAlgebra for AntsTools<'a> {
    fn average(&self, request: &AverageRequest) -> Result<()> {
        self.run_with_outputs(&self.average_invocation(request)?, &[request.output.as_path()])
    }

    fn scale(&self, input: &Path, factor: f64, output: &Path) -> Result<()> {
        self.run_with_outputs(&self.scale_invocation(input, factor, output), &[output])
    }

    fn vector_magnitude(&self, input: &Path, output: &Path) -> Result<()> {
        let (steps, temporaries) = self.vector_magnitude_invocations(input, output);
        self.run_steps(&steps, &temporaries, output)
    }

    fn rms_aggregate(&self, inputs: &[PathBuf], denominator: f64, output: &Path) -> Result<()> {
        if inputs.is_empty() || !(denominator > 0.0) {
            return Err(Error::tool("ImageMath", "invalid RMS aggregation request"));
        }
        let (steps, temporaries) = self.rms_aggregate_invocations(inputs, denominator, output);
        self.run_steps(&steps, &temporaries, output)
    }

    fn average_affine(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let invocation = Invocation::new("AverageAffineTransform").arg(self.dimension).path(output).paths(inputs);
        self.run_with_outputs(&invocation, &[output])
    }

    fn bias_correct(&self, input: &Path, output: &Path) -> Result<()> {
        require_file(input)?;
        let invocation = Invocation::new("N4BiasFieldCorrection")
            .arg("-d").arg(self.dimension)
            .arg("-i").path(input)
            .arg("-o").path(output);
        self.run_with_outputs(&invocation, &[output])
    }

    fn jacobian(&self, warp: &Path, output: &Path) -> Result<()> {
        let invocation = Invocation::new("CreateJacobianDeterminantImage")
            .arg(self.dimension).path(warp).path(output).arg(0).arg(0);
        self.run_with_outputs(&invocation, &[output])
    }

    fn smooth(&self, input: &Path, sigma: f64, output: &Path) -> Result<()> {
        self.run_with_outputs(&self.image_math(output, "G").path(input).arg(sigma), &[output])
    }

    fn resample(&self, input: &Path, spacing: f64, output: &Path) -> Result<()> {
        self.run_with_outputs(&self.resample_invocation(input, spacing, output), &[output])
    }

    fn mean_square_difference(&self, image1: &Path, image2: &Path) -> Result<f64> {
        let invocation = self.similarity_invocation(image1, image2);
        let stdout = self.run(&invocation)?;

        parse_similarity(&stdout)
            .ok_or_else(|| Error::tool(invocation.program, format!("unexpected output: \"{}\"", stdout.trim())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::Level;
    use crate::template::settings::RegularizationType;

    fn args(invocation: &Invocation) -> Vec<&str> {
        invocation.args.iter().map(|a| a.as_str()).collect()
    }

    fn outputs() -> RegistrationOutputs {
        RegistrationOutputs{
            forward_warp: PathBuf::from("/ws/iteration_000/forward_warp_0003.nii.gz"),
            inverse_warp: PathBuf::from("/ws/iteration_000/inverse_warp_0003.nii.gz"),
            affine: PathBuf::from("/ws/iteration_000/affine_0003.txt")
        }
    }

    #[test]
    fn given_default_settings_build_ants_registration_arguments() {
        let logger = Logger::new(Level::Quiet);
        let tools = AntsTools::new(None, 2, &logger).unwrap();
        let request = RegistrationRequest{
            fixed: PathBuf::from("fixed.nii.gz"),
            moving: PathBuf::from("moving.nii.gz"),
            settings: RegistrationSettings::default(),
            outputs: outputs()
        };

        let invocation = tools.registration_invocation(&request);
        assert_eq!("ANTS", invocation.program);
        assert_eq!(
            vec![
                "2",
                "-m", "CC[fixed.nii.gz,moving.nii.gz,1,4]",
                "-i", "30x90x20",
                "-o", "/ws/iteration_000/forward_warp_0003_",
                "-t", "SyN[0.25]",
                "-r", "Gauss[3,0]",
                "--number-of-affine-iterations", "10000x10000x10000"
            ],
            args(&invocation)
        );
    }

    #[test]
    fn given_mask_and_mi_metric_pass_them_to_ants() {
        let logger = Logger::new(Level::Quiet);
        let tools = AntsTools::new(None, 3, &logger).unwrap();
        let mut settings = RegistrationSettings::default();
        settings.metric = Metric::MI;
        settings.metric_param = 32.0;
        settings.regularization = RegularizationType::DMFFD;
        settings.mask = Some(PathBuf::from("mask.nii.gz"));
        let request = RegistrationRequest{
            fixed: PathBuf::from("f.nii.gz"), moving: PathBuf::from("m.nii.gz"), settings, outputs: outputs()
        };

        let a = tools.registration_invocation(&request).args;
        assert_eq!("3", a[0]);
        assert_eq!("MI[f.nii.gz,m.nii.gz,1,32]", a[2]);
        assert!(a.contains(&"DMFFD[3,0]".to_string()));
        assert_eq!(&["-x".to_string(), "mask.nii.gz".to_string()], &a[a.len() - 2..]);
    }

    #[test]
    fn given_vector_reslice_with_inverse_affine_build_apply_transforms_arguments() {
        let logger = Logger::new(Level::Quiet);
        let tools = AntsTools::new(Some(PathBuf::from("/opt/ants/bin")), 2, &logger).unwrap();
        let request = ResliceRequest{
            input: PathBuf::from("scaled.nii.gz"),
            image_type: ImageType::Vector,
            reference: PathBuf::from("template.nii.gz"),
            chain: TransformChain::new(vec![
                TransformRef::inverse_affine(PathBuf::from("mean_affine.txt")),
                TransformRef::warp(PathBuf::from("warp.nii.gz"))
            ]),
            interpolation: Interpolation::Linear,
            output: PathBuf::from("corrected.nii.gz")
        };

        assert_eq!(
            vec![
                "-d", "2", "-i", "scaled.nii.gz", "-r", "template.nii.gz", "-o", "corrected.nii.gz",
                "-n", "Linear", "-e", "1", "-t", "[mean_affine.txt,1]", "-t", "warp.nii.gz"
            ],
            args(&tools.reslice_invocation(&request))
        );
    }

    #[test]
    fn given_compose_request_write_composite_field() {
        let logger = Logger::new(Level::Quiet);
        let tools = AntsTools::new(None, 2, &logger).unwrap();
        let request = ComposeRequest{
            chain: TransformChain::new(vec![
                TransformRef::warp(PathBuf::from("a.nii.gz")),
                TransformRef::warp(PathBuf::from("b.nii.gz"))
            ]),
            reference: PathBuf::from("t.nii.gz"),
            output: PathBuf::from("c.nii.gz")
        };

        assert_eq!(
            vec!["-d", "2", "-r", "t.nii.gz", "-o", "[c.nii.gz,1]", "-t", "a.nii.gz", "-t", "b.nii.gz"],
            args(&tools.compose_invocation(&request))
        );
    }

    #[test]
    fn when_weighted_average_requested_fail() {
        let logger = Logger::new(Level::Quiet);
        let tools = AntsTools::new(None, 2, &logger).unwrap();
        let mut request = AverageRequest{
            inputs: vec![PathBuf::from("a.nii.gz"), PathBuf::from("b.nii.gz")],
            weights: None,
            normalize: true,
            output: PathBuf::from("avg.nii.gz")
        };
        assert_eq!(
            vec!["2", "avg.nii.gz", "1", "a.nii.gz", "b.nii.gz"],
            args(&tools.average_invocation(&request).unwrap())
        );

        request.weights = Some(vec![1.0, 2.0]);
        assert!(matches!(tools.average_invocation(&request), Err(Error::ExternalTool{ .. })));
    }

    #[test]
    fn given_rms_aggregate_intermediate_files_are_siblings_of_output() {
        let logger = Logger::new(Level::Quiet);
        let tools = AntsTools::new(None, 2, &logger).unwrap();
        let inputs = vec![PathBuf::from("/w/m0.nii.gz"), PathBuf::from("/w/m1.nii.gz")];
        let (steps, temporaries) = tools.rms_aggregate_invocations(&inputs, 1.0, Path::new("/w/variance_map.nii.gz"));

        // two squares, one sum, scaling, square root
        assert_eq!(5, steps.len());
        assert!(temporaries.iter().all(|t| t.parent() == Some(Path::new("/w"))));
        assert!(temporaries.contains(&PathBuf::from("/w/variance_map_sum.nii.gz")));
        let last = steps.last().unwrap();
        assert_eq!(vec!["2", "/w/variance_map.nii.gz", "^", "/w/variance_map_mean.nii.gz", "0.5"], args(last));
    }

    #[test]
    fn given_3d_field_magnitude_uses_three_components() {
        let logger = Logger::new(Level::Quiet);
        let tools = AntsTools::new(None, 3, &logger).unwrap();
        let (steps, temporaries) = tools.vector_magnitude_invocations(Path::new("f.nii.gz"), Path::new("mag.nii.gz"));
        assert_eq!(3 * 2 + 2 + 1, steps.len());
        assert_eq!(7, temporaries.len());
        assert_eq!("ExtractVectorComponent", steps[5].args[2]);
    }

    #[test]
    fn given_similarity_output_parse_last_value() {
        assert_eq!(Some(0.125), parse_similarity("MeanSquares value:\n0.125\n"));
        assert_eq!(None, parse_similarity("error"));
    }

    #[test]
    fn when_dimension_unsupported_fail() {
        let logger = Logger::new(Level::Quiet);
        assert!(matches!(AntsTools::new(None, 4, &logger), Err(Error::Configuration(_))));
    }

    #[test]
    fn when_program_missing_fail_with_tool_error() {
        let logger = Logger::new(Level::Quiet);
        let dir = tempfile::tempdir().unwrap();
        let tools = AntsTools::new(Some(dir.path().to_path_buf()), 2, &logger).unwrap();
        let result = tools.scale(Path::new("a.nii.gz"), 2.0, Path::new("b.nii.gz"));
        assert!(matches!(result, Err(Error::ExternalTool{ tool, .. }) if tool == "MultiplyImages"));
    }
}
