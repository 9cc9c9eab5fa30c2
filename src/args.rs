//
// slicetemplate - Unbiased group template construction from slice images
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Command-line options definitions and parsing.
//!

use crate::error::Error;
use crate::logging;
use crate::template::{CorrectionSettings, JacobianSettings, MovingImageSource};
use crate::template::settings::{Metric, RegistrationSettings, RegularizationType};
use crate::tools::Interpolation;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Backend {
    /// ANTs command-line programs.
    Ants,
    /// In-process 2D implementation.
    Native
}

impl From<Backend> for &str {
    fn from(backend: Backend) -> &'static str {
        match backend {
            Backend::Ants   => "ants",
            Backend::Native => "native"
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = ();
    fn from_str(s: &str) -> Result<Backend, ()> {
        [Backend::Ants, Backend::Native].iter().cloned().find(|b| s == Into::<&str>::into(*b)).ok_or(())
    }
}

pub mod cmdline {
    pub const HELP:                   &str = "help";
    pub const INPUT_PATTERN:          &str = "input_pattern";
    pub const WORKSPACE:              &str = "workspace";
    pub const FIRST_SLICE:            &str = "first_slice";
    pub const LAST_SLICE:             &str = "last_slice";
    pub const ITERATIONS:             &str = "iterations";
    pub const RESUME_FROM:            &str = "resume_from";
    pub const NEIGHBORHOOD:           &str = "neighborhood";
    pub const METRIC:                 &str = "metric";
    pub const METRIC_PARAM:           &str = "metric_param";
    pub const DEFORMABLE_ITERATIONS:  &str = "deformable_iterations";
    pub const AFFINE_ITERATIONS:      &str = "affine_iterations";
    pub const GRADIENT_STEP:          &str = "gradient_step";
    pub const REGULARIZATION:         &str = "regularization";
    pub const REGULARIZATION_AMOUNT:  &str = "regularization_amount";
    pub const MASK:                   &str = "mask";
    pub const SETTINGS_OVERRIDE:      &str = "settings_override";
    pub const CORRECTION_FACTOR:      &str = "correction_factor";
    pub const CORRECTION_REPEATS:     &str = "correction_repeats";
    pub const MOVING:                 &str = "moving";
    pub const INTERPOLATION:          &str = "interpolation";
    pub const JACOBIAN_SMOOTHING:     &str = "jacobian_smoothing";
    pub const JACOBIAN_RESAMPLE:      &str = "jacobian_resample";
    pub const SKIP_REGISTRATION:      &str = "skip_registration";
    pub const BACKEND:                &str = "backend";
    pub const ANTS_PATH:              &str = "ants_path";
    pub const DIMENSION:              &str = "dimension";
    pub const THREADS:                &str = "threads";
    pub const LOG_LEVEL:              &str = "log_level";
}

#[derive(Debug)]
pub struct Configuration {
    input_pattern: String,
    workspace: PathBuf,
    first_slice: u32,
    last_slice: u32,
    iterations: u32,
    resume_from: u32,
    neighborhood: u32,
    registration: RegistrationSettings,
    settings_override: Option<PathBuf>,
    correction: CorrectionSettings,
    moving_source: MovingImageSource,
    interpolation: Interpolation,
    jacobian: JacobianSettings,
    skip_registration: bool,
    backend: Backend,
    ants_path: Option<PathBuf>,
    dimension: u32,
    threads: Option<usize>,
    log_level: logging::Level
}

impl Configuration {
    pub fn input_pattern(&self) -> &str { &self.input_pattern }
    pub fn workspace(&self) -> &PathBuf { &self.workspace }
    pub fn first_slice(&self) -> u32 { self.first_slice }
    pub fn last_slice(&self) -> u32 { self.last_slice }
    pub fn iterations(&self) -> u32 { self.iterations }
    pub fn resume_from(&self) -> u32 { self.resume_from }
    pub fn neighborhood(&self) -> u32 { self.neighborhood }
    pub fn registration(&self) -> &RegistrationSettings { &self.registration }
    pub fn settings_override(&self) -> &Option<PathBuf> { &self.settings_override }
    pub fn correction(&self) -> CorrectionSettings { self.correction }
    pub fn moving_source(&self) -> MovingImageSource { self.moving_source }
    pub fn interpolation(&self) -> Interpolation { self.interpolation }
    pub fn jacobian(&self) -> JacobianSettings { self.jacobian }
    pub fn skip_registration(&self) -> bool { self.skip_registration }
    pub fn backend(&self) -> Backend { self.backend }
    pub fn ants_path(&self) -> &Option<PathBuf> { &self.ants_path }
    pub fn dimension(&self) -> u32 { self.dimension }
    pub fn threads(&self) -> Option<usize> { self.threads }
    pub fn log_level(&self) -> logging::Level { self.log_level }
}

pub fn print_help() {
    let defaults = RegistrationSettings::default();
    let correction = CorrectionSettings::default();

    println!(
r#"Command-line options:

  --{} <pattern>

    Path pattern of the raw input slices. A run of '#' characters is replaced by the zero-padded slice index,
    e.g. "data/slice_####.nii.gz".


  --{} <directory>

    Directory in which all intermediate and final artifacts are stored.


  --{} <index>  --{} <index>

    Range of slices (inclusive) to build the template from.


  --{} <number>

    Total number of template construction iterations.


  --{} <iteration>

    First iteration to run; all earlier iterations must be complete in the workspace. Default: 0.


  --{} <{}|{}|{}|{}>  --{} <value>

    Similarity metric and its parameter (radius for CC and PR, number of bins for MI). Default: {} {}.


  --{} <AxBxC>  --{} <AxBxC>

    Iterations per resolution level of the deformable and affine stages. Default: {} and {}.


  --{} <value>

    Gradient step of the deformable transform. Default: {}.


  --{} <{}|{}>  --{} <value>

    Regularization of the deformable transform. Default: {} {}.


  --{} <file>

    Registration mask (pixels with positive values drive the registration).


  --{} <file>

    JSON file with per-slice and per-iteration registration settings.


  --{} <value>  --{} <number>

    Template shape correction: multiplier of the mean forward warp and the number of times the corrected warp
    is applied. Default: {} and {}.


  --{} <{}|{}>

    Moving images of iterations after the first: the preprocessed slices or the slices resliced in the previous
    iteration. Default: {}.


  --{} <{}|{}|{}>

    Interpolation used when reslicing images. Default: {}.


  --{} <sigma>  --{} <spacing>

    Post-processing of the final per-slice jacobians: Gaussian smoothing and resampling. Default: none.


  --{} <yes|no>

    If "yes", only logs what would be run; no files are written. Default: no.


  --{} <{}|{}>  --{} <directory>  --{} <2|3>

    Collaborator backend, location of the ANTs binaries (default: search PATH) and image dimension
    (the {} backend supports only 2). Default: {}, 2.


  --{} <number>

    Number of worker threads. Default: number of logical CPUs.


  --{} <{}|{}|{}>

    Chooses the amount of messages to print during processing.

"#,
        cmdline::INPUT_PATTERN,
        cmdline::WORKSPACE,
        cmdline::FIRST_SLICE, cmdline::LAST_SLICE,
        cmdline::ITERATIONS,
        cmdline::RESUME_FROM,

        cmdline::METRIC,
        Into::<&str>::into(Metric::CC),
        Into::<&str>::into(Metric::MI),
        Into::<&str>::into(Metric::PR),
        Into::<&str>::into(Metric::MSQ),
        cmdline::METRIC_PARAM,
        Into::<&str>::into(defaults.metric), defaults.metric_param,

        cmdline::DEFORMABLE_ITERATIONS, cmdline::AFFINE_ITERATIONS,
        defaults.deformable_iterations, defaults.affine_iterations,

        cmdline::GRADIENT_STEP, defaults.gradient_step,

        cmdline::REGULARIZATION,
        Into::<&str>::into(RegularizationType::Gauss),
        Into::<&str>::into(RegularizationType::DMFFD),
        cmdline::REGULARIZATION_AMOUNT,
        Into::<&str>::into(defaults.regularization), defaults.regularization_amount,

        cmdline::MASK,
        cmdline::SETTINGS_OVERRIDE,

        cmdline::CORRECTION_FACTOR, cmdline::CORRECTION_REPEATS,
        correction.factor, correction.repeats,

        cmdline::MOVING,
        Into::<&str>::into(MovingImageSource::Preprocessed),
        Into::<&str>::into(MovingImageSource::PreviousRound),
        Into::<&str>::into(MovingImageSource::Preprocessed),

        cmdline::INTERPOLATION,
        Into::<&str>::into(Interpolation::Linear),
        Into::<&str>::into(Interpolation::NearestNeighbor),
        Into::<&str>::into(Interpolation::BSpline),
        Into::<&str>::into(Interpolation::Linear),

        cmdline::JACOBIAN_SMOOTHING, cmdline::JACOBIAN_RESAMPLE,

        cmdline::SKIP_REGISTRATION,

        cmdline::BACKEND,
        Into::<&str>::into(Backend::Ants),
        Into::<&str>::into(Backend::Native),
        cmdline::ANTS_PATH,
        cmdline::DIMENSION,
        Into::<&str>::into(Backend::Native),
        Into::<&str>::into(Backend::Ants),

        cmdline::THREADS,

        cmdline::LOG_LEVEL,
        Into::<&str>::into(logging::Level::Quiet),
        Into::<&str>::into(logging::Level::Info),
        Into::<&str>::into(logging::Level::Verbose)
    );
}

/// Returns the value of a single-valued option of type `T`.
fn get_option_value<T: std::str::FromStr>(
    option: &str,
    option_values: &HashMap::<String, Vec<String>>
) -> Result<Option<T>, Error> {
    match option_values.get(option) {
        None => Ok(None),
        Some(vals) => if vals.is_empty() {
            Err(Error::configuration(format!("value missing for option {}", option)))
        } else if vals.len() > 1 {
            Err(Error::configuration(format!("too many values for option {}", option)))
        } else {
            match vals[0].parse::<T>() {
                Ok(value) => Ok(Some(value)),
                Err(_) => Err(Error::configuration(format!("invalid value for option {}: {}", option, vals[0])))
            }
        }
    }
}

fn get_required_value<T: std::str::FromStr>(
    option: &str,
    option_values: &HashMap::<String, Vec<String>>
) -> Result<T, Error> {
    get_option_value(option, option_values)?
        .ok_or_else(|| Error::configuration(format!("option {} not specified", option)))
}

fn get_yes_no(option: &str, option_values: &HashMap::<String, Vec<String>>) -> Result<Option<bool>, Error> {
    match get_option_value::<String>(option, option_values)? {
        None => Ok(None),
        Some(value) => match value.as_str() {
            "yes" => Ok(Some(true)),
            "no" => Ok(Some(false)),
            _ => Err(Error::configuration(format!("invalid value for option {}: {} (expected yes or no)", option, value)))
        }
    }
}

/// Returns Ok(None) if help was requested.
pub fn parse_command_line<I: Iterator<Item=String>>(stream: I) -> Result<Option<Configuration>, Error> {
    let allowed_options = vec![
        cmdline::HELP,
        cmdline::INPUT_PATTERN,
        cmdline::WORKSPACE,
        cmdline::FIRST_SLICE,
        cmdline::LAST_SLICE,
        cmdline::ITERATIONS,
        cmdline::RESUME_FROM,
        cmdline::NEIGHBORHOOD,
        cmdline::METRIC,
        cmdline::METRIC_PARAM,
        cmdline::DEFORMABLE_ITERATIONS,
        cmdline::AFFINE_ITERATIONS,
        cmdline::GRADIENT_STEP,
        cmdline::REGULARIZATION,
        cmdline::REGULARIZATION_AMOUNT,
        cmdline::MASK,
        cmdline::SETTINGS_OVERRIDE,
        cmdline::CORRECTION_FACTOR,
        cmdline::CORRECTION_REPEATS,
        cmdline::MOVING,
        cmdline::INTERPOLATION,
        cmdline::JACOBIAN_SMOOTHING,
        cmdline::JACOBIAN_RESAMPLE,
        cmdline::SKIP_REGISTRATION,
        cmdline::BACKEND,
        cmdline::ANTS_PATH,
        cmdline::DIMENSION,
        cmdline::THREADS,
        cmdline::LOG_LEVEL
    ];

    // key: option name
    let mut option_values = HashMap::<String, Vec<String>>::new();

    let mut current: Option<&mut Vec<String>> = None;

    for arg in stream.skip(1) /*skip the binary name*/ {
        if arg.starts_with("--") {
            match &arg[2..] {
                cmdline::HELP => { print_help(); return Ok(None); },
                x if !allowed_options.contains(&x) => {
                    return Err(Error::configuration(format!("unknown command-line option: {}", x)));
                },
                opt => current = Some(option_values.entry(opt.to_string()).or_insert_with(Vec::new)),
            }
        } else {
            match current.as_mut() {
                Some(values) => values.push(arg),
                None => return Err(Error::configuration(format!("unexpected value: {}", arg)))
            }
        }
    }

    let input_pattern: String = get_required_value(cmdline::INPUT_PATTERN, &option_values)?;
    let workspace: PathBuf = get_required_value(cmdline::WORKSPACE, &option_values)?;
    let first_slice: u32 = get_required_value(cmdline::FIRST_SLICE, &option_values)?;
    let last_slice: u32 = get_required_value(cmdline::LAST_SLICE, &option_values)?;
    let iterations: u32 = get_required_value(cmdline::ITERATIONS, &option_values)?;
    let resume_from = get_option_value::<u32>(cmdline::RESUME_FROM, &option_values)?.unwrap_or(0);
    let neighborhood = get_option_value::<u32>(cmdline::NEIGHBORHOOD, &option_values)?.unwrap_or(0);

    let mut registration = RegistrationSettings::default();
    if let Some(metric) = get_option_value(cmdline::METRIC, &option_values)? { registration.metric = metric; }
    if let Some(param) = get_option_value(cmdline::METRIC_PARAM, &option_values)? { registration.metric_param = param; }
    if let Some(schedule) = get_option_value(cmdline::DEFORMABLE_ITERATIONS, &option_values)? {
        registration.deformable_iterations = schedule;
    }
    if let Some(schedule) = get_option_value(cmdline::AFFINE_ITERATIONS, &option_values)? {
        registration.affine_iterations = schedule;
    }
    if let Some(step) = get_option_value(cmdline::GRADIENT_STEP, &option_values)? { registration.gradient_step = step; }
    if let Some(regularization) = get_option_value(cmdline::REGULARIZATION, &option_values)? {
        registration.regularization = regularization;
    }
    if let Some(amount) = get_option_value(cmdline::REGULARIZATION_AMOUNT, &option_values)? {
        registration.regularization_amount = amount;
    }
    registration.mask = get_option_value(cmdline::MASK, &option_values)?;
    registration.validate()?;

    let settings_override = get_option_value::<PathBuf>(cmdline::SETTINGS_OVERRIDE, &option_values)?;

    let mut correction = CorrectionSettings::default();
    if let Some(factor) = get_option_value(cmdline::CORRECTION_FACTOR, &option_values)? { correction.factor = factor; }
    if let Some(repeats) = get_option_value(cmdline::CORRECTION_REPEATS, &option_values)? { correction.repeats = repeats; }

    let moving_source = get_option_value(cmdline::MOVING, &option_values)?.unwrap_or(MovingImageSource::Preprocessed);
    let interpolation = get_option_value(cmdline::INTERPOLATION, &option_values)?.unwrap_or(Interpolation::Linear);
    let jacobian = JacobianSettings{
        smoothing: get_option_value(cmdline::JACOBIAN_SMOOTHING, &option_values)?,
        resample: get_option_value(cmdline::JACOBIAN_RESAMPLE, &option_values)?
    };
    let skip_registration = get_yes_no(cmdline::SKIP_REGISTRATION, &option_values)?.unwrap_or(false);

    let backend = get_option_value(cmdline::BACKEND, &option_values)?.unwrap_or(Backend::Ants);
    let ants_path = get_option_value::<PathBuf>(cmdline::ANTS_PATH, &option_values)?;
    if ants_path.is_some() && backend != Backend::Ants {
        return Err(Error::configuration(format!(
            "unexpected option {} (backend is not {})", cmdline::ANTS_PATH, Into::<&str>::into(Backend::Ants)
        )));
    }
    let dimension = get_option_value::<u32>(cmdline::DIMENSION, &option_values)?.unwrap_or(2);
    if dimension != 2 && dimension != 3 {
        return Err(Error::configuration(format!("invalid value for option {}: {}", cmdline::DIMENSION, dimension)));
    }

    let threads = get_option_value::<usize>(cmdline::THREADS, &option_values)?;
    if threads == Some(0) {
        return Err(Error::configuration(format!("invalid value for option {}: 0", cmdline::THREADS)));
    }

    let log_level = get_option_value::<logging::Level>(cmdline::LOG_LEVEL, &option_values)?
        .unwrap_or(logging::Level::Info);

    Ok(Some(Configuration{
        input_pattern,
        workspace,
        first_slice,
        last_slice,
        iterations,
        resume_from,
        neighborhood,
        registration,
        settings_override,
        correction,
        moving_source,
        interpolation,
        jacobian,
        skip_registration,
        backend,
        ants_path,
        dimension,
        threads,
        log_level
    }))
}
