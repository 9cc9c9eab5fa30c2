//
// slicetemplate - Unbiased group template construction from slice images
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Entry point and main functions of the `slicetemplate` executable.
//!

mod align;
mod args;
mod error;
mod image;
mod logging;
mod template;
mod tools;
mod utils;

use args::{Backend, Configuration};
use error::{Error, Result};
use logging::Logger;
use template::{SliceIndexRange, Workflow, WorkflowSettings, Workspace};
use template::pool::WorkerPool;
use template::settings::{OverrideFile, RegistrationPlan};
use tools::{ArtifactFormat, Toolset};
use tools::ants::AntsTools;
use tools::dry_run::DryRunTools;
use tools::native::NativeTools;

pub const VERSION_STRING: &'static str = include_str!(concat!(env!("OUT_DIR"), "/version"));

fn print_header() {
    println!(r#"
_________________

   {}
   Unbiased group template construction from slice images

   Copyright © 2020 Filip Szczerek <ga.software@yahoo.com>

   This program is licensed under MIT license (see LICENSE.txt for details).

_________________
"#,
        VERSION_STRING
    );
}

fn build_template(config: Configuration, logger: &Logger) -> Result<()> {
    if config.backend() == Backend::Native && config.dimension() != 2 {
        return Err(Error::configuration("the native backend supports only 2D images"));
    }
    if config.neighborhood() != 0 {
        logger.verbose(&format!("neighborhood radius {} is not used when building a template", config.neighborhood()));
    }

    let format = match config.backend() {
        Backend::Ants => ArtifactFormat::ANTS,
        Backend::Native => ArtifactFormat::NATIVE
    };
    let workspace = Workspace::new(config.workspace().clone(), config.input_pattern().to_string(), format)?;

    let overrides = match config.settings_override() {
        Some(path) => OverrideFile::load(path)?,
        None => OverrideFile::default()
    };
    let settings = WorkflowSettings{
        range: SliceIndexRange::new(config.first_slice(), config.last_slice())?,
        iterations: config.iterations(),
        resume_from: config.resume_from(),
        plan: RegistrationPlan::new(config.registration().clone(), overrides),
        correction: config.correction(),
        moving_source: config.moving_source(),
        interpolation: config.interpolation(),
        jacobian: config.jacobian(),
        dry_run: config.skip_registration()
    };
    let pool = WorkerPool::new(config.threads())?;

    let ants;
    let native;
    let dry_run;
    let tools: Toolset = if config.skip_registration() {
        dry_run = DryRunTools::new(logger);
        Toolset{ registration: &dry_run, algebra: &dry_run }
    } else {
        match config.backend() {
            Backend::Ants => {
                ants = AntsTools::new(config.ants_path().clone(), config.dimension(), logger)?;
                Toolset{ registration: &ants, algebra: &ants }
            },
            Backend::Native => {
                native = NativeTools::new(logger);
                Toolset{ registration: &native, algebra: &native }
            }
        }
    };

    let summary = Workflow::new(&workspace, settings, tools, pool, logger).run()?;

    logger.info(&format!("Template: {}", summary.template.display()));
    logger.info(&format!("Shaped template: {}", summary.shaped_template.display()));
    logger.info(&format!("Variance map: {}", summary.variance_map.display()));
    logger.info(&format!("Mean jacobian: {}", summary.mean_jacobian.display()));
    if let Some(last) = summary.convergence.last() {
        logger.info(&format!(
            "Variance map change in the last iteration: {:.6e}", last.mean_square_difference
        ));
    }

    Ok(())
}

fn run_program() -> bool {
    print_header();
    println!();

    let config = match args::parse_command_line(std::env::args()) {
        Ok(Some(config)) => config,
        Ok(None) => return true,
        Err(err) => {
            eprintln!("{}", err);
            eprintln!("Use --{} for a list of options.", args::cmdline::HELP);
            return false;
        }
    };

    let logger = Logger::new(config.log_level());

    let tstart = std::time::Instant::now();

    if let Err(err) = build_template(config, &logger) {
        logger.error(&format!("Error: {}", err));
        if let Error::ExternalTool{ tool, .. } = err.root_cause() {
            logger.info(&format!("Make sure \"{}\" can be run (see --{}).", tool, args::cmdline::ANTS_PATH));
        }
        return false;
    }

    let elapsed = tstart.elapsed();
    let mins = elapsed.as_secs() / 60;
    let secs = elapsed.as_secs() % 60;
    let frac_secs = elapsed.as_secs_f32() - (mins * 60) as f32 - secs as f32;
    logger.info(&format!("Completed in {} min {:02}.{:0.0} s.", mins, secs, frac_secs * 10.0));

    true
}

fn main() {
    std::process::exit(if run_program() { 0 } else { 1 });
}
