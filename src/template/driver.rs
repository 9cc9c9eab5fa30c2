//
// slicetemplate - Unbiased group template construction from slice images
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Workflow driver: runs the iterations and produces the final report.
//!

use crate::error::{require_file, Error, Result};
use crate::logging::Logger;
use crate::tools::{AverageRequest, Interpolation, Toolset};
use serde::Serialize;
use std::path::PathBuf;
use super::{
    ArtifactKey,
    CorrectionSettings,
    IterationContext,
    IterationNumber,
    JacobianStep,
    MovingImageSource,
    PriorRound,
    RoundArtifact,
    SliceArtifact,
    SliceIndexRange,
    Stage,
    Workspace
};
use super::controller;
use super::convergence::{self, ConvergenceEntry, ConvergenceLog};
use super::pool::WorkerPool;
use super::settings::RegistrationPlan;

/// Post-processing of the final per-slice jacobians.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct JacobianSettings {
    /// Gaussian sigma.
    pub smoothing: Option<f64>,
    /// Output pixel spacing.
    pub resample: Option<f64>
}

pub struct WorkflowSettings {
    pub range: SliceIndexRange,
    /// Total number of iterations (including those completed before resuming).
    pub iterations: IterationNumber,
    /// First iteration to run; all earlier ones must be complete in the workspace.
    pub resume_from: IterationNumber,
    pub plan: RegistrationPlan,
    pub correction: CorrectionSettings,
    pub moving_source: MovingImageSource,
    pub interpolation: Interpolation,
    pub jacobian: JacobianSettings,
    /// Do not write the workspace layout and reports (the collaborators are expected not to write either).
    pub dry_run: bool
}

/// Written to `final/summary.json`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunSummary {
    pub first_slice: u32,
    pub last_slice: u32,
    pub iterations: IterationNumber,
    pub resumed_from: IterationNumber,
    pub template: PathBuf,
    pub shaped_template: PathBuf,
    pub variance_map: PathBuf,
    pub mean_jacobian: PathBuf,
    pub convergence: Vec<ConvergenceEntry>
}

pub struct Workflow<'a> {
    workspace: &'a Workspace,
    settings: WorkflowSettings,
    tools: Toolset<'a>,
    pool: WorkerPool,
    logger: &'a Logger
}

impl<'a> Workflow<'a> {
    pub fn new(
        workspace: &'a Workspace,
        settings: WorkflowSettings,
        tools: Toolset<'a>,
        pool: WorkerPool,
        logger: &'a Logger
    ) -> Workflow<'a> {
        Workflow{ workspace, settings, tools, pool, logger }
    }

    /// Validates the configuration and the inputs needed by the first iteration to run.
    ///
    /// Returns the record of the last completed iteration when resuming.
    ///
    pub fn preflight(&self) -> Result<Option<PriorRound>> {
        let s = &self.settings;
        if s.iterations == 0 {
            return Err(Error::configuration("number of iterations must be positive"));
        }
        if s.resume_from >= s.iterations {
            return Err(Error::configuration(format!(
                "cannot resume from iteration {}; only {} iteration(s) requested", s.resume_from, s.iterations
            )));
        }
        s.plan.validate(&s.range, s.iterations)?;
        s.correction.validate()?;
        if let Some(mask) = &s.plan.defaults().mask {
            require_file(mask)?;
        }

        if s.resume_from == 0 {
            for slice in s.range.iter() {
                require_file(&self.workspace.input_path(slice))?;
            }
            Ok(None)
        } else if s.dry_run {
            Ok(Some(PriorRound{
                iteration: s.resume_from - 1,
                template: self.workspace.round_artifact(RoundArtifact::Template, s.resume_from - 1),
                shaped_template: self.workspace.round_artifact(RoundArtifact::ShapedTemplate, s.resume_from - 1),
                variance_map: self.workspace.round_artifact(RoundArtifact::VarianceMap, s.resume_from - 1)
            }))
        } else {
            PriorRound::from_workspace(self.workspace, s.resume_from - 1, &s.range, s.moving_source).map(Some)
        }
    }

    pub fn run(&self) -> Result<RunSummary> {
        let s = &self.settings;
        let mut prior = self.preflight()?;
        let report_path = self.workspace.resolve(ArtifactKey::ConvergenceReport);

        let mut log = if s.resume_from > 0 {
            ConvergenceLog::load(&report_path)?.truncated(s.resume_from)
        } else {
            ConvergenceLog::new()
        };
        if !s.dry_run {
            self.workspace.create_layout()?;
        }

        self.logger.info(&format!(
            "Building template from slices {} in {} iteration(s) using {} thread(s).",
            s.range, s.iterations - s.resume_from, self.pool.num_threads()
        ));

        for iteration in s.resume_from..s.iterations {
            if !s.dry_run {
                self.workspace.create_iteration_dir(iteration)?;
            }

            let ctx = IterationContext{
                iteration,
                range: s.range,
                workspace: self.workspace,
                plan: &s.plan,
                correction: s.correction,
                moving_source: s.moving_source,
                interpolation: s.interpolation,
                prior: prior.clone()
            };
            let round = controller::run_iteration(&ctx, self.tools, &self.pool, self.logger)?;

            if let Some(prev) = &prior {
                let entry = convergence::record(
                    self.tools.algebra, prev.iteration, &prev.variance_map, iteration, &round.variance_map
                )?;
                self.logger.info(&format!(
                    "iteration {}: variance map mean square difference = {:.6e}", iteration, entry.mean_square_difference
                ));
                log.append(entry);
            }
            if !s.dry_run {
                log.save(&report_path)?;
            }

            prior = Some(round.to_prior());
        }

        if !log.is_non_increasing(0.0) {
            self.logger.verbose("variance map differences are not decreasing monotonically");
        }

        let last = match prior {
            Some(last) => last,
            None => return Err(Error::configuration("no iterations were run"))
        };
        let mean_jacobian = self.final_jacobians(last.iteration)?;

        let summary = RunSummary{
            first_slice: s.range.first(),
            last_slice: s.range.last(),
            iterations: s.iterations,
            resumed_from: s.resume_from,
            template: last.template,
            shaped_template: last.shaped_template,
            variance_map: last.variance_map,
            mean_jacobian,
            convergence: log.entries().to_vec()
        };
        if !s.dry_run {
            self.save_summary(&summary)?;
        }

        Ok(summary)
    }

    /// Computes the jacobian of every last-iteration forward warp and averages them.
    fn final_jacobians(&self, last_iteration: IterationNumber) -> Result<PathBuf> {
        let stage = Stage::FinalJacobians;
        let s = &self.settings;
        let algebra = self.tools.algebra;
        self.logger.info(&format!("{}", stage));

        let jacobian_of = |slice| -> Result<PathBuf> {
            let key = |step| self.workspace.resolve(ArtifactKey::Jacobian{ slice, step });
            let warp = self.workspace.resolve(
                ArtifactKey::Slice{ kind: SliceArtifact::ForwardWarp, iteration: last_iteration, slice }
            );

            let mut current = key(JacobianStep::Determinant);
            algebra.jacobian(&warp, &current)?;
            if let Some(sigma) = s.jacobian.smoothing {
                let smoothed = key(JacobianStep::Smoothed);
                algebra.smooth(&current, sigma, &smoothed)?;
                current = smoothed;
            }
            if let Some(spacing) = s.jacobian.resample {
                let resampled = key(JacobianStep::Resampled);
                algebra.resample(&current, spacing, &resampled)?;
                current = resampled;
            }

            Ok(current)
        };
        let jacobians = self.pool.map_slices(&s.range, |slice| {
            jacobian_of(slice).map_err(|e| e.in_stage(stage, last_iteration, Some(slice)))
        })?;

        let mean_jacobian = self.workspace.resolve(ArtifactKey::MeanJacobian);
        algebra.average(&AverageRequest{
            inputs: jacobians,
            weights: None,
            normalize: false,
            output: mean_jacobian.clone()
        }).map_err(|e| e.in_stage(stage, last_iteration, None))?;

        Ok(mean_jacobian)
    }

    fn save_summary(&self, summary: &RunSummary) -> Result<()> {
        let path = self.workspace.resolve(ArtifactKey::Summary);
        let contents = serde_json::to_string_pretty(summary)
            .map_err(|e| Error::workspace(&path, std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        std::fs::write(&path, contents).map_err(|e| Error::workspace(&path, e))
    }
}
