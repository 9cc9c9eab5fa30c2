//
// slicetemplate - Unbiased group template construction from slice images
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Iteration controller: the stages of one template construction round.
//!
//! Every stage is a barrier; a stage starts only after all units of the previous one have succeeded.
//! Per-slice units of a stage run on the worker pool.
//!

use crate::error::Result;
use crate::logging::Logger;
use crate::tools::{
    AverageRequest,
    ComposeRequest,
    ImageType,
    Interpolation,
    RegistrationOutputs,
    RegistrationRequest,
    ResliceRequest,
    Toolset,
    TransformChain,
    TransformRef
};
use super::{ArtifactKey, IterationContext, RoundArtifact, RoundArtifacts, SliceArtifact, SliceIndex};
use super::pool::WorkerPool;

/// Stages of an iteration, in execution order; `FinalJacobians` runs once after the last iteration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Stage {
    PreprocessInputs,
    PerSliceRegister,
    Reslice,
    UpdateTemplateShape,
    AverageForwardWarps,
    BiasCorrectMeanWarp,
    AverageInverseWarps,
    ComputeVarianceMap,
    FinalJacobians
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Runs `unit` for every slice; errors get the stage, iteration and slice attached.
fn per_slice<T, F>(stage: Stage, ctx: &IterationContext, pool: &WorkerPool, unit: F) -> Result<Vec<T>>
where T: Send,
      F: Fn(SliceIndex) -> Result<T> + Sync + Send
{
    let iteration = ctx.iteration;
    pool.map_slices(&ctx.range, |slice| unit(slice).map_err(|e| e.in_stage(stage, iteration, Some(slice))))
}

fn whole_round<T, F>(stage: Stage, ctx: &IterationContext, step: F) -> Result<T>
where F: FnOnce() -> Result<T> {
    step().map_err(|e| e.in_stage(stage, ctx.iteration, None))
}

/// Executes all stages of the iteration described by `ctx`.
pub fn run_iteration(
    ctx: &IterationContext,
    tools: Toolset,
    pool: &WorkerPool,
    logger: &Logger
) -> Result<RoundArtifacts> {
    let log_stage = |stage: Stage| logger.info(&format!("iteration {}: {}", ctx.iteration, stage));

    if ctx.prior.is_none() {
        log_stage(Stage::PreprocessInputs);
        preprocess_inputs(ctx, tools, pool)?;
    }

    log_stage(Stage::PerSliceRegister);
    register_slices(ctx, tools, pool)?;

    log_stage(Stage::Reslice);
    reslice_slices(ctx, tools, pool)?;

    log_stage(Stage::UpdateTemplateShape);
    update_template_shape(ctx, tools)?;

    log_stage(Stage::AverageForwardWarps);
    average_forward_warps(ctx, tools)?;

    log_stage(Stage::BiasCorrectMeanWarp);
    bias_correct_mean_warp(ctx, tools)?;

    log_stage(Stage::AverageInverseWarps);
    average_inverse_warps(ctx, tools)?;

    log_stage(Stage::ComputeVarianceMap);
    compute_variance_map(ctx, tools, pool)?;

    Ok(RoundArtifacts{
        iteration: ctx.iteration,
        template: ctx.round_artifact(RoundArtifact::Template),
        shaped_template: ctx.round_artifact(RoundArtifact::ShapedTemplate),
        corrected_forward_warp: ctx.round_artifact(RoundArtifact::CorrectedForwardWarp),
        corrected_inverse_warp: ctx.round_artifact(RoundArtifact::CorrectedInverseWarp),
        mean_affine: ctx.round_artifact(RoundArtifact::MeanAffine),
        variance_map: ctx.round_artifact(RoundArtifact::VarianceMap)
    })
}

/// Bias-corrects the raw slices and averages them into the initial template.
fn preprocess_inputs(ctx: &IterationContext, tools: Toolset, pool: &WorkerPool) -> Result<()> {
    let stage = Stage::PreprocessInputs;

    let preprocessed = per_slice(stage, ctx, pool, |slice| {
        let input = ctx.workspace.input_path(slice);
        crate::error::require_file(&input)?;
        let output = ctx.workspace.resolve(ArtifactKey::Preprocessed{ slice });
        tools.algebra.bias_correct(&input, &output)?;
        Ok(output)
    })?;

    whole_round(stage, ctx, || tools.algebra.average(&AverageRequest{
        inputs: preprocessed,
        weights: None,
        normalize: true,
        output: ctx.workspace.resolve(ArtifactKey::InitialTemplate)
    }))
}

fn register_slices(ctx: &IterationContext, tools: Toolset, pool: &WorkerPool) -> Result<()> {
    let fixed = ctx.fixed_image();
    per_slice(Stage::PerSliceRegister, ctx, pool, |slice| {
        tools.registration.register(&RegistrationRequest{
            fixed: fixed.clone(),
            moving: ctx.moving_image(slice),
            settings: ctx.plan.settings_for(ctx.iteration, slice),
            outputs: RegistrationOutputs{
                forward_warp: ctx.slice_artifact(SliceArtifact::ForwardWarp, slice),
                inverse_warp: ctx.slice_artifact(SliceArtifact::InverseWarp, slice),
                affine: ctx.slice_artifact(SliceArtifact::Affine, slice)
            }
        })
    })?;

    Ok(())
}

fn reslice_slices(ctx: &IterationContext, tools: Toolset, pool: &WorkerPool) -> Result<()> {
    let reference = ctx.fixed_image();
    per_slice(Stage::Reslice, ctx, pool, |slice| {
        tools.registration.reslice(&ResliceRequest{
            input: ctx.moving_image(slice),
            image_type: ImageType::Scalar,
            reference: reference.clone(),
            chain: TransformChain::new(vec![
                TransformRef::warp(ctx.slice_artifact(SliceArtifact::ForwardWarp, slice)),
                TransformRef::affine(ctx.slice_artifact(SliceArtifact::Affine, slice))
            ]),
            interpolation: ctx.interpolation,
            output: ctx.slice_artifact(SliceArtifact::Resliced, slice)
        })
    })?;

    Ok(())
}

fn update_template_shape(ctx: &IterationContext, tools: Toolset) -> Result<()> {
    whole_round(Stage::UpdateTemplateShape, ctx, || tools.algebra.average(&AverageRequest{
        inputs: ctx.slice_artifacts(SliceArtifact::Resliced),
        weights: None,
        normalize: true,
        output: ctx.round_artifact(RoundArtifact::Template)
    }))
}

fn average_forward_warps(ctx: &IterationContext, tools: Toolset) -> Result<()> {
    whole_round(Stage::AverageForwardWarps, ctx, || tools.algebra.average(&AverageRequest{
        inputs: ctx.slice_artifacts(SliceArtifact::ForwardWarp),
        weights: None,
        normalize: false,
        output: ctx.round_artifact(RoundArtifact::MeanForwardWarp)
    }))
}

/// Produces the corrected mean forward warp and the shaped template (next iteration's fixed image).
fn bias_correct_mean_warp(ctx: &IterationContext, tools: Toolset) -> Result<()> {
    let template = ctx.round_artifact(RoundArtifact::Template);
    let scaled_warp = ctx.round_artifact(RoundArtifact::ScaledForwardWarp);
    let mean_affine = ctx.round_artifact(RoundArtifact::MeanAffine);
    let corrected_warp = ctx.round_artifact(RoundArtifact::CorrectedForwardWarp);

    whole_round(Stage::BiasCorrectMeanWarp, ctx, || {
        tools.algebra.scale(
            &ctx.round_artifact(RoundArtifact::MeanForwardWarp),
            ctx.correction.factor,
            &scaled_warp
        )?;

        tools.algebra.average_affine(&ctx.slice_artifacts(SliceArtifact::Affine), &mean_affine)?;

        tools.registration.reslice(&ResliceRequest{
            input: scaled_warp.clone(),
            image_type: ImageType::Vector,
            reference: template.clone(),
            chain: TransformChain::new(vec![TransformRef::inverse_affine(mean_affine.clone())]),
            interpolation: Interpolation::Linear,
            output: corrected_warp.clone()
        })?;

        let mut shaping = vec![TransformRef::inverse_affine(mean_affine.clone())];
        for _ in 0..ctx.correction.repeats {
            shaping.push(TransformRef::warp(corrected_warp.clone()));
        }
        tools.registration.reslice(&ResliceRequest{
            input: template.clone(),
            image_type: ImageType::Scalar,
            reference: template.clone(),
            chain: TransformChain::new(shaping),
            interpolation: ctx.interpolation,
            output: ctx.round_artifact(RoundArtifact::ShapedTemplate)
        })
    })
}

fn average_inverse_warps(ctx: &IterationContext, tools: Toolset) -> Result<()> {
    let mean_inverse_warp = ctx.round_artifact(RoundArtifact::MeanInverseWarp);
    let template = ctx.round_artifact(RoundArtifact::Template);

    whole_round(Stage::AverageInverseWarps, ctx, || {
        tools.algebra.average(&AverageRequest{
            inputs: ctx.slice_artifacts(SliceArtifact::InverseWarp),
            weights: None,
            normalize: false,
            output: mean_inverse_warp.clone()
        })?;

        tools.registration.reslice(&ResliceRequest{
            input: mean_inverse_warp.clone(),
            image_type: ImageType::Vector,
            reference: template.clone(),
            chain: TransformChain::new(vec![TransformRef::affine(ctx.round_artifact(RoundArtifact::MeanAffine))]),
            interpolation: Interpolation::Linear,
            output: ctx.round_artifact(RoundArtifact::CorrectedInverseWarp)
        })
    })
}

/// Variance map: sqrt(Σ|compose(corrected mean inverse warp, forward warp_i)|² / (N - 1)), or 0 for N = 1.
fn compute_variance_map(ctx: &IterationContext, tools: Toolset, pool: &WorkerPool) -> Result<()> {
    let stage = Stage::ComputeVarianceMap;
    let template = ctx.round_artifact(RoundArtifact::Template);
    let corrected_inverse_warp = ctx.round_artifact(RoundArtifact::CorrectedInverseWarp);

    let magnitudes = per_slice(stage, ctx, pool, |slice| {
        let composed = ctx.slice_artifact(SliceArtifact::ComposedWarp, slice);
        tools.registration.compose(&ComposeRequest{
            chain: TransformChain::new(vec![
                TransformRef::warp(corrected_inverse_warp.clone()),
                TransformRef::warp(ctx.slice_artifact(SliceArtifact::ForwardWarp, slice))
            ]),
            reference: template.clone(),
            output: composed.clone()
        })?;

        let magnitude = ctx.slice_artifact(SliceArtifact::WarpMagnitude, slice);
        tools.algebra.vector_magnitude(&composed, &magnitude)?;
        Ok(magnitude)
    })?;

    let variance_map = ctx.round_artifact(RoundArtifact::VarianceMap);
    whole_round(stage, ctx, || {
        if magnitudes.len() == 1 {
            tools.algebra.scale(&magnitudes[0], 0.0, &variance_map)
        } else {
            tools.algebra.rms_aggregate(&magnitudes, (magnitudes.len() - 1) as f64, &variance_map)
        }
    })
}
