//
// slicetemplate - Unbiased group template construction from slice images
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Error type of the whole tool.
//!

use crate::template::{IterationNumber, SliceIndex, Stage};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A run parameter is missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An expected slice, settings, transform or prior-round file does not exist.
    #[error("input not found: {}", .0.display())]
    InputNotFound(PathBuf),

    /// A registration or image-algebra invocation failed or did not produce its declared output.
    #[error("{tool} failed: {reason}")]
    ExternalTool {
        tool: String,
        reason: String
    },

    #[error("cannot create or write {}: {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error
    },

    /// Context added by the iteration controller.
    #[error("stage {stage} failed in iteration {iteration}{}: {source}", slice_label(.slice))]
    Stage {
        stage: Stage,
        iteration: IterationNumber,
        slice: Option<SliceIndex>,
        #[source]
        source: Box<Error>
    }
}

pub type Result<T> = std::result::Result<T, Error>;

fn slice_label(slice: &Option<SliceIndex>) -> String {
    match slice {
        Some(index) => format!(" (slice {})", index),
        None => String::new()
    }
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Error {
        Error::Configuration(msg.into())
    }

    pub fn tool(tool: impl Into<String>, reason: impl Into<String>) -> Error {
        Error::ExternalTool{ tool: tool.into(), reason: reason.into() }
    }

    pub fn workspace(path: &Path, source: std::io::Error) -> Error {
        Error::Workspace{ path: path.to_path_buf(), source }
    }

    /// Wraps the error with the stage, iteration and slice it occurred in.
    pub fn in_stage(self, stage: Stage, iteration: IterationNumber, slice: Option<SliceIndex>) -> Error {
        Error::Stage{ stage, iteration, slice, source: Box::new(self) }
    }

    /// Returns the innermost error (below all stage wrappers).
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Stage{ source, .. } => source.root_cause(),
            other => other
        }
    }
}

/// Fails with `InputNotFound` if `path` does not exist.
pub fn require_file(path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(Error::InputNotFound(path.to_path_buf()))
    }
}
