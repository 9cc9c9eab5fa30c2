//
// slicetemplate - Unbiased group template construction from slice images
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Convergence tracking: differences between variance maps of consecutive iterations.
//!

use crate::error::{Error, Result};
use crate::tools::ImageAlgebra;
use crate::utils;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use super::IterationNumber;

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct ConvergenceEntry {
    pub from: IterationNumber,
    pub to: IterationNumber,
    pub mean_square_difference: f64
}

/// Append-only sequence of entries, ordered by `to`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConvergenceLog {
    entries: Vec<ConvergenceEntry>
}

/// Compares the variance maps of iterations `from` and `to`.
pub fn record(
    algebra: &dyn ImageAlgebra,
    from: IterationNumber,
    from_variance_map: &Path,
    to: IterationNumber,
    to_variance_map: &Path
) -> Result<ConvergenceEntry> {
    let mean_square_difference = algebra.mean_square_difference(from_variance_map, to_variance_map)?;

    Ok(ConvergenceEntry{ from, to, mean_square_difference })
}

impl ConvergenceLog {
    pub fn new() -> ConvergenceLog { ConvergenceLog{ entries: vec![] } }

    pub fn entries(&self) -> &[ConvergenceEntry] { &self.entries }

    pub fn append(&mut self, entry: ConvergenceEntry) {
        assert!(entry.from < entry.to);
        assert!(self.entries.last().map_or(true, |last| last.to < entry.to));
        self.entries.push(entry);
    }

    /// Keeps only entries produced before iteration `iteration` started.
    pub fn truncated(mut self, iteration: IterationNumber) -> ConvergenceLog {
        self.entries.retain(|e| e.to < iteration);
        self
    }

    /// Returns `true` if every entry is not greater than its predecessor by more than `tolerance`.
    pub fn is_non_increasing(&self, tolerance: f64) -> bool {
        self.entries.windows(2).all(|w| w[1].mean_square_difference <= w[0].mean_square_difference + tolerance)
    }

    /// Reads a report written by `save`; a missing file gives an empty log.
    pub fn load(path: &Path) -> Result<ConvergenceLog> {
        if !path.exists() { return Ok(ConvergenceLog::new()); }

        let contents = std::fs::read_to_string(path).map_err(|e| Error::workspace(path, e))?;
        let invalid = |line: &str| Error::configuration(
            format!("invalid convergence report {}: \"{}\"", path.display(), line)
        );

        let lines = utils::list_section(&contents).ok_or_else(|| invalid("no list"))?;
        let mut log = ConvergenceLog::new();
        for line in lines {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() != 3 { return Err(invalid(line)); }

            let from = tokens[0].parse::<IterationNumber>().map_err(|_| invalid(line))?;
            let to = tokens[1].parse::<IterationNumber>().map_err(|_| invalid(line))?;
            let mean_square_difference = tokens[2].parse::<f64>().map_err(|_| invalid(line))?;
            if from >= to || log.entries.last().map_or(false, |last| last.to >= to) {
                return Err(invalid(line));
            }
            log.append(ConvergenceEntry{ from, to, mean_square_difference });
        }

        Ok(log)
    }

    /// Overwrites existing file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut file = std::fs::OpenOptions::new().write(true).create(true).truncate(true).open(path)
            .map_err(|e| Error::workspace(path, e))?;

        let mut contents = format!("{}\n\n", crate::VERSION_STRING.trim());
        contents.push_str("Mean square difference of variance maps of consecutive iterations.\n");
        contents.push_str("Columns: previous iteration, iteration, value.\n\n");
        contents.push_str(utils::BEGIN_LIST);
        contents.push('\n');
        for entry in &self.entries {
            contents.push_str(&format!("{} {} {:e}\n", entry.from, entry.to, entry.mean_square_difference));
        }

        file.write_all(contents.as_bytes()).map_err(|e| Error::workspace(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(from: u32, to: u32, value: f64) -> ConvergenceEntry {
        ConvergenceEntry{ from, to, mean_square_difference: value }
    }

    #[test]
    fn given_saved_log_load_returns_same_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("convergence.txt");
        let mut log = ConvergenceLog::new();
        log.append(entry(0, 1, 0.5));
        log.append(entry(1, 2, 0.125));
        log.save(&path).unwrap();

        assert_eq!(log, ConvergenceLog::load(&path).unwrap());
    }

    #[test]
    fn given_resume_keep_entries_of_completed_iterations() {
        let mut log = ConvergenceLog::new();
        log.append(entry(0, 1, 0.5));
        log.append(entry(1, 2, 0.25));
        log.append(entry(2, 3, 0.125));

        let truncated = log.truncated(3);
        assert_eq!(&[entry(0, 1, 0.5), entry(1, 2, 0.25)], truncated.entries());
    }

    #[test]
    fn given_decreasing_values_trend_is_non_increasing() {
        let mut log = ConvergenceLog::new();
        log.append(entry(0, 1, 0.5));
        log.append(entry(1, 2, 0.2));
        log.append(entry(2, 3, 0.21));
        assert!(log.is_non_increasing(0.02));
        assert!(!log.is_non_increasing(0.0));
    }

    #[test]
    fn when_report_malformed_fail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("convergence.txt");
        std::fs::write(&path, "header\nBEGIN LIST\n0 1\n").unwrap();
        assert!(matches!(ConvergenceLog::load(&path), Err(Error::Configuration(_))));

        std::fs::write(&path, "BEGIN LIST\n1 2 0.5\n0 1 0.5\n").unwrap();
        assert!(ConvergenceLog::load(&path).is_err());
    }

    #[test]
    fn when_report_missing_start_empty() {
        assert!(ConvergenceLog::load(Path::new("/nonexistent/convergence.txt")).unwrap().entries().is_empty());
    }
}
