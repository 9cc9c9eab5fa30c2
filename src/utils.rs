//
// slicetemplate - Unbiased group template construction from slice images
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Utilities.
//!

/// Marker placed before the list of entries in text reports.
pub const BEGIN_LIST: &str = "BEGIN LIST";

/// Returns `true` if `pattern` contains a run of '#' characters to be replaced by a slice index.
pub fn has_index_placeholder(pattern: &str) -> bool {
    pattern.contains('#')
}

/// Replaces the first run of '#' characters in `pattern` with `index`, zero-padded to the run's length.
///
/// E.g. "data/slice_####.nii.gz" and 7 give "data/slice_0007.nii.gz". Longer indices are not truncated.
///
pub fn expand_index_pattern(pattern: &str, index: u32) -> String {
    match pattern.find('#') {
        None => pattern.to_string(),
        Some(start) => {
            let run_len = pattern[start..].chars().take_while(|&c| c == '#').count();
            format!("{}{:0width$}{}", &pattern[..start], index, &pattern[start + run_len..], width = run_len)
        }
    }
}

/// Returns the non-empty lines following `BEGIN_LIST`; everything before it is ignored.
///
/// Returns `None` if there is no `BEGIN_LIST` line.
///
pub fn list_section<'a>(contents: &'a str) -> Option<Vec<&'a str>> {
    let mut lines = contents.lines();
    lines.by_ref().find(|line| line.trim() == BEGIN_LIST)?;

    Some(lines.map(|line| line.trim()).filter(|line| !line.is_empty()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_placeholder_replace_with_padded_index() {
        assert_eq!("data/slice_0007.nii.gz", expand_index_pattern("data/slice_####.nii.gz", 7));
        assert_eq!("s12345.fits", expand_index_pattern("s##.fits", 12345));
        assert_eq!("a_3_#.fits", expand_index_pattern("a_#_#.fits", 3));
        assert!(!has_index_placeholder("slice.fits"));
    }

    #[test]
    fn given_report_return_lines_after_marker() {
        let contents = "slicetemplate 0.1.0\nsome ignored text\nBEGIN LIST\n0 1 0.5\n\n1 2 0.25\n";
        assert_eq!(Some(vec!["0 1 0.5", "1 2 0.25"]), list_section(contents));
    }

    #[test]
    fn when_marker_missing_return_none() {
        assert_eq!(None, list_section("0 1 0.5\n"));
    }
}
