//
// slicetemplate - Unbiased group template construction from slice images
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Logger struct.
//!

use strum::IntoEnumIterator;

#[derive(Copy, Clone, Debug, strum_macros::EnumIter, PartialEq)]
pub enum Level {
    Quiet,
    Info,
    Verbose
}

impl From<Level> for &str {
    fn from(level: Level) -> &'static str {
        match level {
            Level::Quiet   => "quiet",
            Level::Info    => "info",
            Level::Verbose => "verbose"
        }
    }
}

impl std::str::FromStr for Level {
    type Err = ();
    fn from_str(s: &str) -> Result<Level, ()> {
        for level in Level::iter() {
            if s == Into::<&str>::into(level) {
                return Ok(level);
            }
        }

        Err(())
    }
}

/// Shared by reference between worker threads; messages of one call are printed in one piece.
pub struct Logger {
    level: Level
}

impl Logger {
    pub fn new(level: Level) -> Logger { Logger{ level } }

    pub fn info(&self, msg: &str) {
        if self.level as i32 >= Level::Info as i32 {
            println!("{}", msg);
        }
    }

    pub fn verbose(&self, msg: &str) {
        if self.level as i32 >= Level::Verbose as i32 {
            println!("{}", msg);
        }
    }

    /// Printed regardless of level.
    pub fn error(&self, msg: &str) {
        eprintln!("{}", msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_level_names_parse_all_levels() {
        for level in Level::iter() {
            assert_eq!(Ok(level), Into::<&str>::into(level).parse::<Level>());
        }
    }

    #[test]
    fn when_unknown_level_fail() {
        assert!("loud".parse::<Level>().is_err());
    }
}
