// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A logger for proxy-dial.
//!
//! Uses the env_logger crate that allows control of logging through
//! the RUST_LOG environment variable. Logs go to stderr so stdout only
//! carries stream data.

use chrono::Local;
use env_logger::{Builder, Env, Target};
use log::{Level, Record};
use std::{ffi::OsStr, io::Write, path::Path};

/// Initiating the environment for logging with given prefix.
///
/// `verbose` lowers the default filter from `info` to `debug`.
pub fn init(prefix: &'static str, verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let mut builder = Builder::from_env(Env::default().default_filter_or(default_filter));
    builder.target(Target::Stderr);
    builder.format(move |buf, record| {
        writeln!(
            buf,
            "{} {} {} {}:{} - {}",
            prefix,
            level_to_string(record.level()),
            Local::now().format("%m-%d %H:%M:%S%.3f"),
            format_file(record),
            record.line().unwrap_or(0),
            record.args()
        )
    });
    builder.init();
}

/// Helper function for parsing the file name from given record file path
fn format_file<'a>(record: &'a Record<'a>) -> &'a str {
    match record.file() {
        Some(filepath) => {
            Path::new(filepath).file_name().and_then(OsStr::to_str).unwrap_or("N/A")
        }
        None => "N/A",
    }
}

/// Helper function for translating log levels to string.
fn level_to_string(level: Level) -> &'static str {
    match level {
        Level::Error => "E",
        Level::Warn => "W",
        Level::Info => "I",
        Level::Debug => "D",
        Level::Trace => "T",
    }
}
