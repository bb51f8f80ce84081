// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Process exit codes for the CLI wrappers: 0 success, 1 generic failure,
//! 2 invalid configuration.

/// The exit codes the pipeline binaries emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    Success = 0,
    Failure = 1,
    InvalidConfiguration = 2,
}

impl ExitCode {
    /// Numeric code handed to the OS
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.code())
    }
}

/// Maps an application result to an exit code. `is_config_error` lets the
/// caller classify its error type without this crate depending on it.
pub fn result_to_exit_code<T, E>(
    result: &Result<T, E>,
    is_config_error: impl Fn(&E) -> bool,
) -> ExitCode {
    match result {
        Ok(_) => ExitCode::Success,
        Err(e) if is_config_error(e) => ExitCode::InvalidConfiguration,
        Err(_) => ExitCode::Failure,
    }
}
