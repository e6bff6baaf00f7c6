// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Error types for checkpoint I/O and submission validation.

use std::{fmt, io, path::PathBuf};

/// The error cases for checkpoint store operations.
///
/// Only a subset of these is ever fatal: a [`StoreError::Corrupt`] (or any
/// read failure on a file that exists) aborts [`AggregatorConfig::initialize`],
/// because resuming on top of unknown historical state would silently skew
/// every counter that follows. Write-side failures are swallowed and logged by
/// the callers instead; the next flush retries with the accumulated backlog.
///
/// [`AggregatorConfig::initialize`]: crate::AggregatorConfig::initialize
#[derive(Debug)]
pub enum StoreError {
    /// The underlying filesystem operation failed.
    Io(io::Error),
    /// A checkpoint file exists but could not be decoded.
    Corrupt {
        /// Path of the offending file.
        path: PathBuf,
        /// The decode failure reported by the JSON parser.
        source: serde_json::Error,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => fmt::Display::fmt(err, f),
            Self::Corrupt { path, source } => {
                write!(f, "corrupt checkpoint {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Corrupt { source, .. } => Some(source),
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// The reasons a submission is rejected synchronously, before any counter is
/// touched.
///
/// Rejections are contained to the offending submission: the caller maps them
/// to a non-success response and in-memory state is left exactly as it was.
#[derive(Debug)]
pub enum SubmitError {
    /// The decoded event was not a JSON object.
    NotAnObject,
    /// Every active window requires a submission identifier and the event
    /// carried none.
    MissingSubmissionId {
        /// The event field the identifier is read from.
        field: String,
    },
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnObject => f.write_str("submission body is not a JSON object"),
            Self::MissingSubmissionId { field } => {
                write!(f, "submission is missing the `{field}` identifier field")
            }
        }
    }
}

impl std::error::Error for SubmitError {}
