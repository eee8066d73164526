// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use thiserror::Error;

/// Shared error type for the beam-spot merging crates.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    /// Caller-provided input violates a documented precondition.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The averager was handed a segment with no fits in it. A segment
    /// produced by a correct segmentation is never empty, so this marks a
    /// caller bug rather than bad data.
    #[error("empty segment: {0}")]
    EmptySegment(String),
    /// A numeric computation produced a non-finite intermediate.
    #[error("numerical issue: {0}")]
    NumericalIssue(String),
}

impl MergeError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn empty_segment(message: impl Into<String>) -> Self {
        Self::EmptySegment(message.into())
    }

    pub fn numerical_issue(message: impl Into<String>) -> Self {
        Self::NumericalIssue(message.into())
    }
}
