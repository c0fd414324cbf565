//! Pipeline error and stage enums.
use std::collections::TryReserveError;

/// Identifies which pipeline component raised an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    /// The color converter (4.A).
    ColorConvert,
    /// The SLIC segmenter (4.B).
    Slic,
    /// The superpixel aggregator (4.C).
    Aggregate,
    /// The clusterer (4.D).
    Cluster,
    /// The merger (4.E).
    Merge,
    /// The layer extractor (4.F).
    Extract,
    /// The pipeline driver itself (4.G), outside any single stage.
    Driver,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ColorConvert => write!(f, "color converter"),
            Self::Slic => write!(f, "SLIC segmenter"),
            Self::Aggregate => write!(f, "superpixel aggregator"),
            Self::Cluster => write!(f, "clusterer"),
            Self::Merge => write!(f, "merger"),
            Self::Extract => write!(f, "layer extractor"),
            Self::Driver => write!(f, "pipeline driver"),
        }
    }
}

/// Error produced by any stage of the segmentation pipeline.
///
/// Every variant carries the [`Stage`] that raised it, per the error
/// taxonomy: dimensions/parameters out of range and buffer length mismatches
/// are `InvalidInput`; resource/allocation/dispatch failures are
/// `BackendFailure`; cooperative cancellation between stages is `Canceled`;
/// an invariant violated despite the guard meant to prevent it is
/// `Internal` and is treated as a bug, never retried.
#[derive(Clone, Debug)]
pub enum PipelineError {
    /// Dimensions nonpositive, buffer length mismatch, parameter out of
    /// range, `K > N`, or `nSegments > W*H`.
    InvalidInput {
        /// Stage that rejected the input.
        stage: Stage,
        /// Human-readable detail.
        message: String,
    },
    /// Compute resource unavailable, allocation failed, or a dispatched
    /// kernel/pass failed.
    BackendFailure {
        /// Stage that failed.
        stage: Stage,
        /// Human-readable detail.
        message: String,
    },
    /// Cooperative cancellation observed at a stage boundary.
    Canceled {
        /// Stage that was about to run when cancellation was observed.
        stage: Stage,
    },
    /// An invariant the pipeline guarantees was violated. Indicates a bug,
    /// never retried.
    Internal {
        /// Stage in which the invariant broke.
        stage: Stage,
        /// Human-readable detail.
        message: String,
    },
}

impl PipelineError {
    /// Construct an `InvalidInput` error.
    pub fn invalid_input(stage: Stage, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            stage,
            message: message.into(),
        }
    }

    /// Construct a `BackendFailure` error.
    pub fn backend_failure(stage: Stage, message: impl Into<String>) -> Self {
        Self::BackendFailure {
            stage,
            message: message.into(),
        }
    }

    /// Construct an `Internal` error.
    pub fn internal(stage: Stage, message: impl Into<String>) -> Self {
        Self::Internal {
            stage,
            message: message.into(),
        }
    }

    /// The stage that raised this error.
    pub fn stage(&self) -> Stage {
        match self {
            Self::InvalidInput { stage, .. }
            | Self::BackendFailure { stage, .. }
            | Self::Canceled { stage }
            | Self::Internal { stage, .. } => *stage,
        }
    }

    /// Wrap a failed buffer reservation as a `BackendFailure` for `stage`.
    pub fn from_reserve(stage: Stage, error: TryReserveError) -> Self {
        Self::BackendFailure {
            stage,
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput { stage, message } => {
                write!(f, "invalid input in {stage}: {message}")
            }
            Self::BackendFailure { stage, message } => {
                write!(f, "backend failure in {stage}: {message}")
            }
            Self::Canceled { stage } => write!(f, "canceled before {stage}"),
            Self::Internal { stage, message } => {
                write!(f, "internal invariant violated in {stage}: {message}")
            }
        }
    }
}

impl std::error::Error for PipelineError {}

/// Extension trait making `try_reserve`-style calls ergonomic with `?`
/// inside a stage whose errors all carry the same [`Stage`] tag.
pub(crate) trait ReserveExt<T> {
    fn stage_err(self, stage: Stage) -> Result<T, PipelineError>;
}

impl<T> ReserveExt<T> for Result<T, TryReserveError> {
    fn stage_err(self, stage: Stage) -> Result<T, PipelineError> {
        self.map_err(|e| PipelineError::from_reserve(stage, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_stage_name() {
        let err = PipelineError::invalid_input(Stage::Slic, "nSegments > W*H");
        assert_eq!(
            err.to_string(),
            "invalid input in SLIC segmenter: nSegments > W*H"
        );
        assert_eq!(err.stage(), Stage::Slic);
    }

    #[test]
    fn canceled_has_no_message() {
        let err = PipelineError::Canceled {
            stage: Stage::Cluster,
        };
        assert_eq!(err.to_string(), "canceled before clusterer");
    }
}
