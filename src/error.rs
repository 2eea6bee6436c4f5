//! Domain-specific error types for the execution engine.
//!
//! Typed errors enable callers to match on specific failure modes
//! rather than parsing error message strings.

use crate::security::RiskAssessment;
use crate::session::SessionId;

/// Errors that can occur while creating, starting, or managing sessions.
#[derive(Debug, thiserror::Error)]
pub enum SandlotError {
    /// Submission was empty or structurally invalid.
    #[error("Invalid submission: {reason}")]
    Validation { reason: String },

    /// Security gate blocked the submission at creation time.
    #[error("Submission blocked: risk score {score} is at or above block threshold {threshold}")]
    RiskTooHigh {
        score: u8,
        threshold: u8,
        assessment: RiskAssessment,
    },

    /// No registered runtime engine matched the submitted files.
    #[error("No runtime engine matched the submitted files")]
    NoEngineFound,

    /// Session id is unknown (never created or already reaped).
    #[error("Unknown session: {id}")]
    NotFound { id: SessionId },

    /// Dependency install exited non-zero or timed out.
    #[error("Dependency install failed: {detail}")]
    InstallFailed { detail: String },

    /// Build step exited non-zero or timed out.
    #[error("Build failed: {detail}")]
    BuildFailed { detail: String },

    /// The OS could not start the run process.
    #[error("Failed to spawn process: {message}")]
    SpawnFailed { message: String },

    /// The resource monitor terminated the session for exceeding a ceiling.
    #[error("Resource limit exceeded: {cause}")]
    ResourceLimitExceeded { cause: String },

    /// Start was rejected because the concurrency cap is reached.
    #[error("Session capacity reached: {active} active, cap {cap}")]
    Capacity { active: usize, cap: usize },

    /// Workspace staging or cleanup I/O failed.
    #[error("Workspace error: {message}")]
    Workspace { message: String },
}

impl SandlotError {
    /// Creates a `Validation` error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Creates a `RiskTooHigh` error carrying the full assessment.
    pub fn risk_too_high(assessment: RiskAssessment, threshold: u8) -> Self {
        Self::RiskTooHigh {
            score: assessment.score,
            threshold,
            assessment,
        }
    }

    /// Creates a `NotFound` error.
    pub fn not_found(id: SessionId) -> Self {
        Self::NotFound { id }
    }

    /// Creates an `InstallFailed` error.
    pub fn install_failed(detail: impl Into<String>) -> Self {
        Self::InstallFailed {
            detail: detail.into(),
        }
    }

    /// Creates a `BuildFailed` error.
    pub fn build_failed(detail: impl Into<String>) -> Self {
        Self::BuildFailed {
            detail: detail.into(),
        }
    }

    /// Creates a `SpawnFailed` error.
    pub fn spawn_failed(message: impl Into<String>) -> Self {
        Self::SpawnFailed {
            message: message.into(),
        }
    }

    /// Creates a `ResourceLimitExceeded` error.
    pub fn resource_limit(cause: impl Into<String>) -> Self {
        Self::ResourceLimitExceeded {
            cause: cause.into(),
        }
    }

    /// Creates a `Capacity` error.
    pub fn capacity(active: usize, cap: usize) -> Self {
        Self::Capacity { active, cap }
    }

    /// Creates a `Workspace` error.
    pub fn workspace(message: impl Into<String>) -> Self {
        Self::Workspace {
            message: message.into(),
        }
    }

    /// Returns true if the submission was blocked by the security gate.
    pub fn is_risk_too_high(&self) -> bool {
        matches!(self, Self::RiskTooHigh { .. })
    }

    /// Returns true if the session id was unknown.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if no engine matched the submission.
    pub fn is_no_engine_found(&self) -> bool {
        matches!(self, Self::NoEngineFound)
    }

    /// Returns true if the submission failed validation.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Returns true if start was rejected for capacity.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Capacity { .. })
    }
}

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, SandlotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error() {
        let err = SandlotError::validation("no files submitted");
        assert!(err.is_validation());
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "Invalid submission: no files submitted");
    }

    #[test]
    fn test_risk_too_high_error() {
        let assessment = RiskAssessment {
            score: 85,
            findings: Vec::new(),
            recommendations: Vec::new(),
        };
        let err = SandlotError::risk_too_high(assessment, 70);
        assert!(err.is_risk_too_high());
        assert_eq!(
            err.to_string(),
            "Submission blocked: risk score 85 is at or above block threshold 70"
        );
    }

    #[test]
    fn test_not_found_error() {
        let id = SessionId::new();
        let err = SandlotError::not_found(id);
        assert!(err.is_not_found());
        assert!(err.to_string().starts_with("Unknown session: "));
    }

    #[test]
    fn test_install_failed_error() {
        let err = SandlotError::install_failed("npm install exited with code 1");
        assert_eq!(
            err.to_string(),
            "Dependency install failed: npm install exited with code 1"
        );
    }

    #[test]
    fn test_build_failed_error() {
        let err = SandlotError::build_failed("go build timed out after 60 seconds");
        assert_eq!(
            err.to_string(),
            "Build failed: go build timed out after 60 seconds"
        );
    }

    #[test]
    fn test_capacity_error() {
        let err = SandlotError::capacity(4, 4);
        assert!(err.is_capacity());
        assert_eq!(err.to_string(), "Session capacity reached: 4 active, cap 4");
    }

    #[test]
    fn test_error_variants_are_distinct() {
        let validation = SandlotError::validation("empty");
        let no_engine = SandlotError::NoEngineFound;
        let spawn = SandlotError::spawn_failed("ENOENT");

        assert!(validation.is_validation());
        assert!(!validation.is_no_engine_found());

        assert!(no_engine.is_no_engine_found());
        assert!(!no_engine.is_validation());

        assert!(!spawn.is_validation());
        assert!(!spawn.is_no_engine_found());
        assert!(!spawn.is_risk_too_high());
    }
}
