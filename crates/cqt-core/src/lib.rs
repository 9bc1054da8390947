//! CQT Core - exam package payload and evaluation workflow
//!
//! The decrypted payload of a `.cqt` package holds the questions, the
//! candidate's responses and review marks, and the evaluation state.
//! This crate owns the rules for changing it:
//!
//! - responses and review marks can change until the package is evaluated
//! - evaluation needs its own password, separate from the package password
//! - the file on disk is copied aside before the evaluated state is written
//!
//! Rendering and answer collection belong to whatever frontend drives it.

pub mod de;
pub mod lifecycle;
pub mod payload;
pub mod response;
pub mod scoring;
pub mod sketch;
pub mod storage;

pub use lifecycle::{BackupStatus, EvaluationOutcome, PackageBackup, SiblingFileBackup};
pub use payload::{
    EmbeddedImage, Ident, ImageKind, Payload, Question, QuestionOption, QuestionType, ResponseKey,
    PAYLOAD_VERSION,
};
pub use response::{is_answered, Answer, Response};
pub use scoring::{grade, MarkingScheme, Outcome, Progress, QuestionResult, ScoreReport, Verdict};
pub use sketch::{SketchCanvas, SketchError};
pub use storage::ExamPackage;

pub use cqt_crypto::CodecError;

/// Errors from loading, changing, or saving a package
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Package has been evaluated; responses are locked")]
    Locked,

    #[error("No question with key {0}")]
    UnknownQuestion(String),

    #[error("Invalid sketch: {0}")]
    Sketch(#[from] SketchError),

    #[error("Package has not been evaluated yet")]
    NotEvaluated,

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why an evaluation attempt was refused
///
/// The payload is untouched whenever one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvaluationError {
    #[error("No evaluation password is configured for this package")]
    NoProtection,

    #[error("Incorrect evaluation password")]
    IncorrectPassword,

    #[error("Package is already evaluated")]
    AlreadyEvaluated,
}

pub type Result<T> = std::result::Result<T, PackageError>;
