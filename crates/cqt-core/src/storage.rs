//! `.cqt` files on disk
//!
//! An [`ExamPackage`] pairs a payload with the file it came from and the
//! password that seals it. Every mutating call re-seals the whole payload
//! with a fresh salt and nonce and replaces the file atomically: the new
//! bytes go to a uniquely named temporary sibling first and are persisted
//! over the target. Concurrent saves of the same file resolve last writer
//! wins, never torn.
//!
//! A change only lands in memory once it is on disk. If sealing or
//! writing fails, the package keeps the payload it had before the call.
//!
//! Not synchronized. One writer per handle; wrap it in a `Mutex` if
//! several threads need it.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::lifecycle::{EvaluationOutcome, SiblingFileBackup};
use crate::payload::{Payload, Question, ResponseKey};
use crate::response::{Answer, Response};
use crate::scoring::{MarkingScheme, ScoreReport};
use crate::sketch::SketchCanvas;
use crate::Result;

/// An open, decrypted exam package bound to its file
pub struct ExamPackage {
    path: PathBuf,
    password: SecretString,
    payload: Payload,
    keys: Vec<ResponseKey>,
    canvas: SketchCanvas,
}

impl ExamPackage {
    /// Seal `payload` into a new file at `path`
    pub fn create(path: impl Into<PathBuf>, payload: Payload, password: SecretString) -> Result<Self> {
        let package = Self::bind(path.into(), payload, password);
        package.save()?;
        tracing::info!(
            path = %package.path.display(),
            questions = package.payload.questions().len(),
            "created exam package"
        );
        Ok(package)
    }

    /// Read and decrypt the package at `path`
    pub fn open(path: impl Into<PathBuf>, password: SecretString) -> Result<Self> {
        let path = path.into();
        let bytes = fs::read(&path)?;
        let plaintext = cqt_crypto::decrypt(&bytes, password.expose_secret())?;
        let payload = Payload::from_slice(&plaintext)?;
        payload.warn_duplicate_keys();

        let package = Self::bind(path, payload, password);
        tracing::info!(
            path = %package.path.display(),
            questions = package.payload.questions().len(),
            evaluated = package.payload.is_evaluated(),
            "opened exam package"
        );
        Ok(package)
    }

    fn bind(path: PathBuf, payload: Payload, password: SecretString) -> Self {
        let keys = payload.response_keys();
        Self {
            path,
            password,
            payload,
            keys,
            canvas: SketchCanvas::default(),
        }
    }

    /// Use a different blank-canvas reference for sketches
    pub fn with_canvas(mut self, canvas: SketchCanvas) -> Self {
        self.canvas = canvas;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// Response keys, fixed when the package was opened
    pub fn keys(&self) -> &[ResponseKey] {
        &self.keys
    }

    /// Questions paired with their keys and current responses
    pub fn entries(&self) -> impl Iterator<Item = (&ResponseKey, &Question, Option<&Response>)> {
        self.keys
            .iter()
            .zip(self.payload.questions())
            .map(move |(key, q)| (key, q, self.payload.response(key.as_str())))
    }

    /// Re-seal the payload and atomically replace the file
    pub fn save(&self) -> Result<()> {
        self.seal(&self.payload)
    }

    fn seal(&self, payload: &Payload) -> Result<()> {
        let plaintext = Zeroizing::new(payload.to_vec()?);
        let envelope = cqt_crypto::encrypt(&plaintext, self.password.expose_secret())?;
        write_atomic(&self.path, &envelope.to_vec()?)?;
        tracing::debug!(path = %self.path.display(), "saved exam package");
        Ok(())
    }

    /// Apply `change` to a copy, persist it, then adopt it
    fn commit<T>(&mut self, change: impl FnOnce(&mut Payload) -> Result<T>) -> Result<T> {
        let mut next = self.payload.clone();
        let value = change(&mut next)?;
        self.seal(&next)?;
        self.payload = next;
        Ok(value)
    }

    pub fn answer(&mut self, key: &str, answer: Answer) -> Result<()> {
        self.commit(|payload| payload.record_response(key, answer))
    }

    pub fn sketch(&mut self, key: &str, sketch_png: Option<String>) -> Result<()> {
        let canvas = self.canvas;
        self.commit(|payload| payload.record_sketch(key, sketch_png, &canvas))
    }

    pub fn toggle_mark(&mut self, key: &str) -> Result<bool> {
        self.commit(|payload| payload.toggle_review_mark(key))
    }

    /// Evaluate and persist
    ///
    /// The file on disk is copied beside itself before the payload
    /// changes. If that copy fails the outcome says so and evaluation
    /// still goes ahead. If the evaluated payload cannot be written, the
    /// package stays unevaluated and the call can be retried.
    pub fn evaluate(&mut self, eval_password: &str) -> Result<EvaluationOutcome> {
        let backup = SiblingFileBackup::new(&self.path);
        self.commit(|payload| Ok(payload.evaluate(eval_password, &backup)?))
    }

    pub fn report(&self, scheme: &MarkingScheme) -> Result<ScoreReport> {
        ScoreReport::compute(&self.payload, scheme)
    }
}

/// Write to a uniquely named temporary sibling, fsync, then persist over `path`
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
