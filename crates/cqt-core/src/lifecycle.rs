//! Response recording and the one-way evaluation transition
//!
//! ```text
//!   Fresh (evaluated = false) ──evaluate(password)──▶ Evaluated
//! ```
//!
//! While fresh, responses and review marks may change freely. Evaluation
//! checks the evaluation password, copies the persisted file aside, then
//! sets `evaluated`, stamps `evaluated_at`, and clears every review mark.
//! There is no way back.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::payload::Payload;
use crate::response::{Answer, Response};
use crate::sketch::SketchCanvas;
use crate::{EvaluationError, PackageError, Result};

/// Makes a safety copy of the persisted package before evaluation
pub trait PackageBackup {
    /// Copy the file as it is on disk now; returns where the copy went
    fn backup(&self) -> io::Result<PathBuf>;
}

impl<F> PackageBackup for F
where
    F: Fn() -> io::Result<PathBuf>,
{
    fn backup(&self) -> io::Result<PathBuf> {
        self()
    }
}

/// Copies `<dir>/<stem>.cqt` to `<dir>/<stem>.pre-eval-<UTC timestamp>.cqt`
#[derive(Debug, Clone)]
pub struct SiblingFileBackup {
    source: PathBuf,
}

impl SiblingFileBackup {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Backup path for a copy taken at `at`
    ///
    /// If that name is taken when the copy is made, `-1`, `-2`, ... is
    /// appended to the stamp. An earlier copy is never overwritten.
    pub fn backup_path(&self, at: DateTime<Utc>) -> PathBuf {
        self.candidate(at, 0)
    }

    fn candidate(&self, at: DateTime<Utc>, n: u32) -> PathBuf {
        let dir = self.source.parent().unwrap_or_else(|| Path::new(""));
        let stem = self
            .source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "package".to_string());
        let stamp = at.format("%Y%m%dT%H%M%SZ");

        match n {
            0 => dir.join(format!("{}.pre-eval-{}.cqt", stem, stamp)),
            n => dir.join(format!("{}.pre-eval-{}-{}.cqt", stem, stamp, n)),
        }
    }

    /// Copy the source to the first backup name that can be created fresh
    pub(crate) fn backup_at(&self, at: DateTime<Utc>) -> io::Result<PathBuf> {
        let mut source = fs::File::open(&self.source)?;
        let mut n = 0;
        loop {
            let target = self.candidate(at, n);
            let mut copy = match OpenOptions::new().write(true).create_new(true).open(&target) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    n += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Err(e) = io::copy(&mut source, &mut copy).and_then(|_| copy.sync_all()) {
                let _ = fs::remove_file(&target);
                return Err(e);
            }
            return Ok(target);
        }
    }
}

impl PackageBackup for SiblingFileBackup {
    fn backup(&self) -> io::Result<PathBuf> {
        self.backup_at(Utc::now())
    }
}

/// What happened to the safety copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupStatus {
    Created(PathBuf),
    /// Evaluation went ahead without a copy; the caller should warn
    Failed(String),
}

/// Result of a successful evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationOutcome {
    pub evaluated_at: DateTime<Utc>,
    pub backup: BackupStatus,
}

impl EvaluationOutcome {
    pub fn backup_created(&self) -> bool {
        matches!(self.backup, BackupStatus::Created(_))
    }
}

impl Payload {
    fn ensure_mutable(&self, key: &str) -> Result<()> {
        if self.evaluated {
            return Err(PackageError::Locked);
        }
        if self.question(key).is_none() {
            return Err(PackageError::UnknownQuestion(key.to_string()));
        }
        Ok(())
    }

    /// Set the answer for `key`, keeping any sketch already attached
    ///
    /// Recording [`Answer::empty`] clears the answer; the entry stays.
    pub fn record_response(&mut self, key: &str, answer: Answer) -> Result<()> {
        self.ensure_mutable(key)?;
        let updated = match self.responses.get(key) {
            Some(existing) => existing.with_answer(answer),
            None => Response::new(answer, None),
        };
        self.responses.insert(key.to_string(), updated);
        Ok(())
    }

    /// Attach, replace, or clear (`None`) the sketch for `key`
    ///
    /// Sketches identical to a blank `canvas` are stored as `None`.
    pub fn record_sketch(
        &mut self,
        key: &str,
        sketch_png: Option<String>,
        canvas: &SketchCanvas,
    ) -> Result<()> {
        self.ensure_mutable(key)?;
        let sketch = canvas.normalize(sketch_png)?;
        let updated = match self.responses.get(key) {
            Some(existing) => existing.with_sketch(sketch),
            None => Response::new(Answer::empty(), sketch),
        };
        self.responses.insert(key.to_string(), updated);
        Ok(())
    }

    /// Flip the review mark for `key`; returns whether it is now marked
    pub fn toggle_review_mark(&mut self, key: &str) -> Result<bool> {
        self.ensure_mutable(key)?;
        if self.review_marks.remove(key).is_some() {
            Ok(false)
        } else {
            self.review_marks.insert(key.to_string(), true);
            Ok(true)
        }
    }

    /// Move to the evaluated state
    ///
    /// The password is checked before anything else happens. On success
    /// `backup` runs before the payload changes; a failed backup does not
    /// stop evaluation but is reported in the outcome.
    pub fn evaluate(
        &mut self,
        eval_password: &str,
        backup: &dyn PackageBackup,
    ) -> std::result::Result<EvaluationOutcome, EvaluationError> {
        if self.evaluated {
            return Err(EvaluationError::AlreadyEvaluated);
        }
        let record = self
            .evaluation_protection
            .as_ref()
            .ok_or(EvaluationError::NoProtection)?;
        if !cqt_crypto::verify_password(eval_password, record) {
            tracing::warn!(list = %self.list_name, "evaluation refused: incorrect password");
            return Err(EvaluationError::IncorrectPassword);
        }

        let backup = match backup.backup() {
            Ok(path) => {
                tracing::info!(backup = %path.display(), "pre-evaluation backup written");
                BackupStatus::Created(path)
            }
            Err(e) => {
                tracing::warn!(error = %e, "pre-evaluation backup failed; evaluating without a copy");
                BackupStatus::Failed(e.to_string())
            }
        };

        let evaluated_at = Utc::now();
        self.evaluated = true;
        self.evaluated_at = Some(evaluated_at);
        self.review_marks.clear();

        tracing::info!(list = %self.list_name, %evaluated_at, "package evaluated");
        Ok(EvaluationOutcome {
            evaluated_at,
            backup,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Question;
    use crate::sketch::tests::{blank_png, drawn_png};
    use std::cell::Cell;

    const EVAL: &str = "reveal-answers";

    fn payload() -> Payload {
        let record = cqt_crypto::hash_password_with(EVAL, b"fixed-test-salt!", 1_000);
        Payload::build(
            "Electrostatics",
            vec![
                Question::single_choice(101, "B"),
                Question::multiple_choice(102, &["A", "C"]),
                Question::numerical(103, "9.8"),
            ],
        )
        .with_protection(record)
    }

    fn no_backup() -> io::Result<PathBuf> {
        Ok(PathBuf::from("backup.cqt"))
    }

    #[test]
    fn test_record_and_overwrite() {
        let mut p = payload();
        p.record_response("101", Answer::choices(&["A"])).unwrap();
        p.record_response("101", Answer::choices(&["B"])).unwrap();
        assert_eq!(p.response("101").unwrap().answer(), &Answer::choices(&["B"]));
        assert_eq!(p.responses().len(), 1);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut p = payload();
        assert!(matches!(
            p.record_response("999", Answer::text("1")),
            Err(PackageError::UnknownQuestion(_))
        ));
        assert!(matches!(
            p.toggle_review_mark("idx_0"),
            Err(PackageError::UnknownQuestion(_))
        ));
    }

    #[test]
    fn test_sketch_and_answer_are_independent() {
        let canvas = SketchCanvas::default();
        let mut p = payload();
        let drawing = drawn_png(16, 16);

        p.record_sketch("103", Some(drawing.clone()), &canvas).unwrap();
        p.record_response("103", Answer::text("9.8")).unwrap();
        assert_eq!(
            p.response("103").unwrap().extract(),
            (&Answer::text("9.8"), Some(drawing.as_str()))
        );

        p.record_sketch("103", Some(blank_png(16, 16)), &canvas).unwrap();
        assert_eq!(
            p.response("103").unwrap().extract(),
            (&Answer::text("9.8"), None)
        );
    }

    #[test]
    fn test_toggle_review_mark() {
        let mut p = payload();
        assert!(p.toggle_review_mark("102").unwrap());
        assert!(p.is_marked("102"));
        assert!(!p.toggle_review_mark("102").unwrap());
        assert!(!p.is_marked("102"));
        assert!(p.review_marks().is_empty());
    }

    #[test]
    fn test_evaluate_locks_and_clears_marks() {
        let mut p = payload();
        p.record_response("101", Answer::choices(&["A"])).unwrap();
        p.toggle_review_mark("102").unwrap();

        let outcome = p.evaluate(EVAL, &no_backup).unwrap();
        assert!(outcome.backup_created());
        assert!(p.is_evaluated());
        assert_eq!(p.evaluated_at(), Some(outcome.evaluated_at));
        assert!(p.review_marks().is_empty());
        assert_eq!(p.response("101").unwrap().answer(), &Answer::choices(&["A"]));

        assert!(matches!(
            p.record_response("101", Answer::choices(&["B"])),
            Err(PackageError::Locked)
        ));
        assert!(matches!(
            p.record_sketch("101", None, &SketchCanvas::default()),
            Err(PackageError::Locked)
        ));
        assert!(matches!(p.toggle_review_mark("101"), Err(PackageError::Locked)));
        assert_eq!(
            p.evaluate(EVAL, &no_backup),
            Err(EvaluationError::AlreadyEvaluated)
        );
        assert_eq!(p.evaluated_at(), Some(outcome.evaluated_at));
    }

    #[test]
    fn test_wrong_password_changes_nothing() {
        let mut p = payload();
        p.record_response("101", Answer::choices(&["A"])).unwrap();
        p.toggle_review_mark("103").unwrap();
        let before = p.clone();

        let called = Cell::new(false);
        let spy = || {
            called.set(true);
            no_backup()
        };
        assert_eq!(
            p.evaluate("guess", &spy),
            Err(EvaluationError::IncorrectPassword)
        );
        assert!(!called.get(), "backup must not run before the password check");
        assert_eq!(p, before);
    }

    #[test]
    fn test_unprotected_payload_cannot_be_evaluated() {
        let mut p = Payload::build("Open", vec![Question::numerical(1, "2")]);
        assert_eq!(
            p.evaluate("anything", &no_backup),
            Err(EvaluationError::NoProtection)
        );
        assert!(!p.is_evaluated());
    }

    #[test]
    fn test_backup_failure_is_reported_not_fatal() {
        let mut p = payload();
        let failing = || -> io::Result<PathBuf> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only medium"))
        };
        let outcome = p.evaluate(EVAL, &failing).unwrap();
        assert!(p.is_evaluated());
        assert!(matches!(outcome.backup, BackupStatus::Failed(ref msg) if msg.contains("read-only")));
    }

    #[test]
    fn test_sibling_backup_copies_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("mock-test.cqt");
        fs::write(&source, b"{\"version\":1}").unwrap();

        let backup = SiblingFileBackup::new(&source);
        let first = backup.backup().unwrap();
        let second = backup.backup().unwrap();

        assert_ne!(first, second);
        assert_eq!(first.parent(), Some(dir.path()));
        let name = first.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("mock-test.pre-eval-"));
        assert!(name.ends_with(".cqt"));
        assert_eq!(fs::read(&first).unwrap(), b"{\"version\":1}");
        assert_eq!(fs::read(&source).unwrap(), b"{\"version\":1}");
    }

    #[test]
    fn test_sibling_backup_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let backup = SiblingFileBackup::new(dir.path().join("gone.cqt"));
        assert!(backup.backup().is_err());
    }

    #[test]
    fn test_sibling_backup_never_overwrites_existing_copy() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("paper.cqt");
        fs::write(&source, b"current").unwrap();
        let backup = SiblingFileBackup::new(&source);
        let at = Utc::now();

        fs::write(backup.backup_path(at), b"older copy").unwrap();
        let made = backup.backup_at(at).unwrap();

        assert_ne!(made, backup.backup_path(at));
        assert!(made.to_string_lossy().ends_with("-1.cqt"));
        assert_eq!(fs::read(backup.backup_path(at)).unwrap(), b"older copy");
        assert_eq!(fs::read(&made).unwrap(), b"current");
    }

    #[test]
    fn test_concurrent_backups_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("paper.cqt");
        fs::write(&source, b"answers").unwrap();
        let backup = SiblingFileBackup::new(&source);
        let at = Utc::now();

        let mut made: Vec<PathBuf> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8).map(|_| s.spawn(|| backup.backup_at(at))).collect();
            handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect()
        });
        made.sort();
        made.dedup();

        assert_eq!(made.len(), 8);
        for path in &made {
            assert_eq!(fs::read(path).unwrap(), b"answers");
        }
    }
}
