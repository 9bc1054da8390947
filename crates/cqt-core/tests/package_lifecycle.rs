//! End-to-end: export, answer, evaluate, reopen

use std::fs;

use cqt_core::{
    grade, Answer, BackupStatus, EvaluationError, ExamPackage, PackageError, Payload, Question,
    Verdict,
};
use secrecy::SecretString;

fn secret(s: &str) -> SecretString {
    SecretString::new(s.to_string())
}

fn exported(dir: &std::path::Path, name: &str) -> std::path::PathBuf {
    let record = cqt_crypto::hash_password_with("evaluator", b"integration-salt", 2_000);
    let payload = Payload::build("Current Electricity", vec![Question::single_choice(7001, "B")])
        .with_protection(record);
    let path = dir.join(name);
    ExamPackage::create(&path, payload, secret("student")).unwrap();
    path
}

#[test]
fn wrong_choice_is_graded_incorrect_after_evaluation() {
    let dir = tempfile::tempdir().unwrap();
    let path = exported(dir.path(), "mock.cqt");

    let mut package = ExamPackage::open(&path, secret("student")).unwrap();
    package.answer("7001", Answer::choices(&["A"])).unwrap();
    let outcome = package.evaluate("evaluator").unwrap();
    assert!(matches!(outcome.backup, BackupStatus::Created(_)));

    let package = ExamPackage::open(&path, secret("student")).unwrap();
    let payload = package.payload();
    assert!(payload.is_evaluated());
    assert!(payload.evaluated_at().is_some());

    let question = &payload.questions()[0];
    let response = payload.response("7001");
    assert_eq!(response.unwrap().answer(), &Answer::choices(&["A"]));
    assert_eq!(grade(question, response), Verdict::Incorrect);
}

#[test]
fn wrong_evaluation_password_leaves_package_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let path = exported(dir.path(), "mock.cqt");

    let mut package = ExamPackage::open(&path, secret("student")).unwrap();
    package.answer("7001", Answer::choices(&["B"])).unwrap();
    assert!(package.toggle_mark("7001").unwrap());
    let before = package.payload().clone();

    let err = package.evaluate("student").unwrap_err();
    assert!(matches!(
        err,
        PackageError::Evaluation(EvaluationError::IncorrectPassword)
    ));
    assert_eq!(package.payload(), &before);
    assert!(!package.payload().is_evaluated());

    let reopened = ExamPackage::open(&path, secret("student")).unwrap();
    assert_eq!(reopened.payload(), &before);
    assert!(reopened.payload().is_marked("7001"));
}

#[test]
fn evaluated_package_rejects_changes_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = exported(dir.path(), "mock.cqt");

    let mut package = ExamPackage::open(&path, secret("student")).unwrap();
    package.toggle_mark("7001").unwrap();
    package.evaluate("evaluator").unwrap();
    assert!(package.payload().review_marks().is_empty());

    let mut reopened = ExamPackage::open(&path, secret("student")).unwrap();
    assert!(matches!(
        reopened.answer("7001", Answer::choices(&["B"])),
        Err(PackageError::Locked)
    ));
    assert!(matches!(reopened.toggle_mark("7001"), Err(PackageError::Locked)));
}

#[test]
fn tampered_file_cannot_be_opened() {
    let dir = tempfile::tempdir().unwrap();
    let path = exported(dir.path(), "mock.cqt");

    let mut envelope: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    let ciphertext = envelope["ciphertext"].as_str().unwrap().to_string();
    // Swap two base64 characters in the middle of the ciphertext.
    let mut chars: Vec<char> = ciphertext.chars().collect();
    let mid = chars.len() / 2;
    let replacement = if chars[mid] == 'A' { 'B' } else { 'A' };
    chars[mid] = replacement;
    envelope["ciphertext"] = serde_json::Value::from(chars.into_iter().collect::<String>());
    fs::write(&path, serde_json::to_vec(&envelope).unwrap()).unwrap();

    assert!(matches!(
        ExamPackage::open(&path, secret("student")),
        Err(PackageError::Codec(cqt_core::CodecError::Authentication))
    ));
}

#[test]
fn garbage_file_is_a_format_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.cqt");
    fs::write(&path, b"{\"version\": 3, \"salt\": \"\", \"nonce\": \"\", \"ciphertext\": \"\"}").unwrap();

    assert!(matches!(
        ExamPackage::open(&path, secret("student")),
        Err(PackageError::Codec(cqt_core::CodecError::Format(_)))
    ));
}
