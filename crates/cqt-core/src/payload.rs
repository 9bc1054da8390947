//! Decrypted package payload
//!
//! The payload is the JSON document sealed inside the envelope. It is
//! owned by one package at a time, mutated in place, and re-sealed whole on
//! every save. Unknown fields are carried through untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use cqt_crypto::PasswordRecord;

use crate::de::{lenient_string, lenient_timestamp, null_as_default, scalar_to_string, string_or_seq};
use crate::response::Response;
use crate::Result;

/// Payload format tag written by [`Payload::build`]
pub const PAYLOAD_VERSION: u32 = 1;

fn default_version() -> u32 {
    PAYLOAD_VERSION
}

/// A question or page identifier as the exporter wrote it
///
/// Whole-valued floats such as `7.0` read as numbers, so a spreadsheet
/// round-trip does not change response keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum Ident {
    Number(i64),
    Text(String),
}

impl<'de> Deserialize<'de> for Ident {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Ok(Ident::Number(i));
                }
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                        Ok(Ident::Number(f as i64))
                    }
                    _ => Ok(Ident::Text(n.to_string())),
                }
            }
            other => scalar_to_string(other)
                .map(Ident::Text)
                .ok_or_else(|| D::Error::custom("expected a number or string identifier")),
        }
    }
}

impl Ident {
    fn is_blank(&self) -> bool {
        matches!(self, Ident::Text(s) if s.trim().is_empty())
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ident::Number(n) => write!(f, "{}", n),
            Ident::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Ident {
    fn from(n: i64) -> Self {
        Ident::Number(n)
    }
}

impl From<i32> for Ident {
    fn from(n: i32) -> Self {
        Ident::Number(i64::from(n))
    }
}

impl From<String> for Ident {
    fn from(s: String) -> Self {
        Ident::Text(s)
    }
}

impl From<&str> for Ident {
    fn from(s: &str) -> Self {
        Ident::Text(s.to_string())
    }
}

/// Stable key that ties a response to its question
///
/// Question id, else `qno_<qno>`, else `idx_<position>`. Computed once
/// when a package is opened so responses never drift to another key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResponseKey(String);

impl ResponseKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResponseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl AsRef<str> for ResponseKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    #[default]
    McqSingle,
    McqMultiple,
    Numerical,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::McqSingle => "mcq_single",
            QuestionType::McqMultiple => "mcq_multiple",
            QuestionType::Numerical => "numerical",
        }
    }

    pub fn is_choice(&self) -> bool {
        !matches!(self, QuestionType::Numerical)
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Question,
    Answer,
}

/// A base64 image embedded in a question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedImage {
    #[serde(default = "default_mime")]
    pub mime: String,
    pub data: String,
}

fn default_mime() -> String {
    "application/octet-stream".to_string()
}

impl EmbeddedImage {
    pub fn new(mime: &str, bytes: &[u8]) -> Self {
        Self {
            mime: mime.to_string(),
            data: STANDARD.encode(bytes),
        }
    }

    pub fn decode(&self) -> std::result::Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(self.data.trim())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
}

/// One exported question with its answer key
///
/// Fixed at export time. The viewer reads it but never changes it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Question {
    #[serde(default)]
    pub question_id: Option<Ident>,
    #[serde(default)]
    pub qno: Option<Ident>,
    #[serde(default)]
    pub page: Option<Ident>,
    #[serde(default)]
    pub question_set_name: Option<String>,
    #[serde(default)]
    pub magazine: Option<String>,
    #[serde(default)]
    pub chapter: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub answer_text: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub question_images: Vec<EmbeddedImage>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub answer_images: Vec<EmbeddedImage>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub options: Vec<QuestionOption>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub question_type: QuestionType,
    #[serde(default, deserialize_with = "string_or_seq")]
    pub correct_options: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub numerical_answer: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Question {
    fn with_type(id: impl Into<Ident>, question_type: QuestionType) -> Self {
        let options = if question_type.is_choice() {
            ["A", "B", "C", "D"]
                .iter()
                .map(|label| QuestionOption {
                    label: label.to_string(),
                    text: String::new(),
                })
                .collect()
        } else {
            Vec::new()
        };
        Self {
            question_id: Some(id.into()),
            question_type,
            options,
            ..Self::default()
        }
    }

    /// Single-answer MCQ with options A-D
    pub fn single_choice(id: impl Into<Ident>, correct: &str) -> Self {
        let mut q = Self::with_type(id, QuestionType::McqSingle);
        q.correct_options = vec![correct.to_string()];
        q
    }

    /// Multiple-answer MCQ with options A-D
    pub fn multiple_choice(id: impl Into<Ident>, correct: &[&str]) -> Self {
        let mut q = Self::with_type(id, QuestionType::McqMultiple);
        q.correct_options = correct.iter().map(|s| s.to_string()).collect();
        q
    }

    /// Numerical-answer question
    pub fn numerical(id: impl Into<Ident>, answer: &str) -> Self {
        let mut q = Self::with_type(id, QuestionType::Numerical);
        q.numerical_answer = answer.to_string();
        q
    }

    /// Response key for this question at `index` in the payload
    pub fn response_key(&self, index: usize) -> ResponseKey {
        if let Some(id) = self.question_id.as_ref().filter(|id| !id.is_blank()) {
            return ResponseKey(id.to_string());
        }
        if let Some(qno) = self.qno.as_ref().filter(|qno| !qno.is_blank()) {
            return ResponseKey(format!("qno_{}", qno));
        }
        ResponseKey(format!("idx_{}", index))
    }

    pub fn images(&self, kind: ImageKind) -> &[EmbeddedImage] {
        match kind {
            ImageKind::Question => &self.question_images,
            ImageKind::Answer => &self.answer_images,
        }
    }

    /// Correct option labels, trimmed, blanks dropped
    pub fn correct_option_set(&self) -> BTreeSet<String> {
        self.correct_options
            .iter()
            .map(|opt| opt.trim())
            .filter(|opt| !opt.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// `{}` on the wire means "no evaluation password"
mod protection {
    use serde::de::Error;
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value;

    use cqt_crypto::PasswordRecord;

    pub fn serialize<S>(value: &Option<PasswordRecord>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(record) => record.serialize(serializer),
            None => serializer.serialize_map(Some(0))?.end(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<PasswordRecord>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(None),
            Value::Object(map) if map.is_empty() => Ok(None),
            other => serde_json::from_value(other).map(Some).map_err(D::Error::custom),
        }
    }
}

/// The decrypted package document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default = "default_version")]
    pub(crate) version: u32,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub(crate) exported_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub(crate) list_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub(crate) questions: Vec<Question>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub(crate) responses: BTreeMap<String, Response>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub(crate) review_marks: BTreeMap<String, bool>,
    #[serde(default, with = "protection")]
    pub(crate) evaluation_protection: Option<PasswordRecord>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub(crate) evaluated: bool,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub(crate) evaluated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub(crate) extra: Map<String, Value>,
}

impl Payload {
    /// New, unanswered, unprotected payload for `questions`
    pub fn build(list_name: &str, questions: Vec<Question>) -> Self {
        let payload = Self {
            version: PAYLOAD_VERSION,
            exported_at: Some(Utc::now()),
            list_name: list_name.to_string(),
            questions,
            responses: BTreeMap::new(),
            review_marks: BTreeMap::new(),
            evaluation_protection: None,
            evaluated: false,
            evaluated_at: None,
            extra: Map::new(),
        };
        payload.warn_duplicate_keys();
        payload
    }

    /// Attach evaluation protection derived from `eval_password`
    pub fn protect(self, eval_password: &str) -> cqt_crypto::Result<Self> {
        let record = cqt_crypto::hash_password(eval_password)?;
        Ok(self.with_protection(record))
    }

    /// Attach a pre-computed evaluation protection record
    pub fn with_protection(mut self, record: PasswordRecord) -> Self {
        self.evaluation_protection = Some(record);
        self
    }

    pub fn from_slice(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Pretty-printed UTF-8 JSON
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn exported_at(&self) -> Option<DateTime<Utc>> {
        self.exported_at
    }

    pub fn list_name(&self) -> &str {
        &self.list_name
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn responses(&self) -> &BTreeMap<String, Response> {
        &self.responses
    }

    pub fn response(&self, key: &str) -> Option<&Response> {
        self.responses.get(key)
    }

    pub fn review_marks(&self) -> &BTreeMap<String, bool> {
        &self.review_marks
    }

    pub fn is_marked(&self, key: &str) -> bool {
        self.review_marks.get(key).copied().unwrap_or(false)
    }

    pub fn evaluation_protection(&self) -> Option<&PasswordRecord> {
        self.evaluation_protection.as_ref()
    }

    pub fn is_evaluated(&self) -> bool {
        self.evaluated
    }

    pub fn evaluated_at(&self) -> Option<DateTime<Utc>> {
        self.evaluated_at
    }

    /// Response keys in question order
    pub fn response_keys(&self) -> Vec<ResponseKey> {
        self.questions
            .iter()
            .enumerate()
            .map(|(idx, q)| q.response_key(idx))
            .collect()
    }

    /// Keys shared by more than one question
    ///
    /// Those questions read and write the same response.
    pub fn duplicate_keys(&self) -> Vec<ResponseKey> {
        let mut seen = BTreeSet::new();
        let mut duplicates = BTreeSet::new();
        for key in self.response_keys() {
            if !seen.insert(key.clone()) {
                duplicates.insert(key);
            }
        }
        duplicates.into_iter().collect()
    }

    pub(crate) fn warn_duplicate_keys(&self) {
        for key in self.duplicate_keys() {
            tracing::warn!(key = %key, list = %self.list_name, "questions share a response key");
        }
    }

    /// First question whose response key is `key`
    pub fn question(&self, key: &str) -> Option<(usize, &Question)> {
        self.questions
            .iter()
            .enumerate()
            .find(|(idx, q)| q.response_key(*idx).as_str() == key)
    }
}
