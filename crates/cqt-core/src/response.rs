//! Per-question responses
//!
//! Two shapes exist on the wire: a bare answer (`"B"`, `["A","C"]`, `"4.5"`)
//! written by older viewers, and `{"answer": ..., "sketch_png": ...}`.
//! Everything outside this module goes through the accessors here instead
//! of inspecting the shape itself.

use std::collections::BTreeSet;

use serde::de::Error;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::de::scalar_to_string;
use crate::payload::{Question, QuestionType};

/// A candidate's answer: free text for numerical and legacy single-choice,
/// a list of option labels for choice questions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Answer {
    Text(String),
    Choices(Vec<String>),
}

impl Default for Answer {
    fn default() -> Self {
        Answer::Text(String::new())
    }
}

impl<'de> Deserialize<'de> for Answer {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(Answer::default()),
            Value::Array(items) => items
                .into_iter()
                .map(|item| {
                    scalar_to_string(item)
                        .ok_or_else(|| D::Error::custom("answer list must contain strings"))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Answer::Choices),
            other => scalar_to_string(other)
                .map(Answer::Text)
                .ok_or_else(|| D::Error::custom("unsupported answer value")),
        }
    }
}

impl Answer {
    /// An empty answer; recording it clears the question
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn text(value: &str) -> Self {
        Answer::Text(value.to_string())
    }

    pub fn choices(labels: &[&str]) -> Self {
        Answer::Choices(labels.iter().map(|s| s.to_string()).collect())
    }

    /// Answer as it is compared for numerical questions, trimmed
    pub fn as_text(&self) -> String {
        match self {
            Answer::Text(s) => s.trim().to_string(),
            Answer::Choices(items) => items
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Selected option labels
    ///
    /// Text is split on commas (`"A, C"` selects A and C). Labels are
    /// trimmed and blanks dropped.
    pub fn selected_options(&self) -> BTreeSet<String> {
        let labels: Vec<&str> = match self {
            Answer::Text(s) => s.split(',').collect(),
            Answer::Choices(items) => items.iter().map(String::as_str).collect(),
        };
        labels
            .into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn is_answered_for(&self, question_type: QuestionType) -> bool {
        match question_type {
            QuestionType::Numerical => !self.as_text().is_empty(),
            QuestionType::McqSingle | QuestionType::McqMultiple => {
                !self.selected_options().is_empty()
            }
        }
    }
}

/// A stored response in either wire shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Structured {
        answer: Answer,
        sketch_png: Option<String>,
        /// Fields written by other viewers, carried through untouched
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    Bare(Answer),
}

// Decoded by hand: a derived untagged decoder would read a two-item
// choice list as a struct in sequence form.
impl<'de> Deserialize<'de> for Response {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Object(mut map) => {
                let answer = match map.remove("answer") {
                    Some(value) => Answer::deserialize(value).map_err(D::Error::custom)?,
                    None => Answer::default(),
                };
                let sketch_png = match map.remove("sketch_png") {
                    Some(Value::String(png)) => Some(png),
                    Some(Value::Null) | None => None,
                    Some(_) => return Err(D::Error::custom("sketch_png must be a string")),
                };
                Ok(Response::Structured {
                    answer,
                    sketch_png,
                    extra: map,
                })
            }
            other => Answer::deserialize(other)
                .map(Response::Bare)
                .map_err(D::Error::custom),
        }
    }
}

impl Response {
    /// Structured response; new writes always use this shape
    pub fn new(answer: Answer, sketch_png: Option<String>) -> Self {
        Response::Structured {
            answer,
            sketch_png: sketch_png.filter(|s| !s.trim().is_empty()),
            extra: Map::new(),
        }
    }

    /// Legacy bare response
    pub fn bare(answer: Answer) -> Self {
        Response::Bare(answer)
    }

    /// Normalize either shape to `(answer, sketch)`
    pub fn extract(&self) -> (&Answer, Option<&str>) {
        (self.answer(), self.sketch())
    }

    pub fn answer(&self) -> &Answer {
        match self {
            Response::Structured { answer, .. } => answer,
            Response::Bare(answer) => answer,
        }
    }

    /// Sketch PNG (base64), if one is attached and non-empty
    pub fn sketch(&self) -> Option<&str> {
        match self {
            Response::Structured {
                sketch_png: Some(png),
                ..
            } if !png.trim().is_empty() => Some(png.as_str()),
            _ => None,
        }
    }

    /// Unrecognised fields of a structured response
    pub fn extra(&self) -> Option<&Map<String, Value>> {
        match self {
            Response::Structured { extra, .. } => Some(extra),
            Response::Bare(_) => None,
        }
    }

    /// Replace the answer, keeping any sketch
    pub fn with_answer(&self, answer: Answer) -> Self {
        self.rebuild(answer, self.sketch().map(str::to_string))
    }

    /// Replace the sketch, keeping the answer
    ///
    /// `None` clears the sketch; the field stays and is written as `null`.
    pub fn with_sketch(&self, sketch_png: Option<String>) -> Self {
        self.rebuild(self.answer().clone(), sketch_png)
    }

    fn rebuild(&self, answer: Answer, sketch_png: Option<String>) -> Self {
        let mut next = Response::new(answer, sketch_png);
        if let (Response::Structured { extra, .. }, Some(kept)) = (&mut next, self.extra()) {
            extra.clone_from(kept);
        }
        next
    }
}

/// Whether `response` counts as an answer to `question`
///
/// Only the answer matters; a sketch on its own is not an answer.
pub fn is_answered(question: &Question, response: Option<&Response>) -> bool {
    response
        .map(|r| r.answer().is_answered_for(question.question_type))
        .unwrap_or(false)
}
