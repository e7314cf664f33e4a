//! Content module - courses, lessons and exercises
//!
//! Read-only provider of ordered content records:
//! - `store`: JSON files under a data directory
//! - `resolver`: exercise/lesson lookup with the course level filter

pub mod resolver;
pub mod store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

pub use resolver::{
    eligible_exercises, exercises_for_lesson, find_exercise, find_lesson, next_lesson,
    LessonMatch, LevelFilter,
};
pub use store::JsonContentStore;

/// Record identifier; JSON strings and numbers are both accepted and compared as text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Text(String),
    Number(serde_json::Number),
}

impl Default for RecordId {
    fn default() -> Self {
        RecordId::Text(String::new())
    }
}

impl RecordId {
    pub fn as_text(&self) -> String {
        match self {
            RecordId::Text(s) => s.clone(),
            RecordId::Number(n) => n.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RecordId::Text(s) if s.is_empty())
    }

    /// Textual equality; an empty id never matches anything
    pub fn matches(&self, other: &str) -> bool {
        !self.is_empty() && !other.is_empty() && self.as_text() == other
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Text(s) => f.write_str(s),
            RecordId::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId::Text(s.to_string())
    }
}

impl From<i64> for RecordId {
    fn from(n: i64) -> Self {
        RecordId::Number(n.into())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Course {
    #[serde(default)]
    pub id: RecordId,
    #[serde(default)]
    pub name: String,
    /// Free-text level label; exercises must carry the same label (case-insensitive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Lessons file, relative to the data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lessons_file: Option<String>,
    /// Exercises file, relative to the data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exercises_file: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    #[serde(default)]
    pub id: RecordId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Exercise {
    #[serde(default)]
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lesson_id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_code: Option<String>,
    /// Error kind the reference solution is meant to raise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_exception: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_exception_message_contains: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Exercise {
    /// Test program, if the exercise has an automated check
    pub fn test_program(&self) -> Option<&str> {
        self.test_code
            .as_deref()
            .filter(|code| !code.trim().is_empty())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("failed to read content file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed content file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
    #[error("refusing to read content outside the data directory: {0}")]
    UnsafePath(String),
    #[error("course '{course_id}' has no {source_kind} configured")]
    SourceNotConfigured {
        course_id: String,
        source_kind: &'static str,
    },
}

/// Read-only content source
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn courses(&self) -> Result<Vec<Course>, ContentError>;

    async fn course(&self, course_id: &str) -> Result<Option<Course>, ContentError> {
        Ok(self
            .courses()
            .await?
            .into_iter()
            .find(|course| course.id.matches(course_id)))
    }

    /// Lessons of a course, in course order
    async fn lessons(&self, course: &Course) -> Result<Vec<Lesson>, ContentError>;

    /// All exercises of a course, unfiltered, in source order
    async fn exercises(&self, course: &Course) -> Result<Vec<Exercise>, ContentError>;
}
