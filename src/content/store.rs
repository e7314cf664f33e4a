//! JSON-file content store

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use super::{ContentError, ContentStore, Course, Exercise, Lesson};

/// Content read fresh from `data_dir` on every call
#[derive(Debug, Clone)]
pub struct JsonContentStore {
    data_dir: PathBuf,
    courses_file: String,
}

impl JsonContentStore {
    pub fn new(data_dir: impl Into<PathBuf>, courses_file: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            courses_file: courses_file.into(),
        }
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, ContentError> {
        if !is_safe_path(relative) {
            return Err(ContentError::UnsafePath(relative.to_string()));
        }
        Ok(self.data_dir.join(relative))
    }

    /// Load a list of records; a missing file is an empty list
    async fn load_records<T: DeserializeOwned>(
        &self,
        relative: &str,
    ) -> Result<Vec<T>, ContentError> {
        let path = self.resolve(relative)?;

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Content file {} not found, using an empty list", path.display());
                return Ok(Vec::new());
            }
            Err(source) => return Err(ContentError::Io { path, source }),
        };

        let value: Value =
            serde_json::from_str(&content).map_err(|e| ContentError::Malformed {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        let Value::Array(items) = value else {
            return Err(ContentError::Malformed {
                path,
                reason: "expected a JSON list of records".to_string(),
            });
        };

        let mut records = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            if !item.is_object() {
                warn!("Skipping non-object entry #{} in {}", index, path.display());
                continue;
            }
            let record = serde_json::from_value(item).map_err(|e| ContentError::Malformed {
                path: path.clone(),
                reason: format!("entry #{}: {}", index, e),
            })?;
            records.push(record);
        }

        debug!("Loaded {} records from {}", records.len(), path.display());
        Ok(records)
    }
}

/// Check if a content path is safe (relative, no traversal)
fn is_safe_path(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') || path.starts_with('\\') {
        return false;
    }
    !Path::new(path)
        .components()
        .any(|c| !matches!(c, std::path::Component::Normal(_) | std::path::Component::CurDir))
}

#[async_trait]
impl ContentStore for JsonContentStore {
    async fn courses(&self) -> Result<Vec<Course>, ContentError> {
        self.load_records(&self.courses_file).await
    }

    async fn lessons(&self, course: &Course) -> Result<Vec<Lesson>, ContentError> {
        let file = course
            .lessons_file
            .as_deref()
            .filter(|f| !f.is_empty())
            .ok_or_else(|| ContentError::SourceNotConfigured {
                course_id: course.id.as_text(),
                source_kind: "lessons_file",
            })?;
        self.load_records(file).await
    }

    async fn exercises(&self, course: &Course) -> Result<Vec<Exercise>, ContentError> {
        let file = course
            .exercises_file
            .as_deref()
            .filter(|f| !f.is_empty())
            .ok_or_else(|| ContentError::SourceNotConfigured {
                course_id: course.id.as_text(),
                source_kind: "exercises_file",
            })?;
        self.load_records(file).await
    }
}
