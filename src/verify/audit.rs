//! Solution audit: every exercise's reference solution must satisfy its own test program

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{shared_output_context, CheckError, Verifier};
use crate::content::{eligible_exercises, Course, Exercise};
use crate::runner::{EngineError, ExecutionContext};

/// Audit outcome for one exercise
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolutionAudit {
    pub exercise_id: String,
    pub title: String,
    pub passed: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub course_id: String,
    pub passed: usize,
    pub failed: usize,
    pub exercises: Vec<SolutionAudit>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

impl Verifier {
    /// Audit every level-eligible exercise of a course
    pub async fn audit_course(
        &self,
        course_id: &str,
        cancel: &CancellationToken,
    ) -> Result<AuditReport, CheckError> {
        let course = self
            .content
            .course(course_id)
            .await?
            .ok_or_else(|| CheckError::CourseNotFound(course_id.to_string()))?;
        self.audit(&course, cancel).await
    }

    pub async fn audit(
        &self,
        course: &Course,
        cancel: &CancellationToken,
    ) -> Result<AuditReport, CheckError> {
        let exercises = self.content.exercises(course).await?;

        let mut entries = Vec::new();
        for exercise in eligible_exercises(course, &exercises) {
            let entry = self.audit_exercise(exercise, cancel).await?;
            if !entry.passed {
                warn!(
                    "Audit failed for exercise '{}' of course '{}': {}",
                    entry.exercise_id, course.id, entry.reason
                );
            }
            entries.push(entry);
        }

        let passed = entries.iter().filter(|e| e.passed).count();
        let report = AuditReport {
            course_id: course.id.as_text(),
            passed,
            failed: entries.len() - passed,
            exercises: entries,
        };
        info!(
            "Audited course '{}': {} passed, {} failed",
            report.course_id, report.passed, report.failed
        );
        Ok(report)
    }

    async fn audit_exercise(
        &self,
        exercise: &Exercise,
        cancel: &CancellationToken,
    ) -> Result<SolutionAudit, EngineError> {
        let entry = |passed: bool, reason: String| SolutionAudit {
            exercise_id: exercise.id.as_text(),
            title: exercise.title.clone(),
            passed,
            reason,
        };

        let Some(solution) = exercise
            .solution_code
            .as_deref()
            .filter(|code| !code.trim().is_empty())
        else {
            return Ok(entry(false, "no solution_code".to_string()));
        };

        let run = self
            .runner
            .run(solution, ExecutionContext::new(), cancel)
            .await?;

        if let Some(expected) = exercise.expected_exception.as_deref() {
            let raised = run.error_kind.as_ref().map(|kind| kind.as_str());
            if raised != Some(expected) {
                return Ok(entry(
                    false,
                    format!(
                        "expected {} but solution {}",
                        expected,
                        match raised {
                            Some(kind) => format!("raised {}", kind),
                            None => "raised nothing".to_string(),
                        }
                    ),
                ));
            }
            if let Some(fragment) = exercise.expected_exception_message_contains.as_deref() {
                if !run.stderr.contains(fragment) {
                    return Ok(entry(
                        false,
                        format!("error message lacks '{}': {}", fragment, run.stderr),
                    ));
                }
            }
            return Ok(entry(true, format!("raised expected {}", expected)));
        }

        if !run.is_ok() {
            return Ok(entry(false, format!("solution failed: {}", run.stderr)));
        }

        let Some(test_code) = exercise.test_program() else {
            return Ok(entry(false, "no test_code".to_string()));
        };

        let context = shared_output_context(&self.output_variable, &run.stdout);
        let test = self.runner.run(test_code, context, cancel).await?;
        if test.is_ok() {
            Ok(entry(true, "test passed".to_string()))
        } else {
            Ok(entry(false, format!("test failed: {}", test.stderr)))
        }
    }
}
