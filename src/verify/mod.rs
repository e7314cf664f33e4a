//! Verify module - Verification Orchestrator
//!
//! Resolves an exercise, runs the learner program, then (when the exercise has a
//! test program) runs the test program against the learner's captured stdout and
//! merges both runs into one `Verdict`.
//!
//! Learner and test failures are verdicts. `CheckError` is only returned when the
//! check could not be carried out at all.

pub mod audit;
pub mod harness;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::content::{find_exercise, ContentError, ContentStore, Course, Exercise};
use crate::core::verdict::{
    EXECUTION_ERROR, LEARNER_CODE_FAILED, NO_AUTOMATED_CHECK, SYNTAX_ERROR_IN_CODE,
    TEST_FAILED_SILENTLY, TEST_PASSED,
};
use crate::core::{ErrorKind, Stage, Verdict};
use crate::runner::{CodeRunner, EngineError, ExecutionContext, ExecutionResult};

pub use audit::{AuditReport, SolutionAudit};
pub use harness::{merge_output, shared_output_context, DEFAULT_OUTPUT_VARIABLE};

/// One check submission
#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub course_id: String,
    pub exercise_id: String,
    pub code: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("Course '{0}' not found.")]
    CourseNotFound(String),
    #[error("Exercise '{exercise_id}' not found in course '{course_id}'.")]
    ExerciseNotFound {
        exercise_id: String,
        course_id: String,
    },
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Clone)]
pub struct Verifier {
    runner: Arc<dyn CodeRunner>,
    content: Arc<dyn ContentStore>,
    output_variable: String,
}

impl Verifier {
    pub fn new(runner: Arc<dyn CodeRunner>, content: Arc<dyn ContentStore>) -> Self {
        Self {
            runner,
            content,
            output_variable: DEFAULT_OUTPUT_VARIABLE.to_string(),
        }
    }

    pub fn with_output_variable(mut self, name: impl Into<String>) -> Self {
        self.output_variable = name.into();
        self
    }

    pub fn content(&self) -> &Arc<dyn ContentStore> {
        &self.content
    }

    /// Free-form execution for the editor: one run, no test program
    pub async fn execute(
        &self,
        code: &str,
        cancel: &CancellationToken,
    ) -> Result<Verdict, EngineError> {
        let result = self
            .runner
            .run(code, ExecutionContext::new(), cancel)
            .await?;
        info!("Free-form execution finished: success={}", result.is_ok());

        if result.is_ok() {
            return Ok(Verdict::passed(result.stdout, result.stderr));
        }

        let details = if !result.stderr.is_empty() {
            result.stderr
        } else if result.error_kind.as_ref().is_some_and(ErrorKind::is_syntax) {
            SYNTAX_ERROR_IN_CODE.to_string()
        } else {
            EXECUTION_ERROR.to_string()
        };
        Ok(Verdict::failed(
            Stage::Learner,
            result.error_kind,
            result.stdout,
            details,
        ))
    }

    /// Look up a course and one of its level-compatible exercises
    pub async fn resolve(
        &self,
        course_id: &str,
        exercise_id: &str,
    ) -> Result<(Course, Exercise), CheckError> {
        let course = self
            .content
            .course(course_id)
            .await?
            .ok_or_else(|| CheckError::CourseNotFound(course_id.to_string()))?;

        let exercises = self.content.exercises(&course).await?;
        let exercise = find_exercise(&course, &exercises, exercise_id, None)
            .cloned()
            .ok_or_else(|| {
                warn!(
                    "Exercise '{}' not found in course '{}' or level incompatible",
                    exercise_id, course_id
                );
                CheckError::ExerciseNotFound {
                    exercise_id: exercise_id.to_string(),
                    course_id: course_id.to_string(),
                }
            })?;

        Ok((course, exercise))
    }

    pub async fn check_exercise(
        &self,
        request: &CheckRequest,
        cancel: &CancellationToken,
    ) -> Result<Verdict, CheckError> {
        let (_, exercise) = self
            .resolve(&request.course_id, &request.exercise_id)
            .await?;

        let verdict = self.verify(&exercise, &request.code, cancel).await?;
        info!(
            "Checked exercise '{}' of course '{}': success={}",
            request.exercise_id, request.course_id, verdict.success
        );
        Ok(verdict)
    }

    /// Run learner code and, if present, the exercise's test program
    pub async fn verify(
        &self,
        exercise: &Exercise,
        code: &str,
        cancel: &CancellationToken,
    ) -> Result<Verdict, EngineError> {
        let learner = self
            .runner
            .run(code, ExecutionContext::new(), cancel)
            .await?;

        if !learner.is_ok() {
            debug!("Learner code failed: {}", learner.stderr);
            let details = if learner.stderr.is_empty() {
                LEARNER_CODE_FAILED.to_string()
            } else {
                learner.stderr
            };
            return Ok(Verdict::failed(
                Stage::Learner,
                learner.error_kind,
                learner.stdout,
                details,
            ));
        }

        let Some(test_code) = exercise.test_program() else {
            return Ok(Verdict::passed(learner.stdout, NO_AUTOMATED_CHECK));
        };

        let context = shared_output_context(&self.output_variable, &learner.stdout);
        let test = self.runner.run(test_code, context, cancel).await?;

        Ok(merge_test_run(&learner, test))
    }
}

fn merge_test_run(learner: &ExecutionResult, test: ExecutionResult) -> Verdict {
    let output = merge_output(&learner.stdout, &test.stdout);

    if test.is_ok() {
        return Verdict::passed(output, TEST_PASSED);
    }

    let details = match (&test.error_kind, test.stderr.is_empty()) {
        (_, true) => TEST_FAILED_SILENTLY.to_string(),
        (Some(kind), false) => format!("{}: {}", kind, test.stderr),
        (None, false) => test.stderr,
    };
    Verdict::failed(Stage::Test, test.error_kind, output, details)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::content::RecordId;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Runner replaying canned results and recording what it was asked to run
    #[derive(Default)]
    pub(crate) struct ScriptedRunner {
        results: Mutex<VecDeque<ExecutionResult>>,
        pub(crate) calls: Mutex<Vec<(String, ExecutionContext)>>,
    }

    impl ScriptedRunner {
        pub(crate) fn new(results: impl IntoIterator<Item = ExecutionResult>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into_iter().collect()),
                calls: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CodeRunner for ScriptedRunner {
        async fn run(
            &self,
            source: &str,
            context: ExecutionContext,
            _cancel: &CancellationToken,
        ) -> Result<ExecutionResult, EngineError> {
            self.calls
                .lock()
                .unwrap()
                .push((source.to_string(), context));
            Ok(self
                .results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| ExecutionResult::success("", "")))
        }
    }

    /// In-memory single-course store
    pub(crate) struct FixedStore {
        pub(crate) course: Course,
        pub(crate) exercises: Vec<Exercise>,
    }

    #[async_trait]
    impl ContentStore for FixedStore {
        async fn courses(&self) -> Result<Vec<Course>, ContentError> {
            Ok(vec![self.course.clone()])
        }

        async fn lessons(&self, _course: &Course) -> Result<Vec<crate::content::Lesson>, ContentError> {
            Ok(Vec::new())
        }

        async fn exercises(&self, course: &Course) -> Result<Vec<Exercise>, ContentError> {
            if course.exercises_file.is_none() {
                return Err(ContentError::SourceNotConfigured {
                    course_id: course.id.as_text(),
                    source_kind: "exercises_file",
                });
            }
            Ok(self.exercises.clone())
        }
    }

    pub(crate) fn basic_course() -> Course {
        Course {
            id: "python-basico".into(),
            name: "Python Básico".to_string(),
            level: Some("Básico".to_string()),
            exercises_file: Some("python-basico/exercises.json".to_string()),
            ..Default::default()
        }
    }

    pub(crate) fn exercise(id: i64, level: &str, test_code: &str) -> Exercise {
        Exercise {
            id: RecordId::from(id),
            lesson_id: Some(RecordId::from(1)),
            level: Some(level.to_string()),
            title: format!("Exercício {}", id),
            test_code: Some(test_code.to_string()),
            ..Default::default()
        }
    }

    const HELLO_TEST: &str = "assert 'Olá, Python!' in output\nprint('SUCCESS')";

    fn verifier(runner: Arc<ScriptedRunner>, exercises: Vec<Exercise>) -> Verifier {
        let store = Arc::new(FixedStore {
            course: basic_course(),
            exercises,
        });
        Verifier::new(runner, store)
    }

    fn request(exercise_id: &str, code: &str) -> CheckRequest {
        CheckRequest {
            course_id: "python-basico".to_string(),
            exercise_id: exercise_id.to_string(),
            code: code.to_string(),
        }
    }

    #[tokio::test]
    async fn test_passing_test_program_merges_output() {
        let runner = ScriptedRunner::new([
            ExecutionResult::success("Olá, Python!\n", ""),
            ExecutionResult::success("SUCCESS\n", ""),
        ]);
        let verifier = verifier(runner.clone(), vec![exercise(1, "básico", HELLO_TEST)]);

        let verdict = verifier
            .check_exercise(&request("1", "print('Olá, Python!')"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(verdict.success);
        assert_eq!(verdict.output, "Olá, Python!\nSUCCESS\n");
        assert_eq!(verdict.details, TEST_PASSED);

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0].0, "print('Olá, Python!')");
        assert!(calls[0].1.bindings().is_empty());
        assert_eq!(calls[1].0, HELLO_TEST);
        assert_eq!(
            calls[1].1.get("output"),
            Some(&serde_json::Value::from("Olá, Python!\n"))
        );
    }

    #[tokio::test]
    async fn test_failed_assertion_reports_kind() {
        let runner = ScriptedRunner::new([
            ExecutionResult::success("Olá, Mundo!\n", ""),
            ExecutionResult::failure(ErrorKind::AssertionError, "", ""),
        ]);
        let verifier = verifier(runner, vec![exercise(1, "básico", HELLO_TEST)]);

        let verdict = verifier
            .check_exercise(&request("1", "print('Olá, Mundo!')"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!verdict.success);
        assert_eq!(verdict.output, "Olá, Mundo!\n");
        assert!(verdict.details.contains("AssertionError"));
        assert_eq!(verdict.failed_stage(), Some(Stage::Test));
        assert_eq!(verdict.error_kind(), Some(&ErrorKind::AssertionError));
    }

    #[tokio::test]
    async fn test_silent_test_failure() {
        let test_failure = ExecutionResult {
            stderr: String::new(),
            ..ExecutionResult::failure(ErrorKind::SystemExit, "", "1")
        };
        let runner = ScriptedRunner::new([ExecutionResult::success("x\n", ""), test_failure]);
        let verifier = verifier(runner, vec![exercise(1, "básico", HELLO_TEST)]);

        let verdict = verifier
            .check_exercise(&request("1", "print('x')"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!verdict.success);
        assert_eq!(verdict.details, TEST_FAILED_SILENTLY);
    }

    #[tokio::test]
    async fn test_learner_failure_skips_test_program() {
        let runner = ScriptedRunner::new([ExecutionResult::failure(
            ErrorKind::NameError,
            "before\n",
            "name 'x' is not defined",
        )]);
        let verifier = verifier(runner.clone(), vec![exercise(1, "básico", HELLO_TEST)]);

        let verdict = verifier
            .check_exercise(&request("1", "print('before')\nx"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!verdict.success);
        assert_eq!(verdict.output, "before\n");
        assert_eq!(verdict.details, "NameError: name 'x' is not defined");
        assert_eq!(verdict.failed_stage(), Some(Stage::Learner));
        assert_eq!(runner.call_count(), 1);
    }

    #[tokio::test]
    async fn test_no_test_program() {
        let runner = ScriptedRunner::new([ExecutionResult::success("hi\n", "")]);
        let verifier = verifier(runner.clone(), vec![exercise(5, "Básico", "   ")]);

        let verdict = verifier
            .check_exercise(&request("5", "print('hi')"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(verdict.success);
        assert_eq!(verdict.output, "hi\n");
        assert_eq!(verdict.details, NO_AUTOMATED_CHECK);
        assert_eq!(runner.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_and_level_incompatible_exercises() {
        let runner = ScriptedRunner::new([]);
        let verifier = verifier(
            runner.clone(),
            vec![exercise(2, "Intermediário", HELLO_TEST)],
        );
        let cancel = CancellationToken::new();

        for id in ["999", "2"] {
            let err = verifier
                .check_exercise(&request(id, "print(1)"), &cancel)
                .await
                .unwrap_err();
            assert!(matches!(err, CheckError::ExerciseNotFound { .. }));
            assert_eq!(
                err.to_string(),
                format!("Exercise '{}' not found in course 'python-basico'.", id)
            );
        }
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_course_and_unconfigured_source() {
        let cancel = CancellationToken::new();
        let verifier = verifier(ScriptedRunner::new([]), vec![]);
        let err = verifier
            .check_exercise(
                &CheckRequest {
                    course_id: "nope".to_string(),
                    ..request("1", "")
                },
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CheckError::CourseNotFound(ref id) if id == "nope"));

        let store = Arc::new(FixedStore {
            course: Course {
                exercises_file: None,
                ..basic_course()
            },
            exercises: vec![],
        });
        let verifier = Verifier::new(ScriptedRunner::new([]), store);
        let err = verifier
            .check_exercise(&request("1", ""), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CheckError::Content(ContentError::SourceNotConfigured { .. })
        ));
    }

    #[tokio::test]
    async fn test_execute_details_fallbacks() {
        let silent_syntax = ExecutionResult {
            stderr: String::new(),
            ..ExecutionResult::failure(ErrorKind::SyntaxError, "", "")
        };
        let silent_other = ExecutionResult {
            stderr: String::new(),
            ..ExecutionResult::failure(ErrorKind::ValueError, "", "")
        };
        let runner = ScriptedRunner::new([
            ExecutionResult::success("Olá, Python!\n", ""),
            silent_syntax,
            silent_other,
            ExecutionResult::failure(ErrorKind::ZeroDivisionError, "1\n", "division by zero"),
        ]);
        let verifier = verifier(runner, vec![]);
        let cancel = CancellationToken::new();

        let verdict = verifier.execute("print('Olá, Python!')", &cancel).await.unwrap();
        assert!(verdict.success);
        assert!(verdict.output.contains("Olá, Python!"));
        assert_eq!(verdict.details, "");

        let verdict = verifier.execute("def", &cancel).await.unwrap();
        assert_eq!(verdict.details, SYNTAX_ERROR_IN_CODE);

        let verdict = verifier.execute("raise", &cancel).await.unwrap();
        assert_eq!(verdict.details, EXECUTION_ERROR);

        let verdict = verifier.execute("print(1)\n1/0", &cancel).await.unwrap();
        assert!(!verdict.success);
        assert_eq!(verdict.output, "1\n");
        assert_eq!(verdict.details, "ZeroDivisionError: division by zero");
    }

    #[test]
    fn test_test_failure_details_carry_kind_prefix() {
        let learner = ExecutionResult::success("a\n", "");
        let verdict = merge_test_run(
            &learner,
            ExecutionResult::failure(ErrorKind::AssertionError, "partial\n", "expected greeting"),
        );

        assert_eq!(verdict.output, "a\npartial\n");
        assert_eq!(
            verdict.details,
            "AssertionError: AssertionError: expected greeting"
        );
    }
}
