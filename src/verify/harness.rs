//! Shared-output convention between a learner program and its test program

use crate::runner::ExecutionContext;

/// Default name under which the test program sees the learner's stdout
pub const DEFAULT_OUTPUT_VARIABLE: &str = "output";

/// Context for a test run: exactly one binding, the learner's captured stdout
pub fn shared_output_context(output_variable: &str, learner_stdout: &str) -> ExecutionContext {
    ExecutionContext::new().with_binding(output_variable, learner_stdout)
}

/// Combined output of a check: learner stdout followed by test stdout
pub fn merge_output(learner_stdout: &str, test_stdout: &str) -> String {
    let mut merged = String::with_capacity(learner_stdout.len() + test_stdout.len());
    merged.push_str(learner_stdout);
    merged.push_str(test_stdout);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_context_has_single_binding() {
        let context = shared_output_context(DEFAULT_OUTPUT_VARIABLE, "Olá, Python!\n");

        assert_eq!(context.bindings().len(), 1);
        assert_eq!(context.get("output"), Some(&Value::from("Olá, Python!\n")));
    }

    #[test]
    fn test_merge_output() {
        assert_eq!(merge_output("a\n", "SUCCESS\n"), "a\nSUCCESS\n");
        assert_eq!(merge_output("", ""), "");
    }
}
