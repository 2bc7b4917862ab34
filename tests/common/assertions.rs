//! Assertion macros for suite reports.

/// Assert that a case report passed, printing its failures if not.
#[macro_export]
macro_rules! assert_case_passed {
    ($case:expr) => {{
        let case: &policy_stress::CaseReport = &$case;
        if !case.passed() {
            panic!(
                "assert_case_passed! failed for {:?}:\n{}",
                case.name,
                case.failures
                    .iter()
                    .map(|f| format!("  {f}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            );
        }
    }};
}

/// Assert that a case's primary failure has `kind` and a message containing
/// `needle`.
#[macro_export]
macro_rules! assert_primary_failure {
    ($case:expr, $kind:expr, $needle:expr) => {{
        let case: &policy_stress::CaseReport = &$case;
        let kind: stress_core::FailureKind = $kind;
        let needle: &str = $needle;
        match case.primary_failure() {
            Some(f) if f.kind == kind && f.message.contains(needle) => {}
            Some(f) => panic!(
                "assert_primary_failure! failed:\n  expected: [{}] ...{}...\n  actual:   {}",
                kind, needle, f
            ),
            None => panic!("assert_primary_failure! failed: case {:?} passed", case.name),
        }
    }};
}
