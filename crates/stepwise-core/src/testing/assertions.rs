//! Test assertion macros.

/// Assert that a result is Ok.
#[macro_export]
macro_rules! assert_ok {
    ($expr:expr) => {
        match &$expr {
            Ok(_) => (),
            Err(e) => panic!("assertion failed: expected Ok, got Err({:?})", e),
        }
    };
    ($expr:expr, $($arg:tt)+) => {
        match &$expr {
            Ok(_) => (),
            Err(e) => panic!("assertion failed: {}: expected Ok, got Err({:?})", format_args!($($arg)+), e),
        }
    };
}

/// Assert that a result is Err.
#[macro_export]
macro_rules! assert_err {
    ($expr:expr) => {
        match &$expr {
            Err(_) => (),
            Ok(v) => panic!("assertion failed: expected Err, got Ok({:?})", v),
        }
    };
}

/// Assert that the root of an error matches a specific variant.
///
/// # Example
///
/// ```ignore
/// assert_err_variant!(result, StepError::AlreadyFinished);
/// ```
#[macro_export]
macro_rules! assert_err_variant {
    ($expr:expr, $variant:pat) => {
        match &$expr {
            Err(e) => match e.root() {
                $variant => (),
                other => panic!(
                    "assertion failed: expected {}, got {:?}",
                    stringify!($variant),
                    other
                ),
            },
            Ok(v) => panic!(
                "assertion failed: expected Err({}), got Ok({:?})",
                stringify!($variant),
                v
            ),
        }
    };
}

/// Assert that an execution (or context) is parked without result.
#[macro_export]
macro_rules! assert_waiting {
    ($ctx:expr) => {{
        let execution = $ctx.execution();
        assert_eq!(
            execution.state,
            $crate::execution::ExecutionState::Waiting,
            "expected execution to be waiting"
        );
        assert!(execution.result.is_none());
    }};
}

/// Assert that an execution (or context) finished successfully.
#[macro_export]
macro_rules! assert_passed {
    ($ctx:expr) => {{
        let execution = $ctx.execution();
        assert!(
            execution.passed(),
            "expected execution to pass, got {:?} / {:?}",
            execution.state,
            execution.result
        );
    }};
}

/// Assert that an execution (or context) failed with a reason.
#[macro_export]
macro_rules! assert_failed {
    ($ctx:expr, $reason:expr) => {{
        let execution = $ctx.execution();
        match &execution.result {
            Some($crate::execution::ExecutionResult::Failed { reason, .. }) => {
                assert_eq!(reason, $reason)
            }
            other => panic!("expected failure '{}', got {:?}", $reason, other),
        }
    }};
}

#[cfg(test)]
mod tests {
    use crate::error::{Result, StepError};

    #[test]
    fn test_assert_ok() {
        let result: Result<i32> = Ok(42);
        assert_ok!(result);
    }

    #[test]
    fn test_assert_err_variant_sees_through_context() {
        let result: Result<()> = Err(StepError::AlreadyFinished.for_node("n"));
        assert_err!(result);
        assert_err_variant!(result, StepError::AlreadyFinished);
    }

    #[test]
    #[should_panic]
    fn test_assert_err_variant_mismatch() {
        let result: Result<()> = Err(StepError::Config("x".into()));
        assert_err_variant!(result, StepError::AlreadyFinished);
    }
}
