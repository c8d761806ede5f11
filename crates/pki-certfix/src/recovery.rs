//! Reversible actions with guaranteed unwind.
//!
//! A [`RecoveryScope`] applies actions in order and undoes every entered action
//! in reverse order, whether the work inside the scope succeeded or not. An
//! action whose `apply` fails is still undone, so `undo` must cope with a
//! partially applied change.
//!
//! Undo failures do not stop the unwind. Each is logged and collected; the
//! error of the work itself takes precedence over them.

use tracing::{error, info};

use crate::error::{CertFixError, Result};

/// A change that can be rolled back.
pub trait ReversibleAction<C: ?Sized> {
    /// Name used in logs and unwind errors.
    fn name(&self) -> &str;

    /// Makes the change.
    fn apply(&mut self, ctx: &mut C) -> Result<()>;

    /// Rolls the change back.
    fn undo(&mut self, ctx: &mut C) -> Result<()>;
}

/// Entered actions, undone in reverse on exit.
pub struct RecoveryScope<C: ?Sized> {
    entered: Vec<Box<dyn ReversibleAction<C>>>,
    unwound: Vec<String>,
}

impl<C: ?Sized> Default for RecoveryScope<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ?Sized> RecoveryScope<C> {
    /// An empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entered: Vec::new(),
            unwound: Vec::new(),
        }
    }

    /// Applies `action`. It is undone on unwind even if `apply` fails.
    pub fn enter(&mut self, ctx: &mut C, mut action: Box<dyn ReversibleAction<C>>) -> Result<()> {
        info!(action = action.name(), "applying");
        let result = action.apply(ctx);
        self.entered.push(action);
        result
    }

    /// Names of undone actions, in the order they were undone.
    #[must_use]
    pub fn unwound(&self) -> &[String] {
        &self.unwound
    }

    /// Undoes every entered action, innermost first. Returns the failures.
    pub fn unwind(&mut self, ctx: &mut C) -> Vec<String> {
        let mut failures = Vec::new();
        while let Some(mut action) = self.entered.pop() {
            info!(action = action.name(), "undoing");
            if let Err(e) = action.undo(ctx) {
                error!(action = action.name(), error = %e, "undo failed");
                failures.push(format!("{}: {e}", action.name()));
            }
            self.unwound.push(action.name().to_string());
        }
        failures
    }

    /// Unwinds and combines the result of the scoped work with any undo failures.
    pub fn finish<T>(&mut self, ctx: &mut C, outcome: Result<T>) -> Result<T> {
        let failures = self.unwind(ctx);
        match outcome {
            Err(e) => Err(e),
            Ok(value) if failures.is_empty() => Ok(value),
            Ok(_) => Err(CertFixError::Unwind(failures)),
        }
    }

    /// Enters `actions` in order, runs `body` if all applied, then unwinds.
    pub fn run<T>(
        &mut self,
        ctx: &mut C,
        actions: Vec<Box<dyn ReversibleAction<C>>>,
        body: impl FnOnce(&mut C) -> Result<T>,
    ) -> Result<T> {
        for action in actions {
            if let Err(e) = self.enter(ctx, action) {
                return self.finish(ctx, Err(e));
            }
        }
        let outcome = body(ctx);
        self.finish(ctx, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Step {
        name: &'static str,
        fail_apply: bool,
        fail_undo: bool,
    }

    impl Step {
        fn ok(name: &'static str) -> Box<dyn ReversibleAction<Vec<String>>> {
            Box::new(Self {
                name,
                fail_apply: false,
                fail_undo: false,
            })
        }
    }

    impl ReversibleAction<Vec<String>> for Step {
        fn name(&self) -> &str {
            self.name
        }

        fn apply(&mut self, log: &mut Vec<String>) -> Result<()> {
            log.push(format!("apply {}", self.name));
            if self.fail_apply {
                return Err(CertFixError::precondition(format!("{} apply", self.name)));
            }
            Ok(())
        }

        fn undo(&mut self, log: &mut Vec<String>) -> Result<()> {
            log.push(format!("undo {}", self.name));
            if self.fail_undo {
                return Err(CertFixError::precondition(format!("{} undo", self.name)));
            }
            Ok(())
        }
    }

    #[test]
    fn undoes_in_reverse_order() {
        let mut log = Vec::new();
        let mut scope = RecoveryScope::new();
        let out = scope.run(&mut log, vec![Step::ok("a"), Step::ok("b"), Step::ok("c")], |log| {
            log.push("body".into());
            Ok(7)
        });
        assert_eq!(out.ok(), Some(7));
        assert_eq!(
            log,
            vec!["apply a", "apply b", "apply c", "body", "undo c", "undo b", "undo a"]
        );
        assert_eq!(scope.unwound(), ["c", "b", "a"]);
    }

    #[test]
    fn failed_apply_is_still_undone_and_body_skipped() {
        let mut log = Vec::new();
        let mut scope = RecoveryScope::new();
        let failing: Box<dyn ReversibleAction<Vec<String>>> = Box::new(Step {
            name: "b",
            fail_apply: true,
            fail_undo: false,
        });
        let out: Result<()> = scope.run(&mut log, vec![Step::ok("a"), failing, Step::ok("c")], |log| {
            log.push("body".into());
            Ok(())
        });
        assert!(matches!(out, Err(CertFixError::Precondition(_))));
        assert_eq!(log, vec!["apply a", "apply b", "undo b", "undo a"]);
    }

    #[test]
    fn body_error_wins_over_undo_error() {
        let mut log = Vec::new();
        let mut scope = RecoveryScope::new();
        let bad_undo: Box<dyn ReversibleAction<Vec<String>>> = Box::new(Step {
            name: "a",
            fail_apply: false,
            fail_undo: true,
        });
        let out: Result<()> = scope.run(&mut log, vec![bad_undo, Step::ok("b")], |_| {
            Err(CertFixError::renewal("sslserver", "expired"))
        });
        assert!(matches!(out, Err(CertFixError::Renewal { .. })));
        assert_eq!(scope.unwound(), ["b", "a"]);
    }

    #[test]
    fn undo_errors_surface_after_success() {
        let mut log = Vec::new();
        let mut scope = RecoveryScope::new();
        let bad = |name| -> Box<dyn ReversibleAction<Vec<String>>> {
            Box::new(Step {
                name,
                fail_apply: false,
                fail_undo: true,
            })
        };
        let out = scope.run(&mut log, vec![bad("a"), bad("b")], |_| Ok(()));
        match out {
            Err(CertFixError::Unwind(failures)) => {
                assert_eq!(failures.len(), 2);
                assert!(failures[0].starts_with("b: "));
                assert!(failures[1].starts_with("a: "));
            }
            other => unreachable!("expected unwind error, got {other:?}"),
        }
        assert_eq!(log, vec!["apply a", "apply b", "undo b", "undo a"]);
    }

    #[test]
    fn unwind_empties_the_scope() {
        let mut log = Vec::new();
        let mut scope = RecoveryScope::new();
        scope.enter(&mut log, Step::ok("a")).expect("enter");
        assert!(scope.unwind(&mut log).is_empty());
        assert!(scope.unwind(&mut log).is_empty());
        assert_eq!(log, vec!["apply a", "undo a"]);
        assert_eq!(scope.unwound(), ["a"]);
    }
}
