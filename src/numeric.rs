//! Process-wide numeric warning control
//!
//! Log compression of spectrograms hits `log10(0)` on silent frames. Those
//! divide-by-zero warnings are noise while whole batches are materialised,
//! so the loader suppresses them for exactly that span with
//! [`NumericWarningGuard`].

use std::sync::atomic::{AtomicUsize, Ordering};

/// Number of live guards; warnings are suppressed while it is non-zero
static SUPPRESS_DIVIDE_DEPTH: AtomicUsize = AtomicUsize::new(0);

/// Whether divide-by-zero warnings are currently suppressed
pub fn divide_warnings_suppressed() -> bool {
    SUPPRESS_DIVIDE_DEPTH.load(Ordering::SeqCst) > 0
}

/// Emit a divide-by-zero warning unless a guard is active
pub fn warn_divide_by_zero(context: &str, count: usize) {
    if !divide_warnings_suppressed() {
        log::warn!("divide by zero encountered in {} ({} values)", context, count);
    }
}

/// RAII guard that suppresses divide-by-zero warnings until dropped,
/// including early returns and unwinding
///
/// Guards nest and may be dropped in any order, from any thread; warnings
/// come back once the last live guard is gone.
#[must_use = "warnings are restored as soon as the guard is dropped"]
pub struct NumericWarningGuard {
    _private: (),
}

impl NumericWarningGuard {
    pub fn suppress_divide() -> Self {
        SUPPRESS_DIVIDE_DEPTH.fetch_add(1, Ordering::SeqCst);
        Self { _private: () }
    }
}

impl Drop for NumericWarningGuard {
    fn drop(&mut self) {
        SUPPRESS_DIVIDE_DEPTH.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single test so parallel test threads never race on the global flag.
    #[test]
    fn guard_restores_previous_state() {
        assert!(!divide_warnings_suppressed());
        {
            let _outer = NumericWarningGuard::suppress_divide();
            assert!(divide_warnings_suppressed());
            {
                let _inner = NumericWarningGuard::suppress_divide();
                assert!(divide_warnings_suppressed());
            }
            assert!(divide_warnings_suppressed());
        }
        assert!(!divide_warnings_suppressed());

        let result: Result<(), String> = (|| {
            let _guard = NumericWarningGuard::suppress_divide();
            Err("batch failed".to_string())
        })();
        assert!(result.is_err());
        assert!(!divide_warnings_suppressed());

        // dropped in creation order, not reverse
        let a = NumericWarningGuard::suppress_divide();
        let b = NumericWarningGuard::suppress_divide();
        drop(a);
        assert!(divide_warnings_suppressed());
        drop(b);
        assert!(!divide_warnings_suppressed());

        let workers: Vec<_> = (0..4)
            .map(|_| {
                std::thread::spawn(|| {
                    let _guard = NumericWarningGuard::suppress_divide();
                    assert!(divide_warnings_suppressed());
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(!divide_warnings_suppressed());
    }
}
