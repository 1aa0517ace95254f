//! Soft contract checks
//!
//! Passing a stale handle or submitting a command set twice is a programming error,
//! but not one worth tearing the renderer down for. Such checks go through a
//! [`Diagnostics`] instance: the failure is logged and counted, and the caller
//! returns a sentinel (an invalid handle, `false`, or nothing).
//!
//! A `Diagnostics` is an ordinary object owned by whoever creates the graphics
//! context and shared through an `Arc`. Sites can be silenced individually, and an
//! optional hook observes every failure (tests use it to assert on them).

use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// A failed soft check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Static identifier of the check site, e.g. `"descriptors.create_set"`
    pub site: &'static str,
    /// Formatted failure message
    pub message: String,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.site, self.message)
    }
}

/// Callback invoked for every failure, ignored sites included
pub type FailureHook = Box<dyn Fn(&Failure) + Send + Sync>;

/// Shared sink for soft contract failures
#[derive(Default)]
pub struct Diagnostics {
    ignored: Mutex<HashSet<&'static str>>,
    per_site: Mutex<HashMap<&'static str, u64>>,
    failures: AtomicU64,
    hook: Option<FailureHook>,
}

impl Diagnostics {
    /// Create a diagnostics sink with no hook
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a diagnostics sink that forwards every failure to `hook`
    pub fn with_hook(hook: FailureHook) -> Self {
        Self {
            hook: Some(hook),
            ..Self::default()
        }
    }

    /// Check `condition`, recording a failure at `site` when it is false
    ///
    /// Returns `condition` so call sites read `if !diagnostics.verify(..) { return ..; }`.
    pub fn verify(&self, condition: bool, site: &'static str, message: impl fmt::Display) -> bool {
        if condition {
            return true;
        }

        self.failures.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut per_site) = self.per_site.lock() {
            *per_site.entry(site).or_insert(0) += 1;
        }

        let failure = Failure {
            site,
            message: message.to_string(),
        };

        let ignored = self
            .ignored
            .lock()
            .map(|ignored| ignored.contains(site))
            .unwrap_or(false);
        if !ignored {
            log::error!("Verify failed {}", failure);
        }

        if let Some(hook) = &self.hook {
            hook(&failure);
        }
        false
    }

    /// Stop logging failures from `site`; they are still counted
    pub fn ignore(&self, site: &'static str) {
        if let Ok(mut ignored) = self.ignored.lock() {
            ignored.insert(site);
        }
    }

    /// Resume logging failures from `site`
    pub fn unignore(&self, site: &'static str) {
        if let Ok(mut ignored) = self.ignored.lock() {
            ignored.remove(site);
        }
    }

    /// Total failures recorded so far
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Failures recorded at `site`
    pub fn failures_at(&self, site: &'static str) -> u64 {
        self.per_site
            .lock()
            .map(|per_site| per_site.get(site).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("failures", &self.failure_count())
            .field("has_hook", &self.hook.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_verify_passes_through_condition() {
        let diagnostics = Diagnostics::new();
        assert!(diagnostics.verify(true, "test.site", "unused"));
        assert!(!diagnostics.verify(false, "test.site", "broken"));
        assert_eq!(diagnostics.failure_count(), 1);
        assert_eq!(diagnostics.failures_at("test.site"), 1);
        assert_eq!(diagnostics.failures_at("other.site"), 0);
    }

    #[test]
    fn test_ignored_sites_are_still_counted_and_hooked() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let diagnostics = Diagnostics::with_hook(Box::new(move |failure| {
            sink.lock().expect("Should lock").push(failure.clone());
        }));

        diagnostics.ignore("noisy");
        diagnostics.verify(false, "noisy", "first");
        diagnostics.unignore("noisy");
        diagnostics.verify(false, "noisy", format_args!("second {}", 2));

        let seen = seen.lock().expect("Should lock");
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].message, "second 2");
        assert_eq!(diagnostics.failures_at("noisy"), 2);
    }
}
