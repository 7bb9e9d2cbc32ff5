//! File name exclusion
//!
//! Patterns use shell glob syntax (`*`, `?`, `[...]`) and are matched against
//! bare file names, never against full paths.

use glob::Pattern;
use tracing::{trace, warn};

/// Check whether `name` matches any of the exclusion `patterns`
///
/// The first matching pattern wins. A malformed pattern never matches and does
/// not prevent the remaining patterns from being tried.
pub fn is_excluded<S: AsRef<str>>(name: &str, patterns: &[S]) -> bool {
    for pattern in patterns {
        let pattern = pattern.as_ref();
        match Pattern::new(pattern) {
            Ok(compiled) if compiled.matches(name) => {
                trace!("{:?} is excluded by pattern {:?}", name, pattern);
                return true;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Ignoring malformed exclusion pattern {:?}: {}", pattern, e);
            }
        }
    }
    false
}

/// Return the patterns that can never match because they fail to parse
pub fn malformed_patterns<S: AsRef<str>>(patterns: &[S]) -> Vec<String> {
    patterns
        .iter()
        .map(AsRef::as_ref)
        .filter(|p| Pattern::new(p).is_err())
        .map(str::to_string)
        .collect()
}
