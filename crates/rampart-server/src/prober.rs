//! Prerequisite probing: declared host requirements for tools and runners.
//!
//! Probing is best-effort and cached for the process lifetime; a probing
//! failure counts as "unsatisfied" and the affected tool is skipped, never a
//! crash.

use std::collections::HashMap;
use std::sync::Mutex;

use rampart_types::{RampartError, Requirements};

/// Checks requirements blocks against the host, caching executable lookups.
pub struct Prober {
    executables: Mutex<HashMap<String, bool>>,
}

impl Prober {
    pub fn new() -> Self {
        Self {
            executables: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `name` resolves to an executable on PATH. Cached.
    pub fn executable_exists(&self, name: &str) -> bool {
        if let Ok(mut cache) = self.executables.lock() {
            if let Some(known) = cache.get(name) {
                return *known;
            }
            let found = which::which(name).is_ok();
            cache.insert(name.to_string(), found);
            found
        } else {
            // Poisoned cache: fall back to an uncached lookup.
            which::which(name).is_ok()
        }
    }

    /// Check a requirements block, naming the first missing item.
    pub fn check(&self, requirements: &Requirements) -> Result<(), RampartError> {
        if !requirements.os.is_empty() && !requirements.os.iter().any(|os| os_matches(os)) {
            return Err(RampartError::Prerequisite(format!(
                "requires one of OS [{}], host is {}",
                requirements.os.join(", "),
                std::env::consts::OS
            )));
        }

        for executable in &requirements.executables {
            if !self.executable_exists(executable) {
                return Err(RampartError::Prerequisite(format!(
                    "missing executable: {executable}"
                )));
            }
        }

        Ok(())
    }
}

impl Default for Prober {
    fn default() -> Self {
        Self::new()
    }
}

/// Match a declared OS name against the host. Accepts the `darwin` alias for
/// macOS since catalogs written against Go-era tooling use it.
fn os_matches(name: &str) -> bool {
    let normalized = match name.to_ascii_lowercase().as_str() {
        "darwin" | "macos" => "macos".to_string(),
        other => other.to_string(),
    };
    normalized == std::env::consts::OS
}
