//! Generic ordered plugin registry (§4.4/C4).
//!
//! Each concrete plugin trait used elsewhere in the workspace (json_schema
//! plugins, validator testers, action hooks, ...) implements `Plugin` and
//! is collected into a `Registry`, built once per process and reused for
//! every request — the static equivalent of the original's
//! directory-of-files discovered via `glob` and imported with `pydoc`.

use std::collections::HashMap;
use std::sync::Arc;
use yac_core::Error;

/// Every plugin kind exposes a name (for `get`/`require` lookups) and an
/// order: `late` selects the early or late execution phase, `rank` orders
/// plugins within that phase (lower runs first). Plugins that don't care
/// run early, rank 0.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;
    fn order(&self) -> (bool, i32) {
        (false, 0)
    }
}

/// A kind-scoped collection of plugins, sorted by rank once at
/// construction and reused for the registry's lifetime.
pub struct Registry<P: ?Sized> {
    by_name: HashMap<String, Arc<P>>,
    sorted: Vec<Arc<P>>,
}

impl<P: Plugin + ?Sized> Registry<P> {
    pub fn new(plugins: Vec<Arc<P>>) -> Self {
        let mut sorted = plugins.clone();
        sorted.sort_by_key(|p| p.order().1);
        let by_name = plugins
            .into_iter()
            .map(|p| (p.name().to_string(), p))
            .collect();
        Registry { by_name, sorted }
    }

    pub fn get(&self, name: &str) -> Option<Arc<P>> {
        self.by_name.get(name).cloned()
    }

    /// Plugins for one phase (early = `late: false`, late = `late: true`),
    /// already sorted by rank within that phase.
    pub fn phase(&self, late: bool) -> Vec<Arc<P>> {
        self.sorted
            .iter()
            .filter(|p| p.order().0 == late)
            .cloned()
            .collect()
    }

    /// All plugins, sorted by rank, regardless of phase.
    pub fn all(&self) -> &[Arc<P>] {
        &self.sorted
    }

    /// Fails fast if any of `names` is missing from this registry.
    pub fn require(&self, kind: &str, names: &[&str]) -> Result<(), Error> {
        let missing: Vec<&str> = names
            .iter()
            .filter(|n| !self.by_name.contains_key(**n))
            .copied()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::server(format!(
                "Could not load required {kind} plugin(s): {}",
                missing.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy {
        name: &'static str,
        order: (bool, i32),
    }

    impl Plugin for Dummy {
        fn name(&self) -> &str {
            self.name
        }
        fn order(&self) -> (bool, i32) {
            self.order
        }
    }

    #[test]
    fn phase_filters_and_sorts_by_rank() {
        let reg = Registry::new(vec![
            Arc::new(Dummy { name: "b", order: (false, 10) }),
            Arc::new(Dummy { name: "a", order: (false, 0) }),
            Arc::new(Dummy { name: "c", order: (true, 0) }),
        ]);
        let early: Vec<&str> = reg.phase(false).iter().map(|p| p.name()).collect();
        assert_eq!(early, vec!["a", "b"]);
        let late: Vec<&str> = reg.phase(true).iter().map(|p| p.name()).collect();
        assert_eq!(late, vec!["c"]);
    }

    #[test]
    fn require_fails_on_missing_name() {
        let reg: Registry<Dummy> = Registry::new(vec![Arc::new(Dummy { name: "a", order: (false, 0) })]);
        assert!(reg.require("test", &["a"]).is_ok());
        let err = reg.require("test", &["a", "missing"]).unwrap_err();
        assert_eq!(err.code(), 500);
    }

    #[test]
    fn get_looks_up_by_name() {
        let reg = Registry::new(vec![Arc::new(Dummy { name: "a", order: (false, 0) })]);
        assert!(reg.get("a").is_some());
        assert!(reg.get("b").is_none());
    }
}
