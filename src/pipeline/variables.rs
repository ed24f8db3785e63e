//! Hierarchical variable scope and `${name}` substitution.
//!
//! A scope is a string map with an optional parent link; lookup walks up the
//! chain, so a local assignment shadows the parent's value. A pipeline owns
//! one scope; a nested pipeline either shares its parent's scope by
//! reference ("inherit all variables") or gets a fresh scope seeded only
//! with declared parameters.
//!
//! Substitution resolves `${name}` at the point a configuration string is
//! read. Unresolved references pass through literally — a config value of
//! `"${missing}"` stays `"${missing}"` — so typos surface in output instead
//! of silently becoming empty strings.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

const OPEN: &str = "${";
const CLOSE: char = '}';

/// Shared, concurrently readable/writable variable environment.
#[derive(Debug, Default)]
pub struct VariableScope {
    vars: RwLock<HashMap<String, String>>,
    parent: Option<Arc<VariableScope>>,
}

impl VariableScope {
    /// A root scope with no parent.
    pub fn root() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A child scope; unset names resolve through `parent`.
    pub fn child_of(parent: &Arc<VariableScope>) -> Arc<Self> {
        Arc::new(Self {
            vars: RwLock::new(HashMap::new()),
            parent: Some(Arc::clone(parent)),
        })
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.vars
            .write()
            .expect("variable scope lock poisoned")
            .insert(name.into(), value.into());
    }

    /// Look up `name`, walking the parent chain when unset locally.
    pub fn get(&self, name: &str) -> Option<String> {
        if let Some(v) = self
            .vars
            .read()
            .expect("variable scope lock poisoned")
            .get(name)
        {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    /// Names set directly on this scope (parent entries excluded).
    pub fn local_names(&self) -> Vec<String> {
        self.vars
            .read()
            .expect("variable scope lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Resolve every `${name}` occurrence in `input` against this scope.
    /// Unknown names are left as-is.
    pub fn substitute(&self, input: &str) -> String {
        if !input.contains(OPEN) {
            return input.to_string();
        }
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find(OPEN) {
            out.push_str(&rest[..start]);
            let after = &rest[start + OPEN.len()..];
            match after.find(CLOSE) {
                Some(end) => {
                    let name = &after[..end];
                    match self.get(name) {
                        Some(value) => out.push_str(&value),
                        None => {
                            out.push_str(OPEN);
                            out.push_str(name);
                            out.push(CLOSE);
                        }
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    // Unterminated reference: keep the tail verbatim.
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_walks_to_parent() {
        let root = VariableScope::root();
        root.set("base", "/data");
        let child = VariableScope::child_of(&root);
        assert_eq!(child.get("base").as_deref(), Some("/data"));
    }

    #[test]
    fn test_child_shadows_parent() {
        let root = VariableScope::root();
        root.set("dir", "parent");
        let child = VariableScope::child_of(&root);
        child.set("dir", "child");
        assert_eq!(child.get("dir").as_deref(), Some("child"));
        assert_eq!(root.get("dir").as_deref(), Some("parent"));
    }

    #[test]
    fn test_substitute_basic() {
        let scope = VariableScope::root();
        scope.set("name", "world");
        assert_eq!(scope.substitute("hello ${name}!"), "hello world!");
    }

    #[test]
    fn test_substitute_multiple_and_adjacent() {
        let scope = VariableScope::root();
        scope.set("a", "1");
        scope.set("b", "2");
        assert_eq!(scope.substitute("${a}${b}/${a}"), "12/1");
    }

    #[test]
    fn test_unresolved_passes_through_literally() {
        let scope = VariableScope::root();
        assert_eq!(scope.substitute("x=${missing}"), "x=${missing}");
    }

    #[test]
    fn test_unterminated_reference_kept() {
        let scope = VariableScope::root();
        scope.set("a", "1");
        assert_eq!(scope.substitute("${a} and ${oops"), "1 and ${oops");
    }

    #[test]
    fn test_no_reference_fast_path() {
        let scope = VariableScope::root();
        assert_eq!(scope.substitute("plain"), "plain");
    }
}
