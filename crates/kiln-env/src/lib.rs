//! Layered process-environment composition.
//!
//! A build step's environment is assembled from an ordered list of
//! [`EnvLayer`]s: the toolchain's contribution, the component's own settings
//! and finally a caller override layer. Each layer maps variable names to
//! [`EnvOp`]s.
//!
//! Composition rules:
//! - `set` and `unset` are destructive and the last one wins.
//! - `set-if-unset` only materializes when no layer (earlier or later) issues
//!   a `set`/`unset` for the key and the ambient environment lacks it. When
//!   it does materialize it counts as the base value for later mutations.
//! - `prefix`, `append` and `suffix-join` accumulate onto the resolved base
//!   in declaration order, regardless of which layer declared them.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A single mutation of one environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum EnvOp {
    /// Replace the value.
    Set { value: String },
    /// Remove the variable.
    Unset,
    /// Provide a default used only when nothing else sets the variable.
    SetIfUnset { value: String },
    /// Put `value` in front of the existing value, joined with `separator`.
    Prefix { value: String, separator: String },
    /// Concatenate `value` onto the existing value.
    Append { value: String },
    /// Put `value` after the existing value, joined with `separator`.
    SuffixJoin { value: String, separator: String },
}

impl EnvOp {
    fn is_destructive(&self) -> bool {
        matches!(self, EnvOp::Set { .. } | EnvOp::Unset)
    }
}

/// One layer of environment contributions.
///
/// Keys are kept ordered so that neither composition nor serialization
/// depends on hash iteration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvLayer {
    ops: BTreeMap<String, Vec<EnvOp>>,
}

impl EnvLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an operation for `key`, after any already recorded for it.
    pub fn push(&mut self, key: impl Into<String>, op: EnvOp) -> &mut Self {
        self.ops.entry(key.into()).or_default().push(op);
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, EnvOp::Set { value: value.into() });
        self
    }

    pub fn unset(mut self, key: impl Into<String>) -> Self {
        self.push(key, EnvOp::Unset);
        self
    }

    pub fn set_if_unset(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, EnvOp::SetIfUnset { value: value.into() });
        self
    }

    pub fn prefix(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        separator: impl Into<String>,
    ) -> Self {
        self.push(
            key,
            EnvOp::Prefix {
                value: value.into(),
                separator: separator.into(),
            },
        );
        self
    }

    pub fn append(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, EnvOp::Append { value: value.into() });
        self
    }

    pub fn suffix_join(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        separator: impl Into<String>,
    ) -> Self {
        self.push(
            key,
            EnvOp::SuffixJoin {
                value: value.into(),
                separator: separator.into(),
            },
        );
        self
    }

    /// Prepend a directory onto a `:`-separated search path.
    pub fn prepend_path(self, key: impl Into<String>, dir: impl Into<String>) -> Self {
        self.prefix(key, dir, ":")
    }

    /// Append a directory onto a `:`-separated search path.
    pub fn append_path(self, key: impl Into<String>, dir: impl Into<String>) -> Self {
        self.suffix_join(key, dir, ":")
    }

    /// Append every operation of `other` after this layer's own.
    pub fn extend(&mut self, other: &EnvLayer) {
        for (key, ops) in &other.ops {
            self.ops.entry(key.clone()).or_default().extend(ops.iter().cloned());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Iterate over `(key, ops)` in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[EnvOp])> {
        self.ops.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Rewrite every value in the layer, keeping the operations.
    pub fn map_values(&self, mut f: impl FnMut(&str) -> String) -> EnvLayer {
        let ops = self
            .ops
            .iter()
            .map(|(key, ops)| {
                let ops = ops
                    .iter()
                    .map(|op| match op {
                        EnvOp::Set { value } => EnvOp::Set { value: f(value) },
                        EnvOp::Unset => EnvOp::Unset,
                        EnvOp::SetIfUnset { value } => EnvOp::SetIfUnset { value: f(value) },
                        EnvOp::Prefix { value, separator } => EnvOp::Prefix {
                            value: f(value),
                            separator: separator.clone(),
                        },
                        EnvOp::Append { value } => EnvOp::Append { value: f(value) },
                        EnvOp::SuffixJoin { value, separator } => EnvOp::SuffixJoin {
                            value: f(value),
                            separator: separator.clone(),
                        },
                    })
                    .collect();
                (key.clone(), ops)
            })
            .collect();
        EnvLayer { ops }
    }
}

/// A fully resolved environment: plain variable names to values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedEnv {
    vars: BTreeMap<String, String>,
}

impl ResolvedEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the environment of the current process.
    pub fn from_process() -> Self {
        std::env::vars().collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.vars.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Split a `:`-separated search path variable into directories.
    pub fn search_path(&self, key: &str) -> Vec<PathBuf> {
        self.get(key)
            .map(|v| std::env::split_paths(v).filter(|p| !p.as_os_str().is_empty()).collect())
            .unwrap_or_default()
    }

    /// A layer that `set`s every variable in this environment.
    pub fn to_layer(&self) -> EnvLayer {
        self.vars
            .iter()
            .fold(EnvLayer::new(), |layer, (k, v)| layer.set(k, v))
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.vars
    }
}

impl FromIterator<(String, String)> for ResolvedEnv {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}

/// Per-key accumulation state while walking the layers.
#[derive(Debug, Default)]
struct KeyState<'a> {
    /// Last destructive operation, if any.
    explicit: Option<&'a EnvOp>,
    /// Last `set-if-unset` value, if any.
    fallback: Option<&'a str>,
    /// Accumulating operations in declaration order.
    mutations: Vec<&'a EnvOp>,
}

impl KeyState<'_> {
    fn resolve(&self, ambient: Option<&str>) -> Option<String> {
        let base = match self.explicit {
            Some(EnvOp::Set { value }) => Some(value.clone()),
            Some(_) => None,
            None => ambient.or(self.fallback).map(str::to_string),
        };

        self.mutations.iter().fold(base, |current, op| {
            let current = current.filter(|v| !v.is_empty());
            Some(match (op, current) {
                (EnvOp::Prefix { value, separator }, Some(cur)) => {
                    format!("{value}{separator}{cur}")
                }
                (EnvOp::Append { value }, Some(cur)) => format!("{cur}{value}"),
                (EnvOp::SuffixJoin { value, separator }, Some(cur)) => {
                    format!("{cur}{separator}{value}")
                }
                (
                    EnvOp::Prefix { value, .. }
                    | EnvOp::Append { value }
                    | EnvOp::SuffixJoin { value, .. },
                    None,
                ) => value.clone(),
                (EnvOp::Set { .. } | EnvOp::Unset | EnvOp::SetIfUnset { .. }, cur) => {
                    cur.unwrap_or_default()
                }
            })
        })
    }
}

/// Compose layers into a fresh environment (no ambient variables).
pub fn compose(layers: &[EnvLayer]) -> ResolvedEnv {
    compose_over(&ResolvedEnv::new(), layers)
}

/// Compose layers on top of an ambient environment. Ambient variables that
/// no layer mentions pass through unchanged.
pub fn compose_over(ambient: &ResolvedEnv, layers: &[EnvLayer]) -> ResolvedEnv {
    let mut states: BTreeMap<&str, KeyState<'_>> = BTreeMap::new();

    for layer in layers {
        for (key, ops) in &layer.ops {
            let state = states.entry(key.as_str()).or_default();
            for op in ops {
                match op {
                    op if op.is_destructive() => state.explicit = Some(op),
                    EnvOp::SetIfUnset { value } => state.fallback = Some(value.as_str()),
                    op => state.mutations.push(op),
                }
            }
        }
    }

    let mut out = ambient.clone();
    for (key, state) in states {
        match state.resolve(ambient.get(key)) {
            Some(value) => out.insert(key, value),
            None => {
                out.remove(key);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_set_wins() {
        let env = compose(&[EnvLayer::new().set("A", "1"), EnvLayer::new().set("A", "2")]);
        assert_eq!(env.get("A"), Some("2"));
    }

    #[test]
    fn set_if_unset_with_independent_key() {
        let env = compose(&[
            EnvLayer::new().set_if_unset("A", "1"),
            EnvLayer::new().set("B", "2"),
        ]);
        assert_eq!(env.get("A"), Some("1"));
        assert_eq!(env.get("B"), Some("2"));
    }

    #[test]
    fn set_if_unset_loses_to_earlier_and_later_sets() {
        let later = compose(&[
            EnvLayer::new().set_if_unset("A", "default"),
            EnvLayer::new().set("A", "explicit"),
        ]);
        assert_eq!(later.get("A"), Some("explicit"));

        let earlier = compose(&[
            EnvLayer::new().set("A", "explicit"),
            EnvLayer::new().set_if_unset("A", "default"),
        ]);
        assert_eq!(earlier.get("A"), Some("explicit"));
    }

    #[test]
    fn set_if_unset_loses_to_unset() {
        let env = compose(&[
            EnvLayer::new().set_if_unset("A", "default"),
            EnvLayer::new().unset("A"),
        ]);
        assert_eq!(env.get("A"), None);
    }

    #[test]
    fn unset_then_set() {
        let env = compose(&[EnvLayer::new().unset("A"), EnvLayer::new().set("A", "x")]);
        assert_eq!(env.get("A"), Some("x"));
        let env = compose(&[EnvLayer::new().set("A", "x"), EnvLayer::new().unset("A")]);
        assert_eq!(env.get("A"), None);
    }

    #[test]
    fn mutations_accumulate_in_declaration_order() {
        let env = compose(&[
            EnvLayer::new().set("PATH", "/usr/bin"),
            EnvLayer::new().prepend_path("PATH", "/a/bin"),
            EnvLayer::new().prepend_path("PATH", "/b/bin").append_path("PATH", "/z/bin"),
        ]);
        assert_eq!(env.get("PATH"), Some("/b/bin:/a/bin:/usr/bin:/z/bin"));
    }

    #[test]
    fn mutations_survive_a_later_set() {
        let env = compose(&[
            EnvLayer::new().prepend_path("PATH", "/tool/bin"),
            EnvLayer::new().set("PATH", "/usr/bin"),
        ]);
        assert_eq!(env.get("PATH"), Some("/tool/bin:/usr/bin"));
    }

    #[test]
    fn mutations_build_on_set_if_unset_default() {
        let env = compose(&[
            EnvLayer::new().set_if_unset("CFLAGS", "-O2"),
            EnvLayer::new().suffix_join("CFLAGS", "-g", " "),
        ]);
        assert_eq!(env.get("CFLAGS"), Some("-O2 -g"));
    }

    #[test]
    fn mutations_without_base() {
        let env = compose(&[EnvLayer::new()
            .append("SUFFIX", "abc")
            .prefix("LIBRARY_PATH", "/lib", ":")]);
        assert_eq!(env.get("SUFFIX"), Some("abc"));
        assert_eq!(env.get("LIBRARY_PATH"), Some("/lib"));
    }

    #[test]
    fn raw_append_concatenates() {
        let env = compose(&[EnvLayer::new().set("X", "foo").append("X", "bar")]);
        assert_eq!(env.get("X"), Some("foobar"));
    }

    #[test]
    fn ambient_passes_through_and_blocks_fallback() {
        let ambient: ResolvedEnv = [("HOME".to_string(), "/root".to_string()), ("LANG".to_string(), "C".to_string())]
            .into_iter()
            .collect();
        let env = compose_over(
            &ambient,
            &[EnvLayer::new()
                .set_if_unset("LANG", "en_US.UTF-8")
                .set_if_unset("TZ", "UTC")],
        );
        assert_eq!(env.get("HOME"), Some("/root"));
        assert_eq!(env.get("LANG"), Some("C"));
        assert_eq!(env.get("TZ"), Some("UTC"));
    }

    #[test]
    fn independent_keys_commute() {
        let a = EnvLayer::new().set("A", "1");
        let b = EnvLayer::new().set("B", "2");
        assert_eq!(compose(&[a.clone(), b.clone()]), compose(&[b, a]));
    }

    #[test]
    fn search_path_splits() {
        let env = compose(&[EnvLayer::new().set("PATH", "/a:/b::/c")]);
        assert_eq!(
            env.search_path("PATH"),
            vec![PathBuf::from("/a"), PathBuf::from("/b"), PathBuf::from("/c")]
        );
    }

    #[test]
    fn layer_serializes_with_kebab_ops() {
        let layer = EnvLayer::new().set_if_unset("A", "1").unset("B");
        let json = serde_json::to_string(&layer).unwrap();
        assert!(json.contains("\"set-if-unset\""));
        let back: EnvLayer = serde_json::from_str(&json).unwrap();
        assert_eq!(back, layer);
    }

    #[test]
    fn map_values_rewrites_placeholders() {
        let layer = EnvLayer::new()
            .prepend_path("PATH", "%{tc}/bin")
            .set("CC", "cc");
        let mapped = layer.map_values(|v| v.replace("%{tc}", "/store/abc"));
        let env = compose(&[mapped]);
        assert_eq!(env.get("PATH"), Some("/store/abc/bin"));
        assert_eq!(env.get("CC"), Some("cc"));
    }
}
