//! Resolution of unit specs into live units.

use super::core::UnitSpec;
use crate::context::Context;
use crate::unit::{
    HandlerUnit, MethodMatch, PathMatch, PathPattern, Respond, ResponseMessage, SetHeader,
};
use anyhow::Context as _;
use http::{Method, StatusCode};
use serde::Deserialize;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Builds a live unit for a spec, with the request context at hand.
pub trait Instantiator: Send + Sync {
    fn instantiate(&self, spec: &UnitSpec, ctx: &Context) -> anyhow::Result<Box<dyn HandlerUnit>>;
}

type Constructor =
    Arc<dyn Fn(&UnitSpec, &Context) -> anyhow::Result<Box<dyn HandlerUnit>> + Send + Sync>;

/// Path patterns compiled once per distinct pattern string.
#[derive(Default)]
struct PatternCache {
    compiled: Mutex<HashMap<String, PathPattern>>,
}

impl PatternCache {
    fn get_or_compile(&self, pattern: &str) -> anyhow::Result<PathPattern> {
        let mut compiled = self.compiled.lock();
        if let Some(hit) = compiled.get(pattern) {
            return Ok(hit.clone());
        }
        let fresh = PathPattern::parse(pattern)?;
        compiled.insert(pattern.to_string(), fresh.clone());
        Ok(fresh)
    }

    fn len(&self) -> usize {
        self.compiled.lock().len()
    }
}

/// Name → constructor table.
#[derive(Clone, Default)]
pub struct UnitRegistry {
    constructors: HashMap<Arc<str>, Constructor>,
    patterns: Arc<PatternCache>,
}

impl UnitRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `method`, `path`, `set_header` and `respond`.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("method", |spec, _| {
            let methods = parse_methods(&spec.args)?;
            Ok(Box::new(MethodMatch::any_of(methods)))
        });
        let patterns = Arc::clone(&registry.patterns);
        registry.register("path", move |spec, _| {
            let pattern = spec
                .args
                .as_str()
                .context("path expects a pattern string")?;
            Ok(Box::new(PathMatch::from_pattern(
                patterns.get_or_compile(pattern)?,
            )))
        });
        registry.register("set_header", |spec, _| {
            let args: SetHeaderArgs = serde_json::from_value(spec.args.clone())
                .context("set_header expects {name, value}")?;
            Ok(Box::new(SetHeader::new(&args.name, &args.value)?))
        });
        registry.register("respond", |spec, _| {
            let args: RespondArgs = serde_json::from_value(spec.args.clone())
                .context("respond expects {status, message?}")?;
            let status = StatusCode::from_u16(args.status)
                .with_context(|| format!("invalid status {}", args.status))?;
            Ok(Box::new(match args.message {
                Some(Value::String(text)) => Respond::with_message(status, text),
                Some(other) => Respond::with_message(status, ResponseMessage::Structured(other)),
                None => Respond::new(status),
            }))
        });
        registry
    }

    /// Register a constructor. A second registration under the same name wins.
    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn(&UnitSpec, &Context) -> anyhow::Result<Box<dyn HandlerUnit>> + Send + Sync + 'static,
    {
        if self
            .constructors
            .insert(Arc::from(name), Arc::new(constructor))
            .is_some()
        {
            warn!(unit = %name, "Replacing registered unit constructor");
        }
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    #[must_use]
    pub fn names(&self) -> Vec<Arc<str>> {
        let mut names: Vec<_> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Instantiator for UnitRegistry {
    fn instantiate(&self, spec: &UnitSpec, ctx: &Context) -> anyhow::Result<Box<dyn HandlerUnit>> {
        let constructor = self
            .constructors
            .get(&spec.name)
            .with_context(|| format!("no unit registered under {:?}", spec.name))?;
        constructor(spec, ctx).with_context(|| format!("failed to instantiate unit {spec}"))
    }
}

impl std::fmt::Debug for UnitRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitRegistry")
            .field("units", &self.names())
            .finish()
    }
}

#[derive(Deserialize)]
struct SetHeaderArgs {
    name: String,
    value: String,
}

#[derive(Deserialize)]
struct RespondArgs {
    status: u16,
    #[serde(default)]
    message: Option<Value>,
}

fn parse_methods(args: &Value) -> anyhow::Result<Vec<Method>> {
    let names: Vec<&str> = match args {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().context("method list must contain strings"))
            .collect::<anyhow::Result<_>>()?,
        _ => anyhow::bail!("method expects a string or a list of strings"),
    };
    names
        .into_iter()
        .map(|name| {
            Method::from_bytes(name.to_ascii_uppercase().as_bytes())
                .with_context(|| format!("invalid method {name:?}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;
    use serde_json::json;

    fn ctx() -> Context {
        Context::for_request(Request::new(Method::GET, "/"))
    }

    #[test]
    fn test_builtins_instantiate() {
        let registry = UnitRegistry::with_builtins();
        for spec in [
            UnitSpec::with_args("method", json!(["get", "HEAD"])),
            UnitSpec::with_args("path", json!("/a/{id}")),
            UnitSpec::with_args("set_header", json!({"name": "x-a", "value": "1"})),
            UnitSpec::with_args("respond", json!({"status": 201, "message": "made"})),
        ] {
            assert!(registry.instantiate(&spec, &ctx()).is_ok(), "{spec}");
        }
    }

    #[test]
    fn test_unknown_and_bad_specs_fail() {
        let registry = UnitRegistry::with_builtins();
        let err = registry
            .instantiate(&UnitSpec::new("nope"), &ctx())
            .unwrap_err();
        assert!(err.to_string().contains("nope"));

        let bad = UnitSpec::with_args("respond", json!({"status": 1000}));
        let err = registry.instantiate(&bad, &ctx()).unwrap_err();
        assert!(format!("{err:#}").contains("invalid status"));
        assert!(registry
            .instantiate(&UnitSpec::with_args("method", json!(7)), &ctx())
            .is_err());
    }

    #[test]
    fn test_path_patterns_compile_once() {
        let registry = UnitRegistry::with_builtins();
        let spec = UnitSpec::with_args("path", json!("/a/{id}"));
        for _ in 0..3 {
            registry.instantiate(&spec, &ctx()).unwrap();
        }
        assert_eq!(registry.patterns.len(), 1);

        let other = UnitSpec::with_args("path", json!("/b"));
        registry.instantiate(&other, &ctx()).unwrap();
        assert_eq!(registry.patterns.len(), 2);

        let bad = UnitSpec::with_args("path", json!("/{}"));
        assert!(registry.instantiate(&bad, &ctx()).is_err());
        assert_eq!(registry.patterns.len(), 2);
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = UnitRegistry::new();
        registry.register("x", |_, _| Ok(Box::new(Respond::new(StatusCode::OK))));
        registry.register("x", |_, _| anyhow::bail!("second"));
        assert_eq!(registry.names().len(), 1);
        assert!(registry.instantiate(&UnitSpec::new("x"), &ctx()).is_err());
    }
}
