//! Stock units for the common matching and answering steps.

use super::core::{HandlerUnit, UnitScope};
use super::outcome::{Evaluation, Outcome, ResponseMessage};
use crate::request::ParamVec;
use anyhow::Context as _;
use http::header::{HeaderName, HeaderValue};
use http::{Method, StatusCode};
use regex::Regex;
use smallvec::SmallVec;
use std::sync::Arc;

/// Accepts requests whose method is in the list, rejects the rest.
#[derive(Debug, Clone)]
pub struct MethodMatch {
    methods: SmallVec<[Method; 2]>,
}

impl MethodMatch {
    #[must_use]
    pub fn new(method: Method) -> Self {
        Self {
            methods: SmallVec::from_elem(method, 1),
        }
    }

    #[must_use]
    pub fn any_of(methods: impl IntoIterator<Item = Method>) -> Self {
        Self {
            methods: methods.into_iter().collect(),
        }
    }
}

impl HandlerUnit for MethodMatch {
    fn name(&self) -> &str {
        "MethodMatch"
    }

    fn evaluate(&mut self, scope: &mut UnitScope<'_>) -> anyhow::Result<Evaluation> {
        let method = &scope.request().method;
        Ok(if self.methods.contains(method) {
            Outcome::consumed()
        } else {
            Outcome::rejected()
        }
        .into())
    }
}

/// Path parameters captured by a [`PathMatch`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(pub ParamVec);

impl PathParams {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A compiled `/segment/{param}` pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
    param_names: Vec<Arc<str>>,
}

impl PathPattern {
    /// Compile `pattern`; `{name}` segments capture one path segment each.
    pub fn parse(pattern: &str) -> anyhow::Result<Self> {
        let mut regex_src = String::with_capacity(pattern.len() + 8);
        regex_src.push('^');
        let mut param_names = Vec::with_capacity(pattern.matches('{').count());

        for segment in pattern.split('/').filter(|s| !s.is_empty()) {
            if let Some(name) = segment
                .strip_prefix('{')
                .and_then(|s| s.strip_suffix('}'))
            {
                anyhow::ensure!(
                    !name.is_empty(),
                    "empty parameter name in path pattern {pattern:?}"
                );
                regex_src.push_str("/([^/]+)");
                param_names.push(Arc::from(name));
            } else {
                regex_src.push('/');
                regex_src.push_str(&regex::escape(segment));
            }
        }
        if param_names.is_empty() && regex_src.len() == 1 {
            regex_src.push('/');
        }
        regex_src.push_str("/?$");

        let regex = Regex::new(&regex_src)
            .with_context(|| format!("invalid path pattern {pattern:?}"))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
            param_names,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Captured parameters, or `None` when `path` does not match.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let caps = self.regex.captures(path)?;
        let params = self
            .param_names
            .iter()
            .enumerate()
            .filter_map(|(i, name)| {
                caps.get(i + 1)
                    .map(|m| (Arc::clone(name), m.as_str().to_string()))
            })
            .collect();
        Some(PathParams(params))
    }
}

/// Accepts matching paths and contributes their [`PathParams`].
#[derive(Debug, Clone)]
pub struct PathMatch {
    pattern: PathPattern,
}

impl PathMatch {
    pub fn new(pattern: &str) -> anyhow::Result<Self> {
        Ok(Self {
            pattern: PathPattern::parse(pattern)?,
        })
    }

    #[must_use]
    pub fn from_pattern(pattern: PathPattern) -> Self {
        Self { pattern }
    }
}

impl HandlerUnit for PathMatch {
    fn name(&self) -> &str {
        "PathMatch"
    }

    fn evaluate(&mut self, scope: &mut UnitScope<'_>) -> anyhow::Result<Evaluation> {
        Ok(match self.pattern.matches(&scope.request().path) {
            Some(params) => Outcome::consumed_with(params),
            None => Outcome::rejected(),
        }
        .into())
    }
}

/// Writes one header into the response and carries on.
#[derive(Debug, Clone)]
pub struct SetHeader {
    name: HeaderName,
    value: HeaderValue,
}

impl SetHeader {
    pub fn new(name: &str, value: &str) -> anyhow::Result<Self> {
        Ok(Self {
            name: HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name {name:?}"))?,
            value: HeaderValue::from_str(value)
                .with_context(|| format!("invalid value for header {name}"))?,
        })
    }
}

impl HandlerUnit for SetHeader {
    fn name(&self) -> &str {
        "SetHeader"
    }

    fn evaluate(&mut self, scope: &mut UnitScope<'_>) -> anyhow::Result<Evaluation> {
        scope
            .response()
            .insert_raw(self.name.clone(), self.value.clone());
        Ok(Outcome::consumed().into())
    }
}

/// Answers with a fixed status and optional message.
#[derive(Debug, Clone)]
pub struct Respond {
    status: StatusCode,
    message: Option<ResponseMessage>,
}

impl Respond {
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(status: StatusCode, message: impl Into<ResponseMessage>) -> Self {
        Self {
            status,
            message: Some(message.into()),
        }
    }
}

impl HandlerUnit for Respond {
    fn name(&self) -> &str {
        "Respond"
    }

    fn evaluate(&mut self, _scope: &mut UnitScope<'_>) -> anyhow::Result<Evaluation> {
        Ok(Outcome::RespondWith {
            status: self.status,
            message: self.message.clone(),
        }
        .into())
    }
}
