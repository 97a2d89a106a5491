use crate::context::Context;
use crate::unit::HandlerUnit;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// A unit named by identifier, resolved through an
/// [`Instantiator`](super::Instantiator) when the chain reaches it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSpec {
    pub name: Arc<str>,
    /// Constructor arguments, interpreted by the registered constructor.
    #[serde(default)]
    pub args: Value,
}

impl UnitSpec {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            args: Value::Null,
        }
    }

    #[must_use]
    pub fn with_args(name: &str, args: Value) -> Self {
        Self {
            name: Arc::from(name),
            args,
        }
    }
}

impl fmt::Display for UnitSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_null() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}({})", self.name, self.args)
        }
    }
}

/// A chain member: a live unit or a spec to instantiate on demand.
pub enum ChainElement {
    Instance(Box<dyn HandlerUnit>),
    Spec(UnitSpec),
}

impl ChainElement {
    pub fn instance(unit: impl HandlerUnit + 'static) -> Self {
        ChainElement::Instance(Box::new(unit))
    }

    #[must_use]
    pub fn spec(name: &str) -> Self {
        ChainElement::Spec(UnitSpec::new(name))
    }

    /// Name for diagnostics.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            ChainElement::Instance(unit) => unit.name().to_string(),
            ChainElement::Spec(spec) => format!("spec:{spec}"),
        }
    }
}

impl From<UnitSpec> for ChainElement {
    fn from(spec: UnitSpec) -> Self {
        ChainElement::Spec(spec)
    }
}

impl From<Box<dyn HandlerUnit>> for ChainElement {
    fn from(unit: Box<dyn HandlerUnit>) -> Self {
        ChainElement::Instance(unit)
    }
}

impl fmt::Debug for ChainElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// An ordered sequence of units making up one candidate response.
///
/// Built fresh for every request attempt; never shared between requests.
#[derive(Debug)]
pub struct HandlerChain {
    name: Arc<str>,
    elements: Vec<ChainElement>,
}

impl HandlerChain {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            elements: Vec::new(),
        }
    }

    #[must_use]
    pub fn named(name: Arc<str>, elements: Vec<ChainElement>) -> Self {
        Self { name, elements }
    }

    #[must_use]
    pub fn unit(mut self, unit: impl HandlerUnit + 'static) -> Self {
        self.elements.push(ChainElement::instance(unit));
        self
    }

    #[must_use]
    pub fn spec(mut self, spec: UnitSpec) -> Self {
        self.elements.push(ChainElement::Spec(spec));
        self
    }

    pub fn push(&mut self, element: ChainElement) {
        self.elements.push(element);
    }

    /// Insert ahead of the existing elements.
    pub fn prepend(&mut self, element: ChainElement) {
        self.elements.insert(0, element);
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    #[must_use]
    pub fn describe(&self) -> Vec<String> {
        self.elements.iter().map(ChainElement::describe).collect()
    }

    #[must_use]
    pub fn into_parts(self) -> (Arc<str>, Vec<ChainElement>) {
        (self.name, self.elements)
    }
}

/// A registered page: builds the chain to try for a request.
pub trait PageFactory: Send + Sync {
    fn name(&self) -> &str;

    fn build(&self, ctx: &Context) -> anyhow::Result<HandlerChain>;
}

/// Page defined as a fixed list of unit specs.
#[derive(Debug, Clone)]
pub struct StaticPage {
    name: Arc<str>,
    specs: Vec<UnitSpec>,
}

impl StaticPage {
    #[must_use]
    pub fn new(name: &str, specs: Vec<UnitSpec>) -> Self {
        Self {
            name: Arc::from(name),
            specs,
        }
    }
}

impl PageFactory for StaticPage {
    fn name(&self) -> &str {
        &self.name
    }

    fn build(&self, _ctx: &Context) -> anyhow::Result<HandlerChain> {
        let elements = self.specs.iter().cloned().map(ChainElement::Spec).collect();
        Ok(HandlerChain::named(Arc::clone(&self.name), elements))
    }
}

/// Page backed by a closure.
pub struct FnPage<F> {
    name: String,
    build: F,
}

impl<F> PageFactory for FnPage<F>
where
    F: Fn(&Context) -> anyhow::Result<HandlerChain> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn build(&self, ctx: &Context) -> anyhow::Result<HandlerChain> {
        (self.build)(ctx)
    }
}

/// Wrap a chain-building closure as a page.
pub fn page_fn<F>(name: impl Into<String>, build: F) -> FnPage<F>
where
    F: Fn(&Context) -> anyhow::Result<HandlerChain> + Send + Sync,
{
    FnPage {
        name: name.into(),
        build,
    }
}

/// Enriches every chain before it runs.
pub trait ChainDecorator: Send + Sync {
    fn decorate(&self, chain: &mut HandlerChain, ctx: &Context) -> anyhow::Result<()>;
}

impl<F> ChainDecorator for F
where
    F: Fn(&mut HandlerChain, &Context) -> anyhow::Result<()> + Send + Sync,
{
    fn decorate(&self, chain: &mut HandlerChain, ctx: &Context) -> anyhow::Result<()> {
        self(chain, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;
    use crate::unit::{MethodMatch, Respond};
    use http::{Method, StatusCode};

    #[test]
    fn test_chain_builder_and_describe() {
        let chain = HandlerChain::new("demo")
            .unit(MethodMatch::new(Method::GET))
            .spec(UnitSpec::with_args("path", serde_json::json!("/x")))
            .unit(Respond::new(StatusCode::OK));
        assert_eq!(chain.name(), "demo");
        assert_eq!(
            chain.describe(),
            vec!["MethodMatch", "spec:path(\"/x\")", "Respond"]
        );
    }

    #[test]
    fn test_static_page_builds_specs() {
        let page = StaticPage::new("p", vec![UnitSpec::new("a"), UnitSpec::new("b")]);
        let ctx = Context::for_request(Request::new(Method::GET, "/"));
        let chain = page.build(&ctx).unwrap();
        assert_eq!(chain.describe(), vec!["spec:a", "spec:b"]);
    }

    #[test]
    fn test_unit_spec_deserializes_without_args() {
        let spec: UnitSpec = serde_yaml::from_str("name: respond").unwrap();
        assert_eq!(spec, UnitSpec::new("respond"));
    }
}
