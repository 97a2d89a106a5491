//! Request-scoped context threaded through a chain.
//!
//! A [`Context`] is passed explicitly into every unit evaluation. It carries
//! the request, the objects contributed by earlier `Consumed` outcomes and
//! the tracing span of the request. Nothing here lives in thread-local
//! storage: the executor re-enters the span on every pool hop, so a chain
//! whose steps run on different worker threads still logs under one request.

use crate::ids::RequestId;
use crate::request::Request;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use tracing::{info_span, Span};

/// One object contributed to the context by a unit.
#[derive(Clone)]
pub struct ContextObject {
    type_id: TypeId,
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl ContextObject {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            value,
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    #[must_use]
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }
}

impl fmt::Debug for ContextObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextObject").field(&self.type_name).finish()
    }
}

/// Request-scoped injection context.
///
/// Cloning is cheap. [`Context::extended`] returns a new context and leaves
/// the original untouched, which is what keeps objects contributed by a
/// rejected chain out of the next candidate chain.
#[derive(Clone)]
pub struct Context {
    request: Arc<Request>,
    objects: Vec<ContextObject>,
    span: Span,
}

impl Context {
    /// Root context for a freshly received request.
    #[must_use]
    pub fn for_request(request: Request) -> Self {
        let span = info_span!(
            "request",
            request_id = %request.request_id,
            method = %request.method,
            path = %request.path,
        );
        Self {
            request: Arc::new(request),
            objects: Vec::new(),
            span,
        }
    }

    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    #[must_use]
    pub fn request_arc(&self) -> Arc<Request> {
        Arc::clone(&self.request)
    }

    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request.request_id
    }

    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Most recently contributed object of type `T`.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.objects
            .iter()
            .rev()
            .find(|o| o.is::<T>())
            .and_then(ContextObject::downcast::<T>)
    }

    /// Like [`Context::get`], failing with a descriptive error.
    pub fn require<T: Any + Send + Sync>(&self) -> anyhow::Result<Arc<T>> {
        self.get::<T>().ok_or_else(|| {
            anyhow::anyhow!(
                "no {} available in request context",
                std::any::type_name::<T>()
            )
        })
    }

    #[must_use]
    pub fn objects(&self) -> &[ContextObject] {
        &self.objects
    }

    /// A new context with `additions` layered on top of this one.
    #[must_use]
    pub fn extended(&self, additions: Vec<ContextObject>) -> Self {
        if additions.is_empty() {
            return self.clone();
        }
        let mut objects = Vec::with_capacity(self.objects.len() + additions.len());
        objects.extend(self.objects.iter().cloned());
        objects.extend(additions);
        Self {
            request: Arc::clone(&self.request),
            objects,
            span: self.span.clone(),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("request_id", &self.request.request_id)
            .field("method", &self.request.method)
            .field("path", &self.request.path)
            .field("objects", &self.objects)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    #[derive(Debug, PartialEq)]
    struct User(&'static str);

    #[test]
    fn test_get_returns_latest_of_type() {
        let ctx = Context::for_request(Request::new(Method::GET, "/"));
        let ctx = ctx.extended(vec![ContextObject::new(User("a")), ContextObject::new(7u32)]);
        let ctx = ctx.extended(vec![ContextObject::new(User("b"))]);

        assert_eq!(ctx.get::<User>().as_deref(), Some(&User("b")));
        assert_eq!(ctx.get::<u32>().as_deref(), Some(&7));
        assert!(ctx.get::<String>().is_none());
        assert_eq!(ctx.objects().len(), 3);
    }

    #[test]
    fn test_extended_leaves_original_untouched() {
        let base = Context::for_request(Request::new(Method::GET, "/"));
        let child = base.extended(vec![ContextObject::new(User("x"))]);
        assert!(base.get::<User>().is_none());
        assert!(child.get::<User>().is_some());
        assert_eq!(base.request_id(), child.request_id());
    }

    #[test]
    fn test_require_names_missing_type() {
        let ctx = Context::for_request(Request::new(Method::GET, "/"));
        let err = ctx.require::<User>().unwrap_err().to_string();
        assert!(err.contains("User"), "{err}");
    }
}
