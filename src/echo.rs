//! Demo pages used by the `chainrouter probe` command and the benchmarks.
//!
//! | Page | Route | Shows |
//! |---|---|---|
//! | `echo` | `GET /echo/{id}` | spec-built chain, path params, structured message |
//! | `health` | `GET /health` | builtins only, header contribution |
//! | `orders` | `POST /orders` | locked chain: an empty body is a 500, not a fallthrough |
//! | `slow` | `GET /slow?ms=N` | deferred unit resumed from another thread |
//! | `stream` | `GET /stream/{n}` | chunked body writer |

use crate::chain::{page_fn, HandlerChain, StaticPage, UnitRegistry, UnitSpec};
use crate::context::ContextObject;
use crate::dispatcher::Dispatcher;
use crate::ids::RequestId;
use crate::response::WriteStatus;
use crate::unit::{
    defer, from_fn, Evaluation, HandlerUnit, MethodMatch, Outcome, PathMatch, PathParams,
    UnitScope,
};
use anyhow::Context as _;
use http::{Method, StatusCode};
use serde_json::json;
use std::time::Duration;

/// Longest delay `/slow` accepts.
const MAX_SLOW_MS: u64 = 5_000;

/// Answers with a JSON description of the request.
#[derive(Debug, Default)]
pub struct EchoUnit;

impl HandlerUnit for EchoUnit {
    fn name(&self) -> &str {
        "Echo"
    }

    fn evaluate(&mut self, scope: &mut UnitScope<'_>) -> anyhow::Result<Evaluation> {
        let request = scope.request();
        let params: serde_json::Map<String, serde_json::Value> = scope
            .get::<PathParams>()
            .map(|p| {
                p.0.iter()
                    .map(|(k, v)| (k.to_string(), json!(v)))
                    .collect()
            })
            .unwrap_or_default();
        let query: serde_json::Map<String, serde_json::Value> = request
            .query_params
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect();
        let body = json!({
            "request_id": request.request_id.to_string(),
            "method": request.method.as_str(),
            "path": request.path,
            "params": params,
            "query": query,
            "body": request.body_text(),
        });
        Ok(Outcome::respond_with(StatusCode::OK, body).into())
    }
}

/// Builtins plus the `echo` unit.
#[must_use]
pub fn demo_registry() -> UnitRegistry {
    let mut registry = UnitRegistry::with_builtins();
    registry.register("echo", |_, _| Ok(Box::new(EchoUnit)));
    registry
}

/// Proof that `/orders` reserved something; only valid inside its chain.
#[derive(Debug)]
struct Reservation {
    id: RequestId,
}

/// Register the demo pages, in the order listed in the module docs.
pub fn register_demo_pages(dispatcher: &Dispatcher) -> anyhow::Result<()> {
    dispatcher.register_page(StaticPage::new(
        "echo",
        vec![
            UnitSpec::with_args("method", json!(["GET", "HEAD"])),
            UnitSpec::with_args("path", json!("/echo/{id}")),
            UnitSpec::new("echo"),
        ],
    ));

    dispatcher.register_page(StaticPage::new(
        "health",
        vec![
            UnitSpec::with_args("method", json!("GET")),
            UnitSpec::with_args("path", json!("/health")),
            UnitSpec::with_args(
                "set_header",
                json!({"name": "cache-control", "value": "no-store"}),
            ),
            UnitSpec::with_args("respond", json!({"status": 200, "message": "ok"})),
        ],
    ));

    let orders_path = PathMatch::new("/orders")?;
    dispatcher.register_page(page_fn("orders", move |_ctx| {
        Ok(HandlerChain::new("orders")
            .unit(MethodMatch::new(Method::POST))
            .unit(orders_path.clone())
            .unit(from_fn("reserve", |scope: &mut UnitScope<'_>| {
                let id = scope.request().request_id;
                Ok(Outcome::locked(vec![ContextObject::new(Reservation { id })]))
            }))
            .unit(from_fn("confirm", |scope: &mut UnitScope<'_>| {
                let reservation = scope.require::<Reservation>()?;
                if scope.request().body.as_ref().map_or(true, Vec::is_empty) {
                    return Ok(Outcome::rejected());
                }
                Ok(Outcome::respond_with(
                    StatusCode::CREATED,
                    json!({"reservation": reservation.id.to_string()}),
                ))
            })))
    }));

    let slow_path = PathMatch::new("/slow")?;
    dispatcher.register_page(page_fn("slow", move |_ctx| {
        Ok(HandlerChain::new("slow")
            .unit(MethodMatch::new(Method::GET))
            .unit(slow_path.clone())
            .unit(from_fn("wait", |scope: &mut UnitScope<'_>| {
                let ms = match scope.request().get_query_param("ms") {
                    Some(raw) => raw.parse::<u64>().context("ms must be an integer")?,
                    None => 10,
                }
                .min(MAX_SLOW_MS);
                let (pending, resumer) = defer();
                std::thread::Builder::new()
                    .name("demo-slow".to_string())
                    .spawn(move || {
                        std::thread::sleep(Duration::from_millis(ms));
                        resumer.resume_with_outcome(Outcome::respond_with(
                            StatusCode::OK,
                            json!({"waited_ms": ms}),
                        ));
                    })
                    .context("failed to start timer thread")?;
                Ok(Evaluation::Deferred(pending))
            })))
    }));

    let stream_path = PathMatch::new("/stream/{n}")?;
    dispatcher.register_page(page_fn("stream", move |_ctx| {
        Ok(HandlerChain::new("stream")
            .unit(MethodMatch::new(Method::GET))
            .unit(stream_path.clone())
            .unit(from_fn("stream", |scope: &mut UnitScope<'_>| {
                let params = scope.require::<PathParams>()?;
                let total: u32 = params
                    .get("n")
                    .unwrap_or_default()
                    .parse()
                    .context("n must be an integer")?;
                let mut next = 0u32;
                scope
                    .response()
                    .set_chunked(true)
                    .set_writer(move |out: &mut Vec<u8>| -> std::io::Result<WriteStatus> {
                        if next >= total {
                            return Ok(WriteStatus::Done);
                        }
                        out.extend_from_slice(format!("chunk {next}\n").as_bytes());
                        next += 1;
                        Ok(if next >= total {
                            WriteStatus::Done
                        } else {
                            WriteStatus::NotDone
                        })
                    });
                Ok(Outcome::respond(StatusCode::OK))
            })))
    }));

    Ok(())
}
