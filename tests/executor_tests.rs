#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use chainrouter::chain::{HandlerChain, UnitRegistry, UnitSpec};
use chainrouter::context::{Context, ContextObject};
use chainrouter::executor::{ChainResult, SANITIZED_ERROR_BODY};
use chainrouter::request::Request;
use chainrouter::response::Response;
use chainrouter::transport::{Channel, MemoryChannel};
use chainrouter::unit::{
    defer, Evaluation, MethodMatch, Outcome, OutcomeKind, PathMatch, Respond, SetHeader,
};
use common::harness::{executor, executor_with, pool_config};
use common::test_runtime::install_span_registry;
use common::hooks::CountingHook;
use common::units::{answer, eval_log, lock, names, pass, recording, reject};
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, SET_COOKIE};
use http::{Method, StatusCode};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn ctx(method: Method, target: &str) -> Context {
    Context::for_request(Request::new(method, target))
}

fn open_channel() -> Arc<dyn Channel> {
    Arc::new(MemoryChannel::new())
}

fn answered(result: ChainResult) -> (Response, chainrouter::executor::OutcomeRecord) {
    match result {
        ChainResult::Answered {
            response,
            record,
            fatal,
        } => {
            assert!(fatal.is_none(), "unexpected fatal failure");
            (response, record)
        }
        other => panic!("expected an answer, got {other:?}"),
    }
}

fn x_chain() -> HandlerChain {
    HandlerChain::new("x")
        .unit(MethodMatch::new(Method::GET))
        .unit(PathMatch::new("/x").unwrap())
        .unit(Respond::with_message(StatusCode::OK, "ok"))
}

#[test]
fn test_matching_chain_answers() {
    let (exec, hook) = executor();
    let result = exec.run_blocking(x_chain(), ctx(Method::GET, "/x"), open_channel());

    let (response, record) = answered(result);
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body_text(), Some("ok"));
    assert_eq!(&*record.page, "x");
    assert_eq!(record.unit, "Respond");
    assert_eq!(record.position, Some(2));
    assert_eq!(record.kind, OutcomeKind::RespondWith);
    assert_eq!(hook.calls(), 0);
}

#[test]
fn test_rejection_stops_the_chain() {
    let (exec, _hook) = executor();
    let log = eval_log();
    let chain = HandlerChain::new("x")
        .unit(MethodMatch::new(Method::GET))
        .unit(pass(&log, "after-method"))
        .unit(answer(&log, "respond", 200, "ok"));

    match exec.run_blocking(chain, ctx(Method::POST, "/x"), open_channel()) {
        ChainResult::Rejected { evaluated, by } => {
            assert_eq!(evaluated, 1);
            assert_eq!(by.as_deref(), Some("MethodMatch"));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(names(&log).is_empty());
}

#[test]
fn test_later_header_overrides_earlier() {
    let (exec, _hook) = executor();
    let chain = HandlerChain::new("headers")
        .unit(SetHeader::new("X-A", "1").unwrap())
        .unit(SetHeader::new("x-a", "2").unwrap())
        .unit(Respond::new(StatusCode::NO_CONTENT));

    let (response, _) = answered(exec.run_blocking(chain, ctx(Method::GET, "/"), open_channel()));
    let name = HeaderName::from_static("x-a");
    let values: Vec<_> = response.headers.get_all(&name).collect();
    assert_eq!(values, vec![&HeaderValue::from_static("2")]);
    assert_eq!(response.status, StatusCode::NO_CONTENT);
}

#[test]
fn test_multi_valued_headers_accumulate() {
    let (exec, _hook) = executor();
    let chain = HandlerChain::new("cookies")
        .unit(SetHeader::new("set-cookie", "a=1").unwrap())
        .unit(SetHeader::new("set-cookie", "b=2").unwrap())
        .unit(Respond::new(StatusCode::OK));

    let (response, _) = answered(exec.run_blocking(chain, ctx(Method::GET, "/"), open_channel()));
    assert_eq!(response.headers.get_all(&SET_COOKIE).count(), 2);
}

#[test]
fn test_later_units_see_chain_response() {
    let (exec, _hook) = executor();
    let log = eval_log();
    let chain = HandlerChain::new("observe")
        .unit(SetHeader::new("x-seen", "yes").unwrap())
        .unit(recording(&log, "reader", |scope| {
            let seen = scope
                .chain_response()
                .header_str("x-seen")
                .unwrap_or("no")
                .to_string();
            Ok(Outcome::respond_with(StatusCode::OK, seen).into())
        }));

    let (response, _) = answered(exec.run_blocking(chain, ctx(Method::GET, "/"), open_channel()));
    assert_eq!(response.body_text(), Some("yes"));
}

#[test]
fn test_locked_then_rejected_is_500() {
    let (exec, hook) = executor();
    let log = eval_log();
    let chain = HandlerChain::new("locked")
        .unit(lock(&log, "commit"))
        .unit(reject(&log, "late-reject"))
        .unit(answer(&log, "never", 200, "nope"));

    let (response, record) =
        answered(exec.run_blocking(chain, ctx(Method::GET, "/"), open_channel()));
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.body_text(), Some(SANITIZED_ERROR_BODY));
    assert_eq!(record.kind, OutcomeKind::Failure);
    assert_eq!(names(&log), vec!["commit", "late-reject"]);

    let reports = hook.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].kind, "locked_rejection");
    assert_eq!(reports[0].unit.as_deref(), Some("late-reject"));
    assert_eq!(reports[0].position, Some(1));
}

#[test]
fn test_locked_exhaustion_is_500() {
    let (exec, hook) = executor();
    let log = eval_log();
    let chain = HandlerChain::new("locked").unit(lock(&log, "commit"));

    let (response, _) = answered(exec.run_blocking(chain, ctx(Method::GET, "/"), open_channel()));
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(hook.reports()[0].kind, "locked_exhaustion");
}

#[test]
fn test_unlocked_exhaustion_is_rejection() {
    let (exec, hook) = executor();
    let log = eval_log();
    let chain = HandlerChain::new("trailing")
        .unit(pass(&log, "a"))
        .unit(pass(&log, "b"));

    match exec.run_blocking(chain, ctx(Method::GET, "/"), open_channel()) {
        ChainResult::Rejected { evaluated, by } => {
            assert_eq!(evaluated, 2);
            assert!(by.is_none());
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(hook.calls(), 0);
}

#[test]
fn test_panic_is_500_and_private_response_merges_once() {
    let (exec, hook) = executor();
    let log = eval_log();
    let chain = HandlerChain::new("boom")
        .unit(recording(&log, "cookie-then-panic", |scope| {
            scope
                .response()
                .insert_raw(SET_COOKIE, HeaderValue::from_static("session=1"));
            panic!("unit exploded");
        }))
        .unit(answer(&log, "never", 200, "nope"));

    let (response, record) =
        answered(exec.run_blocking(chain, ctx(Method::GET, "/"), open_channel()));
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.headers.get_all(&SET_COOKIE).count(), 1);
    assert_eq!(
        response.headers.get_str("content-type"),
        Some("text/plain; charset=utf-8")
    );
    assert_eq!(record.unit, "cookie-then-panic");
    assert_eq!(names(&log), vec!["cookie-then-panic"]);
    assert_eq!(hook.calls(), 1);
    assert_eq!(hook.reports()[0].kind, "panic");
}

#[test]
fn test_error_details_exposed_when_enabled() {
    let hook = Arc::new(CountingHook::default());
    let exec = executor_with(
        pool_config(),
        Arc::new(UnitRegistry::with_builtins()),
        hook.clone(),
    )
    .expose_error_details(true);
    let log = eval_log();
    let chain = HandlerChain::new("err").unit(recording(&log, "db", |_| {
        Err(anyhow::anyhow!("connection refused").context("loading order"))
    }));

    let (response, _) = answered(exec.run_blocking(chain, ctx(Method::GET, "/"), open_channel()));
    let body = response.body_text().unwrap();
    assert!(body.contains("loading order"), "{body}");
    assert!(body.contains("connection refused"), "{body}");
    assert_eq!(hook.reports()[0].kind, "error");
}

#[test]
fn test_unknown_spec_is_500() {
    let (exec, hook) = executor();
    let chain = HandlerChain::new("spec").spec(UnitSpec::new("does_not_exist"));

    let (response, record) =
        answered(exec.run_blocking(chain, ctx(Method::GET, "/"), open_channel()));
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(record.unit, "does_not_exist");
    assert_eq!(hook.reports()[0].kind, "instantiation");
}

#[test]
fn test_specs_resolve_through_registry() {
    let (exec, _hook) = executor();
    let chain = HandlerChain::new("specs")
        .spec(UnitSpec::with_args("method", json!("GET")))
        .spec(UnitSpec::with_args("path", json!("/items/{id}")))
        .spec(UnitSpec::with_args(
            "respond",
            json!({"status": 201, "message": "made"}),
        ));

    let (response, _) = answered(exec.run_blocking(
        chain,
        ctx(Method::GET, "/items/9"),
        open_channel(),
    ));
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body_text(), Some("made"));
}

#[derive(Debug)]
struct Marker(u32);

#[test]
fn test_context_objects_flow_forward() {
    let (exec, _hook) = executor();
    let log = eval_log();
    let chain = HandlerChain::new("ctx")
        .unit(recording(&log, "produce", |_| {
            Ok(Outcome::consumed_with(Marker(7)).into())
        }))
        .unit(recording(&log, "consume", |scope| {
            let marker = scope.require::<Marker>()?;
            Ok(Outcome::respond_with(StatusCode::OK, marker.0.to_string()).into())
        }));

    let (response, _) = answered(exec.run_blocking(chain, ctx(Method::GET, "/"), open_channel()));
    assert_eq!(response.body_text(), Some("7"));
}

#[test]
fn test_missing_context_object_is_500() {
    let (exec, hook) = executor();
    let log = eval_log();
    let chain = HandlerChain::new("ctx").unit(recording(&log, "consume", |scope| {
        scope.require::<Marker>()?;
        Ok(Outcome::respond(StatusCode::OK).into())
    }));

    let (response, _) = answered(exec.run_blocking(chain, ctx(Method::GET, "/"), open_channel()));
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(hook.calls(), 1);
}

#[test]
fn test_remnant_insertion_order() {
    let (exec, _hook) = executor();
    let log = eval_log();
    let inner = log.clone();
    let chain = HandlerChain::new("remnant")
        .unit(recording(&log, "first", move |scope| {
            let remnant = scope.remnant();
            remnant.insert_unit(pass(&inner, "inserted-1"));
            remnant.insert_unit(pass(&inner, "inserted-2"));
            remnant.append_unit(answer(&inner, "appended", 200, "done"));
            Ok(Outcome::consumed().into())
        }))
        .unit(pass(&log, "original-2"));

    let (response, _) = answered(exec.run_blocking(chain, ctx(Method::GET, "/"), open_channel()));
    assert_eq!(response.body_text(), Some("done"));
    assert_eq!(
        names(&log),
        vec!["first", "inserted-1", "inserted-2", "original-2", "appended"]
    );
}

#[test]
fn test_closed_channel_abandons_before_first_unit() {
    let (exec, hook) = executor();
    let log = eval_log();
    let channel = Arc::new(MemoryChannel::new());
    channel.close();
    let chain = HandlerChain::new("closed").unit(answer(&log, "respond", 200, "ok"));

    match exec.run_blocking(chain, ctx(Method::GET, "/"), channel) {
        ChainResult::Abandoned { evaluated } => assert_eq!(evaluated, 0),
        other => panic!("expected abandonment, got {other:?}"),
    }
    assert!(names(&log).is_empty());
    assert_eq!(hook.calls(), 0);
}

#[test]
fn test_channel_closing_mid_chain_abandons() {
    let (exec, hook) = executor();
    let log = eval_log();
    let channel = Arc::new(MemoryChannel::new());
    let closer = channel.clone();
    let chain = HandlerChain::new("closing")
        .unit(recording(&log, "close", move |_| {
            closer.close();
            Ok(Outcome::consumed().into())
        }))
        .unit(answer(&log, "respond", 200, "ok"));

    match exec.run_blocking(chain, ctx(Method::GET, "/"), channel) {
        ChainResult::Abandoned { evaluated } => assert_eq!(evaluated, 1),
        other => panic!("expected abandonment, got {other:?}"),
    }
    assert_eq!(names(&log), vec!["close"]);
    assert_eq!(hook.calls(), 0);
}

#[test]
fn test_structured_message_is_encoded() {
    let (exec, _hook) = executor();
    let log = eval_log();
    let chain = HandlerChain::new("json").unit(recording(&log, "json", |_| {
        Ok(Outcome::respond_with(StatusCode::OK, json!({"id": 42})).into())
    }));

    let (response, _) = answered(exec.run_blocking(chain, ctx(Method::GET, "/"), open_channel()));
    assert_eq!(
        response.headers.get_str("content-type"),
        Some("application/json")
    );
    let body: serde_json::Value = serde_json::from_str(response.body_text().unwrap()).unwrap();
    assert_eq!(body, json!({"id": 42}));
}

#[test]
fn test_structured_message_keeps_unit_content_type() {
    let (exec, _hook) = executor();
    let log = eval_log();
    let chain = HandlerChain::new("json")
        .unit(SetHeader::new("content-type", "application/problem+json").unwrap())
        .unit(recording(&log, "json", |_| {
            Ok(Outcome::respond_with(StatusCode::BAD_REQUEST, json!({"title": "bad"})).into())
        }));

    let (response, _) = answered(exec.run_blocking(chain, ctx(Method::GET, "/"), open_channel()));
    let name = CONTENT_TYPE;
    let values: Vec<_> = response.headers.get_all(&name).collect();
    assert_eq!(
        values,
        vec![&HeaderValue::from_static("application/problem+json")]
    );
}

#[test]
fn test_deferred_unit_resumes_with_context() {
    let (exec, _hook) = executor();
    let log = eval_log();
    let chain = HandlerChain::new("deferred")
        .unit(recording(&log, "wait", |_| {
            let (pending, resumer) = defer();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                resumer.resume_with(vec![ContextObject::new(Marker(11))]);
            });
            Ok(Evaluation::Deferred(pending))
        }))
        .unit(recording(&log, "use", |scope| {
            let marker = scope.require::<Marker>()?;
            Ok(Outcome::respond_with(StatusCode::OK, marker.0.to_string()).into())
        }));

    let (response, _) = answered(exec.run_blocking(chain, ctx(Method::GET, "/"), open_channel()));
    assert_eq!(response.body_text(), Some("11"));
    assert_eq!(names(&log), vec!["wait", "use"]);
}

#[derive(Debug, Default)]
struct Hop {
    on_coroutine: bool,
    thread: Option<String>,
    span: Option<&'static str>,
}

#[test]
fn test_resumption_runs_on_pool_inside_chain_span() {
    install_span_registry();
    let (exec, _hook) = executor();
    let log = eval_log();
    let seen = Arc::new(parking_lot::Mutex::new(Hop::default()));
    let observed = Arc::clone(&seen);
    let chain = HandlerChain::new("hops")
        .unit(recording(&log, "wait", |_| {
            let (pending, resumer) = defer();
            std::thread::Builder::new()
                .name("resumer".to_string())
                .spawn(move || {
                    std::thread::sleep(Duration::from_millis(20));
                    resumer.resume();
                })
                .unwrap();
            Ok(Evaluation::Deferred(pending))
        }))
        .unit(recording(&log, "after", move |_| {
            let mut hop = observed.lock();
            hop.on_coroutine = may::coroutine::is_coroutine();
            hop.thread = std::thread::current().name().map(str::to_string);
            hop.span = tracing::Span::current().metadata().map(|m| m.name());
            Ok(Outcome::respond(StatusCode::OK).into())
        }));

    let (response, _) = answered(exec.run_blocking(chain, ctx(Method::GET, "/"), open_channel()));
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(names(&log), vec!["wait", "after"]);

    let hop = seen.lock();
    assert!(hop.on_coroutine, "resumed unit ran off the worker pool");
    assert_ne!(hop.thread.as_deref(), Some("resumer"));
    assert_eq!(hop.span, Some("chain"));
}

#[test]
fn test_deferral_resolved_before_return() {
    let (exec, _hook) = executor();
    let log = eval_log();
    let chain = HandlerChain::new("eager").unit(recording(&log, "eager", |_| {
        let (pending, resumer) = defer();
        resumer.resume_with_outcome(Outcome::respond_with(StatusCode::ACCEPTED, "early"));
        Ok(Evaluation::Deferred(pending))
    }));

    let (response, _) = answered(exec.run_blocking(chain, ctx(Method::GET, "/"), open_channel()));
    assert_eq!(response.status, StatusCode::ACCEPTED);
}

#[test]
fn test_dropped_resumer_is_no_outcome_500() {
    let (exec, hook) = executor();
    let log = eval_log();
    let chain = HandlerChain::new("dropped").unit(recording(&log, "forgetful", |_| {
        let (pending, resumer) = defer();
        std::thread::spawn(move || drop(resumer));
        Ok(Evaluation::Deferred(pending))
    }));

    let (response, _) = answered(exec.run_blocking(chain, ctx(Method::GET, "/"), open_channel()));
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(hook.reports()[0].kind, "no_outcome");
}

#[test]
fn test_hook_panic_marks_result_fatal() {
    let exec = executor_with(
        pool_config(),
        Arc::new(UnitRegistry::with_builtins()),
        Arc::new(common::hooks::PanickingHook),
    );
    let log = eval_log();
    let chain = HandlerChain::new("fatal").unit(recording(&log, "fails", |_| {
        Err(anyhow::anyhow!("primary"))
    }));

    match exec.run_blocking(chain, ctx(Method::GET, "/"), open_channel()) {
        ChainResult::Answered { response, fatal, .. } => {
            assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
            let fatal = fatal.expect("hook panic must be reported");
            assert!(fatal.hook_panic.contains("hook exploded"));
        }
        other => panic!("expected an answer, got {other:?}"),
    }
}
