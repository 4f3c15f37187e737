//! The onion-model middleware chain shared by the event and hook buses.
//!
//! Given `[m1..mn]` and a terminal `k`, execution is
//! `m1(payload, || m2(payload, || .. mn(payload, || k(payload))))`. Each
//! middleware receives the payload and a `next` continuation; it must call
//! `next` to reach the remaining chain and the terminal. A middleware that
//! never calls `next` short-circuits delivery - that is a documented
//! authoring hazard, not something the chain prevents.
//!
//! A middleware's `Err` return stands in for a thrown exception: `run_chain`
//! never propagates it to the caller. Instead it is reported through the
//! `on_error` sink and the chain continues as if that middleware had passed
//! the payload through unchanged, so a failing middleware can never stop
//! delivery to the remaining middlewares or the terminal handlers.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

/// The downstream continuation handed to a middleware's `handle`.
pub type NextFn = Box<dyn FnOnce(Value) -> BoxFuture<'static, Value> + Send>;

/// A terminal step run once the chain is exhausted - typically "dispatch
/// to subscribers".
pub type TerminalFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Value> + Send + Sync>;

/// Invoked with the index of the middleware that failed and its error,
/// once per failure, so the caller can route it onward (e.g. to the error
/// bus) without `run_chain` itself needing to know about buses.
pub type MiddlewareErrorSink = Arc<dyn Fn(usize, Box<dyn std::error::Error + Send + Sync>) + Send + Sync>;

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(
        &self,
        payload: Value,
        next: NextFn,
    ) -> Result<Value, Box<dyn std::error::Error + Send + Sync>>;
}

/// Runs `payload` through `middlewares` in order, invoking `terminal` once
/// the chain is exhausted. A middleware whose `handle` returns `Err` is
/// reported to `on_error` and treated as a pass-through for that payload;
/// the chain continues with the next middleware rather than aborting.
pub fn run_chain(
    middlewares: Arc<Vec<Arc<dyn Middleware>>>,
    payload: Value,
    terminal: TerminalFn,
    on_error: MiddlewareErrorSink,
) -> BoxFuture<'static, Value> {
    run_from(middlewares, 0, payload, terminal, on_error)
}

fn run_from(
    middlewares: Arc<Vec<Arc<dyn Middleware>>>,
    index: usize,
    payload: Value,
    terminal: TerminalFn,
    on_error: MiddlewareErrorSink,
) -> BoxFuture<'static, Value> {
    Box::pin(async move {
        if index >= middlewares.len() {
            return terminal(payload).await;
        }
        let mw = middlewares[index].clone();
        let passthrough = payload.clone();
        let rest = middlewares.clone();
        let term = terminal.clone();
        let err_sink = on_error.clone();
        let next: NextFn = Box::new(move |p| run_from(rest, index + 1, p, term, err_sink));

        match mw.handle(payload, next).await {
            Ok(result) => result,
            Err(e) => {
                on_error(index, e);
                run_from(middlewares, index + 1, passthrough, terminal, on_error).await
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    struct AddOne;
    #[async_trait]
    impl Middleware for AddOne {
        async fn handle(&self, payload: Value, next: NextFn) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
            let n = payload.as_i64().unwrap() + 1;
            Ok(next(json!(n)).await)
        }
    }

    struct TimesTwo;
    #[async_trait]
    impl Middleware for TimesTwo {
        async fn handle(&self, payload: Value, next: NextFn) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
            let result = next(payload).await;
            Ok(json!(result.as_i64().unwrap() * 2))
        }
    }

    struct Boom;
    #[async_trait]
    impl Middleware for Boom {
        async fn handle(&self, _payload: Value, _next: NextFn) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
            Err("middleware boom".into())
        }
    }

    fn no_op_sink() -> MiddlewareErrorSink {
        Arc::new(|_index, _err| {})
    }

    #[tokio::test]
    async fn chain_applies_middleware_in_order_and_unwinds() {
        let middlewares: Arc<Vec<Arc<dyn Middleware>>> =
            Arc::new(vec![Arc::new(AddOne), Arc::new(TimesTwo)]);
        let terminal: TerminalFn = Arc::new(|payload| Box::pin(async move { payload }));
        let result = run_chain(middlewares, json!(1), terminal, no_op_sink()).await;
        // AddOne runs pre-phase (1 -> 2), TimesTwo's post-phase doubles
        // whatever comes back from downstream (2 -> 4).
        assert_eq!(result, json!(4));
    }

    #[tokio::test]
    async fn empty_chain_runs_terminal_directly() {
        let middlewares: Arc<Vec<Arc<dyn Middleware>>> = Arc::new(Vec::new());
        let terminal: TerminalFn = Arc::new(|payload| Box::pin(async move { payload }));
        let result = run_chain(middlewares, json!("x"), terminal, no_op_sink()).await;
        assert_eq!(result, json!("x"));
    }

    #[tokio::test]
    async fn failing_middleware_is_routed_to_the_sink_and_delivery_continues() {
        let reported = Arc::new(StdMutex::new(Vec::new()));
        let reported_clone = reported.clone();
        let sink: MiddlewareErrorSink = Arc::new(move |index, err| {
            reported_clone.lock().unwrap().push((index, err.to_string()));
        });

        let middlewares: Arc<Vec<Arc<dyn Middleware>>> =
            Arc::new(vec![Arc::new(Boom), Arc::new(AddOne)]);
        let terminal: TerminalFn = Arc::new(|payload| Box::pin(async move { payload }));
        // Boom fails and is treated as pass-through; AddOne still runs on
        // the original payload and the terminal still observes its result.
        let result = run_chain(middlewares, json!(1), terminal, sink).await;

        assert_eq!(result, json!(2));
        assert_eq!(reported.lock().unwrap().clone(), vec![(0, "middleware boom".to_string())]);
    }
}
