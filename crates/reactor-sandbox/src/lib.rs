//! Script execution sandbox (§4.6): each invocation gets a fresh
//! `rhai::Engine` + `Scope`, so no state survives between executions. The
//! host surface exposed to scripts is a fixed set of native functions —
//! `console.*`, `utils.*`, `JSON.*`, `Math.*`, `Date.*`, a clamped
//! `setTimeout`, and `api.*` — no raw file, process, or module resolution
//! is ever registered, so the engine's default surface is already free of
//! side channels.
//!
//! Timeout is enforced two ways: `Engine::on_progress` aborts execution
//! once a wall-clock deadline derived from the operation count trips
//! (cheap, checked every N Rhai operations), and an outer
//! `tokio::time::timeout` races the `spawn_blocking` task that runs the
//! (synchronous) engine. Whichever fires first wins; the `on_progress`
//! guard means the blocking task cannot itself run past its budget even if
//! the outer timeout is delayed by scheduler pressure.

use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, Module, NativeCallContext, Scope};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("script compilation failed: {0}")]
    Compile(String),

    #[error("script execution failed: {0}")]
    Runtime(String),

    #[error("script execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("script execution panicked")]
    Panicked,
}

/// Output collected from the sandbox's `console.*` host functions during
/// an execution, surfaced back to the caller for operator introspection.
#[derive(Debug, Default, Clone)]
pub struct ConsoleLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl ConsoleLog {
    fn push(&self, line: String) {
        self.lines.lock().unwrap().push(line);
    }

    pub fn into_lines(self) -> Vec<String> {
        Arc::try_unwrap(self.lines)
            .map(|m| m.into_inner().unwrap())
            .unwrap_or_else(|arc| arc.lock().unwrap().clone())
    }
}

pub struct ExecutionResult {
    pub return_value: Value,
    pub console: Vec<String>,
}

/// The `api.*` helper's HTTP client: a fixed-user-agent, base-URL-scoped
/// `reqwest::blocking::Client`, shared across executions (the client itself
/// holds no per-script state, so sharing it doesn't violate the per-execution
/// isolation requirement — only the `Engine`/`Scope` are rebuilt fresh).
#[derive(Clone)]
struct ApiClient {
    http: reqwest::blocking::Client,
    base_url: String,
}

impl ApiClient {
    fn new(base_url: String, timeout: Duration) -> Self {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent("reactor-script-api/1")
            .build()
            .expect("reqwest blocking client builds with static config");
        Self { http, base_url }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), endpoint)
    }

    fn send(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> Result<Value, String> {
        let mut req = self.http.request(method, self.url(endpoint));
        if let Some(body) = body {
            req = req.json(&body);
        }
        let response = req.send().map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("api request failed: status {}", status.as_u16()));
        }
        response.json::<Value>().or(Ok(Value::Null))
    }
}

fn dynamic_to_value(body: Dynamic) -> Option<Value> {
    if body.is_unit() {
        None
    } else {
        rhai::serde::from_dynamic(&body).ok()
    }
}

fn value_to_dynamic(value: Value) -> Result<Dynamic, Box<EvalAltResult>> {
    rhai::serde::to_dynamic(&value).map_err(|e| e.to_string().into())
}

/// Builds a fresh engine per execution and runs `source` against `payload`
/// and `context`, enforcing `timeout`.
pub struct Sandbox {
    timeout: Duration,
    max_operations: u64,
    api: ApiClient,
}

impl Sandbox {
    pub fn new(timeout: Duration) -> Self {
        Self::with_api_base_url(timeout, "http://127.0.0.1:8090".to_string())
    }

    /// Construct with the `script.api_base_url` the `api.*` helper dispatches
    /// against, per §4.6/§6.
    pub fn with_api_base_url(timeout: Duration, api_base_url: String) -> Self {
        Self {
            timeout,
            // Scripts are capped at 10M Rhai operations regardless of
            // wall-clock — a runaway loop that never calls out and so
            // never hits an I/O-bound await still gets stopped.
            max_operations: 10_000_000,
            api: ApiClient::new(api_base_url, timeout),
        }
    }

    /// Execute `source`, pushing `payload` and `context` into scope as
    /// read-only values and returning whatever the script's last expression
    /// evaluates to.
    pub async fn execute(
        &self,
        source: String,
        payload: Value,
        context: Value,
    ) -> Result<ExecutionResult, SandboxError> {
        let timeout = self.timeout;
        let max_operations = self.max_operations;
        let api = self.api.clone();

        let blocking = tokio::task::spawn_blocking(move || {
            Self::run_sync(&source, payload, context, timeout, max_operations, api)
        });

        match tokio::time::timeout(timeout, blocking).await {
            Ok(Ok(result)) => result,
            Ok(Err(_join_error)) => Err(SandboxError::Panicked),
            Err(_elapsed) => Err(SandboxError::Timeout(timeout)),
        }
    }

    fn run_sync(
        source: &str,
        payload: Value,
        context: Value,
        timeout: Duration,
        max_operations: u64,
        api: ApiClient,
    ) -> Result<ExecutionResult, SandboxError> {
        let console = ConsoleLog::default();
        let mut engine = Engine::new();
        let start = Instant::now();
        register_host_surface(&mut engine, console.clone(), api, start, timeout);

        engine.on_progress(move |count| {
            if count > max_operations || start.elapsed() > timeout {
                Some(Dynamic::UNIT)
            } else {
                None
            }
        });

        let mut scope = Scope::new();
        scope.push_constant(
            "payload",
            rhai::serde::to_dynamic(&payload).unwrap_or(Dynamic::UNIT),
        );
        scope.push_constant(
            "context",
            rhai::serde::to_dynamic(&context).unwrap_or(Dynamic::UNIT),
        );

        let result = engine
            .eval_with_scope::<Dynamic>(&mut scope, source)
            .map_err(|e| {
                if start.elapsed() >= timeout {
                    SandboxError::Timeout(timeout)
                } else {
                    SandboxError::Runtime(e.to_string())
                }
            })?;

        let return_value: Value = rhai::serde::from_dynamic(&result).unwrap_or(Value::Null);

        Ok(ExecutionResult {
            return_value,
            console: console.into_lines(),
        })
    }
}

/// Registers `console.*`, `utils.*`, `JSON.*`, `Math.*`, `Date.*`, a clamped
/// `setTimeout`, and `api.*` as static modules — the only host capabilities
/// scripts are given. No file, process, or unrestricted network access is
/// ever registered; `api.*` is hard-scoped to the operator-configured base
/// URL, and `setTimeout` is clamped to the remaining execution budget.
fn register_host_surface(
    engine: &mut Engine,
    console: ConsoleLog,
    api: ApiClient,
    start: Instant,
    timeout: Duration,
) {
    let mut console_module = Module::new();
    {
        let console = console.clone();
        console_module.set_native_fn("log", move |message: &str| {
            console.push(message.to_string());
            Ok(())
        });
    }
    {
        let console = console.clone();
        console_module.set_native_fn("warn", move |message: &str| {
            console.push(format!("warn: {message}"));
            Ok(())
        });
    }
    {
        let console = console.clone();
        console_module.set_native_fn("error", move |message: &str| {
            console.push(format!("error: {message}"));
            Ok(())
        });
    }
    engine.register_static_module("console", console_module.into());

    let mut utils_module = Module::new();
    utils_module.set_native_fn("now", || Ok(chrono::Utc::now().timestamp_millis()));
    utils_module.set_native_fn("timestamp", || Ok(chrono::Utc::now().to_rfc3339()));
    utils_module.set_native_fn("uuid", || Ok(uuid::Uuid::new_v4().to_string()));
    engine.register_static_module("utils", utils_module.into());

    let mut json_module = Module::new();
    json_module.set_native_fn("parse", |text: &str| {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| -> Box<EvalAltResult> { e.to_string().into() })?;
        value_to_dynamic(value)
    });
    json_module.set_native_fn("stringify", |value: Dynamic| {
        let value = dynamic_to_value(value).unwrap_or(Value::Null);
        serde_json::to_string(&value).map_err(|e| -> Box<EvalAltResult> { e.to_string().into() })
    });
    engine.register_static_module("JSON", json_module.into());

    let mut math_module = Module::new();
    math_module.set_native_fn("abs", |x: f64| Ok(x.abs()));
    math_module.set_native_fn("floor", |x: f64| Ok(x.floor()));
    math_module.set_native_fn("ceil", |x: f64| Ok(x.ceil()));
    math_module.set_native_fn("round", |x: f64| Ok(x.round()));
    math_module.set_native_fn("sqrt", |x: f64| Ok(x.sqrt()));
    math_module.set_native_fn("pow", |x: f64, y: f64| Ok(x.powf(y)));
    math_module.set_native_fn("min", |x: f64, y: f64| Ok(x.min(y)));
    math_module.set_native_fn("max", |x: f64, y: f64| Ok(x.max(y)));
    math_module.set_native_fn("random", || Ok(rand::random::<f64>()));
    engine.register_static_module("Math", math_module.into());

    let mut date_module = Module::new();
    date_module.set_native_fn("now", || Ok(chrono::Utc::now().timestamp_millis()));
    date_module.set_native_fn("iso", || Ok(chrono::Utc::now().to_rfc3339()));
    engine.register_static_module("Date", date_module.into());

    // Clamped to both 10s and whatever's left of the execution deadline —
    // a script sleeping past its own timeout budget still gets cut off by
    // `on_progress`/the outer `tokio::time::timeout`, but clamping here
    // means `setTimeout` itself never blocks the underlying OS thread
    // longer than either bound allows.
    engine.register_fn(
        "setTimeout",
        move |context: NativeCallContext, callback: FnPtr, delay_ms: i64| -> Result<(), Box<EvalAltResult>> {
            let requested = Duration::from_millis(delay_ms.max(0) as u64);
            let remaining = timeout.saturating_sub(start.elapsed());
            let clamped = requested.min(Duration::from_secs(10)).min(remaining);
            std::thread::sleep(clamped);
            callback.call_within_context::<Dynamic>(&context, ())?;
            Ok(())
        },
    );

    let mut api_module = Module::new();
    {
        let api = api.clone();
        api_module.set_native_fn("get", move |endpoint: &str| {
            let value = api
                .send(reqwest::Method::GET, endpoint, None)
                .map_err(|e| -> Box<EvalAltResult> { e.into() })?;
            value_to_dynamic(value)
        });
    }
    {
        let api = api.clone();
        api_module.set_native_fn("post", move |endpoint: &str, body: Dynamic| {
            let value = api
                .send(reqwest::Method::POST, endpoint, dynamic_to_value(body))
                .map_err(|e| -> Box<EvalAltResult> { e.into() })?;
            value_to_dynamic(value)
        });
    }
    {
        let api = api.clone();
        api_module.set_native_fn("put", move |endpoint: &str, body: Dynamic| {
            let value = api
                .send(reqwest::Method::PUT, endpoint, dynamic_to_value(body))
                .map_err(|e| -> Box<EvalAltResult> { e.into() })?;
            value_to_dynamic(value)
        });
    }
    {
        let api = api.clone();
        api_module.set_native_fn("delete", move |endpoint: &str| {
            let value = api
                .send(reqwest::Method::DELETE, endpoint, None)
                .map_err(|e| -> Box<EvalAltResult> { e.into() })?;
            value_to_dynamic(value)
        });
    }
    engine.register_static_module("api", api_module.into());
}
