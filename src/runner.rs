//! The injected runner: executes user code inside a page realm with a
//! parameter bundle and a console that reports over the page message bus.

use rquickjs::convert::Coerced;
use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Object, Value};
use serde_json::Map;
use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::protocol::{LogLevel, SignedMessage};
use crate::window::PagePoster;

/// Prefix for failures while building the callable from user code.
pub const SETUP_ERROR_PREFIX: &str = "Script Setup Error: ";

/// Console methods exposed to user code, with the level each one reports at.
const CONSOLE_METHODS: [(&str, LogLevel); 4] = [
    ("log", LogLevel::Log),
    ("error", LogLevel::Error),
    ("warn", LogLevel::Warn),
    ("info", LogLevel::Info),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerOutcome {
    /// The callable ran to completion. Exceptions caught by the guarded body
    /// land here too; they were reported through the console.
    Completed,
    /// The code could not be turned into a callable
    SetupFailed(String),
    /// An error got past the guarded body, e.g. the host interrupted it
    Escaped(String),
}

/// Result of one injection
#[derive(Debug, Clone)]
pub struct RunnerReport {
    pub outcome: RunnerOutcome,
    /// Console messages posted, including reported failures
    pub messages_posted: usize,
    pub execution_time_ms: u64,
}

/// Function body wrapping `code` so that anything it throws goes to
/// `console.error`.
pub fn guarded_body(code: &str) -> String {
    format!(
        "\n    try {{\n{}\n    }} catch (e) {{\n        console.error(e.toString());\n    }}\n",
        code
    )
}

/// Posts console messages for one run and counts them.
#[derive(Clone)]
struct ConsoleSink {
    poster: PagePoster,
    posted: Rc<Cell<usize>>,
}

impl ConsoleSink {
    fn send(&self, level: LogLevel, content: String) {
        self.poster
            .post(SignedMessage::console(level, content).to_value());
        self.posted.set(self.posted.get() + 1);
    }
}

/// Render one console argument: objects (and `null`) as JSON, everything
/// else through the page's `String` function.
fn render_arg<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> rquickjs::Result<String> {
    let is_object = value.is_null() || (value.is_object() && !value.is_function());
    if is_object {
        match ctx.json_stringify(value.clone()) {
            Ok(Some(json)) => return json.to_string(),
            // toJSON returned undefined; joins as an empty string
            Ok(None) => return Ok(String::new()),
            Err(_) => {
                // Cyclic structures and friends; fall back to String()
                let _ = ctx.catch();
            }
        }
    }
    js_string(ctx, value)
}

/// `String(value)`. Unlike a plain ToString conversion this accepts symbols.
fn js_string<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> rquickjs::Result<String> {
    let string_fn: Function = ctx.globals().get("String")?;
    string_fn.call((value.clone(),))
}

fn render_args<'js>(ctx: &Ctx<'js>, args: &[Value<'js>]) -> rquickjs::Result<String> {
    let parts = args
        .iter()
        .map(|arg| render_arg(ctx, arg))
        .collect::<rquickjs::Result<Vec<_>>>()?;
    Ok(parts.join(" "))
}

fn console_method<'js>(
    ctx: &Ctx<'js>,
    sink: ConsoleSink,
    level: LogLevel,
) -> rquickjs::Result<Function<'js>> {
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<()> {
            let content = render_args(&ctx, &args.0)?;
            sink.send(level, content);
            Ok(())
        },
    )
}

fn build_console<'js>(ctx: &Ctx<'js>, sink: &ConsoleSink) -> rquickjs::Result<Object<'js>> {
    let console = Object::new(ctx.clone())?;
    for (name, level) in CONSOLE_METHODS {
        console.set(name, console_method(ctx, sink.clone(), level)?)?;
    }
    Ok(console)
}

/// Text of the pending exception, as `e.toString()` would give it.
fn take_exception(ctx: &Ctx<'_>, error: rquickjs::Error) -> String {
    if !matches!(error, rquickjs::Error::Exception) {
        return error.to_string();
    }
    let exception = ctx.catch();
    match exception.get::<Coerced<String>>() {
        Ok(text) => text.0,
        Err(_) => {
            let _ = ctx.catch();
            error.to_string()
        }
    }
}

/// Run `code` in the realm of `ctx` with `params` and a redirected console
/// as its only named inputs. Never returns an error: every failure is
/// reported through the console and summarized in the outcome.
pub fn run_injected(
    ctx: &Ctx<'_>,
    poster: &PagePoster,
    code: &str,
    params: &Map<String, serde_json::Value>,
) -> RunnerReport {
    let start = Instant::now();
    let sink = ConsoleSink {
        poster: poster.clone(),
        posted: Rc::new(Cell::new(0)),
    };

    let outcome = run_guarded(ctx, &sink, code, params);
    match &outcome {
        RunnerOutcome::Completed => debug!(window = %poster.window(), "injected code completed"),
        RunnerOutcome::SetupFailed(e) => {
            debug!(window = %poster.window(), "injected code failed to compile: {}", e)
        }
        RunnerOutcome::Escaped(e) => {
            warn!(window = %poster.window(), "injected code escaped its guard: {}", e)
        }
    }

    RunnerReport {
        outcome,
        messages_posted: sink.posted.get(),
        execution_time_ms: start.elapsed().as_millis() as u64,
    }
}

fn run_guarded(
    ctx: &Ctx<'_>,
    sink: &ConsoleSink,
    code: &str,
    params: &Map<String, serde_json::Value>,
) -> RunnerOutcome {
    let setup_failed = |message: String| {
        sink.send(LogLevel::Error, format!("{}{}", SETUP_ERROR_PREFIX, message));
        RunnerOutcome::SetupFailed(message)
    };

    let console = match build_console(ctx, sink) {
        Ok(console) => console,
        Err(e) => return setup_failed(take_exception(ctx, e)),
    };

    let params_json = match serde_json::to_string(params) {
        Ok(json) => json,
        Err(e) => return setup_failed(e.to_string()),
    };
    let params_value = match ctx.json_parse(params_json) {
        Ok(value) => value,
        Err(e) => return setup_failed(take_exception(ctx, e)),
    };

    let function_ctor: Function = match ctx.globals().get("Function") {
        Ok(ctor) => ctor,
        Err(e) => return setup_failed(take_exception(ctx, e)),
    };
    let callable: Function = match function_ctor.call(("params", "console", guarded_body(code))) {
        Ok(callable) => callable,
        Err(e) => return setup_failed(take_exception(ctx, e)),
    };

    // Building and calling sit under one outer guard, so an escape is
    // reported with the same prefix as a setup failure
    match callable.call::<_, Value>((params_value, console)) {
        Ok(_) => RunnerOutcome::Completed,
        Err(e) => {
            let message = take_exception(ctx, e);
            sink.send(LogLevel::Error, format!("{}{}", SETUP_ERROR_PREFIX, message));
            RunnerOutcome::Escaped(message)
        }
    }
}
