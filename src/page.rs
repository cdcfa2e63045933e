//! A page's own JavaScript realm, hosted on a dedicated thread.
//!
//! QuickJS runtimes cannot move between threads, so each page owns one
//! thread that holds its runtime and serves commands sent over a channel.

use rquickjs::function::Opt;
use rquickjs::{Context, Ctx, Function, Runtime, Value};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::cell::Cell;
use std::rc::Rc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::runner::{self, RunnerReport};
use crate::window::{PagePoster, WindowId};

#[derive(Debug, Error)]
pub enum PageError {
    #[error("Failed to create page realm: {0}")]
    Realm(String),

    #[error("Page has been closed")]
    Closed,

    #[error("Evaluation failed: {0}")]
    Evaluation(String),
}

/// Resource limits the host applies to a page realm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageLimits {
    pub execution_timeout_ms: u64,
    pub memory_limit_mb: usize,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            execution_timeout_ms: 2000,
            memory_limit_mb: 50,
        }
    }
}

enum PageCommand {
    Inject {
        code: String,
        params: Map<String, serde_json::Value>,
        reply: oneshot::Sender<RunnerReport>,
    },
    Evaluate {
        source: String,
        reply: oneshot::Sender<Result<serde_json::Value, PageError>>,
    },
}

/// Handle to a running page realm. Dropping it closes the page.
pub struct PageHandle {
    window: WindowId,
    url: String,
    commands: Option<mpsc::Sender<PageCommand>>,
    thread: Option<JoinHandle<()>>,
}

impl PageHandle {
    /// Start a realm for `url`. Messages the page posts go out through
    /// `poster` as `poster.window()`.
    pub fn spawn(url: &str, poster: PagePoster, limits: PageLimits) -> Result<Self, PageError> {
        let window = poster.window();
        let (tx, rx) = mpsc::channel::<PageCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), PageError>>();
        let page_url = url.to_string();

        let thread = thread::Builder::new()
            .name(format!("page-{}", window))
            .spawn(move || {
                let realm = match PageRealm::new(&page_url, poster, &limits) {
                    Ok(realm) => {
                        let _ = ready_tx.send(Ok(()));
                        realm
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                realm.serve(rx);
            })
            .map_err(|e| PageError::Realm(e.to_string()))?;

        match off_worker(|| ready_rx.recv()) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(PageError::Realm("page thread exited".to_string())),
        }

        debug!(%window, url, "page realm started");
        Ok(Self {
            window,
            url: url.to_string(),
            commands: Some(tx),
            thread: Some(thread),
        })
    }

    pub fn window(&self) -> WindowId {
        self.window
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn send(&self, command: PageCommand) -> Result<(), PageError> {
        self.commands
            .as_ref()
            .ok_or(PageError::Closed)?
            .send(command)
            .map_err(|_| PageError::Closed)
    }

    /// Run the injected runner with `code` and `params` in this page.
    pub async fn inject(
        &self,
        code: &str,
        params: Map<String, serde_json::Value>,
    ) -> Result<RunnerReport, PageError> {
        let (reply, response) = oneshot::channel();
        self.send(PageCommand::Inject {
            code: code.to_string(),
            params,
            reply,
        })?;
        response.await.map_err(|_| PageError::Closed)
    }

    /// Evaluate page script and return its JSON-serializable result.
    /// This is the page's own code, not an injection.
    pub async fn evaluate(&self, source: &str) -> Result<serde_json::Value, PageError> {
        let (reply, response) = oneshot::channel();
        self.send(PageCommand::Evaluate {
            source: source.to_string(),
            reply,
        })?;
        response.await.map_err(|_| PageError::Closed)?
    }
}

/// Run a blocking wait without stalling a multi-threaded runtime's worker.
fn off_worker<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

impl Drop for PageHandle {
    fn drop(&mut self) {
        // Closing the command channel ends the serve loop
        self.commands.take();
        let Some(thread) = self.thread.take() else {
            return;
        };
        // A current-thread runtime has no spare worker to wait on; the page
        // thread finishes its last command and exits on its own
        if let Ok(handle) = Handle::try_current() {
            if handle.runtime_flavor() == RuntimeFlavor::CurrentThread {
                debug!(window = %self.window, "page closed without waiting for its thread");
                return;
            }
        }
        if off_worker(|| thread.join()).is_err() {
            error!(window = %self.window, "page thread panicked");
        }
    }
}

struct PageRealm {
    runtime: Runtime,
    context: Context,
    poster: PagePoster,
    deadline: Rc<Cell<Option<Instant>>>,
    timeout: Duration,
}

impl PageRealm {
    fn new(url: &str, poster: PagePoster, limits: &PageLimits) -> Result<Self, PageError> {
        let runtime = Runtime::new().map_err(|e| PageError::Realm(e.to_string()))?;
        runtime.set_memory_limit(limits.memory_limit_mb * 1024 * 1024);

        let deadline: Rc<Cell<Option<Instant>>> = Rc::new(Cell::new(None));
        let interrupt_deadline = Rc::clone(&deadline);
        runtime.set_interrupt_handler(Some(Box::new(move || {
            interrupt_deadline
                .get()
                .is_some_and(|deadline| Instant::now() >= deadline)
        })));

        let context = Context::full(&runtime).map_err(|e| PageError::Realm(e.to_string()))?;
        context
            .with(|ctx| install_page_globals(&ctx, url, &poster))
            .map_err(|e| PageError::Realm(e.to_string()))?;

        Ok(Self {
            runtime,
            context,
            poster,
            deadline,
            timeout: Duration::from_millis(limits.execution_timeout_ms),
        })
    }

    fn serve(self, commands: mpsc::Receiver<PageCommand>) {
        while let Ok(command) = commands.recv() {
            match command {
                PageCommand::Inject {
                    code,
                    params,
                    reply,
                } => {
                    let report = self.guarded(|realm| {
                        realm
                            .context
                            .with(|ctx| runner::run_injected(&ctx, &realm.poster, &code, &params))
                    });
                    let _ = reply.send(report);
                }
                PageCommand::Evaluate { source, reply } => {
                    let result = self.guarded(|realm| realm.evaluate(&source));
                    let _ = reply.send(result);
                }
            }
        }
        debug!(window = %self.poster.window(), "page closed");
    }

    /// Run `f` under the execution deadline, then drain promise jobs it queued.
    fn guarded<T>(&self, f: impl FnOnce(&Self) -> T) -> T {
        self.deadline.set(Some(Instant::now() + self.timeout));
        let result = f(self);
        self.drain_jobs();
        self.deadline.set(None);
        result
    }

    fn drain_jobs(&self) {
        loop {
            match self.runtime.execute_pending_job() {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => warn!(window = %self.poster.window(), "pending job failed: {}", e),
            }
        }
    }

    fn evaluate(&self, source: &str) -> Result<serde_json::Value, PageError> {
        self.context.with(|ctx| {
            let value: Value = ctx.eval(source).map_err(|e| {
                let detail = ctx.catch();
                let text = detail
                    .get::<rquickjs::convert::Coerced<String>>()
                    .map(|c| c.0)
                    .unwrap_or_else(|_| e.to_string());
                PageError::Evaluation(text)
            })?;
            let json = ctx
                .json_stringify(value)
                .map_err(|e| PageError::Evaluation(e.to_string()))?;
            match json {
                Some(text) => {
                    let text = text
                        .to_string()
                        .map_err(|e| PageError::Evaluation(e.to_string()))?;
                    serde_json::from_str(&text).map_err(|e| PageError::Evaluation(e.to_string()))
                }
                None => Ok(serde_json::Value::Null),
            }
        })
    }
}

/// `window`, `location.href` and `postMessage` on the page's global object.
fn install_page_globals(ctx: &Ctx<'_>, url: &str, poster: &PagePoster) -> rquickjs::Result<()> {
    let global = ctx.globals();
    global.set("window", global.clone())?;

    let location = rquickjs::Object::new(ctx.clone())?;
    location.set("href", url)?;
    global.set("location", location)?;

    global.set("postMessage", post_message_fn(ctx, poster.clone())?)?;
    Ok(())
}

/// `postMessage(data, targetOrigin)`: structure `data` as JSON and post it
/// on the window bus.
fn post_message_fn<'js>(ctx: &Ctx<'js>, poster: PagePoster) -> rquickjs::Result<Function<'js>> {
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, data: Value<'js>, target_origin: Opt<String>| -> rquickjs::Result<()> {
            let json = match ctx.json_stringify(data)? {
                Some(text) => {
                    serde_json::from_str(&text.to_string()?).unwrap_or(serde_json::Value::Null)
                }
                None => serde_json::Value::Null,
            };
            let origin = target_origin.0.unwrap_or_else(|| "*".to_string());
            poster.post_to(json, &origin);
            Ok(())
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{LogLevel, SignedMessage};
    use crate::runner::RunnerOutcome;
    use crate::window::message_bus;
    use serde_json::json;

    fn spawn_page(url: &str) -> (PageHandle, crate::window::MessageBusReceiver) {
        let (poster, rx) = message_bus(WindowId::next());
        let page = PageHandle::spawn(url, poster, PageLimits::default()).unwrap();
        (page, rx)
    }

    #[tokio::test]
    async fn test_inject_posts_console_messages() {
        let (page, mut rx) = spawn_page("https://example.com/");
        let params = json!({ "name": "world" }).as_object().cloned().unwrap();

        let report = page
            .inject(r#"console.log("hi " + params.name)"#, params)
            .await
            .unwrap();
        assert_eq!(report.outcome, RunnerOutcome::Completed);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.source, page.window());
        assert_eq!(
            event.data,
            SignedMessage::console(LogLevel::Log, "hi world").to_value()
        );
    }

    #[tokio::test]
    async fn test_page_state_survives_between_injections() {
        let (page, _rx) = spawn_page("https://example.com/");
        page.evaluate("var cart = [];").await.unwrap();
        page.inject("cart.push(params.item)", json!({ "item": "apple" }).as_object().cloned().unwrap())
            .await
            .unwrap();

        assert_eq!(page.evaluate("cart").await.unwrap(), json!(["apple"]));
        assert_eq!(
            page.evaluate("window.location.href").await.unwrap(),
            json!("https://example.com/")
        );
    }

    #[tokio::test]
    async fn test_post_message_from_page_code() {
        let (page, mut rx) = spawn_page("https://example.com/");
        page.evaluate("window.postMessage({ hello: 1 }, 'https://example.com')")
            .await
            .unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.data, json!({ "hello": 1 }));
        assert_eq!(event.target_origin, "https://example.com");
    }

    #[tokio::test]
    async fn test_promise_jobs_are_drained() {
        let (page, mut rx) = spawn_page("https://example.com/");
        page.inject("Promise.resolve(3).then(v => console.info('later', v))", Map::new())
            .await
            .unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(
            event.data,
            SignedMessage::console(LogLevel::Info, "later 3").to_value()
        );
    }

    #[tokio::test]
    async fn test_runaway_script_is_interrupted() {
        let (poster, mut rx) = message_bus(WindowId::next());
        let limits = PageLimits {
            execution_timeout_ms: 50,
            ..Default::default()
        };
        let page = PageHandle::spawn("https://example.com/", poster, limits).unwrap();

        let report = page.inject("while (true) {}", Map::new()).await.unwrap();
        assert!(matches!(report.outcome, RunnerOutcome::Escaped(_)));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.data["level"], "error");
        let content = event.data["content"].as_str().unwrap();
        assert!(content.starts_with("Script Setup Error: "), "got: {}", content);

        // Page is still usable afterwards
        assert_eq!(page.evaluate("1 + 1").await.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn test_drop_does_not_wait_for_busy_page() {
        let (poster, _rx) = message_bus(WindowId::next());
        let limits = PageLimits {
            execution_timeout_ms: 1500,
            ..Default::default()
        };
        let page = PageHandle::spawn("https://example.com/", poster, limits).unwrap();

        let (reply, response) = oneshot::channel();
        page.send(PageCommand::Evaluate {
            source: "while (true) {}".to_string(),
            reply,
        })
        .unwrap();

        let start = Instant::now();
        drop(page);
        assert!(start.elapsed() < Duration::from_millis(500));

        // The realm still hits its deadline and answers
        let result = response.await.unwrap();
        assert!(matches!(result, Err(PageError::Evaluation(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drop_on_multi_thread_runtime_joins_page() {
        let (poster, _rx) = message_bus(WindowId::next());
        let page = PageHandle::spawn("https://example.com/", poster, PageLimits::default()).unwrap();
        assert_eq!(page.evaluate("2 * 21").await.unwrap(), json!(42));

        let ticker = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            "ticked"
        });
        drop(page);
        assert_eq!(ticker.await.unwrap(), "ticked");
    }

    #[tokio::test]
    async fn test_evaluate_reports_page_errors() {
        let (page, _rx) = spawn_page("https://example.com/");
        let err = page.evaluate("undefinedThing.call()").await.unwrap_err();
        assert!(matches!(err, PageError::Evaluation(msg) if msg.contains("ReferenceError")));
    }
}
