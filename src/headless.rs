//! In-process browser: tabs backed by QuickJS page realms, each optionally
//! carrying a content relay bridge wired to the extension runtime channel.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::browser::{BrowserHost, ExecutionWorld, HostError, InjectionRequest, Tab, TabId};
use crate::channel::RuntimePort;
use crate::page::{PageHandle, PageLimits};
use crate::protocol::RuntimeMessage;
use crate::relay::{RelayBridge, RelayStats};
use crate::window::{WindowId, message_bus};

/// How a tab is opened
#[derive(Debug, Clone)]
pub struct TabOptions {
    /// Attach the content relay. `false` models a page loaded before the
    /// extension was installed or reloaded.
    pub with_bridge: bool,
    /// Whether the browser allows injecting into this page.
    pub scriptable: bool,
}

impl Default for TabOptions {
    fn default() -> Self {
        Self {
            with_bridge: true,
            scriptable: true,
        }
    }
}

struct TabState {
    tab: Tab,
    page: Arc<PageHandle>,
    bridge: Option<Arc<RelayBridge<RuntimePort>>>,
    relay_task: Option<JoinHandle<RelayStats>>,
    scriptable: bool,
}

#[derive(Default)]
struct BrowserState {
    tabs: BTreeMap<TabId, TabState>,
    active: Option<TabId>,
}

/// Browser with a single window of tabs.
pub struct HeadlessBrowser {
    runtime: RuntimePort,
    limits: PageLimits,
    next_tab: AtomicU32,
    state: Mutex<BrowserState>,
}

impl HeadlessBrowser {
    /// `runtime` is the extension runtime channel that relay bridges forward to.
    pub fn new(runtime: RuntimePort, limits: PageLimits) -> Self {
        Self {
            runtime,
            limits,
            next_tab: AtomicU32::new(1),
            state: Mutex::new(BrowserState::default()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BrowserState>, HostError> {
        self.state
            .lock()
            .map_err(|e| HostError::Unavailable(e.to_string()))
    }

    /// Open a tab at `url` and make it active. Must be called from within a
    /// tokio runtime when a bridge is attached.
    pub fn open_tab(&self, url: &str, options: TabOptions) -> Result<Tab, HostError> {
        let id = TabId(self.next_tab.fetch_add(1, Ordering::Relaxed));
        let window = WindowId::next();
        let (poster, bus) = message_bus(window);

        let page = PageHandle::spawn(url, poster, self.limits.clone())
            .map_err(|e| HostError::Page(e.to_string()))?;

        let (bridge, relay_task) = if options.with_bridge {
            let bridge = Arc::new(RelayBridge::new(window, self.runtime.clone()));
            let relay = Arc::clone(&bridge);
            let task = tokio::spawn(async move { relay.run(bus).await });
            (Some(bridge), Some(task))
        } else {
            // No listener: whatever the page posts goes nowhere
            drop(bus);
            (None, None)
        };

        let tab = Tab {
            id,
            url: url.to_string(),
        };
        let mut state = self.lock()?;
        state.tabs.insert(
            id,
            TabState {
                tab: tab.clone(),
                page: Arc::new(page),
                bridge,
                relay_task,
                scriptable: options.scriptable,
            },
        );
        state.active = Some(id);
        info!(tab = %id, url, bridge = options.with_bridge, "opened tab");
        Ok(tab)
    }

    pub fn activate(&self, tab: TabId) -> Result<(), HostError> {
        let mut state = self.lock()?;
        if !state.tabs.contains_key(&tab) {
            return Err(HostError::TabNotFound(tab));
        }
        state.active = Some(tab);
        Ok(())
    }

    /// Close a tab; its relay stops once the page is gone.
    pub fn close_tab(&self, tab: TabId) -> Result<(), HostError> {
        let removed = {
            let mut state = self.lock()?;
            let removed = state.tabs.remove(&tab).ok_or(HostError::TabNotFound(tab))?;
            if state.active == Some(tab) {
                state.active = state.tabs.keys().next_back().copied();
            }
            removed
        };
        if let Some(task) = removed.relay_task {
            task.abort();
        }
        debug!(tab = %tab, "closed tab");
        Ok(())
    }

    pub fn tabs(&self) -> Vec<Tab> {
        self.lock()
            .map(|state| state.tabs.values().map(|t| t.tab.clone()).collect())
            .unwrap_or_default()
    }

    /// The page realm behind a tab, for evaluating the page's own code.
    pub fn page(&self, tab: TabId) -> Result<Arc<PageHandle>, HostError> {
        let state = self.lock()?;
        state
            .tabs
            .get(&tab)
            .map(|t| Arc::clone(&t.page))
            .ok_or(HostError::TabNotFound(tab))
    }
}

#[async_trait]
impl BrowserHost for HeadlessBrowser {
    async fn active_tab(&self) -> Result<Option<Tab>, HostError> {
        let state = self.lock()?;
        Ok(state
            .active
            .and_then(|id| state.tabs.get(&id))
            .map(|t| t.tab.clone()))
    }

    async fn send_tab_message(
        &self,
        tab: TabId,
        message: RuntimeMessage,
    ) -> Result<Value, HostError> {
        let bridge = {
            let state = self.lock()?;
            let entry = state.tabs.get(&tab).ok_or(HostError::TabNotFound(tab))?;
            entry.bridge.clone().ok_or(HostError::NoReceiver)?
        };
        Ok(bridge.respond(&message).unwrap_or(Value::Null))
    }

    async fn execute_script(&self, request: InjectionRequest) -> Result<(), HostError> {
        let page = {
            let state = self.lock()?;
            let entry = state
                .tabs
                .get(&request.tab)
                .ok_or(HostError::TabNotFound(request.tab))?;
            if !entry.scriptable {
                return Err(HostError::InjectionRejected(entry.tab.url.clone()));
            }
            Arc::clone(&entry.page)
        };

        if request.world != ExecutionWorld::Main {
            return Err(HostError::InjectionRejected(
                "only the main world hosts the runner".to_string(),
            ));
        }

        let report = page
            .inject(&request.code, request.params)
            .await
            .map_err(|e| HostError::Page(e.to_string()))?;
        debug!(
            tab = %request.tab,
            outcome = ?report.outcome,
            messages = report.messages_posted,
            elapsed_ms = report.execution_time_ms,
            "injection finished"
        );
        Ok(())
    }
}
