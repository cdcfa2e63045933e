use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

use crate::protocol::RuntimeMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TabId(pub u32);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tab {
    pub id: TabId,
    pub url: String,
}

/// Which realm an injected function runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionWorld {
    /// The page's own global context
    #[default]
    Main,
    /// The extension's isolated content context
    Isolated,
}

/// Request to run the injected runner in a tab.
#[derive(Debug, Clone, PartialEq)]
pub struct InjectionRequest {
    pub tab: TabId,
    pub world: ExecutionWorld,
    /// Source text handed to the runner
    pub code: String,
    /// Coerced parameter bundle handed to the runner
    pub params: Map<String, Value>,
}

impl InjectionRequest {
    pub fn main_world(tab: TabId, code: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            tab,
            world: ExecutionWorld::Main,
            code: code.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("Could not establish connection. Receiving end does not exist.")]
    NoReceiver,

    #[error("No tab with id: {0}")]
    TabNotFound(TabId),

    #[error("Cannot access contents of the page: {0}")]
    InjectionRejected(String),

    #[error("Page error: {0}")]
    Page(String),

    #[error("Browser unavailable: {0}")]
    Unavailable(String),
}

/// The browser facilities the panel depends on.
#[async_trait]
pub trait BrowserHost: Send + Sync {
    /// Active tab of the current window, if any.
    async fn active_tab(&self) -> Result<Option<Tab>, HostError>;

    /// Send a runtime message to the content context of `tab` and wait for
    /// its reply.
    async fn send_tab_message(&self, tab: TabId, message: RuntimeMessage)
    -> Result<Value, HostError>;

    /// Run the injected runner in `request.tab`.
    async fn execute_script(&self, request: InjectionRequest) -> Result<(), HostError>;
}
