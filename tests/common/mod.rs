#![allow(dead_code)]

use pagescript::page::PageLimits;
use pagescript::{
    HeadlessBrowser, LogEntry, LogView, MemoryStorage, PanelController, RuntimeInbox, Tab,
    TabOptions, runtime_channel,
};
use std::time::Duration;

pub type TestPanel = PanelController<MemoryStorage, HeadlessBrowser>;

/// A panel wired to a headless browser through a live runtime channel
pub struct TestContext {
    pub panel: TestPanel,
    pub inbox: RuntimeInbox,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_storage(MemoryStorage::new())
    }

    pub fn with_storage(storage: MemoryStorage) -> Self {
        let (port, inbox) = runtime_channel();
        let limits = PageLimits {
            // Faster failure for runaway scripts in tests
            execution_timeout_ms: 500,
            ..Default::default()
        };
        let browser = HeadlessBrowser::new(port, limits);
        Self {
            panel: PanelController::new(storage, browser, LogView::new(100)),
            inbox,
        }
    }

    pub fn open_tab(&self, url: &str) -> Tab {
        self.panel
            .browser()
            .open_tab(url, TabOptions::default())
            .expect("Failed to open tab")
    }

    pub fn open_tab_without_bridge(&self, url: &str) -> Tab {
        self.panel
            .browser()
            .open_tab(
                url,
                TabOptions {
                    with_bridge: false,
                    ..Default::default()
                },
            )
            .expect("Failed to open tab")
    }

    /// Wait for `count` forwarded console messages and render them.
    pub async fn receive(&mut self, count: usize) {
        for _ in 0..count {
            let message = tokio::time::timeout(Duration::from_secs(5), self.inbox.recv())
                .await
                .expect("Timed out waiting for relayed message")
                .expect("Runtime channel closed");
            self.panel.handle_runtime_message(&message);
        }
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.panel.console().entries().cloned().collect()
    }

    pub fn contents(&self) -> Vec<String> {
        self.panel
            .console()
            .entries()
            .map(|e| e.content.clone())
            .collect()
    }
}
