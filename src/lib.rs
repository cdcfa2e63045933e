//! Author small script snippets, store them, and run them inside the active
//! page with parameters, relaying the page's console output back to a panel.

use tracing_subscriber::EnvFilter;

pub mod browser;
pub mod channel;
pub mod config;
pub mod headless;
pub mod log_view;
pub mod page;
pub mod panel;
pub mod params;
pub mod protocol;
pub mod relay;
pub mod runner;
pub mod script;
pub mod session;
pub mod storage;
pub mod url_pattern;
pub mod window;

pub use browser::{BrowserHost, HostError, InjectionRequest, Tab, TabId};
pub use channel::{Delivery, RuntimeChannel, RuntimeInbox, RuntimePort, runtime_channel};
pub use config::Config;
pub use headless::{HeadlessBrowser, TabOptions};
pub use log_view::{LogEntry, LogView};
pub use panel::{PanelController, PanelError, RunReport};
pub use protocol::{LogLevel, RuntimeMessage, SignedMessage};
pub use relay::{RelayBridge, RelayOutcome};
pub use script::{ScriptCollection, ScriptId, ScriptRecord};
pub use storage::{JsonFileStorage, MemoryStorage, ScriptStorage, StorageError};

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level.
pub fn init_tracing(logging: &config::LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    // A second init (tests, embedding) keeps the first subscriber
    let _ = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
