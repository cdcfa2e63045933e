mod common;

use async_trait::async_trait;
use common::TestContext;
use mockall::mock;
use pagescript::channel::ChannelError;
use pagescript::protocol::PROTOCOL_TAG;
use pagescript::window::{WindowEvent, WindowId, message_bus};
use pagescript::{
    BrowserHost, LogLevel, RelayBridge, RelayOutcome, RuntimeChannel, RuntimeMessage,
    SignedMessage, runtime_channel,
};
use serde_json::json;
use std::time::Duration;

mock! {
    pub Channel {}

    #[async_trait]
    impl RuntimeChannel for Channel {
        async fn send_message(&self, message: RuntimeMessage) -> Result<(), ChannelError>;
    }
}

#[tokio::test]
async fn test_page_posts_are_filtered_by_tag() {
    let mut context = TestContext::new();
    let tab = context.open_tab("https://example.com/");
    let page = context.panel.browser().page(tab.id).unwrap();

    page.evaluate(&format!(
        r#"
        postMessage({{ type: "CONSOLE_LOG", level: "log", content: "untagged" }}, "*");
        postMessage({{ source: "{tag}", type: "CONSOLE_LOG", level: "warn", content: "tagged" }}, "*");
        "#,
        tag = PROTOCOL_TAG
    ))
    .await
    .unwrap();

    let message = tokio::time::timeout(Duration::from_secs(5), context.inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message, RuntimeMessage::console(LogLevel::Warn, "tagged"));

    // The untagged post was ahead of it on the bus and produced nothing
    assert!(context.inbox.drain().is_empty());
}

#[tokio::test]
async fn test_tabs_only_relay_their_own_window() {
    let mut context = TestContext::new();
    let first = context.open_tab("https://one.test/");
    let second = context.open_tab("https://two.test/");

    for (tab, label) in [(first.id, "from one"), (second.id, "from two")] {
        let page = context.panel.browser().page(tab).unwrap();
        page.inject(&format!("console.log({:?})", label), Default::default())
            .await
            .unwrap();
    }

    context.receive(2).await;
    let mut contents = context.contents();
    contents.sort();
    assert_eq!(contents, vec!["from one".to_string(), "from two".to_string()]);
}

#[tokio::test]
async fn test_foreign_window_messages_are_ignored() {
    let own = WindowId::next();
    let (port, mut inbox) = runtime_channel();
    let bridge = RelayBridge::new(own, port);

    let signed = SignedMessage::console(LogLevel::Log, "spoofed").to_value();
    let foreign = WindowEvent {
        source: WindowId::next(),
        target_origin: "*".to_string(),
        data: signed,
    };
    assert_eq!(bridge.receive_local(&foreign).await, RelayOutcome::Ignored);
    assert!(inbox.drain().is_empty());
}

#[tokio::test]
async fn test_forward_failure_is_swallowed() {
    let mut channel = MockChannel::new();
    channel
        .expect_send_message()
        .times(2)
        .returning(|_| Err(ChannelError::ContextInvalidated));

    let window = WindowId::next();
    let bridge = RelayBridge::new(window, channel);
    let (poster, bus) = message_bus(window);

    poster.post(SignedMessage::console(LogLevel::Error, "first").to_value());
    poster.post(json!({ "source": "someone-else", "content": "skip" }));
    poster.post(SignedMessage::console(LogLevel::Log, "second").to_value());
    drop(poster);

    let stats = bridge.run(bus).await;
    assert_eq!(stats.delivered, 0);
    assert_eq!(stats.dropped, 2);
    assert_eq!(stats.ignored, 1);
}

#[tokio::test]
async fn test_only_ping_is_answered() {
    let (port, _inbox) = runtime_channel();
    let bridge = RelayBridge::new(WindowId::next(), port);

    assert_eq!(
        bridge.respond(&RuntimeMessage::ping()),
        Some(json!({ "status": "OK" }))
    );
    assert_eq!(
        bridge.respond(&RuntimeMessage::console(LogLevel::Log, "hi")),
        None
    );
}

#[tokio::test]
async fn test_probe_reaches_bridge_through_browser() {
    let context = TestContext::new();
    let tab = context.open_tab("https://example.com/");
    let reply = context
        .panel
        .browser()
        .send_tab_message(tab.id, RuntimeMessage::ping())
        .await
        .unwrap();
    assert_eq!(reply, json!({ "status": "OK" }));
}
