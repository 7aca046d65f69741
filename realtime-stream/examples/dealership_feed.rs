//! Dealership feed demo
//!
//! Drives the manager against the in-memory provider to show the full
//! lifecycle: live events, a dropped channel, exhaustion into polling and a
//! forced reconnect.
//!
//! Run with `REALTIME_LOG_MODE=development` to see the manager's own logs.

use std::sync::Arc;
use std::time::Duration;

use realtime_stream::logging::init_logging_from_env;
use realtime_stream::testing::{wait_for_status, MockProvider, SubscribeOutcome};
use realtime_stream::{
    BackoffConfig, ChangeType, ChannelStatus, ConnectionStatus, EventFilter, ManagerConfig,
    RealtimeManager, SubscriptionConfig, SubscriptionFilter,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging_from_env()?;

    println!("🚗 Dealership realtime feed demo");
    println!("================================");

    let provider = MockProvider::new();
    let config = ManagerConfig {
        max_reconnect_attempts: 3,
        backoff: BackoffConfig {
            base: Duration::from_millis(100),
            cap: Duration::from_secs(1),
            max_jitter: Duration::from_millis(50),
        },
        poll_interval: Duration::from_millis(500),
        ..ManagerConfig::default()
    };
    let manager = RealtimeManager::new(config, Arc::new(provider.clone()))?;

    let listener = manager.add_connection_listener(|state| {
        println!(
            "🔌 connection: {} (attempts {}/{})",
            state.status, state.reconnect_attempts, state.max_reconnect_attempts
        );
    });

    let leads = manager.subscribe(SubscriptionConfig::new(
        "lead-board",
        SubscriptionFilter::table("leads"),
        |event| println!("📋 lead board: {} on {}", event.event_type, event.table),
    ));
    manager.subscribe(SubscriptionConfig::new(
        "ai-responder",
        SubscriptionFilter::table("conversations").with_event(EventFilter::Insert),
        |event| println!("🤖 ai responder: new message in {}", event.table),
    ));

    wait_for_status(&manager, ConnectionStatus::Connected, Duration::from_secs(5)).await;

    println!("\n📡 Live events");
    provider.emit_change(ChangeType::Insert, "leads");
    provider.emit_change(ChangeType::Insert, "conversations");
    provider.emit_change(ChangeType::Update, "conversations");
    manager.flush().await?;

    println!("\n⚠️  Channel dropped by the server");
    provider.emit_status(ChannelStatus::ChannelError);
    wait_for_status(&manager, ConnectionStatus::Connected, Duration::from_secs(5)).await;

    println!("\n🌩️  Backend outage");
    provider.set_default_outcome(SubscribeOutcome::FailOpen);
    manager.force_reconnect();
    wait_for_status(&manager, ConnectionStatus::Polling, Duration::from_secs(10)).await;
    tokio::time::sleep(Duration::from_millis(1200)).await;

    println!("\n🔁 Backend is back, forcing reconnect");
    provider.set_default_outcome(SubscribeOutcome::Acknowledge);
    manager.force_reconnect();
    wait_for_status(&manager, ConnectionStatus::Connected, Duration::from_secs(5)).await;
    manager.flush().await?;

    println!("\n🩺 {}", manager.get_health_status());

    leads.unsubscribe();
    listener.remove();
    manager.cleanup().await;
    println!("\n✅ Cleaned up, status: {}", manager.status());

    Ok(())
}
