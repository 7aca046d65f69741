//! Lead board demo
//!
//! A synchronous consumer that keeps a lead count in sync with the change
//! stream, re-fetching on polling cues. Uses the in-memory provider so it runs
//! without a backend.

use std::sync::Arc;
use std::time::Duration;

use realtime_event_manager::prelude::*;
use realtime_stream::testing::MockProvider;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let provider = MockProvider::new();
    let manager = RealtimeEventManager::new(Arc::new(provider.clone()))?;

    let leads = manager.subscribe("lead-board", SubscriptionFilter::table("leads"))?;
    let states = manager.state_changes();

    while let Some(state) = states.recv_timeout(Duration::from_secs(5)) {
        println!("🔌 {}", state.status);
        if state.is_connected {
            break;
        }
    }

    for change in [ChangeType::Insert, ChangeType::Insert, ChangeType::Delete] {
        provider.emit_change(change, "leads");
    }
    manager.flush()?;

    let mut lead_count: i64 = 0;
    for event in leads.try_iter() {
        match event.event_type {
            ChangeType::Insert => lead_count += 1,
            ChangeType::Delete => lead_count -= 1,
            ChangeType::PollUpdate => println!("🔄 re-fetching leads"),
            ChangeType::Update => {}
        }
    }
    println!("📋 leads on the board: {lead_count}");
    println!("🩺 {}", manager.health());

    manager.cleanup()?;
    Ok(())
}
