//! End-to-end behavior of the realtime manager against the scripted provider.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use realtime_stream::testing::{wait_for_status, EventRecorder, MockProvider, SubscribeOutcome};
use realtime_stream::{
    BackoffConfig, ChangeEvent, ChangeType, ChannelStatus, ConnectionState, ConnectionStatus, EventFilter,
    ExhaustionPolicy, ManagerConfig, RealtimeManager, SubscriptionConfig, SubscriptionFilter,
};

const WAIT: Duration = Duration::from_secs(3);

fn fast_config() -> ManagerConfig {
    ManagerConfig {
        max_reconnect_attempts: 5,
        backoff: BackoffConfig {
            base: Duration::from_millis(5),
            cap: Duration::from_millis(20),
            max_jitter: Duration::ZERO,
        },
        subscribe_timeout: Duration::from_millis(200),
        heartbeat_interval: Duration::from_secs(60),
        poll_interval: Duration::from_millis(30),
        ..ManagerConfig::default()
    }
}

fn manager_with(config: ManagerConfig) -> (RealtimeManager, MockProvider) {
    let provider = MockProvider::new();
    let manager = RealtimeManager::new(config, Arc::new(provider.clone())).unwrap();
    (manager, provider)
}

fn record_statuses(manager: &RealtimeManager) -> Arc<Mutex<Vec<ConnectionStatus>>> {
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&statuses);
    manager.add_connection_listener(move |state: &ConnectionState| sink.lock().push(state.status));
    statuses
}

async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

#[tokio::test]
async fn test_events_route_by_table_and_event_type() {
    let (manager, provider) = manager_with(fast_config());
    let x = EventRecorder::new();
    let y = EventRecorder::new();

    manager.subscribe(SubscriptionConfig::new(
        "x",
        SubscriptionFilter::table("leads"),
        x.callback(),
    ));
    manager.subscribe(SubscriptionConfig::new(
        "y",
        SubscriptionFilter::table("conversations").with_event(EventFilter::Insert),
        y.callback(),
    ));
    assert!(wait_for_status(&manager, ConnectionStatus::Connected, WAIT).await);

    assert!(provider.emit_change(ChangeType::Insert, "conversations"));
    manager.flush().await.unwrap();
    assert_eq!(y.len(), 1);
    assert!(x.is_empty());

    assert!(provider.emit_change(ChangeType::Update, "leads"));
    manager.flush().await.unwrap();
    assert_eq!(x.count(ChangeType::Update), 1);
    assert_eq!(y.len(), 1);

    assert_eq!(provider.open_count(), 1);
    assert_eq!(provider.opened_filters()[0], manager.config().channel_filter);
}

#[tokio::test]
async fn test_channel_errors_exhaust_into_polling() {
    let (manager, provider) = manager_with(fast_config());
    provider.set_default_outcome(SubscribeOutcome::Reply(ChannelStatus::ChannelError));
    let statuses = record_statuses(&manager);
    let leads = EventRecorder::new();
    let conversations = EventRecorder::new();

    manager.subscribe(SubscriptionConfig::new(
        "leads",
        SubscriptionFilter::table("leads"),
        leads.callback(),
    ));
    manager.subscribe(SubscriptionConfig::new(
        "conversations",
        SubscriptionFilter::new(EventFilter::Insert, "public", "conversations"),
        conversations.callback(),
    ));

    assert!(wait_for_status(&manager, ConnectionStatus::Polling, WAIT).await);
    manager.flush().await.unwrap();

    let seen = statuses.lock().clone();
    assert_eq!(seen.first(), Some(&ConnectionStatus::Idle));
    assert_eq!(seen.last(), Some(&ConnectionStatus::Polling));
    assert_eq!(
        seen.iter().filter(|s| **s == ConnectionStatus::Connecting).count(),
        5
    );
    assert_eq!(
        seen.iter().filter(|s| **s == ConnectionStatus::Reconnecting).count(),
        4
    );
    assert!(!seen.contains(&ConnectionStatus::Connected));

    let state = manager.connection_state();
    assert_eq!(state.reconnect_attempts, 5);
    assert!(state.last_error.is_some());

    let health = manager.get_health_status();
    assert_eq!(health.attempts, 5);
    assert_eq!(health.failures, 5);
    assert_eq!(health.consecutive_failures, 5);
    assert!(!health.is_healthy);
    assert_eq!(health.channel_status, ConnectionStatus::Polling);

    assert!(eventually(|| leads.count(ChangeType::PollUpdate) >= 1
        && conversations.count(ChangeType::PollUpdate) >= 1)
    .await);

    let cue = &conversations.events()[0];
    assert_eq!(cue.table, "conversations");
    assert!(cue.new.is_none() && cue.old.is_none());
    assert!(leads.events().iter().all(|e| e.table == "leads"));
}

#[tokio::test]
async fn test_force_reconnect_leaves_polling_without_backoff() {
    let config = ManagerConfig {
        max_reconnect_attempts: 1,
        backoff: BackoffConfig {
            base: Duration::from_secs(10),
            cap: Duration::from_secs(10),
            max_jitter: Duration::ZERO,
        },
        ..fast_config()
    };
    let (manager, provider) = manager_with(config);
    provider.script([SubscribeOutcome::FailOpen]);
    let recorder = EventRecorder::new();

    manager.subscribe(SubscriptionConfig::new(
        "ai-responder",
        SubscriptionFilter::table("conversations"),
        recorder.callback(),
    ));
    assert!(wait_for_status(&manager, ConnectionStatus::Polling, WAIT).await);
    assert!(eventually(|| recorder.count(ChangeType::PollUpdate) >= 1).await);

    manager.force_reconnect();
    assert!(wait_for_status(&manager, ConnectionStatus::Connected, Duration::from_secs(1)).await);

    let state = manager.connection_state();
    assert!(state.is_connected);
    assert_eq!(state.reconnect_attempts, 0);
    assert!(state.last_error.is_none());
    assert!(state.last_connected_at.is_some());
    assert_eq!(manager.get_health_status().consecutive_failures, 0);

    manager.flush().await.unwrap();
    let cues = recorder.count(ChangeType::PollUpdate);
    tokio::time::sleep(Duration::from_millis(120)).await;
    manager.flush().await.unwrap();
    assert_eq!(recorder.count(ChangeType::PollUpdate), cues);
}

#[tokio::test]
async fn test_subscribe_timeout_with_fail_policy() {
    let config = ManagerConfig {
        max_reconnect_attempts: 1,
        subscribe_timeout: Duration::from_millis(50),
        exhaustion_policy: ExhaustionPolicy::Fail,
        ..fast_config()
    };
    let (manager, provider) = manager_with(config);
    provider.script([SubscribeOutcome::Silent]);

    manager.subscribe(SubscriptionConfig::new(
        "inventory",
        SubscriptionFilter::table("vehicles"),
        |_| {},
    ));
    assert!(wait_for_status(&manager, ConnectionStatus::Failed, WAIT).await);

    let state = manager.connection_state();
    assert!(!state.is_connected);
    assert!(state
        .last_error
        .as_deref()
        .unwrap_or_default()
        .contains("acknowledgement"));

    manager.subscribe(SubscriptionConfig::new(
        "appointments",
        SubscriptionFilter::table("appointments"),
        |_| {},
    ));
    manager.flush().await.unwrap();
    assert_eq!(manager.status(), ConnectionStatus::Failed);
    assert_eq!(provider.open_count(), 1);

    manager.force_reconnect();
    assert!(wait_for_status(&manager, ConnectionStatus::Connected, WAIT).await);
}

#[tokio::test]
async fn test_lost_channel_reconnects() {
    let (manager, provider) = manager_with(fast_config());
    let statuses = record_statuses(&manager);
    let recorder = EventRecorder::new();

    manager.subscribe(SubscriptionConfig::new(
        "leads",
        SubscriptionFilter::table("leads"),
        recorder.callback(),
    ));
    assert!(wait_for_status(&manager, ConnectionStatus::Connected, WAIT).await);

    assert!(provider.emit_status(ChannelStatus::Closed));
    assert!(eventually(|| provider.open_count() == 2 && manager.is_connected()).await);
    manager.flush().await.unwrap();

    let seen = statuses.lock().clone();
    assert!(seen.contains(&ConnectionStatus::Reconnecting));
    assert_eq!(seen.last(), Some(&ConnectionStatus::Connected));

    let health = manager.get_health_status();
    assert_eq!(health.successes, 2);
    assert_eq!(health.failures, 1);
    assert_eq!(health.consecutive_failures, 0);
    assert_eq!(manager.connection_state().reconnect_attempts, 0);

    assert!(provider.emit_change(ChangeType::Delete, "leads"));
    manager.flush().await.unwrap();
    assert_eq!(recorder.count(ChangeType::Delete), 1);
}

#[tokio::test]
async fn test_heartbeat_failure_triggers_reconnect() {
    let config = ManagerConfig {
        heartbeat_interval: Duration::from_millis(20),
        ..fast_config()
    };
    let (manager, provider) = manager_with(config);
    let statuses = record_statuses(&manager);

    manager.subscribe(SubscriptionConfig::new(
        "leads",
        SubscriptionFilter::table("leads"),
        |_| {},
    ));
    assert!(wait_for_status(&manager, ConnectionStatus::Connected, WAIT).await);
    assert!(eventually(|| provider.heartbeat_count() >= 1).await);

    provider.fail_sends(true);
    assert!(eventually(|| statuses.lock().contains(&ConnectionStatus::Reconnecting)).await);

    provider.fail_sends(false);
    assert!(eventually(|| manager.is_connected() && provider.open_count() >= 2).await);
    assert!(provider
        .sent_messages()
        .iter()
        .all(|message| message.is_heartbeat()));
}

#[tokio::test]
async fn test_removing_last_subscription_goes_idle() {
    let (manager, provider) = manager_with(fast_config());

    let leads = manager.subscribe(SubscriptionConfig::new(
        "leads",
        SubscriptionFilter::table("leads"),
        |_| {},
    ));
    manager.subscribe(SubscriptionConfig::new(
        "conversations",
        SubscriptionFilter::table("conversations"),
        |_| {},
    ));
    assert!(wait_for_status(&manager, ConnectionStatus::Connected, WAIT).await);

    assert!(leads.unsubscribe());
    assert!(!leads.unsubscribe());
    manager.flush().await.unwrap();
    assert_eq!(manager.status(), ConnectionStatus::Connected);

    assert!(manager.unsubscribe("conversations"));
    assert!(wait_for_status(&manager, ConnectionStatus::Idle, WAIT).await);
    assert!(!provider.is_open());
    assert_eq!(provider.close_count(), 1);
    assert!(!manager.unsubscribe("conversations"));
}

#[tokio::test]
async fn test_duplicate_id_keeps_first_subscription() {
    let (manager, provider) = manager_with(fast_config());
    let first = EventRecorder::new();
    let second = EventRecorder::new();

    let a = manager.subscribe(SubscriptionConfig::new(
        "lead-feed",
        SubscriptionFilter::table("leads"),
        first.callback(),
    ));
    let b = manager.subscribe(SubscriptionConfig::new(
        "lead-feed",
        SubscriptionFilter::table("conversations"),
        second.callback(),
    ));
    assert_eq!(a.id(), b.id());
    assert_eq!(manager.subscription_count(), 1);

    assert!(wait_for_status(&manager, ConnectionStatus::Connected, WAIT).await);
    provider.emit_change(ChangeType::Insert, "leads");
    provider.emit_change(ChangeType::Insert, "conversations");
    manager.flush().await.unwrap();

    assert_eq!(first.len(), 1);
    assert!(second.is_empty());
    assert_eq!(provider.open_count(), 1);
}

#[tokio::test]
async fn test_stale_handle_does_not_remove_newer_subscription() {
    let (manager, _provider) = manager_with(fast_config());

    let old = manager.subscribe(SubscriptionConfig::new(
        "ai-responder",
        SubscriptionFilter::table("conversations"),
        |_| {},
    ));
    assert!(old.unsubscribe());

    let _new = manager.subscribe(SubscriptionConfig::new(
        "ai-responder",
        SubscriptionFilter::table("conversations"),
        |_| {},
    ));
    assert!(!old.unsubscribe());
    assert_eq!(manager.subscription_count(), 1);
    assert_eq!(manager.subscriptions()[0].id, "ai-responder");
}

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let (manager, provider) = manager_with(fast_config());
    let statuses = record_statuses(&manager);
    let recorder = EventRecorder::new();

    manager.subscribe(SubscriptionConfig::new(
        "leads",
        SubscriptionFilter::table("leads"),
        recorder.callback(),
    ));
    manager.subscribe(SubscriptionConfig::new(
        "conversations",
        SubscriptionFilter::table("conversations"),
        |_| {},
    ));
    assert!(wait_for_status(&manager, ConnectionStatus::Connected, WAIT).await);

    manager.cleanup().await;
    let notified = statuses.lock().len();
    manager.cleanup().await;

    assert_eq!(manager.status(), ConnectionStatus::Idle);
    assert_eq!(manager.subscription_count(), 0);
    assert!(!provider.is_open());
    assert!(!provider.emit_change(ChangeType::Insert, "leads"));
    assert!(recorder.is_empty());
    assert_eq!(statuses.lock().len(), notified);

    manager.subscribe(SubscriptionConfig::new(
        "leads",
        SubscriptionFilter::table("leads"),
        |_| {},
    ));
    assert!(wait_for_status(&manager, ConnectionStatus::Connected, WAIT).await);
}

#[tokio::test]
async fn test_panicking_callback_is_isolated() {
    let (manager, provider) = manager_with(fast_config());
    let survivor = EventRecorder::new();

    manager.subscribe(SubscriptionConfig::new(
        "a",
        SubscriptionFilter::table("leads"),
        |_| panic!("consumer A failed"),
    ));
    manager.subscribe(SubscriptionConfig::new(
        "b",
        SubscriptionFilter::table("leads"),
        survivor.callback(),
    ));
    assert!(wait_for_status(&manager, ConnectionStatus::Connected, WAIT).await);

    provider.emit_change(ChangeType::Insert, "leads");
    provider.emit_change(ChangeType::Update, "leads");
    manager.flush().await.unwrap();

    assert_eq!(survivor.len(), 2);
    let health = manager.get_health_status();
    assert!(health.is_healthy);
    assert_eq!(health.failures, 0);
    assert!(manager.is_connected());
}

#[tokio::test]
async fn test_listener_is_primed_synchronously_and_removable() {
    let (manager, _provider) = manager_with(fast_config());
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&statuses);

    let handle = manager.add_connection_listener(move |state: &ConnectionState| {
        sink.lock().push(state.status);
    });
    assert_eq!(*statuses.lock(), vec![ConnectionStatus::Idle]);

    manager.subscribe(SubscriptionConfig::new(
        "leads",
        SubscriptionFilter::table("leads"),
        |_| {},
    ));
    assert!(wait_for_status(&manager, ConnectionStatus::Connected, WAIT).await);
    manager.flush().await.unwrap();
    assert_eq!(
        *statuses.lock(),
        vec![
            ConnectionStatus::Idle,
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected
        ]
    );

    assert!(handle.remove());
    manager.unsubscribe("leads");
    assert!(wait_for_status(&manager, ConnectionStatus::Idle, WAIT).await);
    manager.flush().await.unwrap();
    assert_eq!(statuses.lock().len(), 3);
}

#[tokio::test]
async fn test_open_failures_count_against_attempts() {
    let config = ManagerConfig {
        max_reconnect_attempts: 3,
        ..fast_config()
    };
    let (manager, provider) = manager_with(config);
    provider.set_default_outcome(SubscribeOutcome::FailOpen);

    manager.subscribe(SubscriptionConfig::new(
        "leads",
        SubscriptionFilter::table("leads"),
        |_| {},
    ));
    assert!(wait_for_status(&manager, ConnectionStatus::Polling, WAIT).await);

    assert_eq!(provider.open_count(), 3);
    let state = manager.connection_state();
    assert_eq!(state.reconnect_attempts, 3);
    assert!(state.last_error.unwrap().contains("scripted open failure"));

    provider.set_default_outcome(SubscribeOutcome::FailSubscribe);
    manager.force_reconnect();
    assert!(eventually(|| provider.open_count() == 6
        && manager.status() == ConnectionStatus::Polling)
    .await);

    let state = manager.connection_state();
    assert_eq!(state.reconnect_attempts, 3);
    assert!(state.last_error.unwrap().contains("scripted subscribe failure"));
    assert!(!provider.is_open());
}

#[tokio::test]
async fn test_state_changes_stream() {
    use futures::StreamExt;

    let (manager, _provider) = manager_with(fast_config());
    let changes = manager.state_changes();
    tokio::pin!(changes);

    manager.subscribe(SubscriptionConfig::new(
        "leads",
        SubscriptionFilter::table("leads"),
        |_| {},
    ));

    let connected = tokio::time::timeout(WAIT, async {
        while let Some(state) = changes.next().await {
            if state.is_connected {
                return Some(state);
            }
        }
        None
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(connected.status, ConnectionStatus::Connected);
    assert!(connected.revision > 0);
}

#[tokio::test]
async fn test_health_status_reports_subscriptions() {
    let (manager, _provider) = manager_with(fast_config());

    let initial = manager.get_health_status();
    assert_eq!(initial.active_subscriptions, 0);
    assert_eq!(initial.channel_status, ConnectionStatus::Idle);
    assert_eq!(initial.success_rate, 0.0);

    manager.subscribe(SubscriptionConfig::new("a", SubscriptionFilter::table("leads"), |_| {}));
    manager.subscribe(SubscriptionConfig::new("b", SubscriptionFilter::table("leads"), |_| {}));
    assert!(wait_for_status(&manager, ConnectionStatus::Connected, WAIT).await);

    let health = manager.get_health_status();
    assert_eq!(health.active_subscriptions, 2);
    assert_eq!(health.successes, 1);
    assert_eq!(health.success_rate, 1.0);
    assert!(health.is_healthy);

    manager.reset_health();
    assert_eq!(manager.get_health_status().attempts, 0);
}

#[tokio::test]
async fn test_stalled_subscribe_closes_every_opened_channel() {
    let config = ManagerConfig {
        max_reconnect_attempts: 2,
        ..fast_config()
    };
    let (manager, provider) = manager_with(config);
    provider.set_default_outcome(SubscribeOutcome::StallSubscribe);

    manager.subscribe(SubscriptionConfig::new(
        "leads",
        SubscriptionFilter::table("leads"),
        |_| {},
    ));
    assert!(wait_for_status(&manager, ConnectionStatus::Polling, WAIT).await);

    assert!(eventually(|| provider.open_count() == 2 && provider.close_count() == 2).await);
    assert!(!provider.is_open());
    assert!(manager
        .connection_state()
        .last_error
        .unwrap_or_default()
        .contains("acknowledgement"));
}

#[tokio::test]
async fn test_cleanup_is_not_blocked_by_stalled_open() {
    let config = ManagerConfig {
        subscribe_timeout: Duration::from_secs(2),
        ..fast_config()
    };
    let (manager, provider) = manager_with(config);
    provider.set_default_outcome(SubscribeOutcome::StallOpen);

    manager.subscribe(SubscriptionConfig::new(
        "leads",
        SubscriptionFilter::table("leads"),
        |_| {},
    ));
    assert!(eventually(|| provider.open_count() == 1).await);
    assert_eq!(manager.status(), ConnectionStatus::Connecting);

    tokio::time::timeout(Duration::from_millis(500), manager.cleanup())
        .await
        .expect("cleanup waited for the stalled open");

    assert_eq!(manager.status(), ConnectionStatus::Idle);
    assert_eq!(manager.subscription_count(), 0);
    assert_eq!(provider.close_count(), 0);
}

#[tokio::test]
async fn test_force_reconnect_replaces_stalled_attempt() {
    let config = ManagerConfig {
        subscribe_timeout: Duration::from_secs(2),
        ..fast_config()
    };
    let (manager, provider) = manager_with(config);
    provider.script([SubscribeOutcome::StallOpen]);

    manager.subscribe(SubscriptionConfig::new(
        "leads",
        SubscriptionFilter::table("leads"),
        |_| {},
    ));
    assert!(eventually(|| provider.open_count() == 1).await);

    manager.force_reconnect();
    assert!(wait_for_status(&manager, ConnectionStatus::Connected, Duration::from_millis(500)).await);
    assert_eq!(provider.open_count(), 2);
    assert_eq!(manager.connection_state().reconnect_attempts, 0);
}

#[tokio::test]
async fn test_signals_from_released_channel_are_ignored() {
    let (manager, provider) = manager_with(fast_config());
    let recorder = EventRecorder::new();

    manager.subscribe(SubscriptionConfig::new(
        "leads",
        SubscriptionFilter::table("leads"),
        recorder.callback(),
    ));
    assert!(wait_for_status(&manager, ConnectionStatus::Connected, WAIT).await);

    assert!(provider.emit_status(ChannelStatus::Closed));
    assert!(eventually(|| provider.open_count() == 2 && manager.is_connected()).await);
    manager.flush().await.unwrap();
    let failures = manager.get_health_status().failures;

    assert!(provider.emit_retired(ChangeEvent::new(ChangeType::Insert, "public", "leads")));
    assert!(provider.emit_retired_status(ChannelStatus::ChannelError));
    manager.flush().await.unwrap();

    assert!(recorder.is_empty());
    assert_eq!(manager.status(), ConnectionStatus::Connected);
    assert_eq!(provider.open_count(), 2);
    assert_eq!(manager.get_health_status().failures, failures);

    assert!(provider.emit_change(ChangeType::Insert, "leads"));
    manager.flush().await.unwrap();
    assert_eq!(recorder.count(ChangeType::Insert), 1);
}

#[tokio::test]
async fn test_received_at_is_stamped_on_arrival() {
    let (manager, provider) = manager_with(fast_config());
    let recorder = EventRecorder::new();

    manager.subscribe(SubscriptionConfig::new(
        "leads",
        SubscriptionFilter::table("leads"),
        recorder.callback(),
    ));
    assert!(wait_for_status(&manager, ConnectionStatus::Connected, WAIT).await);

    let mut event = ChangeEvent::new(ChangeType::Update, "public", "leads");
    event.received_at = chrono::Utc::now() - chrono::Duration::seconds(3600);
    let before = chrono::Utc::now();

    assert!(provider.emit(event));
    manager.flush().await.unwrap();

    let delivered = recorder.events();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].received_at >= before);
}
