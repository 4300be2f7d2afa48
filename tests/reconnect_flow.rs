mod common;

use common::{dropped_connection, exit_status, settle, surface, web_session, Harness};
use serde_json::json;
use std::time::Duration;
use terminal_session_engine::error::AppError;
use terminal_session_engine::events::{BannerAction, ReconnectOutcome, SessionEvent};
use terminal_session_engine::ports::settings::CONNECT_TIMEOUT_KEY;
use terminal_session_engine::ports::{HighlightOptions, SettingsProvider};
use terminal_session_engine::reconnect::ReconnectPlan;
use terminal_session_engine::terminal::{CreateLocalParams, SshErrorKind, TerminalId, TerminalStatus};

fn banners(events: &[SessionEvent]) -> Vec<&terminal_session_engine::events::BannerRequest> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::ErrorBanner(request) => Some(request),
            _ => None,
        })
        .collect()
}

fn outcomes(events: &[SessionEvent]) -> Vec<ReconnectOutcome> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::ReconnectFinished { outcome, .. } => Some(*outcome),
            _ => None,
        })
        .collect()
}

fn status_of(h: &Harness, id: TerminalId) -> TerminalStatus {
    h.manager.registry().get_info(id).unwrap().status
}

#[tokio::test(start_paused = true)]
async fn ssh_terminal_is_connected_once_a_prompt_shows() {
    let mut h = Harness::new(common::test_config());
    let (_buffer, surface) = surface();
    let mut session = web_session();
    session.post_login_command = Some("tmux attach".into());

    let id = h
        .manager
        .create_ssh_terminal(surface, session, Some("cd /srv".into()))
        .await
        .unwrap();
    assert_eq!(status_of(&h, id), TerminalStatus::Running);

    let remote = h.spawner.remote_calls();
    assert_eq!(remote[0].initial_command.as_deref(), Some("cd /srv; tmux attach"));
    assert_eq!(
        remote[0].highlighting,
        HighlightOptions {
            output: true,
            cat_colorization: true,
            shell_input: false,
        }
    );

    settle(Duration::from_millis(150)).await;
    assert_eq!(status_of(&h, id), TerminalStatus::Connected);
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, SessionEvent::ConnectionEstablished { terminal_id } if *terminal_id == id)));
    assert!(h.manager.has_active_ssh_sessions());
}

#[tokio::test(start_paused = true)]
async fn sftp_sessions_are_never_highlighted() {
    let h = Harness::new(common::test_config());
    let (_buffer, surface) = surface();
    let mut session = web_session();
    session.output_highlighting = Some(true);

    h.manager.create_sftp_terminal(surface, session).await.unwrap();

    assert_eq!(h.spawner.remote_calls()[0].highlighting, HighlightOptions::default());
}

#[tokio::test(start_paused = true)]
async fn lost_connection_keeps_the_tab_and_shows_a_banner() {
    let mut h = Harness::new(common::test_config());
    let (_buffer, id) = dropped_connection(&mut h).await;

    assert_eq!(status_of(&h, id), TerminalStatus::Disconnected);
    let events = h.drain_events();
    let banners = banners(&events);
    assert_eq!(banners.len(), 1);
    assert_eq!(banners[0].kind, SshErrorKind::RemoteClosed);
    assert_eq!(banners[0].exit_code, Some(255));
    assert_eq!(banners[0].session_name, "web-01");
    assert_eq!(banners[0].actions, vec![BannerAction::Retry, BannerAction::AutoReconnect]);
    assert!(!events.iter().any(|e| matches!(e, SessionEvent::TerminalExited { .. })));
    assert!(h.manager.has_error_banner(id));
    assert!(!h.manager.has_active_ssh_sessions());
}

#[tokio::test(start_paused = true)]
async fn repeated_exit_of_a_dropped_connection_changes_nothing() {
    let mut h = Harness::new(common::test_config());
    let (buffer, id) = dropped_connection(&mut h).await;
    h.manager.banner_dismissed(id);
    h.drain_events();

    h.manager.on_child_exited(id, exit_status(255));

    assert_eq!(status_of(&h, id), TerminalStatus::Disconnected);
    assert!(h.drain_events().is_empty());
    assert!(!h.manager.has_error_banner(id));
    assert_eq!(h.manager.reconnect_all_for_session("web-01").await, 1);

    // The respawned process is a new pid, so its exit counts again.
    settle(Duration::from_millis(150)).await;
    assert_eq!(status_of(&h, id), TerminalStatus::Connected);
    buffer.write_output("\r\nConnection reset by peer\r\n");
    let pid = h.manager.registry().get_info(id).unwrap().process_id.unwrap();
    h.processes.exit(pid);
    h.manager.on_child_exited(id, exit_status(255));
    assert_eq!(status_of(&h, id), TerminalStatus::Disconnected);
    assert_eq!(banners(&h.drain_events()).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn rejected_key_offers_to_edit_the_session() {
    let mut h = Harness::new(common::test_config());
    h.spawner.set_remote_output(Some("admin@web-01.example.com: Permission denied (publickey).\r\n"));
    let (_buffer, surface) = surface();
    let id = h.manager.create_ssh_terminal(surface, web_session(), None).await.unwrap();

    h.manager.on_child_exited(id, exit_status(255));

    assert_eq!(status_of(&h, id), TerminalStatus::SpawnFailed);
    let events = h.drain_events();
    let banners = banners(&events);
    assert_eq!(banners[0].kind, SshErrorKind::KeyRejected);
    assert_eq!(banners[0].actions, vec![BannerAction::EditSession]);
}

#[tokio::test(start_paused = true)]
async fn remote_spawn_failure_is_reported_in_place() {
    let mut h = Harness::new(common::test_config());
    h.spawner.fail_next_remote(1, "ssh binary missing");
    let (_buffer, surface) = surface();

    let id = h.manager.create_ssh_terminal(surface, web_session(), None).await.unwrap();

    assert_eq!(status_of(&h, id), TerminalStatus::SpawnFailed);
    let events = h.drain_events();
    let banners = banners(&events);
    assert_eq!(banners[0].kind, SshErrorKind::SpawnFailed);
    assert_eq!(banners[0].exit_code, None);
    assert!(banners[0].message.contains("ssh binary missing"));
    assert_eq!(h.manager.stats().terminals_failed, 1);
}

#[tokio::test(start_paused = true)]
async fn retry_respawns_in_place_with_a_temporary_timeout() {
    let mut h = Harness::new(common::test_config());
    let (buffer, id) = dropped_connection(&mut h).await;
    h.drain_events();

    h.manager.retry_in_same_terminal(id, Some(7)).await.unwrap();

    assert_eq!(h.settings.get(CONNECT_TIMEOUT_KEY), Some(json!(7)));
    assert_eq!(h.spawner.remote_calls().len(), 2);
    assert_eq!(status_of(&h, id), TerminalStatus::Running);
    assert!(buffer.screen_text().contains("[Retry] Attempting reconnection with 7s timeout..."));
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, SessionEvent::BannerDismissed { terminal_id } if *terminal_id == id)));
    assert!(matches!(
        h.manager.retry_in_same_terminal(id, Some(7)).await,
        Err(AppError::RetryInProgress(_))
    ));

    settle(Duration::from_millis(150)).await;
    assert_eq!(status_of(&h, id), TerminalStatus::Connected);
    assert_eq!(h.manager.registry().get_info(id).unwrap().reconnect_attempts, 0);

    settle(Duration::from_secs(1)).await;
    assert_eq!(h.settings.get(CONNECT_TIMEOUT_KEY), Some(json!(30)));
}

#[tokio::test(start_paused = true)]
async fn overlapping_timeout_overrides_restore_the_first_value() {
    let mut h = Harness::new(common::test_config());
    h.settings.set(CONNECT_TIMEOUT_KEY, json!(15), true);
    let (_first_buffer, first) = dropped_connection(&mut h).await;
    let (_second_buffer, second) = dropped_connection(&mut h).await;

    h.manager.retry_in_same_terminal(first, Some(7)).await.unwrap();
    settle(Duration::from_millis(500)).await;
    h.manager.retry_in_same_terminal(second, Some(9)).await.unwrap();
    assert_eq!(h.settings.get(CONNECT_TIMEOUT_KEY), Some(json!(9)));

    settle(Duration::from_millis(600)).await;
    assert_eq!(h.settings.get(CONNECT_TIMEOUT_KEY), Some(json!(9)));

    settle(Duration::from_millis(500)).await;
    assert_eq!(h.settings.get(CONNECT_TIMEOUT_KEY), Some(json!(15)));
}

#[tokio::test(start_paused = true)]
async fn auto_reconnect_recovers_after_failed_attempts() {
    let mut h = Harness::new(common::test_config());
    let (buffer, id) = dropped_connection(&mut h).await;
    h.spawner.fail_next_remote(2, "host down");
    h.drain_events();

    let state = h
        .manager
        .start_auto_reconnect(id, Some(ReconnectPlan::new(1, 2, 5).unwrap()))
        .unwrap();
    assert_eq!(state.max_attempts, 30);
    assert!(h.manager.is_auto_reconnect_active(id));
    assert!(!h.manager.has_error_banner(id));

    settle(Duration::from_secs(6)).await;

    assert!(!h.manager.is_auto_reconnect_active(id));
    assert_eq!(status_of(&h, id), TerminalStatus::Connected);
    assert_eq!(h.spawner.remote_calls().len(), 4);
    assert_eq!(outcomes(&h.drain_events()), vec![ReconnectOutcome::Connected]);
    let screen = buffer.screen_text();
    assert!(screen.contains("[Auto-Reconnect] Attempt 3/30"));
    assert!(screen.contains("[Auto-Reconnect] Spawn error: Spawn error: host down"));
}

#[tokio::test(start_paused = true)]
async fn auth_failure_stops_auto_reconnect() {
    let mut h = Harness::new(common::test_config());
    let (buffer, id) = dropped_connection(&mut h).await;
    h.drain_events();
    h.manager
        .start_auto_reconnect(id, Some(ReconnectPlan::new(1, 2, 5).unwrap()))
        .unwrap();
    h.spawner.set_remote_output(Some("Permission denied, please try again.\r\n"));

    settle(Duration::from_millis(600)).await;
    assert_eq!(h.spawner.remote_calls().len(), 2);
    h.manager.on_child_exited(id, exit_status(5));

    assert!(!h.manager.is_auto_reconnect_active(id));
    assert!(buffer.screen_text().contains("[Auth error - auto-reconnect stopped]"));
    let events = h.drain_events();
    assert_eq!(outcomes(&events), vec![ReconnectOutcome::AuthFailure]);
    assert_eq!(banners(&events)[0].kind, SshErrorKind::AuthFailed);

    settle(Duration::from_secs(5)).await;
    assert_eq!(h.spawner.remote_calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_auto_reconnect_hands_back_to_the_user() {
    let mut h = Harness::new(common::test_config());
    let (buffer, id) = dropped_connection(&mut h).await;
    h.spawner.fail_next_remote(10, "host down");
    h.drain_events();

    let state = h
        .manager
        .start_auto_reconnect(id, Some(ReconnectPlan::new(1, 20, 5).unwrap()))
        .unwrap();
    assert_eq!(state.max_attempts, 3);

    settle(Duration::from_secs(45)).await;

    assert!(!h.manager.is_auto_reconnect_active(id));
    assert_eq!(h.spawner.remote_calls().len(), 4);
    let events = h.drain_events();
    assert_eq!(outcomes(&events), vec![ReconnectOutcome::Exhausted]);
    assert_eq!(banners(&events)[0].exit_code, Some(1));
    assert!(buffer.screen_text().contains("Maximum attempts reached."));
    assert_eq!(status_of(&h, id), TerminalStatus::SpawnFailed);
}

#[tokio::test(start_paused = true)]
async fn cancelled_auto_reconnect_spawns_nothing_more() {
    let mut h = Harness::new(common::test_config());
    let (buffer, id) = dropped_connection(&mut h).await;
    h.drain_events();
    h.manager.start_auto_reconnect(id, None).unwrap();

    assert!(h.manager.cancel_auto_reconnect(id));
    assert!(!h.manager.cancel_auto_reconnect(id));

    settle(Duration::from_secs(3)).await;
    assert_eq!(h.spawner.remote_calls().len(), 1);
    assert!(buffer.screen_text().contains("Cancelled by user."));
    assert_eq!(outcomes(&h.drain_events()), vec![ReconnectOutcome::Cancelled]);
    assert!(h.manager.reconnect_state(id).is_none());
}

#[tokio::test(start_paused = true)]
async fn closing_the_tab_cancels_auto_reconnect() {
    let mut h = Harness::new(common::test_config());
    let (_buffer, id) = dropped_connection(&mut h).await;
    h.manager.start_auto_reconnect(id, None).unwrap();

    assert!(h.manager.remove_terminal(id, true));

    assert!(!h.manager.is_auto_reconnect_active(id));
    assert!(h.manager.registry().get_info(id).is_none());
    let events = h.drain_events();
    assert!(outcomes(&events).contains(&ReconnectOutcome::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn auto_reconnect_needs_a_remote_terminal() {
    let h = Harness::new(common::test_config());
    let (_buffer, surface) = surface();
    let id = h.manager.create_local_terminal(surface, CreateLocalParams::default()).await.unwrap();

    assert!(matches!(h.manager.start_auto_reconnect(id, None), Err(AppError::NotRemote(_))));
    assert!(matches!(h.manager.start_auto_reconnect(999, None), Err(AppError::TerminalNotFound(999))));
}
