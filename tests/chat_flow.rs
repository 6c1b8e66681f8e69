//! End-to-end chat flows through ChatManager and the in-memory backend
//!
//! Every test runs on a paused clock: flush windows and countdown ticks only
//! elapse when the test sleeps.

use assistant_orchestrator::chat::{
    BackendCall, BackendOp, ChatConfig, ChatContext, ChatError, ChatEvent, ChatManager, Message,
    MockChatBackend, Session, ToolCall,
};
use assistant_orchestrator::events::ChatNotice;
use std::sync::Arc;
use std::time::Duration;

const SERVER: &str = "srv-1";
const TAB: &str = "tab-1";

struct Harness {
    backend: Arc<MockChatBackend>,
    manager: Arc<ChatManager>,
}

impl Harness {
    async fn new() -> Self {
        Self::with_config(ChatConfig::defaults()).await
    }

    async fn with_config(config: ChatConfig) -> Self {
        let backend = Arc::new(MockChatBackend::new());
        let manager = ChatManager::new(backend.clone(), config);
        manager
            .set_context(ChatContext::tab(SERVER, TAB))
            .await
            .unwrap();
        Self { backend, manager }
    }

    async fn emit(&self, session_id: &str, event: ChatEvent) {
        self.backend.emit_event(session_id, &event).await;
    }

    async fn delta(&self, session_id: &str, text: &str) {
        self.emit(session_id, ChatEvent::ResponseDelta { text: text.into() })
            .await;
    }

    async fn tool_calls(&self, session_id: &str, calls: Vec<ToolCall>) {
        self.emit(session_id, ChatEvent::ToolCalls { calls }).await;
    }
}

/// Let routed events and due timers run
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
}

fn run_call(id: &str, command: &str) -> ToolCall {
    ToolCall::new(
        id,
        "run_in_terminal",
        serde_json::json!({ "command": command }).to_string(),
    )
}

/// Persist a session on the backend so the registry can list it
async fn seed(backend: &MockChatBackend, id: &str, tab: Option<&str>, log: Vec<Message>) {
    backend
        .seed_session(Session::new(id, SERVER, tab.map(str::to_string)))
        .await;
    backend.seed_messages(id, log).await;
}

#[tokio::test(start_paused = true)]
async fn test_streamed_deltas_complete_on_done() {
    let h = Harness::new().await;
    let session_id = h.manager.send("say hello").await.unwrap();
    assert!(h.manager.snapshot(&session_id).await.generating);

    h.delta(&session_id, "Hel").await;
    h.delta(&session_id, "lo").await;
    h.emit(&session_id, ChatEvent::Done).await;
    settle().await;

    let messages = h.manager.messages(&session_id).await;
    assert_eq!(messages.last().unwrap().content, "Hello");
    assert_eq!(messages.len(), 2);
    assert!(!h.manager.snapshot(&session_id).await.generating);
}

#[tokio::test(start_paused = true)]
async fn test_rapid_deltas_flush_once_per_window() {
    let h = Harness::new().await;
    let session_id = h.manager.send("count").await.unwrap();
    h.emit(&session_id, ChatEvent::TurnStarted { model_id: None })
        .await;
    settle().await;

    let mut notices = h.manager.subscribe_notices();
    for word in ["one ", "two ", "three ", "four"] {
        h.delta(&session_id, word).await;
    }
    settle().await;
    assert_eq!(h.manager.messages(&session_id).await[1].content, "");

    advance(Duration::from_millis(40)).await;
    assert_eq!(
        h.manager.messages(&session_id).await[1].content,
        "one two three four"
    );

    let mut flushes = 0;
    while let Ok(notice) = notices.try_recv() {
        if matches!(notice, ChatNotice::MessagesChanged { .. }) {
            flushes += 1;
        }
    }
    assert_eq!(flushes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_think_tags_route_to_reasoning() {
    let h = Harness::new().await;
    let session_id = h.manager.send("why?").await.unwrap();

    h.delta(&session_id, "<thi").await;
    h.delta(&session_id, "nk>pondering</think>Because.").await;
    h.emit(&session_id, ChatEvent::Done).await;
    settle().await;

    let last = h.manager.messages(&session_id).await.pop().unwrap();
    assert_eq!(last.content, "Because.");
    assert_eq!(last.reasoning_content.as_deref(), Some("pondering"));
}

#[tokio::test(start_paused = true)]
async fn test_sensitive_batch_waits_for_confirmation() {
    let h = Harness::new().await;
    let session_id = h.manager.send("clean tmp").await.unwrap();
    h.tool_calls(&session_id, vec![run_call("c1", "rm -rf /tmp/x")])
        .await;
    settle().await;

    let snapshot = h.manager.snapshot(&session_id).await;
    assert!(!snapshot.generating);
    assert!(snapshot.sensitive);
    assert_eq!(snapshot.countdown, None);
    assert_eq!(snapshot.pending_tool_calls.unwrap()[0].id, "c1");

    // nothing runs on its own
    advance(Duration::from_secs(30)).await;
    assert_eq!(h.backend.count(BackendOp::ExecuteTools).await, 0);

    h.manager.confirm_tools().await.unwrap();
    let snapshot = h.manager.snapshot(&session_id).await;
    assert!(snapshot.generating);
    assert!(snapshot.pending_tool_calls.is_none());
    assert!(h.backend.calls().await.iter().any(|call| matches!(
        call,
        BackendCall::ExecuteTools { request, tool_call_ids }
            if tool_call_ids == &["c1".to_string()] && request.bound_tab_id.as_deref() == Some(TAB)
    )));
}

#[tokio::test(start_paused = true)]
async fn test_safe_batch_auto_executes() {
    let h = Harness::new().await;
    let session_id = h.manager.send("show the file").await.unwrap();
    h.tool_calls(
        &session_id,
        vec![ToolCall::new("r1", "read_file", r#"{"path":"notes.txt"}"#)],
    )
    .await;
    settle().await;

    let snapshot = h.manager.snapshot(&session_id).await;
    assert!(snapshot.generating);
    assert!(snapshot.pending_tool_calls.is_none());
    assert_eq!(h.backend.count(BackendOp::ExecuteTools).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_mixed_batch_blocks_as_a_whole() {
    let h = Harness::new().await;
    let session_id = h.manager.send("look around").await.unwrap();
    h.tool_calls(
        &session_id,
        vec![
            ToolCall::new("r1", "read_file", "{}"),
            run_call("c1", "ls -la"),
        ],
    )
    .await;
    settle().await;

    let snapshot = h.manager.snapshot(&session_id).await;
    assert_eq!(snapshot.pending_tool_calls.unwrap().len(), 2);
    assert_eq!(snapshot.countdown, Some(5));
    assert_eq!(h.backend.count(BackendOp::ExecuteTools).await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_countdown_auto_confirms_exactly_once() {
    let h = Harness::new().await;
    let session_id = h.manager.send("uptime?").await.unwrap();
    h.tool_calls(&session_id, vec![run_call("c1", "uptime")]).await;
    settle().await;
    assert_eq!(h.manager.snapshot(&session_id).await.countdown, Some(5));

    advance(Duration::from_millis(2500)).await;
    assert_eq!(h.manager.snapshot(&session_id).await.countdown, Some(3));

    advance(Duration::from_secs(3)).await;
    assert_eq!(h.backend.count(BackendOp::ExecuteTools).await, 1);
    assert!(h.manager.snapshot(&session_id).await.generating);

    // a manual confirm after expiry finds nothing
    assert!(matches!(
        h.manager.confirm_tools().await,
        Err(ChatError::NothingPending(_))
    ));
    advance(Duration::from_secs(10)).await;
    assert_eq!(h.backend.count(BackendOp::ExecuteTools).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_countdown_survives_switching_away_and_back() {
    let h = Harness::new().await;
    seed(&h.backend, "other", Some(TAB), vec![Message::user("old")]).await;
    h.manager.load_sessions(SERVER).await.unwrap();

    let session_id = h.manager.send("disk?").await.unwrap();
    h.tool_calls(&session_id, vec![run_call("c1", "df -h")]).await;
    settle().await;
    advance(Duration::from_millis(2500)).await;

    // paused while another session is shown
    h.manager.switch_session("other").await.unwrap();
    advance(Duration::from_secs(10)).await;
    assert_eq!(h.backend.count(BackendOp::ExecuteTools).await, 0);
    assert_eq!(h.manager.snapshot(&session_id).await.countdown, Some(3));

    // resumed on return, runs once
    h.manager.switch_session(&session_id).await.unwrap();
    advance(Duration::from_millis(3500)).await;
    assert_eq!(h.backend.count(BackendOp::ExecuteTools).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_tools_marks_stopped() {
    let h = Harness::new().await;
    let session_id = h.manager.send("restart nginx").await.unwrap();
    h.tool_calls(&session_id, vec![run_call("c1", "systemctl restart nginx")])
        .await;
    settle().await;

    h.manager.cancel_tools().await.unwrap();
    let snapshot = h.manager.snapshot(&session_id).await;
    assert!(snapshot.stopped);
    assert!(!snapshot.generating);
    assert!(snapshot.pending_tool_calls.is_none());
    assert_eq!(h.backend.count(BackendOp::ExecuteTools).await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_prevents_reinstatement_on_restore() {
    let h = Harness::new().await;
    seed(&h.backend, "other", Some(TAB), vec![Message::user("old")]).await;
    h.manager.load_sessions(SERVER).await.unwrap();

    let session_id = h.manager.send("list things").await.unwrap();
    h.delta(&session_id, "Let me").await;
    settle().await;
    h.manager.stop().await.unwrap();

    let snapshot = h.manager.snapshot(&session_id).await;
    assert!(!snapshot.generating);
    assert!(snapshot.stopped);
    assert_eq!(h.backend.count(BackendOp::CancelGeneration).await, 1);

    // the backend persisted the interrupted turn with its tool calls
    h.backend
        .seed_messages(
            &session_id,
            vec![
                Message::user("list things"),
                Message::assistant("Let me").with_tool_calls(vec![run_call("c1", "ls")]),
            ],
        )
        .await;
    h.manager.switch_session("other").await.unwrap();
    h.manager.switch_session(&session_id).await.unwrap();
    settle().await;

    let snapshot = h.manager.snapshot(&session_id).await;
    assert!(snapshot.pending_tool_calls.is_none());
    assert!(snapshot.stopped);
    advance(Duration::from_secs(10)).await;
    assert_eq!(h.backend.count(BackendOp::ExecuteTools).await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_restore_reinstates_unanswered_batch() {
    let h = Harness::new().await;
    seed(
        &h.backend,
        "pending",
        Some("tab-2"),
        vec![
            Message::user("free memory?"),
            Message::assistant("").with_tool_calls(vec![run_call("c1", "free -m")]),
        ],
    )
    .await;

    h.manager
        .set_context(ChatContext::tab(SERVER, "tab-2"))
        .await
        .unwrap();
    h.manager.switch_session("pending").await.unwrap();
    settle().await;

    let snapshot = h.manager.snapshot("pending").await;
    assert_eq!(snapshot.pending_tool_calls.unwrap()[0].id, "c1");
    assert_eq!(snapshot.countdown, Some(5));
}

#[tokio::test(start_paused = true)]
async fn test_regenerate_replaces_only_last_assistant_turn() {
    let h = Harness::new().await;
    let session_id = h.manager.send("first").await.unwrap();
    h.delta(&session_id, "answer one").await;
    h.emit(&session_id, ChatEvent::Done).await;
    settle().await;

    assert!(h.manager.regenerate().await.unwrap());
    let messages = h.manager.messages(&session_id).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "first");
    assert!(h.manager.snapshot(&session_id).await.generating);
    assert_eq!(h.backend.count(BackendOp::Regenerate).await, 1);

    h.delta(&session_id, "answer two").await;
    h.emit(&session_id, ChatEvent::Done).await;
    settle().await;
    let messages = h.manager.messages(&session_id).await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, "answer two");

    // nothing to regenerate after a user message
    h.backend.fail(BackendOp::SendMessage).await;
    let _ = h.manager.send("unsent").await;
    assert!(!h.manager.regenerate().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_switching_leaves_other_session_untouched() {
    let h = Harness::new().await;
    seed(&h.backend, "other", Some(TAB), vec![Message::user("old")]).await;
    h.manager.load_sessions(SERVER).await.unwrap();

    let busy = h.manager.send("long answer please").await.unwrap();
    h.delta(&busy, "partial").await;
    settle().await;

    h.manager.switch_session("other").await.unwrap();
    let before = h.manager.messages(&busy).await;
    assert_eq!(before.last().unwrap().content, "partial");

    // events of the session left behind are no longer applied
    h.delta(&busy, " more").await;
    h.emit(&busy, ChatEvent::Done).await;
    settle().await;
    advance(Duration::from_millis(100)).await;

    assert_eq!(h.manager.messages(&busy).await, before);
    assert!(h.manager.snapshot(&busy).await.generating);
    assert_eq!(h.manager.messages("other").await.len(), 1);
    assert!(!h.manager.snapshot("other").await.generating);
}

#[tokio::test(start_paused = true)]
async fn test_turn_finished_while_away_settles_on_return() {
    let h = Harness::new().await;
    seed(&h.backend, "other", Some(TAB), vec![Message::user("old")]).await;
    h.manager.load_sessions(SERVER).await.unwrap();

    let busy = h.manager.send("long answer please").await.unwrap();
    h.delta(&busy, "partial").await;
    settle().await;
    h.manager.switch_session("other").await.unwrap();

    // the turn completes and is persisted while another session is shown
    h.backend
        .seed_messages(
            &busy,
            vec![
                Message::user("long answer please"),
                Message::assistant("partial and the rest"),
            ],
        )
        .await;
    h.emit(&busy, ChatEvent::Done).await;
    settle().await;

    h.manager.switch_session(&busy).await.unwrap();
    settle().await;
    advance(Duration::from_secs(60)).await;

    let snapshot = h.manager.snapshot(&busy).await;
    assert!(!snapshot.generating);
    let messages = h.manager.messages(&busy).await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, "partial and the rest");
    assert!(h.manager.send("thanks").await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_tool_batch_proposed_while_away_returns_on_switch() {
    let h = Harness::new().await;
    seed(&h.backend, "other", Some(TAB), vec![Message::user("old")]).await;
    h.manager.load_sessions(SERVER).await.unwrap();

    let busy = h.manager.send("check disk").await.unwrap();
    h.delta(&busy, "Checking").await;
    settle().await;
    h.manager.switch_session("other").await.unwrap();

    h.backend
        .seed_messages(
            &busy,
            vec![
                Message::user("check disk"),
                Message::assistant("Checking").with_tool_calls(vec![run_call("c1", "df -h")]),
            ],
        )
        .await;
    h.tool_calls(&busy, vec![run_call("c1", "df -h")]).await;
    settle().await;
    assert!(h.manager.snapshot(&busy).await.pending_tool_calls.is_none());

    h.manager.switch_session(&busy).await.unwrap();
    settle().await;
    let snapshot = h.manager.snapshot(&busy).await;
    assert!(!snapshot.generating);
    assert_eq!(snapshot.pending_tool_calls.unwrap()[0].id, "c1");
    assert_eq!(snapshot.countdown, Some(5));

    advance(Duration::from_millis(5500)).await;
    assert_eq!(h.backend.count(BackendOp::ExecuteTools).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_text_after_stop_is_not_shown() {
    let h = Harness::new().await;
    let session_id = h.manager.send("tell me a story").await.unwrap();
    h.delta(&session_id, "Once").await;
    settle().await;
    h.manager.stop().await.unwrap();

    // the backend has not noticed the cancellation yet
    h.delta(&session_id, " upon a time").await;
    h.emit(
        &session_id,
        ChatEvent::ReasoningDelta {
            text: "keep going".into(),
        },
    )
    .await;
    settle().await;
    advance(Duration::from_millis(100)).await;

    let messages = h.manager.messages(&session_id).await;
    assert_eq!(messages.last().unwrap().content, "Once");
    assert!(messages.last().unwrap().reasoning_content.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_switching_to_active_session_is_a_noop() {
    let h = Harness::new().await;
    let session_id = h.manager.send("hi").await.unwrap();
    let subscribes = h.backend.count(BackendOp::Subscribe).await;

    h.manager.switch_session(&session_id).await.unwrap();
    h.manager
        .set_context(ChatContext::tab(SERVER, TAB))
        .await
        .unwrap();
    assert_eq!(h.backend.count(BackendOp::Subscribe).await, subscribes);
    assert!(matches!(
        h.manager.switch_session("missing").await,
        Err(ChatError::SessionNotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_tab_context_restores_last_session_per_tab() {
    let h = Harness::new().await;
    let first = h.manager.send("in tab one").await.unwrap();

    h.manager
        .set_context(ChatContext::tab(SERVER, "tab-2"))
        .await
        .unwrap();
    assert_eq!(h.manager.active_session_id().await, None);
    let second = h.manager.send("in tab two").await.unwrap();
    assert_ne!(first, second);

    let active = h
        .manager
        .set_context(ChatContext::tab(SERVER, TAB))
        .await
        .unwrap();
    assert_eq!(active.as_deref(), Some(first.as_str()));
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_failures_are_deduplicated() {
    let h = Harness::new().await;
    let mut notices = h.manager.subscribe_notices();
    let session_id = h.manager.send("warm up").await.unwrap();
    h.emit(&session_id, ChatEvent::Done).await;
    settle().await;

    h.backend.fail(BackendOp::SendMessage).await;
    for _ in 0..3 {
        let result = h.manager.send("again").await;
        assert!(matches!(result, Err(ChatError::Dispatch { operation: "send_message", .. })));
        assert!(!h.manager.snapshot(&session_id).await.generating);
    }
    advance(Duration::from_secs(4)).await;
    let _ = h.manager.send("later").await;

    let mut errors = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        if let ChatNotice::Error { message, .. } = notice {
            errors.push(message);
        }
    }
    assert_eq!(errors.len(), 2, "{errors:?}");
    assert!(errors[0].starts_with("send_message failed"));
}

#[tokio::test(start_paused = true)]
async fn test_error_event_keeps_partial_output() {
    let h = Harness::new().await;
    let mut notices = h.manager.subscribe_notices();
    let session_id = h.manager.send("explain").await.unwrap();
    h.delta(&session_id, "So the").await;
    h.emit(
        &session_id,
        ChatEvent::Error {
            message: "rate limited".into(),
        },
    )
    .await;
    settle().await;

    assert_eq!(
        h.manager.messages(&session_id).await.last().unwrap().content,
        "So the"
    );
    let snapshot = h.manager.snapshot(&session_id).await;
    assert!(!snapshot.generating);
    assert!(!snapshot.stopped);

    let mut surfaced = false;
    while let Ok(notice) = notices.try_recv() {
        surfaced |= notice
            == ChatNotice::Error {
                session_id: Some(session_id.clone()),
                message: "rate limited".into(),
            };
    }
    assert!(surfaced);
}

#[tokio::test(start_paused = true)]
async fn test_unsent_message_survives_reload() {
    let h = Harness::new().await;
    seed(
        &h.backend,
        "history",
        Some(TAB),
        vec![Message::user("q"), Message::assistant("a")],
    )
    .await;
    seed(&h.backend, "other", Some(TAB), vec![Message::user("old")]).await;
    h.manager.load_sessions(SERVER).await.unwrap();
    h.manager.switch_session("history").await.unwrap();

    h.backend.fail(BackendOp::SendMessage).await;
    assert!(h.manager.send("not yet saved").await.is_err());

    h.manager.switch_session("other").await.unwrap();
    h.manager.switch_session("history").await.unwrap();

    let contents: Vec<_> = h
        .manager
        .messages("history")
        .await
        .into_iter()
        .map(|message| message.content)
        .collect();
    assert_eq!(contents, ["q", "a", "not yet saved"]);
}

#[tokio::test(start_paused = true)]
async fn test_safe_tools_without_target_surface_error() {
    let backend = Arc::new(MockChatBackend::new());
    let manager = ChatManager::new(backend.clone(), ChatConfig::defaults());
    manager.set_context(ChatContext::server(SERVER)).await.unwrap();
    let mut notices = manager.subscribe_notices();

    let session_id = manager.send("read it").await.unwrap();
    backend
        .emit_event(
            &session_id,
            &ChatEvent::ToolCalls {
                calls: vec![ToolCall::new("r1", "get_terminal_output", "{}")],
            },
        )
        .await;
    settle().await;

    assert!(!manager.snapshot(&session_id).await.generating);
    assert_eq!(backend.count(BackendOp::ExecuteTools).await, 0);
    let mut surfaced = false;
    while let Ok(notice) = notices.try_recv() {
        surfaced |= matches!(notice, ChatNotice::Error { .. });
    }
    assert!(surfaced);
}

#[tokio::test(start_paused = true)]
async fn test_delete_all_sessions_clears_server() {
    let h = Harness::new().await;
    let session_id = h.manager.send("hi").await.unwrap();
    h.manager.delete_all_sessions().await.unwrap();

    assert!(h.manager.sessions(SERVER).await.is_empty());
    assert!(h.manager.messages(&session_id).await.is_empty());
    assert_eq!(h.manager.active_session_id().await, None);
    assert_eq!(h.backend.count(BackendOp::DeleteAllSessions).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_ticks_disables_countdown() {
    let config = ChatConfig {
        countdown_ticks: 0,
        ..ChatConfig::defaults()
    };
    let h = Harness::with_config(config).await;
    let session_id = h.manager.send("uptime?").await.unwrap();
    h.tool_calls(&session_id, vec![run_call("c1", "uptime")]).await;
    settle().await;

    let snapshot = h.manager.snapshot(&session_id).await;
    assert!(snapshot.pending_tool_calls.is_some());
    assert_eq!(snapshot.countdown, None);
    advance(Duration::from_secs(30)).await;
    assert_eq!(h.backend.count(BackendOp::ExecuteTools).await, 0);
}
