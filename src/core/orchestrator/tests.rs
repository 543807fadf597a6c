use super::*;
use crate::api::ApiRole;
use crate::core::chat_stream::{ByteStream, RemoteApiError};
use crate::core::coach::default_coaches;
use crate::core::message::{MessageKind, THINKING_INDICATOR};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
enum Script {
    Reply { chunks: Vec<String>, delay_ms: u64 },
    Fail { status: u16, message: Option<&'static str>, delay_ms: u64 },
    Hang,
}

fn frame(text: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({"choices": [{"delta": {"content": text}}]})
    )
}

fn reply(parts: &[&str]) -> Script {
    let mut chunks: Vec<String> = parts.iter().map(|p| frame(p)).collect();
    chunks.push("data: [DONE]\n\n".to_string());
    Script::Reply {
        chunks,
        delay_ms: 0,
    }
}

#[derive(Default)]
struct ScriptedTransport {
    scripts: HashMap<String, Script>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedTransport {
    fn with(mut self, coach: &str, script: Script) -> Self {
        self.scripts.insert(coach.to_string(), script);
        self
    }

    fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn coach_for(&self, request: &CompletionRequest) -> Option<String> {
        let turn = &request.messages.last()?.content;
        self.scripts
            .keys()
            .find(|name| turn.contains(&format!("Respond as {name} would")))
            .cloned()
    }
}

#[async_trait]
impl CompletionTransport for ScriptedTransport {
    async fn open_stream(
        &self,
        request: &CompletionRequest,
        _credential: &str,
    ) -> Result<ByteStream, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self
            .coach_for(request)
            .and_then(|name| self.scripts.get(&name).cloned())
            .unwrap_or_else(|| reply(&["default"]));

        match script {
            Script::Reply { chunks, delay_ms } => {
                let stream = stream::iter(chunks).then(move |chunk| async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    Ok(chunk.into_bytes())
                });
                Ok(Box::pin(stream))
            }
            Script::Fail {
                status,
                message,
                delay_ms,
            } => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Err(TransportError::Remote(RemoteApiError {
                    status,
                    message: message.map(str::to_string),
                }))
            }
            Script::Hang => Ok(Box::pin(stream::pending::<Result<Vec<u8>, TransportError>>())),
        }
    }

    async fn complete(
        &self,
        _request: &CompletionRequest,
        _credential: &str,
    ) -> Result<String, TransportError> {
        Ok(String::new())
    }
}

/// Sink that keeps a snapshot of the list after every update.
#[derive(Default)]
struct RecordingSink {
    buffer: ChatBuffer,
    history: Mutex<Vec<Vec<Message>>>,
}

impl MessageSink for RecordingSink {
    fn update(&self, update: BufferUpdate) {
        self.buffer.update(update);
        self.history.lock().unwrap().push(self.buffer.snapshot());
    }
}

fn orchestrator(transport: Arc<ScriptedTransport>) -> ChatOrchestrator {
    ChatOrchestrator::new(transport, Arc::new(MessageIdAllocator::starting_at(100)))
}

fn turn(text: &str, selected: Vec<Coach>, model: &str, use_reasoning: bool) -> TurnRequest {
    TurnRequest {
        text: text.to_string(),
        prior_messages: Vec::new(),
        selected,
        coaches: default_coaches(),
        model: model.to_string(),
        use_reasoning,
        credential: Some("sk-test".to_string()),
    }
}

fn coach_named<'a>(messages: &'a [Message], name: &str) -> &'a Message {
    messages
        .iter()
        .find(|m| m.coach_reply().is_some_and(|r| r.coach == name))
        .unwrap_or_else(|| panic!("no message for {name}"))
}

const REGULAR_MODEL: &str = "openai/gpt-4.1-mini";
const NATIVE_MODEL: &str = "openai/o4-mini";
const PLAIN_MODEL: &str = "meta-llama/llama-3.3-70b-instruct";

#[tokio::test]
async fn appends_user_message_then_one_placeholder_per_coach() {
    let transport = Arc::new(
        ScriptedTransport::default()
            .with("Tim Ferriss", reply(&["Automate it."]))
            .with(
                "Jocko Willink",
                Script::Fail {
                    status: 500,
                    message: None,
                    delay_ms: 0,
                },
            ),
    );
    let sink = RecordingSink::default();
    let coaches = default_coaches();
    let selected = vec![coaches[0].clone(), coaches[1].clone()];

    let summary = orchestrator(transport)
        .send_message(
            turn("How do I focus?", selected, REGULAR_MODEL, false),
            &sink,
            &CancellationToken::new(),
        )
        .await
        .expect("turn should run");

    let messages = sink.buffer.snapshot();
    assert_eq!(messages.len(), 3);
    assert!(messages[0].is_user());
    assert_eq!(messages[0].content, "How do I focus?");
    assert_eq!(messages[0].id, summary.user_message_id);

    // Placeholders land right after the user message, in roster order.
    let early = &sink.history.lock().unwrap()[2];
    assert_eq!(early.len(), 3);
    assert_eq!(early[1].coach_reply().unwrap().coach, "Tim Ferriss");
    assert_eq!(early[2].coach_reply().unwrap().coach, "Jocko Willink");
    assert!(early[1].is_streaming() && early[2].is_streaming());
    assert_eq!(early[1].content, THINKING_INDICATOR);

    assert_eq!(summary.replies.len(), 2);
    assert_eq!(summary.failures(), 1);
}

#[tokio::test]
async fn failure_of_one_coach_leaves_the_other_intact_in_any_order() {
    for (fail_delay, ok_delay) in [(0, 30), (30, 0)] {
        let transport = Arc::new(
            ScriptedTransport::default()
                .with(
                    "Tim Ferriss",
                    Script::Fail {
                        status: 429,
                        message: Some("Rate limit exceeded"),
                        delay_ms: fail_delay,
                    },
                )
                .with(
                    "Jocko Willink",
                    Script::Reply {
                        chunks: vec![frame("Discipline "), frame("equals freedom.")],
                        delay_ms: ok_delay,
                    },
                ),
        );
        let sink = RecordingSink::default();
        let coaches = default_coaches();

        let summary = orchestrator(transport)
            .send_message(
                turn("Help", coaches[..2].to_vec(), REGULAR_MODEL, false),
                &sink,
                &CancellationToken::new(),
            )
            .await
            .expect("turn should run");

        let messages = sink.buffer.snapshot();
        let failed = coach_named(&messages, "Tim Ferriss");
        let reply = failed.coach_reply().unwrap();
        assert!(reply.is_error);
        assert!(!reply.is_streaming);
        assert_eq!(failed.content, "❌ Error: Rate limit exceeded");

        let succeeded = coach_named(&messages, "Jocko Willink");
        let reply = succeeded.coach_reply().unwrap();
        assert!(!reply.is_error);
        assert!(!reply.is_streaming);
        assert_eq!(succeeded.content, "Discipline equals freedom.");

        assert_eq!(
            summary.replies[0].status,
            ReplyStatus::Failed("Rate limit exceeded".to_string())
        );
        assert_eq!(summary.replies[1].status, ReplyStatus::Completed);
    }
}

#[tokio::test]
async fn streamed_content_overwrites_placeholder_with_running_total() {
    let transport = Arc::new(
        ScriptedTransport::default().with("David Goggins", reply(&["Stay ", "hard", "!"])),
    );
    let sink = RecordingSink::default();
    let goggins = default_coaches()[2].clone();

    orchestrator(transport)
        .send_message(
            turn("Motivate me", vec![goggins], REGULAR_MODEL, false),
            &sink,
            &CancellationToken::new(),
        )
        .await
        .expect("turn should run");

    let history = sink.history.lock().unwrap();
    let contents: Vec<(String, bool)> = history
        .iter()
        .filter_map(|snapshot| snapshot.get(1))
        .map(|m| (m.content.clone(), m.is_streaming()))
        .collect();

    assert!(contents.contains(&("Stay ".to_string(), true)));
    assert!(contents.contains(&("Stay hard".to_string(), true)));
    assert!(contents.contains(&("Stay hard!".to_string(), true)));
    assert_eq!(contents.last().unwrap(), &("Stay hard!".to_string(), false));
}

#[tokio::test]
async fn each_coach_writes_only_its_own_message() {
    let transport = Arc::new(
        ScriptedTransport::default()
            .with(
                "Tim Ferriss",
                Script::Reply {
                    chunks: vec![frame("tim-1 "), frame("tim-2")],
                    delay_ms: 7,
                },
            )
            .with(
                "Jocko Willink",
                Script::Reply {
                    chunks: vec![frame("jocko-1 "), frame("jocko-2")],
                    delay_ms: 3,
                },
            )
            .with(
                "David Goggins",
                Script::Reply {
                    chunks: vec![frame("david-1 "), frame("david-2")],
                    delay_ms: 5,
                },
            ),
    );
    let sink = RecordingSink::default();

    let summary = orchestrator(transport)
        .send_message(
            turn("Go", Vec::new(), REGULAR_MODEL, false),
            &sink,
            &CancellationToken::new(),
        )
        .await
        .expect("turn should run");

    for snapshot in sink.history.lock().unwrap().iter() {
        for message in snapshot.iter().filter(|m| m.coach_reply().is_some()) {
            let coach = &message.coach_reply().unwrap().coach;
            let tag = coach.split_whitespace().next().unwrap().to_lowercase();
            assert!(
                message.content == THINKING_INDICATOR || message.content.starts_with(&tag),
                "{coach} bubble holds {:?}",
                message.content
            );
        }
    }

    let ids: Vec<_> = summary.replies.iter().map(|r| r.message_id).collect();
    let mut unique = ids.clone();
    unique.dedup();
    assert_eq!(ids.len(), 3);
    assert_eq!(unique.len(), 3);
}

#[tokio::test]
async fn empty_selection_queries_every_coach() {
    let transport = Arc::new(ScriptedTransport::default());
    let sink = RecordingSink::default();

    let summary = orchestrator(Arc::clone(&transport))
        .send_message(
            turn("Hi all", Vec::new(), REGULAR_MODEL, false),
            &sink,
            &CancellationToken::new(),
        )
        .await
        .expect("turn should run");

    assert_eq!(transport.requests().len(), 3);
    assert_eq!(summary.replies.len(), 3);
    assert_eq!(sink.buffer.len(), 4);
    let names: Vec<_> = summary.replies.iter().map(|r| r.coach_name.as_str()).collect();
    assert_eq!(names, vec!["Tim Ferriss", "Jocko Willink", "David Goggins"]);
}

#[tokio::test]
async fn synthetic_reasoning_requests_carry_two_system_messages() {
    let transport = Arc::new(ScriptedTransport::default());
    let coaches = default_coaches();

    orchestrator(Arc::clone(&transport))
        .send_message(
            turn("Plan my week", coaches[..2].to_vec(), REGULAR_MODEL, true),
            &RecordingSink::default(),
            &CancellationToken::new(),
        )
        .await
        .expect("turn should run");

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    for request in requests {
        assert_eq!(request.system_message_count(), 2);
        assert_eq!(request.max_tokens, 2000);
        assert_eq!(request.temperature, Some(0.7));
        assert!(request.stream);
    }
}

#[tokio::test]
async fn native_reasoning_requests_drop_system_messages_and_temperature() {
    let transport = Arc::new(ScriptedTransport::default());
    let coaches = default_coaches();

    orchestrator(Arc::clone(&transport))
        .send_message(
            turn("Plan my week", coaches[..1].to_vec(), NATIVE_MODEL, true),
            &RecordingSink::default(),
            &CancellationToken::new(),
        )
        .await
        .expect("turn should run");

    let request = &transport.requests()[0];
    assert_eq!(request.system_message_count(), 0);
    assert_eq!(request.messages[0].role, ApiRole::User);
    assert!(request.messages[0]
        .content
        .starts_with(&coaches[0].system_prompt));
    assert_eq!(request.temperature, None);
    assert_eq!(request.max_tokens, 4000);
}

#[tokio::test]
async fn preconditions_reject_without_touching_buffer_or_network() {
    let transport = Arc::new(ScriptedTransport::default());
    let orchestrator = orchestrator(Arc::clone(&transport));
    let sink = RecordingSink::default();
    let cancel = CancellationToken::new();

    let blank = turn("   \n", Vec::new(), REGULAR_MODEL, false);
    assert_eq!(
        orchestrator.send_message(blank, &sink, &cancel).await,
        Err(SendError::EmptyMessage)
    );

    let mut keyless = turn("hi", Vec::new(), REGULAR_MODEL, false);
    keyless.credential = None;
    assert_eq!(
        orchestrator.send_message(keyless, &sink, &cancel).await,
        Err(SendError::MissingCredential)
    );

    let mut blank_key = turn("hi", Vec::new(), REGULAR_MODEL, false);
    blank_key.credential = Some("  ".to_string());
    assert_eq!(
        orchestrator.send_message(blank_key, &sink, &cancel).await,
        Err(SendError::MissingCredential)
    );

    let reasoning = turn("hi", Vec::new(), PLAIN_MODEL, true);
    assert_eq!(
        orchestrator.send_message(reasoning, &sink, &cancel).await,
        Err(SendError::ReasoningUnsupported {
            model: PLAIN_MODEL.to_string()
        })
    );

    assert!(sink.buffer.is_empty());
    assert!(sink.history.lock().unwrap().is_empty());
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn prior_conversation_is_replayed_to_each_coach() {
    let transport = Arc::new(ScriptedTransport::default());
    let coaches = default_coaches();
    let mut earlier = Message::coach_placeholder(1, &coaches[1]);
    earlier.content = "Get up at 4:30.".to_string();
    earlier.coach_reply_mut().unwrap().is_streaming = false;

    let mut request = turn("And after that?", coaches[..1].to_vec(), REGULAR_MODEL, false);
    request.prior_messages = vec![Message::user(0, "How do I start my day?"), earlier];

    orchestrator(Arc::clone(&transport))
        .send_message(request, &RecordingSink::default(), &CancellationToken::new())
        .await
        .expect("turn should run");

    let content = &transport.requests()[0].messages[1].content;
    assert!(content.contains("user: How do I start my day?"));
    assert!(content.contains("assistant: Jocko Willink: Get up at 4:30."));
    assert!(content.contains("user: And after that?"));
}

#[tokio::test]
async fn error_frame_mid_stream_marks_reply_failed() {
    let transport = Arc::new(ScriptedTransport::default().with(
        "Tim Ferriss",
        Script::Reply {
            chunks: vec![
                frame("partial"),
                "data: {\"error\":{\"message\":\"upstream timeout\"}}\n\n".to_string(),
            ],
            delay_ms: 0,
        },
    ));
    let sink = RecordingSink::default();

    let summary = orchestrator(transport)
        .send_message(
            turn("q", default_coaches()[..1].to_vec(), REGULAR_MODEL, false),
            &sink,
            &CancellationToken::new(),
        )
        .await
        .expect("turn should run");

    let message = &sink.buffer.snapshot()[1];
    assert!(message.is_error());
    assert_eq!(message.content, "❌ Error: upstream timeout");
    assert_eq!(
        summary.replies[0].status,
        ReplyStatus::Failed("upstream timeout".to_string())
    );
}

#[tokio::test]
async fn cancellation_stops_hanging_replies_without_failing_them() {
    let transport = Arc::new(
        ScriptedTransport::default()
            .with("Tim Ferriss", Script::Hang)
            .with("Jocko Willink", reply(&["done"])),
    );
    let sink = RecordingSink::default();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    let canceller = async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    };
    let orchestrator = orchestrator(transport);
    let (summary, _) = tokio::join!(
        orchestrator.send_message(
            turn("q", default_coaches()[..2].to_vec(), REGULAR_MODEL, false),
            &sink,
            &cancel,
        ),
        canceller
    );
    let summary = summary.expect("turn should run");

    assert_eq!(summary.replies[0].status, ReplyStatus::Cancelled);
    assert_eq!(summary.replies[1].status, ReplyStatus::Completed);
    let messages = sink.buffer.snapshot();
    assert!(messages.iter().all(|m| !m.is_streaming()));
    assert!(!coach_named(&messages, "Tim Ferriss").is_error());
}

#[tokio::test]
async fn updates_compose_with_concurrent_writers() {
    let transport = Arc::new(ScriptedTransport::default().with(
        "Tim Ferriss",
        Script::Reply {
            chunks: vec![frame("a"), frame("b"), frame("c")],
            delay_ms: 5,
        },
    ));
    let buffer = ChatBuffer::new();
    let outside = buffer.clone();
    let writer = async move {
        for i in 0..3 {
            tokio::time::sleep(Duration::from_millis(4)).await;
            outside.update(Box::new(move |messages| {
                messages.push(Message::system(10_000 + i, format!("note {i}"), false))
            }));
        }
    };

    let orchestrator = orchestrator(transport);
    let cancel = CancellationToken::new();
    let (summary, _) = tokio::join!(
        orchestrator.send_message(
            turn("q", default_coaches()[..1].to_vec(), REGULAR_MODEL, false),
            &buffer,
            &cancel,
        ),
        writer
    );
    summary.expect("turn should run");

    let messages = buffer.snapshot();
    assert_eq!(messages.len(), 5);
    let notes = messages
        .iter()
        .filter(|m| matches!(m.kind, MessageKind::System { .. }))
        .count();
    assert_eq!(notes, 3);
    assert_eq!(coach_named(&messages, "Tim Ferriss").content, "abc");
}

#[tokio::test]
async fn report_failure_appends_system_error() {
    let buffer = ChatBuffer::new();
    let orchestrator = orchestrator(Arc::new(ScriptedTransport::default()));
    let id = orchestrator.report_failure(&buffer, "Failed to get responses from coaches");

    let messages = buffer.snapshot();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, id);
    assert!(messages[0].is_error());
    assert!(matches!(messages[0].kind, MessageKind::System { is_error: true }));
}

#[test]
fn last_user_text_finds_most_recent_question() {
    let coach = &default_coaches()[0];
    let messages = vec![
        Message::user(1, "first"),
        Message::coach_placeholder(2, coach),
        Message::user(3, "second"),
        Message::system_error(4, "boom"),
    ];
    assert_eq!(last_user_text(&messages).as_deref(), Some("second"));
    assert_eq!(last_user_text(&[]), None);
}

#[test]
fn buffer_notifies_subscribers_on_every_mutation() {
    let buffer = ChatBuffer::new();
    let rx = buffer.subscribe();
    let start = *rx.borrow();

    buffer.update(Box::new(|messages| messages.push(Message::user(1, "a"))));
    buffer.replace(vec![Message::user(2, "b")]);
    buffer.clear();

    assert_eq!(*rx.borrow(), start + 3);
    assert!(buffer.is_empty());
}
