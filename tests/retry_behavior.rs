//! Behaviour of the validation-and-retry loop on non-streamed calls.

use std::sync::Arc;
use std::time::Duration;

use ferroshape_core::{
    ChatRequest, ChatResponse, ChatTransport, ChunkStream, ErrorKind, Role, TransportError, TransportErrorKind,
    TransportFuture,
};
use ferroshape_tests::{ask_about_john, instructor, person_schema, Instructor, InstructorError, RunOptions, ScriptedTransport};
use serde_json::{json, Value};

// =============================================================================
// End-to-end scenarios
// =============================================================================

#[tokio::test]
async fn when_first_reply_is_valid_budget_is_untouched() {
    // Given: A model that answers correctly straight away
    let (client, transport) = instructor(ScriptedTransport::new().with_response(r#"{"name":"John","age":25}"#));

    // When: A call with three retries is made
    let envelope = client
        .run_once(&person_schema(), ask_about_john(), &RunOptions::new("llama3").with_retries(3))
        .await
        .expect("valid reply");

    // Then: The content is returned and no budget was spent
    assert_eq!(envelope.content, json!({"name": "John", "age": 25}));
    assert_eq!(envelope.retries_remaining, 3);
    assert_eq!(envelope.validation_error, None);
    assert_eq!(envelope.attempts, 1);
    assert!(!envelope.repaired);
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test]
async fn when_first_reply_is_invalid_guidance_leads_to_success() {
    // Given: A model that gets the age type wrong once
    let (client, transport) = instructor(
        ScriptedTransport::new()
            .with_response(r#"{"name":"John","age":"twenty-five"}"#)
            .with_response(r#"{"name":"John","age":25}"#),
    );

    // When: A call with two retries is made
    let envelope = client
        .run_once(&person_schema(), ask_about_john(), &RunOptions::new("llama3").with_retries(2))
        .await
        .expect("second reply is valid");

    // Then: The second reply wins and one retry was spent
    assert_eq!(envelope.content, json!({"name": "John", "age": 25}));
    assert_eq!(envelope.retries_remaining, 1);
    assert_eq!(envelope.attempts, 2);

    // And: The retry carried the rejected reply and the machine-readable error
    let requests = transport.requests();
    let retry = &requests[1].messages;
    assert_eq!(retry.len(), 4);
    assert_eq!(retry[2].role, Role::Assistant);
    assert!(retry[2].content.contains("twenty-five"));
    assert_eq!(retry[3].role, Role::System);
    assert!(retry[3].content.contains("type_mismatch"));
    assert!(retry[3].content.contains("age"));
}

#[tokio::test]
async fn when_budget_runs_out_with_partial_allowed_repaired_data_is_returned() {
    // Given: A model that never supplies the age
    let (client, _) = instructor(ScriptedTransport::new().with_response(r#"{"name":"John"}"#));

    // When: A single-attempt call allows partial results
    let envelope = client
        .run_once(
            &person_schema(),
            ask_about_john(),
            &RunOptions::new("llama3").with_retries(1).allow_partial(true),
        )
        .await
        .expect("repaired result");

    // Then: The known field survives, the missing one stays empty and the error is kept
    assert_eq!(envelope.content["name"], "John");
    assert!(envelope.content.get("age").map_or(true, Value::is_null));
    assert!(envelope.repaired);
    assert_eq!(envelope.retries_remaining, 0);
    let errors = envelope.validation_error.expect("last error is reported");
    assert!(!errors.is_empty());
    assert_eq!(errors.as_slice()[0].kind, ErrorKind::MissingField);
}

#[tokio::test]
async fn when_budget_runs_out_without_partial_call_fails() {
    // Given: A model that never supplies the age
    let (client, _) = instructor(ScriptedTransport::new().with_response(r#"{"name":"John"}"#));

    // When: A single-attempt call does not allow partial results
    let error = client
        .run_once(&person_schema(), ask_about_john(), &RunOptions::new("llama3").with_retries(1))
        .await
        .expect_err("no budget left");

    // Then: Retries are reported as exhausted with the last error
    let InstructorError::RetriesExhausted { attempts, last_error } = error else {
        panic!("expected RetriesExhausted, got {error:?}");
    };
    assert_eq!(attempts, 1);
    assert_eq!(last_error.as_slice()[0].kind, ErrorKind::MissingField);
}

// =============================================================================
// Budget and history invariants
// =============================================================================

#[tokio::test]
async fn retry_budget_never_increases_and_bounds_attempts() {
    // Given: A model that only ever returns prose
    let transport = ScriptedTransport::new()
        .with_response("I cannot help with that.")
        .with_response("Still no JSON.")
        .with_response("Nope.")
        .with_response(r#"{"name":"John","age":25}"#);
    let (client, transport) = instructor(transport);

    // When: A call with three retries is made
    let error = client
        .run_once(&person_schema(), ask_about_john(), &RunOptions::new("llama3").with_retries(3))
        .await
        .expect_err("three bad replies");

    // Then: Exactly three attempts were made and the valid fourth reply was never requested
    assert!(matches!(error, InstructorError::RetriesExhausted { attempts: 3, .. }));
    assert_eq!(transport.request_count(), 3);
    assert_eq!(transport.remaining(), 1);
}

#[tokio::test]
async fn zero_retries_makes_a_single_attempt() {
    // Given: A budget of zero
    let (client, transport) = instructor(ScriptedTransport::new().with_response("{}"));

    // When: The reply is invalid, even with partial results allowed
    let error = client
        .run_once(
            &person_schema(),
            ask_about_john(),
            &RunOptions::new("llama3").with_retries(0).allow_partial(true),
        )
        .await
        .expect_err("no budget at all");

    // Then: One request was made and no repair happened
    assert!(matches!(error, InstructorError::RetriesExhausted { attempts: 1, .. }));
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test]
async fn request_window_is_opening_pair_plus_latest_exchange() {
    // Given: A model that needs four corrections
    let mut transport = ScriptedTransport::new();
    for bad in ["one", "two", "three", "four"] {
        transport = transport.with_response(format!(r#"{{"name":"{bad}"}}"#));
    }
    let (client, transport) = instructor(transport.with_response(r#"{"name":"John","age":25}"#));

    // And: A multi-turn caller conversation
    let conversation = vec![
        ferroshape_tests::ChatMessage::user("John is 25 years old."),
        ferroshape_tests::ChatMessage::assistant("Understood."),
        ferroshape_tests::ChatMessage::user("Please give me his record."),
    ];

    // When: A call with a generous budget runs to success
    let envelope = client
        .run_once(&person_schema(), conversation, &RunOptions::new("llama3").with_retries(5))
        .await
        .expect("fifth reply is valid");
    assert_eq!(envelope.attempts, 5);

    // Then: Every request carried the instruction and the opening turn, never more than four messages
    let requests = transport.requests();
    assert_eq!(requests.len(), 5);
    assert_eq!(requests[0].messages.len(), 2);
    for request in &requests {
        assert!(request.messages.len() <= 4, "window grew to {}", request.messages.len());
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[1].content, "John is 25 years old.");
    }

    // And: Retries append only the most recent rejected reply and its guidance
    let last = &requests[4].messages;
    assert_eq!(last.len(), 4);
    assert_eq!(last[2].role, Role::Assistant);
    assert!(last[2].content.contains("four"));
    assert_eq!(last[3].role, Role::System);
    assert!(last.iter().all(|message| !message.content.contains("\"three\"")));
}

#[tokio::test]
async fn history_does_not_leak_between_calls() {
    // Given: One client used for two consecutive calls
    let (client, transport) = instructor(
        ScriptedTransport::new()
            .with_response(r#"{"name":"John"}"#)
            .with_response(r#"{"name":"John","age":25}"#)
            .with_response(r#"{"name":"Mary","age":31}"#),
    );
    let options = RunOptions::new("llama3").with_retries(3);

    // When: The first call needs a retry and the second does not
    client
        .run_once(&person_schema(), ask_about_john(), &options)
        .await
        .expect("first call");
    let second = client
        .run_once(&person_schema(), ask_about_john(), &options)
        .await
        .expect("second call");

    // Then: The second call starts from a fresh history and a full budget
    let requests = transport.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].messages.len(), 2);
    assert_eq!(second.retries_remaining, 3);
}

#[tokio::test]
async fn caller_system_message_replaces_the_generated_instruction() {
    // Given: A conversation that already leads with a system message
    let (client, transport) = instructor(ScriptedTransport::new().with_response(r#"{"name":"John","age":25}"#));
    let messages = vec![
        ferroshape_tests::ChatMessage::system("Answer as JSON."),
        ferroshape_tests::ChatMessage::user("John is 25."),
    ];

    // When: A call is made
    client
        .run_once(&person_schema(), messages, &RunOptions::new("llama3"))
        .await
        .expect("valid reply");

    // Then: No second system message was injected
    let request = &transport.requests()[0];
    assert_eq!(request.messages.len(), 2);
    assert_eq!(request.messages[0].content, "Answer as JSON.");
    assert_eq!(request.format, Some(json!("json")));
}

// =============================================================================
// Transport failures
// =============================================================================

#[tokio::test]
async fn transport_errors_are_fatal_and_never_retried() {
    // Given: A server that refuses the first connection
    let (client, transport) = instructor(
        ScriptedTransport::new()
            .with_failure(TransportError::connect("connection refused"))
            .with_response(r#"{"name":"John","age":25}"#),
    );

    // When: A call with budget to spare is made
    let error = client
        .run_once(&person_schema(), ask_about_john(), &RunOptions::new("llama3").with_retries(3))
        .await
        .expect_err("transport failure");

    // Then: The failure surfaces immediately
    let InstructorError::Transport(transport_error) = error else {
        panic!("expected transport error, got {error:?}");
    };
    assert_eq!(transport_error.kind(), TransportErrorKind::Connect);
    assert_eq!(transport.request_count(), 1);
    assert_eq!(transport.remaining(), 1);
}

struct StalledTransport;

impl ChatTransport for StalledTransport {
    fn chat<'a>(&'a self, request: ChatRequest) -> TransportFuture<'a, ChatResponse> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err::<ChatResponse, _>(TransportError::protocol(format!("{} never answered", request.model)))
        })
    }

    fn chat_stream<'a>(&'a self, _request: ChatRequest) -> TransportFuture<'a, ChunkStream<'a>> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err::<ChunkStream<'a>, _>(TransportError::protocol("never answered"))
        })
    }
}

#[tokio::test]
async fn slow_server_times_out_as_transport_error() {
    // Given: A server that never answers
    let client = Instructor::new(Arc::new(StalledTransport));

    // When: A call with a short timeout is made
    let error = client
        .run_once(
            &person_schema(),
            ask_about_john(),
            &RunOptions::new("llama3").with_timeout(Duration::from_millis(20)),
        )
        .await
        .expect_err("timed out");

    // Then: The timeout is reported as a transport failure
    assert_eq!(error.code(), "transport.timeout");
}

// =============================================================================
// Request validation
// =============================================================================

#[tokio::test]
async fn empty_conversation_is_rejected_before_any_request() {
    // Given: No messages
    let (client, transport) = instructor(ScriptedTransport::new());

    // When: A call is made
    let error = client
        .run_once(&person_schema(), Vec::new(), &RunOptions::new("llama3"))
        .await
        .expect_err("invalid request");

    // Then: Nothing was sent
    assert!(matches!(error, InstructorError::InvalidRequest(_)));
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn model_options_are_forwarded() {
    // Given: Call options with sampling settings and a keep-alive
    let (client, transport) = instructor(ScriptedTransport::new().with_response(r#"{"name":"John","age":25}"#));
    let options = RunOptions::new("llama3")
        .with_option("temperature", 0.0)
        .with_keep_alive("5m");

    // When: A call is made
    client
        .run_once(&person_schema(), ask_about_john(), &options)
        .await
        .expect("valid reply");

    // Then: They reach the transport unchanged
    let request = &transport.requests()[0];
    assert_eq!(request.model, "llama3");
    assert_eq!(request.options["temperature"], json!(0.0));
    assert_eq!(request.keep_alive.as_deref(), Some("5m"));
    assert!(!request.stream);
}
