use std::io::Write;

use ferroshape_agent::{NdjsonStreamWriter, RequestId, StreamEventError};
use ferroshape_core::{Instructor, RunOptions, SchemaDocument};
use futures::StreamExt;
use serde_json::json;

use super::{conversation, load_schema, run_options};
use crate::cli::ChatArgs;
use crate::error::CliError;
use crate::output;

pub async fn run<W: Write>(args: &ChatArgs, client: &Instructor, out: W, pretty: bool) -> Result<(), CliError> {
    let schema = load_schema(&args.schema)?;
    let options = run_options(args)?;

    if args.stream {
        stream(client, &schema, args, &options, out).await
    } else {
        let envelope = client.run_once(&schema, conversation(args), &options).await?;
        output::write_json(out, &envelope, pretty)
    }
}

async fn stream<W: Write>(
    client: &Instructor,
    schema: &SchemaDocument,
    args: &ChatArgs,
    options: &RunOptions,
    out: W,
) -> Result<(), CliError> {
    let mode = options.mode.unwrap_or(client.config().default_mode);
    let mut writer = NdjsonStreamWriter::new(out);
    writer.emit_start(
        RequestId::new_v4(),
        &options.model,
        Some(json!({ "mode": mode.as_str() })),
    )?;

    let chunks = client.run_stream(schema, conversation(args), options);
    futures::pin_mut!(chunks);

    while let Some(item) = chunks.next().await {
        match item {
            Ok(chunk) if chunk.retrying => writer.emit_retry(&chunk)?,
            Ok(chunk) if chunk.done => {
                writer.emit_chunk(&chunk)?;
                writer.emit_end(Some(json!({
                    "content": chunk.content,
                    "validation_error": chunk.validation_error,
                    "retries_remaining": chunk.retries_remaining,
                    "attempts": chunk.attempt,
                    "repaired": chunk.repaired,
                })))?;
            }
            Ok(chunk) => writer.emit_chunk(&chunk)?,
            Err(error) => {
                writer.emit_error(StreamEventError::from(&error), None)?;
                return Err(error.into());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::path::PathBuf;
    use std::sync::Arc;

    use ferroshape_agent::{parse_stream_events, validate_stream, StreamEventType};
    use ferroshape_core::{ResponseEnvelope, ScriptedTransport};
    use tempfile::NamedTempFile;

    const PERSON: &str = r#"{
        "title": "Person",
        "type": "object",
        "properties": {"name": {"type": "string"}, "age": {"type": "integer"}},
        "required": ["name", "age"]
    }"#;

    fn schema_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(PERSON.as_bytes()).expect("write schema");
        file
    }

    fn args(schema: PathBuf, stream: bool) -> ChatArgs {
        ChatArgs {
            model: "llama3".to_string(),
            schema,
            messages: vec!["John is 25.".to_string()],
            system: None,
            retries: Some(2),
            allow_partial: false,
            mode: None,
            stream,
            options: Vec::new(),
            keep_alive: None,
        }
    }

    #[tokio::test]
    async fn prints_the_envelope() {
        let file = schema_file();
        let transport = Arc::new(ScriptedTransport::new().with_response(r#"{"name": "John", "age": 25}"#));
        let client = Instructor::new(transport);

        let mut sink = Vec::new();
        run(&args(file.path().to_path_buf(), false), &client, &mut sink, false)
            .await
            .expect("chat");

        let envelope: ResponseEnvelope = serde_json::from_slice(&sink).expect("envelope json");
        assert_eq!(envelope.content, json!({"name": "John", "age": 25}));
        assert_eq!(envelope.retries_remaining, 2);
    }

    #[tokio::test]
    async fn streams_events_with_a_retry() {
        let file = schema_file();
        let transport = Arc::new(
            ScriptedTransport::new()
                .with_chunks([r#"{"name": "#, r#""John"}"#])
                .with_chunks([r#"{"name": "John", "#, r#""age": 25}"#]),
        );
        let client = Instructor::new(transport);

        let mut sink = Vec::new();
        run(&args(file.path().to_path_buf(), true), &client, &mut sink, false)
            .await
            .expect("stream");

        let text = String::from_utf8(sink).expect("utf8");
        validate_stream(&text).expect("well-formed stream");
        let events = parse_stream_events(&text).expect("events");

        assert_eq!(events.first().map(|event| event.event), Some(StreamEventType::Start));
        assert_eq!(
            events.iter().filter(|event| event.event == StreamEventType::Retry).count(),
            1
        );
        let end = events.last().expect("end event");
        assert_eq!(end.event, StreamEventType::End);
        let data = end.data.as_ref().expect("end data");
        assert_eq!(data["content"], json!({"name": "John", "age": 25}));
        assert_eq!(data["attempts"], 2);
    }

    #[tokio::test]
    async fn stream_failure_emits_error_event() {
        let file = schema_file();
        let transport = Arc::new(ScriptedTransport::new());
        let client = Instructor::new(transport);

        let mut sink = Vec::new();
        let error = run(&args(file.path().to_path_buf(), true), &client, &mut sink, false)
            .await
            .expect_err("nothing scripted");
        assert_eq!(error.exit_code(), 7);

        let events = parse_stream_events(std::str::from_utf8(&sink).expect("utf8")).expect("events");
        let last = events.last().expect("error event");
        assert_eq!(last.event, StreamEventType::Error);
        assert_eq!(last.error.as_ref().expect("payload").code, "transport.exhausted");
    }
}
