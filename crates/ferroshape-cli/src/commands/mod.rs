mod chat;
mod prompt;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ferroshape_core::{
    ChatMessage, ChatTransport, Instructor, InstructorConfig, OllamaTransport, RunOptions, SchemaDocument,
};
use serde_json::Value;
use tracing::debug;

use crate::cli::{ChatArgs, Cli, Command};
use crate::error::CliError;

pub async fn run<W: Write>(cli: &Cli, out: W) -> Result<(), CliError> {
    match &cli.command {
        Command::Chat(args) => {
            let config = config_from(cli);
            debug!(host = %config.host, model = %args.model, stream = args.stream, "dispatching chat command");
            let transport: Arc<dyn ChatTransport> = Arc::new(OllamaTransport::from_config(&config));
            let client = Instructor::new(transport).with_config(config);
            chat::run(args, &client, out, cli.pretty).await
        }
        Command::Prompt(args) => {
            debug!(schema = %args.schema.display(), mode = ?args.mode, "dispatching prompt command");
            prompt::run(args, out, cli.pretty)
        }
    }
}

fn config_from(cli: &Cli) -> InstructorConfig {
    let mut config = InstructorConfig::from_env();
    if let Some(host) = &cli.host {
        config = config.with_host(host.clone());
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config = config.with_request_timeout(Duration::from_millis(timeout_ms));
    }
    config
}

pub(crate) fn load_schema(path: &Path) -> Result<SchemaDocument, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::SchemaFile {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_str(&text).map_err(|source| CliError::SchemaJson {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(SchemaDocument::from_value(value)?)
}

pub(crate) fn conversation(args: &ChatArgs) -> Vec<ChatMessage> {
    args.system
        .iter()
        .map(ChatMessage::system)
        .chain(args.messages.iter().map(ChatMessage::user))
        .collect()
}

pub(crate) fn run_options(args: &ChatArgs) -> Result<RunOptions, CliError> {
    let mut options = RunOptions::new(args.model.clone()).allow_partial(args.allow_partial);
    if let Some(retries) = args.retries {
        options = options.with_retries(retries);
    }
    if let Some(mode) = args.mode {
        options = options.with_mode(mode.into());
    }
    if let Some(keep_alive) = &args.keep_alive {
        options = options.with_keep_alive(keep_alive.clone());
    }
    for pair in &args.options {
        let (key, value) = parse_option(pair)?;
        options = options.with_option(key, value);
    }
    Ok(options)
}

fn parse_option(pair: &str) -> Result<(String, Value), CliError> {
    let (key, raw) = pair
        .split_once('=')
        .ok_or_else(|| CliError::Argument(format!("option `{pair}` must be key=value")))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(CliError::Argument(format!("option `{pair}` has an empty key")));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatch_is_logged_at_debug() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"type": "object", "properties": {{"city": {{"type": "string"}}}}}}"#)
            .expect("write schema");

        let logs = Captured::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let cli = Cli {
            host: None,
            pretty: false,
            timeout_ms: None,
            log_level: None,
            command: Command::Prompt(crate::cli::PromptArgs {
                schema: file.path().to_path_buf(),
                mode: crate::cli::ModeArg::Json,
            }),
        };
        let mut sink = Vec::new();
        run(&cli, &mut sink).await.expect("prompt");

        let text = String::from_utf8(logs.0.lock().expect("logs").clone()).expect("utf8");
        assert!(text.contains("dispatching prompt command"), "logs: {text}");
        assert!(text.contains("mode=Json"));
    }

    #[test]
    fn option_values_are_json_when_possible() {
        assert_eq!(
            parse_option("temperature=0.2").expect("number"),
            ("temperature".to_string(), serde_json::json!(0.2))
        );
        assert_eq!(
            parse_option("stop=###").expect("text"),
            ("stop".to_string(), Value::String("###".to_string()))
        );
        assert!(matches!(parse_option("seed"), Err(CliError::Argument(_))));
        assert!(matches!(parse_option("=1"), Err(CliError::Argument(_))));
    }

    #[test]
    fn load_schema_reads_object_documents() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{"type": "object", "properties": {{"name": {{"type": "string"}}}}, "required": ["name"]}}"#
        )
        .expect("write schema");

        let schema = load_schema(file.path()).expect("schema");
        assert_eq!(schema.as_value()["required"], serde_json::json!(["name"]));
    }

    #[test]
    fn load_schema_reports_bad_files() {
        let missing = load_schema(Path::new("/definitely/not/here.json")).expect_err("missing");
        assert!(matches!(missing, CliError::SchemaFile { .. }));

        let mut garbage = tempfile::NamedTempFile::new().expect("temp file");
        write!(garbage, "not json").expect("write");
        let error = load_schema(garbage.path()).expect_err("garbage");
        assert!(matches!(error, CliError::SchemaJson { .. }));
        assert_eq!(error.exit_code(), 2);

        let mut array = tempfile::NamedTempFile::new().expect("temp file");
        write!(array, "[]").expect("write");
        assert!(matches!(load_schema(array.path()), Err(CliError::Schema(_))));

        let mut bad_pattern = tempfile::NamedTempFile::new().expect("temp file");
        write!(bad_pattern, r#"{{"type": "object", "properties": {{"id": {{"type": "string", "pattern": "(["}}}}}}"#)
            .expect("write");
        let error = load_schema(bad_pattern.path()).expect_err("bad pattern");
        assert!(matches!(
            error,
            CliError::Schema(ferroshape_core::SchemaError::InvalidPattern { .. })
        ));
        assert_eq!(error.exit_code(), 2);
    }
}
