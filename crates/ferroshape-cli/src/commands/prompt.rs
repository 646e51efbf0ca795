use std::io::Write;

use ferroshape_core::{prompt, OutputMode, SchemaModel};
use serde_json::json;

use super::load_schema;
use crate::cli::PromptArgs;
use crate::error::CliError;
use crate::output;

/// Prints the instruction and `format` field a chat run would send. Offline.
pub fn run<W: Write>(args: &PromptArgs, out: W, pretty: bool) -> Result<(), CliError> {
    let schema = load_schema(&args.schema)?;
    let mode = OutputMode::from(args.mode);
    let description = schema.describe();

    let report = json!({
        "mode": mode.as_str(),
        "fields": description.field_names,
        "system_prompt": prompt::system_prompt(mode, &description),
        "format": mode.request_format(&description),
    });
    output::write_json(out, &report, pretty)
}
