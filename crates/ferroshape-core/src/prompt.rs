//! System instructions and corrective guidance.
//!
//! | Mode | `format` sent | Instruction style |
//! |------|---------------|-------------------|
//! | [`OutputMode::Json`] | `"json"` | return a JSON instance of the schema |
//! | [`OutputMode::Schema`] | the schema document | return a JSON instance of the schema |
//! | [`OutputMode::Reasoning`] | none | reason step by step, then a ```` ```json ```` block |

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{ChatMessage, Role};
use crate::schema::SchemaDescription;
use crate::validation::ValidationErrors;

/// How the model is asked to shape its output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Constrained JSON output.
    #[default]
    Json,
    /// Output constrained by the schema document itself.
    Schema,
    /// Free text with a fenced JSON block at the end.
    Reasoning,
}

impl OutputMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Schema => "schema",
            Self::Reasoning => "reasoning",
        }
    }

    /// Whether the payload must be taken from a ```` ```json ```` fence.
    pub const fn requires_fence(self) -> bool {
        matches!(self, Self::Reasoning)
    }

    /// The `format` field of the chat request.
    pub fn request_format(self, description: &SchemaDescription) -> Option<Value> {
        match self {
            Self::Json => Some(Value::String("json".to_string())),
            Self::Schema => Some(description.shape.clone()),
            Self::Reasoning => None,
        }
    }
}

impl Display for OutputMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "schema" => Ok(Self::Schema),
            "reasoning" => Ok(Self::Reasoning),
            other => Err(format!(
                "unknown output mode '{other}', expected one of: json, schema, reasoning"
            )),
        }
    }
}

fn field_list(description: &SchemaDescription) -> String {
    Value::from(description.field_names.clone()).to_string()
}

/// The system instruction injected ahead of the caller's messages.
pub fn system_prompt(mode: OutputMode, description: &SchemaDescription) -> String {
    let schema = description.shape_json();
    let fields = field_list(description);

    match mode {
        OutputMode::Json | OutputMode::Schema => format!(
            "You are a world class algorithm for JSON responses. You are given a JSON schema. \
             Extract the properties specified in this schema from the provided text, image or \
             context, and return a VALID JSON response that adheres to the schema.\n\
             Here is the JSON schema: {schema}.\n\
             Return an instance of the JSON schema filled with the CORRECT extracted data, NOT \
             the schema itself. The instance has the following fields to extract data for: \
             {fields}."
        ),
        OutputMode::Reasoning => format!(
            "# Instructions\n\n\
             ## Role\n\n\
             You are a world class assistant with strong reasoning capabilities.\n\n\
             ## Step by step instructions\n\n\
             You are given a JSON schema. Extract the properties specified in this schema from \
             the provided text, image or context, and return a VALID JSON response that adheres \
             to the schema.\n\
             1. Briefly describe the task you were given and its goal.\n\
             2. Reason step by step about the best value for every field. Every value must be \
             valid according to the schema. Do not invent fields that the schema does not \
             declare.\n\
             3. Provide a code block with the JSON response. The block starts with ```json and \
             ends with ```. Do not write code in any programming language. The block contains \
             only the instance of the schema.\n\n\
             ## The JSON schema\n\n\
             Here is the JSON schema: {schema}.\n\
             In the code block return an instance of the JSON schema filled with the CORRECT \
             extracted data, NOT the schema itself. The instance has the following fields to \
             extract data for: {fields}."
        ),
    }
}

/// Seed messages: the injected instruction followed by the caller's messages,
/// unless the caller already leads with a system message.
pub fn seed_messages(
    mode: OutputMode,
    description: &SchemaDescription,
    messages: Vec<ChatMessage>,
) -> Vec<ChatMessage> {
    if messages.first().map(|message| message.role) == Some(Role::System) {
        return messages;
    }

    let mut seed = Vec::with_capacity(messages.len() + 1);
    seed.push(ChatMessage::system(system_prompt(mode, description)));
    seed.extend(messages);
    seed
}

/// Corrective system message that follows a rejected reply.
pub fn error_guidance(mode: OutputMode, errors: &ValidationErrors) -> ChatMessage {
    let rendered = errors.to_json_string();

    let content = match mode {
        OutputMode::Json | OutputMode::Schema => format!(
            "The last response raised the following validation error: {rendered}. Respond with \
             the corrected JSON and fill in the correct data while adhering to the context and \
             the JSON schema above! Make sure to adhere to given enums and choose the most \
             likely value if a value is required."
        ),
        OutputMode::Reasoning => format!(
            "The code block of the last response raised the following validation error: \
             {rendered}. Respond with the corrected JSON in the code block and fill in the \
             correct data while adhering to the context and the JSON schema above! A code block \
             has to start with ```json and end with ```. If you do not use a code block the \
             validation will fail!"
        ),
    };

    ChatMessage::system(content)
}
