//! Side-channel wire protocol.
//!
//! Every message on the events channel is a JSON object discriminated by its
//! `type` field. Only the events the capture core acts on are modelled;
//! anything else deserializes to [`ServerEvent::Other`] so newer server
//! events never break the reader.

use serde::{Deserialize, Serialize};

/// Label of the reliable data channel carrying protocol events.
pub const EVENTS_CHANNEL_LABEL: &str = "oai-events";

/// Events received from the realtime agent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// The agent finished streaming the arguments of a tool call.
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone(FunctionCallArguments),
    /// The user's speech was fully transcribed.
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptCompleted(Transcript),
    /// The agent's spoken response was fully transcribed.
    #[serde(
        rename = "response.audio_transcript.done",
        alias = "response.output_audio_transcript.done"
    )]
    OutputTranscriptDone(Transcript),
    /// The server reported a problem with a previous client event.
    #[serde(rename = "error")]
    Error { error: ErrorDetail },
    #[serde(other)]
    Other,
}

impl ServerEvent {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionCallArguments {
    pub call_id: String,
    #[serde(default)]
    pub name: String,
    /// Raw JSON text as produced by the model; may be malformed.
    pub arguments: String,
    #[serde(default)]
    pub item_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Transcript {
    #[serde(default)]
    pub item_id: Option<String>,
    pub transcript: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

/// Events sent to the realtime agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Asks the agent to take (or continue) its turn.
    #[serde(rename = "response.create")]
    ResponseCreate,
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    /// The result of a tool call, correlated by `call_id`.
    FunctionCallOutput { call_id: String, output: String },
}

impl ClientEvent {
    /// Builds a tool result event whose output is `result` serialized as JSON text.
    pub fn function_call_output<T: Serialize>(
        call_id: impl Into<String>,
        result: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(ClientEvent::ConversationItemCreate {
            item: ConversationItem::FunctionCallOutput {
                call_id: call_id.into(),
                output: serde_json::to_string(result)?,
            },
        })
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
