//! Control-channel dispatcher.
//!
//! Consumes inbound channel events one at a time, applies tool calls to the
//! draft store, records transcripts and answers every tool call with exactly
//! two outbound messages: the tool result, then a request for the agent to
//! continue its turn.

use crate::error::CallError;
use crate::session::CallStatus;
use crate::transport::{ChannelEvent, ControlChannel};
use mentorcall_core::schema::{GET_DRAFT_STATUS_TOOL, UPDATE_DRAFT_TOOL};
use mentorcall_core::{Completion, Draft, DraftStore, Speaker, Variant};
use openai_realtime::protocol::FunctionCallArguments;
use openai_realtime::{ClientEvent, ServerEvent};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

/// What handling one inbound event did.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The channel opened and the agent was asked to take the first turn.
    Greeted,
    DraftUpdated {
        call_id: String,
        fields: Vec<String>,
    },
    StatusReported {
        call_id: String,
        completion: Completion,
    },
    /// Tool arguments could not be parsed; nothing was acknowledged.
    ArgumentsDropped { call_id: String },
    UnknownTool { name: String },
    Transcribed(Speaker),
    ServerError(String),
    Ignored,
}

#[derive(Serialize)]
struct UpdateResult<'a> {
    success: bool,
    updated_fields: &'a [String],
}

pub struct Dispatcher {
    store: Arc<DraftStore>,
    variant: Variant,
    channel: Arc<dyn ControlChannel>,
    status: Arc<watch::Sender<CallStatus>>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<DraftStore>,
        variant: Variant,
        channel: Arc<dyn ControlChannel>,
        status: Arc<watch::Sender<CallStatus>>,
    ) -> Self {
        Self {
            store,
            variant,
            channel,
            status,
        }
    }

    /// Processes events in arrival order until the channel closes or the
    /// call is cancelled.
    #[instrument(name = "dispatcher", skip_all, fields(variant = %self.variant))]
    pub async fn run(self, mut events: mpsc::Receiver<ChannelEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Dispatcher cancelled");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if event == ChannelEvent::Closed {
                info!("Control channel closed");
                break;
            }
            let outcome = self.handle(event).await;
            trace!(?outcome, "Handled channel event");
        }
    }

    pub async fn handle(&self, event: ChannelEvent) -> DispatchOutcome {
        match event {
            ChannelEvent::Open => {
                info!("Control channel open, requesting greeting");
                self.send(ClientEvent::ResponseCreate).await;
                DispatchOutcome::Greeted
            }
            ChannelEvent::Message(text) => self.handle_message(&text).await,
            ChannelEvent::Closed => DispatchOutcome::Ignored,
        }
    }

    async fn handle_message(&self, text: &str) -> DispatchOutcome {
        let event = match ServerEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %CallError::Protocol(e.to_string()), "Dropping unreadable envelope");
                return DispatchOutcome::Ignored;
            }
        };

        match event {
            ServerEvent::FunctionCallArgumentsDone(call) => self.handle_tool_call(call).await,
            ServerEvent::InputTranscriptCompleted(t) => {
                self.transcribe(Speaker::Human, &t.transcript)
            }
            ServerEvent::OutputTranscriptDone(t) => self.transcribe(Speaker::Agent, &t.transcript),
            ServerEvent::Error { error } => {
                warn!(code = ?error.code, message = %error.message, "Realtime server error");
                let message = error.message.clone();
                self.status
                    .send_modify(|status| status.last_error = Some(message.clone()));
                DispatchOutcome::ServerError(message)
            }
            ServerEvent::Other => DispatchOutcome::Ignored,
        }
    }

    #[instrument(skip(self, call), fields(call_id = %call.call_id, tool = %call.name))]
    async fn handle_tool_call(&self, call: FunctionCallArguments) -> DispatchOutcome {
        let arguments: Draft = match serde_json::from_str::<Value>(&call.arguments) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                let e = CallError::ToolArgument(format!("expected an object, got {}", other));
                warn!(error = %e, "Dropping tool call");
                return DispatchOutcome::ArgumentsDropped {
                    call_id: call.call_id,
                };
            }
            Err(e) => {
                warn!(error = %CallError::ToolArgument(e.to_string()), "Dropping tool call");
                return DispatchOutcome::ArgumentsDropped {
                    call_id: call.call_id,
                };
            }
        };

        match call.name.as_str() {
            UPDATE_DRAFT_TOOL => {
                let fields: Vec<String> = arguments.keys().cloned().collect();
                if let Err(e) = self.store.merge_fields(arguments) {
                    error!(error = %e, "Failed to persist draft");
                }
                info!(?fields, "Draft updated");
                self.acknowledge(
                    &call.call_id,
                    &UpdateResult {
                        success: true,
                        updated_fields: &fields,
                    },
                )
                .await;
                DispatchOutcome::DraftUpdated {
                    call_id: call.call_id,
                    fields,
                }
            }
            GET_DRAFT_STATUS_TOOL => {
                let variant = self.store.variant().unwrap_or(self.variant);
                let completion = self.store.completion(variant);
                debug!(filled = completion.filled.len(), "Reporting draft status");
                self.acknowledge(&call.call_id, &completion).await;
                DispatchOutcome::StatusReported {
                    call_id: call.call_id,
                    completion,
                }
            }
            other => {
                warn!("Ignoring call to unknown tool");
                DispatchOutcome::UnknownTool {
                    name: other.to_string(),
                }
            }
        }
    }

    fn transcribe(&self, speaker: Speaker, text: &str) -> DispatchOutcome {
        if self.store.append_transcript(speaker, text) {
            DispatchOutcome::Transcribed(speaker)
        } else {
            DispatchOutcome::Ignored
        }
    }

    /// Sends the tool result for `call_id`, then asks the agent to continue.
    async fn acknowledge<T: Serialize>(&self, call_id: &str, result: &T) {
        match ClientEvent::function_call_output(call_id, result) {
            Ok(output) => {
                self.send(output).await;
                self.send(ClientEvent::ResponseCreate).await;
            }
            Err(e) => error!(error = %e, "Failed to serialize tool result"),
        }
    }

    async fn send(&self, event: ClientEvent) {
        let text = match event.to_text() {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to serialize client event");
                return;
            }
        };
        if let Err(e) = self.channel.send_text(text).await {
            warn!(error = %e, "Failed to send on control channel");
        }
    }
}
