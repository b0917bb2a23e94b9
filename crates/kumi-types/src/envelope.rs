//! Wire envelopes for commands and events.
//!
//! Transports exchange newline-delimited JSON envelopes:
//!
//! ```text
//! { "token": "...", "targetKernel": "...", "commandType": "SubmitCode", "command": { ... } }
//! { "eventType": "ValueProduced", "event": { ... }, "command": { ... } }
//! ```
//!
//! The envelope layer is intentionally thin: it adds correlation and routing
//! fields around the typed payloads and nothing else. How bytes move is the
//! transport's business.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::{CommandBody, KernelCommand};
use crate::event::{EventBody, KernelEvent};
use crate::token::CommandToken;

/// Errors arising when decoding envelopes off a transport.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The line was not a valid envelope.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Serialized form of a [`KernelCommand`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelCommandEnvelope {
    /// Correlation token. Optional on the wire; a missing token is minted
    /// fresh on receipt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<CommandToken>,
    /// Destination kernel name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_kernel: Option<String>,
    /// Parent command token, for expanded commands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<CommandToken>,
    /// Out-of-band metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, serde_json::Value>,
    /// `commandType` + `command` fields.
    #[serde(flatten)]
    pub body: CommandBody,
}

impl KernelCommandEnvelope {
    /// Decode one envelope from a JSON line.
    pub fn from_json(line: &str) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_str(line)?)
    }

    /// Encode to a single JSON line (no trailing newline).
    pub fn to_json(&self) -> String {
        // Envelope types contain nothing unserializable.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Rehydrate the command, minting a token if the wire omitted one.
    pub fn into_command(self) -> KernelCommand {
        KernelCommand {
            token: self.token.unwrap_or_default(),
            target_kernel: self.target_kernel,
            parent: self.parent,
            properties: self.properties,
            body: self.body,
        }
    }
}

impl From<&KernelCommand> for KernelCommandEnvelope {
    fn from(command: &KernelCommand) -> Self {
        Self {
            token: Some(command.token.clone()),
            target_kernel: command.target_kernel.clone(),
            parent: command.parent.clone(),
            properties: command.properties.clone(),
            body: command.body.clone(),
        }
    }
}

/// Serialized form of a [`KernelEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelEventEnvelope {
    /// `eventType` + `event` fields.
    #[serde(flatten)]
    pub body: EventBody,
    /// The command this event was produced for, echoed back for correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<KernelCommandEnvelope>,
}

impl KernelEventEnvelope {
    /// Wrap an event, echoing the originating command envelope.
    pub fn new(event: &KernelEvent, command: Option<&KernelCommand>) -> Self {
        Self {
            body: event.body.clone(),
            command: command.map(KernelCommandEnvelope::from),
        }
    }

    /// Decode one envelope from a JSON line.
    pub fn from_json(line: &str) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_str(line)?)
    }

    /// Encode to a single JSON line (no trailing newline).
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// The token of the command this event belongs to, if it was echoed.
    pub fn command_token(&self) -> Option<&CommandToken> {
        self.command.as_ref().and_then(|c| c.token.as_ref())
    }

    /// Rehydrate the event for a known command token.
    pub fn into_event(self, fallback_token: &CommandToken) -> KernelEvent {
        let token = self
            .command
            .and_then(|c| c.token)
            .unwrap_or_else(|| fallback_token.clone());
        KernelEvent::new(token, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FormattedValue;

    #[test]
    fn command_envelope_round_trips() {
        let command = KernelCommand::submit_code("let x = 1").with_target("fsharp");
        let envelope = KernelCommandEnvelope::from(&command);
        let json = envelope.to_json();
        let back = KernelCommandEnvelope::from_json(&json).unwrap().into_command();
        assert_eq!(back, command);
    }

    #[test]
    fn command_type_tag_is_on_the_wire() {
        let command = KernelCommand::submit_code("1 + 1");
        let json = KernelCommandEnvelope::from(&command).to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["commandType"], "SubmitCode");
        assert_eq!(value["command"]["code"], "1 + 1");
    }

    #[test]
    fn event_envelope_round_trips() {
        let command = KernelCommand::new(CommandBody::RequestValue {
            name: "x".into(),
            mime_type: None,
        });
        let event = KernelEvent::new(
            command.token.clone(),
            EventBody::ValueProduced {
                name: "x".into(),
                formatted_value: FormattedValue::json(&42),
            },
        );
        let envelope = KernelEventEnvelope::new(&event, Some(&command));
        let json = envelope.to_json();
        let back = KernelEventEnvelope::from_json(&json).unwrap();
        assert_eq!(back.command_token(), Some(&command.token));
        assert_eq!(back.into_event(&command.token), event);
    }

    #[test]
    fn missing_token_is_minted_on_receipt() {
        let json = r#"{"commandType":"Quit","command":null}"#;
        let command = KernelCommandEnvelope::from_json(json).unwrap().into_command();
        assert_eq!(command.body, CommandBody::Quit);
        assert!(!command.token.as_str().is_empty());
    }

    #[test]
    fn malformed_line_is_an_error_not_a_panic() {
        assert!(KernelCommandEnvelope::from_json("not json").is_err());
        assert!(KernelEventEnvelope::from_json("{}").is_err());
    }
}
