//! Inbound command surface.
//!
//! Commands arrive as JSON (`{"command": "requestCompletion", "options":
//! {...}}`) from whatever shell hosts the library and answer with JSON.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::CommandError;
use crate::orchestrator::CompletionOrchestrator;
use crate::types::CompletionOptions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum Command {
    RequestCompletion {
        #[serde(default)]
        options: CompletionOptions,
    },
    RequestDiscovery,
    RequestKitchenSink {
        #[serde(default)]
        options: CompletionOptions,
    },
}

impl Command {
    pub fn parse(payload: &str) -> Result<Self, CommandError> {
        let command: Command = serde_json::from_str(payload)?;
        command.validate()?;
        Ok(command)
    }

    /// Reject options no driver could act on.
    pub fn validate(&self) -> Result<(), CommandError> {
        let options = match self {
            Command::RequestCompletion { options } | Command::RequestKitchenSink { options } => {
                options
            }
            Command::RequestDiscovery => return Ok(()),
        };
        for (field, value) in [
            ("score", options.score),
            ("minScore", options.min_score),
            ("maxScore", options.max_score),
        ] {
            if !value.is_finite() {
                return Err(CommandError::InvalidOption {
                    field,
                    reason: format!("{value} is not a finite number"),
                });
            }
        }
        if options.min_score > options.max_score {
            return Err(CommandError::InvalidOption {
                field: "minScore",
                reason: format!(
                    "{} is greater than maxScore {}",
                    options.min_score, options.max_score
                ),
            });
        }
        Ok(())
    }
}

/// Run one command against the session.
pub async fn handle_command(
    orchestrator: &mut CompletionOrchestrator,
    command: Command,
) -> Result<Value, CommandError> {
    command.validate()?;
    let value = match command {
        Command::RequestCompletion { options } => {
            serde_json::to_value(orchestrator.request_completion(&options).await)?
        }
        Command::RequestDiscovery => serde_json::to_value(orchestrator.request_discovery().await)?,
        Command::RequestKitchenSink { options } => {
            serde_json::to_value(orchestrator.request_kitchen_sink(&options).await)?
        }
    };
    Ok(value)
}

/// Parse and run a raw JSON command. Never fails: a bad payload comes back
/// as `{"success": false, "errors": [...]}`.
pub async fn handle_json(orchestrator: &mut CompletionOrchestrator, payload: &str) -> Value {
    let outcome = match Command::parse(payload) {
        Ok(command) => handle_command(orchestrator, command).await,
        Err(e) => Err(e),
    };
    outcome.unwrap_or_else(|e| {
        tracing::warn!("command rejected: {e}");
        json!({ "success": false, "errors": [e.to_string()] })
    })
}
