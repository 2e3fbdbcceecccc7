//! State handlers backed by shell commands.
//!
//! Each command runs through `sh -c` with the state described in its
//! environment:
//!
//! - `PACT_STATE_NAME`: the provider state
//! - `PACT_STATE_ACTION`: `setup` or `teardown`, unset for legacy calls
//! - `PACT_STATE_PARAMS`: the parameters as a JSON object
//!
//! A non-zero exit fails the handler with the command's stderr. A JSON object
//! printed on stdout becomes the handler's result.

use std::process::Stdio;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use pactgate_state::{HandlerError, StateHandler, StateResult};
use pactgate_types::{JsonMap, StateAction};

#[derive(Clone, Debug)]
pub struct CommandStateHandler {
    state: String,
    command: String,
}

impl CommandStateHandler {
    pub fn new(state: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            command: command.into(),
        }
    }
}

impl StateHandler for CommandStateHandler {
    fn call(&self, setup: Option<bool>, params: Option<JsonMap>) -> BoxFuture<'static, StateResult> {
        let handler = self.clone();
        Box::pin(async move { handler.run(setup, params).await })
    }
}

impl CommandStateHandler {
    async fn run(&self, setup: Option<bool>, params: Option<JsonMap>) -> StateResult {
        let params = serde_json::to_string(&params.unwrap_or_default())?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .env("PACT_STATE_NAME", &self.state)
            .env("PACT_STATE_PARAMS", params)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        match setup {
            Some(setup) => {
                let action = if setup {
                    StateAction::Setup
                } else {
                    StateAction::Teardown
                };
                cmd.env("PACT_STATE_ACTION", action.as_str());
            }
            None => {
                cmd.env_remove("PACT_STATE_ACTION");
            }
        }

        debug!(state = %self.state, command = %self.command, "running state command");
        let output = cmd.output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HandlerError::new(format!(
                "`{}` exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            return Ok(None);
        }
        match serde_json::from_str::<Value>(stdout) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            _ => {
                debug!(state = %self.state, "state command output is not a JSON object, ignoring");
                Ok(None)
            }
        }
    }
}
