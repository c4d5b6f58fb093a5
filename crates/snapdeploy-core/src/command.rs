//! Command routing for embedders.
//!
//! Host shells talk to the deploy facade through named actions carrying a
//! positional argument array, with the app id always first. Every reply is
//! a JSON value; booleans travel as the strings `"true"` and `"false"`.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::DeployError;
use crate::facade::DeployFacade;

/// Actions understood by [`CommandProxy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Initialize,
    Check,
    Download,
    Extract,
    Info,
    GetVersions,
    DeleteVersion,
    GetMetadata,
    ParseUpdate,
    Ignore,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Initialize => "initialize",
            Action::Check => "check",
            Action::Download => "download",
            Action::Extract => "extract",
            Action::Info => "info",
            Action::GetVersions => "getVersions",
            Action::DeleteVersion => "deleteVersion",
            Action::GetMetadata => "getMetadata",
            Action::ParseUpdate => "parseUpdate",
            Action::Ignore => "ignore",
        }
    }

    /// Number of positional arguments, app id included.
    fn arity(&self) -> usize {
        match self {
            Action::Download | Action::Extract | Action::Info | Action::GetVersions => 1,
            _ => 2,
        }
    }
}

impl FromStr for Action {
    type Err = CommandFailure;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let action = match s {
            "initialize" => Action::Initialize,
            "check" => Action::Check,
            "download" => Action::Download,
            "extract" => Action::Extract,
            "info" => Action::Info,
            "getVersions" => Action::GetVersions,
            "deleteVersion" => Action::DeleteVersion,
            "getMetadata" => Action::GetMetadata,
            "parseUpdate" => Action::ParseUpdate,
            "ignore" => Action::Ignore,
            other => return Err(CommandFailure::invalid_action(other)),
        };
        Ok(action)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure reported back to the embedder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandFailure {
    pub code: String,
    pub message: String,
}

impl CommandFailure {
    pub const INVALID_ACTION: &'static str = "INVALID_ACTION";

    fn invalid_action(action: &str) -> Self {
        Self {
            code: Self::INVALID_ACTION.to_string(),
            message: format!("unknown action: {}", action),
        }
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CommandFailure {}

impl From<DeployError> for CommandFailure {
    fn from(e: DeployError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

fn flag(value: bool) -> Value {
    Value::String(value.to_string())
}

/// Routes named actions onto a [`DeployFacade`].
pub struct CommandProxy {
    facade: DeployFacade,
}

impl CommandProxy {
    pub fn new(facade: DeployFacade) -> Self {
        Self { facade }
    }

    pub fn facade(&self) -> &DeployFacade {
        &self.facade
    }

    /// Run `action` with its positional arguments.
    pub async fn dispatch(&self, action: &str, input: &[String]) -> Result<Value, CommandFailure> {
        let action = Action::from_str(action)?;
        if input.len() < action.arity() || input[0].is_empty() {
            warn!("Rejecting {}: expected {} arguments", action, action.arity());
            return Err(DeployError::InvalidArgument(format!(
                "{} expects {} arguments",
                action,
                action.arity()
            ))
            .into());
        }
        debug!("Dispatching {}", action);

        let app_id = input[0].as_str();
        if action == Action::Initialize {
            self.facade.initialize(app_id, &input[1]).await?;
            return Ok(Value::Null);
        }
        self.facade.set_app(app_id).await?;

        let reply = match action {
            Action::Initialize => Value::Null,
            Action::Check => flag(self.facade.check(&input[1]).await?),
            Action::Download => flag(self.facade.download().await?),
            Action::Extract => Value::String(self.facade.extract().await?.to_string()),
            Action::Info => serde_json::to_value(self.facade.info().await?)
                .map_err(DeployError::from)?,
            Action::GetVersions => json!(self.facade.list_versions().await?),
            Action::DeleteVersion => flag(self.facade.delete_version(&input[1]).await?),
            Action::GetMetadata => json!({ "metadata": self.facade.metadata(&input[1]).await? }),
            Action::ParseUpdate => flag(self.facade.parse_update(&input[1]).await?),
            Action::Ignore => {
                self.facade.ignore(&input[1]).await?;
                Value::Null
            }
        };
        Ok(reply)
    }
}
