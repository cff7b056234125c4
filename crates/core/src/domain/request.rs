// Job Request & Spec Snapshot

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::error::{DomainError, Result};
use crate::domain::job::JobId;

/// Maximum length of a job name / owner (bytes)
pub const MAX_NAME_LEN: usize = 255;

/// Command template as declared by a job spec (before argument resolution)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub application: String,
    #[serde(default)]
    pub arguments: Vec<String>,
}

/// Job specification snapshot
///
/// Stored alongside each job so later lookups are unaffected by upstream
/// edits to the spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub expected_inputs: serde_json::Value,
    pub command: CommandTemplate,
}

/// Fully resolved command line, ready to spawn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// A request that passed upstream validation and argument resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidJobRequest {
    owner: String,
    name: String,
    spec: JobSpec,
    #[serde(default)]
    inputs: serde_json::Value,
    command: CommandLine,
}

impl ValidJobRequest {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        spec: JobSpec,
        inputs: serde_json::Value,
        command: CommandLine,
    ) -> Result<Self> {
        let req = Self {
            owner: owner.into(),
            name: name.into(),
            spec,
            inputs,
            command,
        };
        validate_request(&req)?;
        Ok(req)
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub fn inputs(&self) -> &serde_json::Value {
        &self.inputs
    }

    pub fn command(&self) -> &CommandLine {
        &self.command
    }
}

/// Validate request fields that the store and spawner rely on
pub(crate) fn validate_request(req: &ValidJobRequest) -> Result<()> {
    validate_label("owner", &req.owner)?;
    validate_label("name", &req.name)?;

    let program = &req.command.program;
    if program.trim().is_empty() {
        return Err(DomainError::ValidationError(
            "command program cannot be empty".to_string(),
        ));
    }
    if program.contains('\0') || req.command.args.iter().any(|a| a.contains('\0')) {
        return Err(DomainError::ValidationError(
            "command line cannot contain NUL bytes".to_string(),
        ));
    }

    for key in req.command.env.keys() {
        if key.is_empty() || key.contains('=') || key.contains('\0') {
            return Err(DomainError::ValidationError(format!(
                "invalid environment variable name '{}'",
                key
            )));
        }
    }

    Ok(())
}

fn validate_label(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(DomainError::ValidationError(format!(
            "{} cannot be empty",
            field
        )));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(DomainError::ValidationError(format!(
            "{} too long (max {} bytes)",
            field, MAX_NAME_LEN
        )));
    }
    Ok(())
}

/// A request after it was written to the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedJobRequest {
    pub id: JobId,
    pub persisted_at: i64, // epoch ms
    pub request: ValidJobRequest,
}

impl PersistedJobRequest {
    pub fn new(id: JobId, persisted_at: i64, request: ValidJobRequest) -> Self {
        Self {
            id,
            persisted_at,
            request,
        }
    }

    pub fn spec(&self) -> &JobSpec {
        self.request.spec()
    }

    pub fn command(&self) -> &CommandLine {
        self.request.command()
    }
}
