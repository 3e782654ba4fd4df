//! `command:Command`: lifecycle steps written as shell commands.
//!
//! ```yaml
//! - type: command:Command
//!   name: seed
//!   inputs:
//!     create: ./seed.sh
//!     update: ./seed.sh --refresh
//!     delete: ./unseed.sh
//!     triggers: [v2]
//!     environment: { TARGET: staging }
//!     dir: ./scripts
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::command::{CommandLine, CommandRunner, ExecOptions};
use crate::config::StackSettings;
use crate::error::{CheckFailure, ProviderError};
use crate::state::PropertyMap;

use super::{
    Capabilities, CheckResult, CreateResult, DiffResult, ProviderResult, ResourceProvider,
    UpdateResult, changed_keys, optional_str, require_str,
};

/// Resource type name.
pub const COMMAND_TYPE: &str = "command:Command";

const INPUT_KEYS: &[&str] = &["create", "update", "delete", "triggers", "environment", "dir"];
const REPLACE_KEYS: &[&str] = &["create", "triggers", "dir"];

/// Runs user-declared shell commands.
pub struct CommandProvider {
    runner: Arc<dyn CommandRunner>,
    settings: StackSettings,
}

impl CommandProvider {
    /// Creates the provider.
    #[must_use]
    pub fn new(settings: &StackSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            settings: settings.clone(),
        }
    }

    fn command_line(&self, script: &str, inputs: &PropertyMap, id: Option<&str>) -> CommandLine {
        let mut command = CommandLine::shell(script)
            .env("PROVISIO_PROJECT", &self.settings.project)
            .env("PROVISIO_STACK", &self.settings.stack);

        for (key, value) in &self.settings.default_tags {
            command = command.env(format!("PROVISIO_TAG_{}", env_key(key)), value);
        }

        if let Some(Value::Object(environment)) = inputs.get("environment") {
            for (key, value) in environment {
                if let Some(value) = value.as_str() {
                    command = command.env(key, value);
                }
            }
        }

        if let Some(id) = id {
            command = command.env("PROVISIO_RESOURCE_ID", id);
        }

        if let Some(dir) = optional_str(inputs, "dir") {
            command = command.current_dir(self.settings.resolve_path(dir));
        }

        command
    }

    async fn run(&self, script: &str, inputs: &PropertyMap, id: Option<&str>) -> ProviderResult<PropertyMap> {
        let command = self.command_line(script, inputs, id);
        let result = self.runner.execute(&command, ExecOptions::default()).await?;

        let mut outputs = input_view(inputs);
        let stdout = result.stdout.trim().to_string();
        if let Ok(Value::Object(json)) = serde_json::from_str::<Value>(&stdout) {
            outputs.insert(String::from("json"), Value::Object(json));
        }
        outputs.insert(String::from("stdout"), Value::String(stdout));
        Ok(outputs)
    }
}

#[async_trait]
impl ResourceProvider for CommandProvider {
    fn type_name(&self) -> &str {
        COMMAND_TYPE
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            diff: true,
            update: true,
            delete: true,
        }
    }

    async fn check(&self, _olds: Option<&PropertyMap>, news: &PropertyMap) -> ProviderResult<CheckResult> {
        let mut failures = Vec::new();

        match news.get("create") {
            Some(Value::String(s)) if !s.trim().is_empty() => {}
            Some(Value::String(_)) => failures.push(CheckFailure::new("create", "must not be empty")),
            Some(_) => failures.push(CheckFailure::new("create", "must be a string")),
            None => failures.push(CheckFailure::new("create", "required")),
        }

        for key in ["update", "delete", "dir"] {
            if news.get(key).is_some_and(|v| !v.is_string()) {
                failures.push(CheckFailure::new(key, "must be a string"));
            }
        }

        match news.get("environment") {
            None => {}
            Some(Value::Object(map)) => {
                for (key, value) in map {
                    if !value.is_string() {
                        failures.push(CheckFailure::new(
                            format!("environment.{key}"),
                            "must be a string",
                        ));
                    }
                }
            }
            Some(_) => failures.push(CheckFailure::new("environment", "must be a map of strings")),
        }

        if let Some(dir) = optional_str(news, "dir") {
            if !self.settings.resolve_path(dir).is_dir() {
                failures.push(CheckFailure::new("dir", format!("'{dir}' is not a directory")));
            }
        }

        for key in news.keys() {
            if !INPUT_KEYS.contains(&key.as_str()) {
                failures.push(CheckFailure::new(key.as_str(), "unknown property"));
            }
        }

        Ok(CheckResult {
            inputs: news.clone(),
            failures,
        })
    }

    async fn diff(&self, _id: &str, olds: &PropertyMap, news: &PropertyMap) -> ProviderResult<DiffResult> {
        let changed = changed_keys(&input_view(olds), news);

        if news.contains_key("update") {
            Ok(DiffResult::from_changes(changed, REPLACE_KEYS))
        } else {
            Ok(DiffResult {
                changes: !changed.is_empty(),
                replaces: changed.clone(),
                changed,
            })
        }
    }

    async fn create(&self, inputs: &PropertyMap) -> ProviderResult<CreateResult> {
        let script = require_str(inputs, "create")?;
        let id = Uuid::new_v4().to_string();
        info!("Running create command for {id}");

        let outputs = self.run(script, inputs, Some(&id)).await?;
        Ok(CreateResult { id, outputs })
    }

    async fn update(&self, id: &str, _olds: &PropertyMap, news: &PropertyMap) -> ProviderResult<UpdateResult> {
        let script = optional_str(news, "update")
            .ok_or_else(|| ProviderError::invalid_input("update", "no update command declared"))?;
        info!("Running update command for {id}");

        let outputs = self.run(script, news, Some(id)).await?;
        Ok(UpdateResult { outputs })
    }

    async fn delete(&self, id: &str, olds: &PropertyMap) -> ProviderResult<()> {
        let Some(script) = optional_str(olds, "delete") else {
            debug!("No delete command declared for {id}");
            return Ok(());
        };
        info!("Running delete command for {id}");

        self.run(script, olds, Some(id)).await?;
        Ok(())
    }
}

fn input_view(properties: &PropertyMap) -> PropertyMap {
    properties
        .iter()
        .filter(|(key, _)| INPUT_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn env_key(tag: &str) -> String {
    tag.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}
