//! `azure:storage:StaticWebsite`: the static website feature of a storage account.
//!
//! The storage account itself is managed elsewhere; this resource only
//! toggles its static website service properties through the `az` CLI.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use crate::command::CommandRunner;
use crate::config::StackSettings;
use crate::error::{CheckFailure, ProviderError};
use crate::state::PropertyMap;

use super::azure::{AzCli, host_name, is_valid_account_name};
use super::{
    Capabilities, CheckResult, CreateResult, DiffResult, ProviderResult, ResourceProvider,
    UpdateResult, changed_keys, require_str,
};

/// Resource type name.
pub const STATIC_WEBSITE_TYPE: &str = "azure:storage:StaticWebsite";

/// Built-in container static website files are served from.
pub const WEB_CONTAINER: &str = "$web";

const DEFAULT_INDEX_DOCUMENT: &str = "index.html";
const DEFAULT_ERROR_DOCUMENT: &str = "404.html";
const INPUT_KEYS: &[&str] = &["accountName", "indexDocument", "errorDocument"];

/// Enables static website hosting on a storage account.
pub struct StaticWebsiteProvider {
    az: AzCli,
}

impl StaticWebsiteProvider {
    /// Creates the provider.
    #[must_use]
    pub fn new(settings: &StackSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            az: AzCli::new(&settings.azure, runner),
        }
    }

    async fn enable(&self, inputs: &PropertyMap) -> ProviderResult<PropertyMap> {
        let account = require_str(inputs, "accountName")?;
        let index = require_str(inputs, "indexDocument")?;
        let error = require_str(inputs, "errorDocument")?;

        self.az.ensure_extension().await?;

        let properties: Value = self
            .az
            .json(vec![
                "storage".to_string(),
                "blob".to_string(),
                "service-properties".to_string(),
                "update".to_string(),
                "--account-name".to_string(),
                account.to_string(),
                "--static-website".to_string(),
                "--404-document".to_string(),
                error.to_string(),
                "--index-document".to_string(),
                index.to_string(),
            ])
            .await?;

        if properties.pointer("/staticWebsite/enabled") != Some(&Value::Bool(true)) {
            return Err(ProviderError::failed(format!(
                "Static website update failed for '{account}': {properties}"
            )));
        }

        let endpoint: String = self
            .az
            .json(["storage", "account", "show", "-n", account, "--query", "primaryEndpoints.web"])
            .await?;
        let host = host_name(&endpoint).ok_or_else(|| {
            ProviderError::failed(format!("Cannot determine host name from endpoint '{endpoint}'"))
        })?;

        let mut outputs = input_view(inputs);
        outputs.insert(String::from("endpoint"), json!(endpoint));
        outputs.insert(String::from("hostName"), json!(host));
        outputs.insert(String::from("webContainerName"), json!(WEB_CONTAINER));
        Ok(outputs)
    }
}

#[async_trait]
impl ResourceProvider for StaticWebsiteProvider {
    fn type_name(&self) -> &str {
        STATIC_WEBSITE_TYPE
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
        let mut inputs = news.clone();

        match news.get("accountName") {
            Some(Value::String(name)) if is_valid_account_name(name) => {}
            Some(Value::String(name)) if name.is_empty() => {
                failures.push(CheckFailure::new("accountName", "required property accountName missing"));
            }
            Some(Value::String(name)) => failures.push(CheckFailure::new(
                "accountName",
                format!("'{name}' is not a valid storage account name (3-24 lowercase letters and digits)"),
            )),
            Some(_) => failures.push(CheckFailure::new("accountName", "must be a string")),
            None => failures.push(CheckFailure::new("accountName", "required property accountName missing")),
        }

        for (key, default) in [
            ("indexDocument", DEFAULT_INDEX_DOCUMENT),
            ("errorDocument", DEFAULT_ERROR_DOCUMENT),
        ] {
            match news.get(key) {
                None | Some(Value::Null) => {
                    inputs.insert(key.to_string(), json!(default));
                }
                Some(Value::String(doc)) if !doc.is_empty() && !doc.contains('/') => {}
                Some(_) => failures.push(CheckFailure::new(key, "must be a file name")),
            }
        }

        for key in news.keys() {
            if !INPUT_KEYS.contains(&key.as_str()) {
                failures.push(CheckFailure::new(key.as_str(), "unknown property"));
            }
        }

        Ok(CheckResult { inputs, failures })
    }

    async fn diff(&self, _id: &str, olds: &PropertyMap, news: &PropertyMap) -> ProviderResult<DiffResult> {
        let changed = changed_keys(&input_view(olds), news);
        Ok(DiffResult::from_changes(changed, &["accountName"]))
    }

    async fn create(&self, inputs: &PropertyMap) -> ProviderResult<CreateResult> {
        let account = require_str(inputs, "accountName")?;
        info!("Enabling static website on storage account {account}");

        let outputs = self.enable(inputs).await?;
        Ok(CreateResult {
            id: format!("{account}StaticWebsite"),
            outputs,
        })
    }

    async fn update(&self, id: &str, _olds: &PropertyMap, news: &PropertyMap) -> ProviderResult<UpdateResult> {
        info!("Updating static website documents for {id}");
        let outputs = self.enable(news).await?;
        Ok(UpdateResult { outputs })
    }

    async fn delete(&self, id: &str, olds: &PropertyMap) -> ProviderResult<()> {
        let account = require_str(olds, "accountName")?;
        info!("Disabling static website for {id}");

        self.az.ensure_extension().await?;
        self.az
            .run([
                "storage",
                "blob",
                "service-properties",
                "update",
                "--account-name",
                account,
                "--static-website",
                "false",
            ])
            .await?;
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
