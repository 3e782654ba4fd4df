//! `azure:storage:WebsiteContent`: a local site directory uploaded to blob storage.
//!
//! `check` validates the directory and folds a hash of its content into the
//! inputs, so editing a file shows up as an ordinary input change.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::command::CommandRunner;
use crate::config::{ConfigHasher, StackSettings};
use crate::error::{CheckFailure, ProviderError};
use crate::state::PropertyMap;

use super::azure::{AzCli, is_valid_account_name};
use super::static_website::WEB_CONTAINER;
use super::{
    Capabilities, CheckResult, CreateResult, DiffResult, ProviderResult, ResourceProvider,
    UpdateResult, changed_keys, optional_str, require_str,
};

/// Resource type name.
pub const WEBSITE_CONTENT_TYPE: &str = "azure:storage:WebsiteContent";

/// Files every site must contain at its root.
const REQUIRED_FILES: &[&str] = &["index.html", "404.html"];

/// Allowed extensions and the content type each is uploaded with.
const CONTENT_TYPES: &[(&str, &str)] = &[
    ("css", "text/css"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("js", "application/javascript"),
    ("json", "application/json"),
    ("pdf", "application/pdf"),
    ("txt", "text/plain"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
];

const INPUT_KEYS: &[&str] = &["accountName", "containerName", "source", "contentHash"];

/// Uploads a validated site directory.
pub struct WebsiteContentProvider {
    az: AzCli,
    settings: StackSettings,
}

/// A file found in the site directory.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SiteFile {
    /// Blob name, `/`-separated and relative to the site root.
    name: String,
    /// Path on disk.
    path: PathBuf,
}

impl WebsiteContentProvider {
    /// Creates the provider.
    #[must_use]
    pub fn new(settings: &StackSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            az: AzCli::new(&settings.azure, runner),
            settings: settings.clone(),
        }
    }

    async fn site_files(&self, inputs: &PropertyMap) -> ProviderResult<Vec<SiteFile>> {
        let source = require_str(inputs, "source")?;
        let root = self.settings.resolve_path(source);
        let scanned = {
            let root = root.clone();
            blocking(move || scan_site(&root)).await?
        };
        scanned.map_err(|e| ProviderError::invalid_input("source", format!("cannot read {}: {e}", root.display())))
    }

    async fn upload(&self, inputs: &PropertyMap) -> ProviderResult<PropertyMap> {
        let account = require_str(inputs, "accountName")?;
        let container = require_str(inputs, "containerName")?;
        let files = self.site_files(inputs).await?;

        for file in &files {
            let content_type = content_type(&file.name)
                .ok_or_else(|| ProviderError::invalid_input("source", format!("unsupported file '{}'", file.name)))?;
            debug!("Uploading {} as {content_type}", file.name);

            self.az
                .run(vec![
                    "storage".to_string(),
                    "blob".to_string(),
                    "upload".to_string(),
                    "--account-name".to_string(),
                    account.to_string(),
                    "--container-name".to_string(),
                    container.to_string(),
                    "--name".to_string(),
                    file.name.clone(),
                    "--file".to_string(),
                    file.path.display().to_string(),
                    "--content-type".to_string(),
                    content_type.to_string(),
                    "--overwrite".to_string(),
                ])
                .await?;
        }

        let mut outputs: PropertyMap = inputs
            .iter()
            .filter(|(key, _)| INPUT_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        outputs.insert(
            String::from("files"),
            json!(files.iter().map(|f| f.name.as_str()).collect::<Vec<_>>()),
        );
        Ok(outputs)
    }

    async fn delete_blobs(&self, account: &str, container: &str, names: &[String]) -> ProviderResult<()> {
        for name in names {
            debug!("Deleting blob {name}");
            self.az
                .run([
                    "storage",
                    "blob",
                    "delete",
                    "--account-name",
                    account,
                    "--container-name",
                    container,
                    "--name",
                    name.as_str(),
                ])
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceProvider for WebsiteContentProvider {
    fn type_name(&self) -> &str {
        WEBSITE_CONTENT_TYPE
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
        inputs.remove("contentHash");

        match news.get("accountName") {
            Some(Value::String(name)) if is_valid_account_name(name) => {}
            Some(_) => failures.push(CheckFailure::new("accountName", "not a valid storage account name")),
            None => failures.push(CheckFailure::new("accountName", "required property accountName missing")),
        }

        match news.get("containerName") {
            None | Some(Value::Null) => {
                inputs.insert(String::from("containerName"), json!(WEB_CONTAINER));
            }
            Some(Value::String(name)) if !name.is_empty() => {}
            Some(_) => failures.push(CheckFailure::new("containerName", "must be a non-empty string")),
        }

        let Some(source) = optional_str(news, "source") else {
            failures.push(CheckFailure::new("source", "required property source missing"));
            return Ok(CheckResult { inputs, failures });
        };

        let root = self.settings.resolve_path(source);
        let scanned = {
            let root = root.clone();
            blocking(move || scan_site(&root)).await?
        };
        let files = match scanned {
            Ok(files) => files,
            Err(e) => {
                failures.push(CheckFailure::new(
                    "source",
                    format!("cannot read directory {}: {e}", root.display()),
                ));
                return Ok(CheckResult { inputs, failures });
            }
        };

        let names: BTreeSet<&str> = files.iter().map(|f| f.name.as_str()).collect();
        for required in REQUIRED_FILES {
            if !names.contains(required) {
                failures.push(CheckFailure::new(
                    "source",
                    format!("required file: {required} missing from {source}"),
                ));
            }
        }

        let invalid: Vec<&str> = files
            .iter()
            .filter(|f| content_type(&f.name).is_none())
            .map(|f| f.name.as_str())
            .collect();
        if !invalid.is_empty() {
            failures.push(CheckFailure::new(
                "source",
                format!(
                    "the following {} files in {source} have an unsupported file extension: {}",
                    invalid.len(),
                    invalid.join(", ")
                ),
            ));
        }

        if failures.is_empty() {
            let hash = blocking(move || content_hash(&files)).await?.map_err(|e| {
                ProviderError::failed(format!("Failed to read site content under {}: {e}", root.display()))
            })?;
            inputs.insert(String::from("contentHash"), json!(hash));
        }

        Ok(CheckResult { inputs, failures })
    }

    async fn diff(&self, _id: &str, olds: &PropertyMap, news: &PropertyMap) -> ProviderResult<DiffResult> {
        let prior: PropertyMap = olds
            .iter()
            .filter(|(key, _)| INPUT_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let changed = changed_keys(&prior, news);
        Ok(DiffResult::from_changes(changed, &["accountName", "containerName"]))
    }

    async fn create(&self, inputs: &PropertyMap) -> ProviderResult<CreateResult> {
        let account = require_str(inputs, "accountName")?;
        let container = require_str(inputs, "containerName")?;
        info!("Uploading site content to {account}/{container}");

        let outputs = self.upload(inputs).await?;
        Ok(CreateResult {
            id: format!("{account}/{container}"),
            outputs,
        })
    }

    async fn update(&self, id: &str, olds: &PropertyMap, news: &PropertyMap) -> ProviderResult<UpdateResult> {
        info!("Refreshing site content for {id}");
        let outputs = self.upload(news).await?;

        let uploaded: BTreeSet<String> = file_list(&outputs).into_iter().collect();
        let stale: Vec<String> = file_list(olds)
            .into_iter()
            .filter(|name| !uploaded.contains(name))
            .collect();

        if !stale.is_empty() {
            let account = require_str(news, "accountName")?;
            let container = require_str(news, "containerName")?;
            info!("Removing {} stale files from {account}/{container}", stale.len());
            self.delete_blobs(account, container, &stale).await?;
        }

        Ok(UpdateResult { outputs })
    }

    async fn delete(&self, id: &str, olds: &PropertyMap) -> ProviderResult<()> {
        let account = require_str(olds, "accountName")?;
        let container = require_str(olds, "containerName")?;
        let files = file_list(olds);
        info!("Deleting {} files for {id}", files.len());

        self.delete_blobs(account, container, &files).await
    }
}

/// Returns the content type for an allowed file name.
fn content_type(name: &str) -> Option<&'static str> {
    let (_, ext) = name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    CONTENT_TYPES
        .iter()
        .find(|(allowed, _)| *allowed == ext)
        .map(|(_, content_type)| *content_type)
}

/// Runs blocking filesystem work off the async workers.
async fn blocking<T, F>(work: F) -> ProviderResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ProviderError::failed(format!("site scan aborted: {e}")))
}

/// Lists every file under `root`, following symlinks, sorted by blob name.
fn scan_site(root: &Path) -> Result<Vec<SiteFile>, walkdir::Error> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(true).min_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.into_path();
        let relative = path.strip_prefix(root).unwrap_or(&path);
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push(SiteFile { name, path });
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

fn content_hash(files: &[SiteFile]) -> std::io::Result<String> {
    ConfigHasher::new().hash_files(files.iter().map(|f| (f.name.as_str(), f.path.as_path())))
}

fn file_list(properties: &PropertyMap) -> Vec<String> {
    properties
        .get("files")
        .and_then(Value::as_array)
        .map(|files| {
            files
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}
