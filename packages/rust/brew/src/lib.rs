//! Brew (Koji hub) client: build metadata, changelog, bug IDs, and artifact URLs.
//!
//! Every accessor issues fresh remote calls; nothing is cached between calls.
//! Hub method names and positional argument order are fixed by the hub API:
//!
//! | Accessor | Hub call |
//! |---|---|
//! | [`BrewClient::build`] | `getBuild(name)` |
//! | [`BrewClient::tags`] | `listTags(name)` |
//! | [`BrewClient::changelog`] | `getChangelogEntries(name, "", "", "", "", since)` |
//! | [`BrewClient::download_urls`] | `getTaskChildren(task_id)`, `getTaskResult("<sub_task_id>")` |

mod records;
pub mod select;
pub mod xmlrpc;

use std::collections::BTreeSet;

use kbot_shared::{BrewConfig, BugId, Build, ChangelogEntry, KbotError, Result};
use tracing::{debug, info, instrument, warn};
use url::Url;

pub use records::parse_timestamp;
pub use select::{
    changelog_since, extract_bug_ids, last_matching_artifact, match_artifacts, name_variants,
    select_changelog, select_sub_task,
};
pub use xmlrpc::{RpcClient, Value};

/// Work with the build hub on behalf of a single build.
#[derive(Debug, Clone)]
pub struct BrewClient {
    name: String,
    rpc: RpcClient,
    config: BrewConfig,
}

impl BrewClient {
    /// Create a client for build `name` (e.g. `kernel-3.10.0-825.el7`) on hub `api`.
    pub fn new(name: impl Into<String>, api: Url, config: BrewConfig) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            rpc: RpcClient::new(api)?,
            config,
        })
    }

    /// The build name this client works on.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch build metadata.
    #[instrument(skip_all, fields(build = %self.name))]
    pub async fn build(&self) -> Result<Build> {
        let raw = self.rpc.call("getBuild", &[self.name.as_str().into()]).await?;
        records::build_from_value(&self.name, &raw)
    }

    /// Fetch the names of all tags applied to the build.
    #[instrument(skip_all, fields(build = %self.name))]
    pub async fn tags(&self) -> Result<BTreeSet<String>> {
        let raw = self.rpc.call("listTags", &[self.name.as_str().into()]).await?;
        let tags = records::tag_names(&raw)?;
        debug!(?tags, "raw tags fetched from hub");
        Ok(tags.into_iter().collect())
    }

    /// Fetch the changelog entry belonging to this build, if any.
    #[instrument(skip_all, fields(build = %self.name))]
    pub async fn changelog(&self) -> Result<Option<ChangelogEntry>> {
        let build = self.build().await?;
        let since = changelog_since(build.start_time);
        let since_str = since.format(select::SINCE_FORMAT).to_string();
        debug!(
            start_time = %build.start_time,
            since = %since_str,
            "fetching changelog entries"
        );

        let raw = self
            .rpc
            .call(
                "getChangelogEntries",
                &[
                    self.name.as_str().into(),
                    "".into(),
                    "".into(),
                    "".into(),
                    "".into(),
                    since_str.into(),
                ],
            )
            .await?;
        let entries = records::changelog_entries(&raw)?;
        debug!(count = entries.len(), "raw changelog entries");

        let found = select_changelog(&entries, &build.version, since).cloned();
        if found.is_none() {
            warn!(version = %build.version, "no changelog entry mentions the build version");
        }
        Ok(found)
    }

    /// Bug IDs referenced by this build's changelog entry.
    #[instrument(skip_all, fields(build = %self.name))]
    pub async fn bugs(&self) -> Result<BTreeSet<BugId>> {
        let entry = self
            .changelog()
            .await?
            .ok_or_else(|| KbotError::NoChangelogEntry {
                name: self.name.clone(),
            })?;
        debug!(text = %entry.text, "raw bug list");

        let bugs = extract_bug_ids(&entry.text);
        debug!(?bugs, "bug IDs in current build");
        Ok(bugs)
    }

    /// Download URLs for the build's artifacts produced by `task_id`.
    ///
    /// Matches the build name and its `kernel-core`/`kernel-modules` variants
    /// in the result of the configured architecture's sub-task.
    #[instrument(skip(self), fields(build = %self.name))]
    pub async fn download_urls(&self, task_id: i64) -> Result<Vec<String>> {
        let rpms = self.task_rpms(task_id).await?;

        let urls: Vec<String> = match_artifacts(&self.name, &rpms, &self.config.arch)
            .into_iter()
            .map(|rpm| format!("{}{rpm}", self.config.url_prefix))
            .collect();

        if urls.is_empty() {
            warn!(task_id, "no artifacts match the build name");
        } else {
            info!(?urls, "found RPMs");
        }
        Ok(urls)
    }

    /// Single download URL: the last artifact containing the exact build name.
    #[deprecated(note = "misses kernel-core/kernel-modules splits; use `download_urls`")]
    #[instrument(skip(self), fields(build = %self.name))]
    pub async fn download_url(&self, task_id: i64) -> Result<String> {
        let rpms = self.task_rpms(task_id).await?;

        let rpm = last_matching_artifact(&self.name, &rpms).ok_or_else(|| {
            KbotError::NoMatchingArtifact {
                name: self.name.clone(),
                task_id,
            }
        })?;
        info!(rpm, "found RPM");
        Ok(format!("{}{rpm}", self.config.url_prefix))
    }

    /// Result RPMs of the configured architecture's sub-task.
    async fn task_rpms(&self, task_id: i64) -> Result<Vec<String>> {
        let raw = self.rpc.call("getTaskChildren", &[task_id.into()]).await?;
        let sub_tasks = records::sub_tasks(&raw)?;
        debug!(?sub_tasks, "sub tasks");

        let sub_task = select_sub_task(task_id, &sub_tasks, &self.config.arch)?;
        info!(sub_task_id = sub_task.id, "found sub task");

        let raw = self
            .rpc
            .call("getTaskResult", &[sub_task.id.to_string().into()])
            .await?;
        let rpms = records::task_rpms(&raw)?;
        debug!(?rpms, "all build RPMs");
        Ok(rpms)
    }
}
