//! Objects patch update check
//!
//! The manifest maps host build prefixes to `"<label>-<zipfile>"`. When the
//! entry for the running host build names a label other than the installed
//! one, the patch is downloaded and the host restarted.

mod download;

pub use download::HttpPatchInstaller;

use reqwest::Client;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::UpdateConfig;
use crate::error::UpdateError;
use crate::host::{HostUi, PatchInstaller};
use crate::ui::{Dialog, Message};

/// Version of this add-on, compared against the patch's requirement
pub const ADDON_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The installed patch already matches the host build
    Current,
    PatchInstalled,
    PatchUnavailable,
    /// The check itself failed; logged
    Failed,
}

pub struct UpdateChecker {
    config: UpdateConfig,
    client: Client,
    ui: Arc<dyn HostUi>,
    patches: Arc<dyn PatchInstaller>,
}

impl UpdateChecker {
    pub fn new(
        config: UpdateConfig,
        timeout: Duration,
        ui: Arc<dyn HostUi>,
        patches: Arc<dyn PatchInstaller>,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            config,
            client,
            ui,
            patches,
        }
    }

    /// Installed patch label: the last one downloaded, else the configured one
    async fn current_version(&self) -> Option<String> {
        match self.patches.installed().await {
            Some(label) => Some(label),
            None => self.config.objects_version.clone(),
        }
    }

    /// Run the check, logging any failure
    pub async fn run(&self) -> UpdateOutcome {
        info!(
            "--[ check updates/{} ]",
            self.current_version().await.as_deref().unwrap_or("none")
        );

        match self.check().await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Update check failed: {}", e);
                UpdateOutcome::Failed
            }
        }
    }

    pub async fn check(&self) -> Result<UpdateOutcome, UpdateError> {
        let manifest: HashMap<String, String> = self
            .client
            .get(&self.config.manifest_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        self.check_against(&manifest).await
    }

    async fn check_against(
        &self,
        manifest: &HashMap<String, String>,
    ) -> Result<UpdateOutcome, UpdateError> {
        let host_build = self.ui.build_version();
        let entry = find_build(manifest, &host_build)
            .ok_or_else(|| UpdateError::Incompatible(host_build.clone()))?;
        let (label, zipfile) = entry
            .split_once('-')
            .ok_or_else(|| UpdateError::Malformed(entry.to_string()))?;

        if self.current_version().await.as_deref() == Some(label) {
            info!("--[ objects/{} ]", label);
            return Ok(UpdateOutcome::Current);
        }

        let installed = match self.patches.install(zipfile, label).await {
            Ok(installed) => installed,
            Err(e) => {
                warn!("Patch {} download failed: {:#}", label, e);
                false
            }
        };

        if installed {
            info!("Patch {} installed, restarting", label);
            self.ui.show(Dialog::ok(Message::PatchInstalled));
            self.ui.restart_app();
            return Ok(UpdateOutcome::PatchInstalled);
        }

        self.ui.show(Dialog::toast(Message::PatchUnavailable));
        if let Some(required) = &self.config.required_addon_version {
            if compare_version(ADDON_VERSION, required) == Ordering::Less {
                self.ui.show(Dialog::ok(Message::AddonOutdated {
                    required: required.clone(),
                }));
            }
        }

        Ok(UpdateOutcome::PatchUnavailable)
    }
}

/// Entry whose key is the longest prefix of `build`
pub fn find_build<'a>(manifest: &'a HashMap<String, String>, build: &str) -> Option<&'a str> {
    manifest
        .iter()
        .filter(|(prefix, _)| build.starts_with(prefix.as_str()))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, entry)| entry.as_str())
}

/// Compare dotted versions numerically; missing or non-numeric parts count as 0
pub fn compare_version(a: &str, b: &str) -> Ordering {
    let parse = |version: &str| -> Vec<u64> {
        version
            .split('.')
            .map(|part| {
                let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
                digits.parse().unwrap_or(0)
            })
            .collect()
    };
    let (a, b) = (parse(a), parse(b));

    for i in 0..a.len().max(b.len()) {
        let ordering = a.get(i).unwrap_or(&0).cmp(b.get(i).unwrap_or(&0));
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
