//! Release feed polling and download
//!
//! The checker asks the repository's latest release for an asset built for
//! this platform. A hit whose version differs from the running one is
//! downloaded next to the executable and reported to the run loop, which
//! decides whether to hand over to it.

use std::path::PathBuf;

use anyhow::{bail, Context};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::settings::UpdateSettings;

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,
    browser_download_url: String,
}

/// A newer release with an asset for this platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub version: String,
    pub asset_name: String,
    pub download_url: String,
}

/// A release that has been written to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedUpdate {
    pub release: ReleaseInfo,
    pub path: PathBuf,
}

pub struct UpdateChecker {
    client: reqwest::Client,
    settings: UpdateSettings,
}

impl UpdateChecker {
    pub fn new(settings: UpdateSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .user_agent(format!("tunnel-agent/{}", settings.current_version))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &UpdateSettings {
        &self.settings
    }

    pub fn release_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/releases/latest",
            self.settings.api_base.trim_end_matches('/'),
            self.settings.owner,
            self.settings.repo
        )
    }

    pub fn asset_name(&self, version: &str) -> String {
        format!(
            "{}-v{}{}",
            self.settings.asset_prefix,
            version,
            std::env::consts::EXE_SUFFIX
        )
    }

    /// Query the feed. `None` means up to date or no asset for us.
    pub async fn check(&self) -> anyhow::Result<Option<ReleaseInfo>> {
        let url = self.release_url();
        debug!("Checking for updates at {}", url);

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("Update feed returned {}", status);
        }

        let release: Release = response
            .json()
            .await
            .context("Failed to parse release description")?;

        let version = release.tag_name.trim().trim_start_matches('v').to_string();
        let asset_name = self.asset_name(&version);
        let Some(asset) = release.assets.into_iter().find(|a| a.name == asset_name) else {
            debug!("Release {} has no asset named {}", version, asset_name);
            return Ok(None);
        };

        if version == self.settings.current_version {
            debug!("Already on the latest version {}", version);
            return Ok(None);
        }

        Ok(Some(ReleaseInfo {
            version,
            asset_name,
            download_url: asset.browser_download_url,
        }))
    }

    /// Fetch the asset into the download directory and return its path
    pub async fn download(&self, release: &ReleaseInfo) -> anyhow::Result<PathBuf> {
        let dir = &self.settings.download_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let target = dir.join(&release.asset_name);
        let partial = dir.join(format!("{}.part", release.asset_name));

        let mut response = self
            .client
            .get(&release.download_url)
            .send()
            .await
            .with_context(|| format!("Failed to download {}", release.download_url))?
            .error_for_status()?;

        let mut file = tokio::fs::File::create(&partial)
            .await
            .with_context(|| format!("Failed to create {}", partial.display()))?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&partial, std::fs::Permissions::from_mode(0o755)).await?;
        }

        tokio::fs::rename(&partial, &target)
            .await
            .with_context(|| format!("Failed to move update into {}", target.display()))?;

        info!(version = %release.version, "Downloaded new version to {}", target.display());
        Ok(target)
    }

    /// One full cycle: query, then download when something newer exists
    pub async fn check_and_download(&self) -> anyhow::Result<Option<DownloadedUpdate>> {
        let Some(release) = self.check().await? else {
            return Ok(None);
        };
        info!("New version {} available. Downloading...", release.version);
        let path = self.download(&release).await?;
        Ok(Some(DownloadedUpdate { release, path }))
    }

    /// Check at start-up and then every interval until `token` is cancelled.
    ///
    /// Failures are logged and retried on the next tick. The task ends
    /// after delivering an update or when the receiver goes away.
    pub fn spawn_periodic(
        self,
        token: CancellationToken,
        tx: mpsc::Sender<DownloadedUpdate>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.settings.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let result = tokio::select! {
                    _ = token.cancelled() => break,
                    result = self.check_and_download() => result,
                };

                match result {
                    Ok(Some(update)) => {
                        let _ = tx.send(update).await;
                        break;
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Update check error: {:#}", e),
                }
            }
            debug!("Update checker stopped");
        })
    }
}
