//! Step: locate or download the UTM guest tools ISO.
//!
//! Resolution order:
//! 1. `guest_additions.url`, with `{{ .Version }}` replaced by the guest tools
//!    version matching the installed UTM;
//! 2. the ISO UTM itself downloaded (4.6 and later), used unverified;
//! 3. the upstream `latest` ISO.
//!
//! Remote ISOs are cached by checksum, so a second build reuses the file.

use crate::config::{
    DEFAULT_GUEST_ADDITIONS_SHA256, DEFAULT_GUEST_ADDITIONS_URL, GuestAdditionsConfig,
    GuestAdditionsMode,
};
use crate::context::BuildContext;
use crate::driver::lookup;
use crate::pipeline::{BuildStep, StepAction};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use utmbuild_shared::errors::{BuildError, BuildResult};

const VERSION_PLACEHOLDERS: &[&str] = &["{{ .Version }}", "{{.Version}}"];

/// Where the ISO comes from, with the checksum it must match (if any).
#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    Remote { url: String, sha256: String },
    Local { path: PathBuf, sha256: Option<String> },
}

pub struct DownloadGuestAdditionsStep {
    config: GuestAdditionsConfig,
    cache_dir: Option<PathBuf>,
}

impl DownloadGuestAdditionsStep {
    pub fn new(config: GuestAdditionsConfig, cache_dir: Option<PathBuf>) -> Self {
        Self { config, cache_dir }
    }

    fn checksum(&self) -> String {
        if self.config.sha256.is_empty() {
            DEFAULT_GUEST_ADDITIONS_SHA256.to_string()
        } else {
            self.config.sha256.to_lowercase()
        }
    }

    fn resolve(&self, ctx: &BuildContext, additions_version: &str) -> Source {
        if !self.config.url.is_empty() {
            let url = render_url(&self.config.url, additions_version);
            let sha256 = self.checksum();
            return if url.starts_with("http://") || url.starts_with("https://") {
                Source::Remote { url, sha256 }
            } else {
                let path = url.strip_prefix("file://").unwrap_or(&url);
                Source::Local {
                    path: PathBuf::from(path),
                    sha256: Some(sha256),
                }
            };
        }

        match ctx.driver.guest_tools_iso_path() {
            Ok(path) => Source::Local { path, sha256: None },
            Err(e) => {
                ctx.ui.message(&e.to_string());
                Source::Remote {
                    url: DEFAULT_GUEST_ADDITIONS_URL.to_string(),
                    sha256: self.checksum(),
                }
            }
        }
    }

    fn cache_path(&self, sha256: &str) -> BuildResult<PathBuf> {
        let root = match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => dirs::cache_dir()
                .ok_or_else(|| BuildError::Environment("cannot determine cache directory".into()))?
                .join("utmbuild"),
        };
        Ok(root.join("guest-additions").join(format!("{}.iso", sha256)))
    }
}

/// Substitute the guest tools version into a URL template.
fn render_url(template: &str, version: &str) -> String {
    VERSION_PLACEHOLDERS
        .iter()
        .fold(template.to_string(), |url, placeholder| url.replace(placeholder, version))
}

async fn sha256_file(path: &Path) -> BuildResult<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| BuildError::Storage(format!("failed to open {}: {}", path.display(), e)))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn checksum_mismatch(what: &str, expected: &str, actual: &str) -> BuildError {
    BuildError::Download(format!(
        "checksum mismatch for {}: expected {}, got {}",
        what, expected, actual
    ))
}

/// Download `url` to `dest`, verifying the SHA-256 as it streams.
///
/// The body goes to a `.part` file that is only renamed into place once the
/// checksum matches.
async fn download(url: &str, dest: &Path, sha256: &str) -> BuildResult<()> {
    if let Some(dir) = dest.parent() {
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            BuildError::Storage(format!("failed to create {}: {}", dir.display(), e))
        })?;
    }
    let part = dest.with_extension("iso.part");

    let mut response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| BuildError::Download(format!("failed to fetch {}: {}", url, e)))?;

    let mut file = tokio::fs::File::create(&part)
        .await
        .map_err(|e| BuildError::Storage(format!("failed to create {}: {}", part.display(), e)))?;
    let mut hasher = Sha256::new();
    let mut size = 0u64;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| BuildError::Download(format!("failed to read {}: {}", url, e)))?
    {
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
        size += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    let actual = hex::encode(hasher.finalize());
    if actual != sha256 {
        if let Err(e) = tokio::fs::remove_file(&part).await {
            tracing::debug!(path = %part.display(), error = %e, "Failed to remove partial download");
        }
        return Err(checksum_mismatch(url, sha256, &actual));
    }
    tokio::fs::rename(&part, dest).await.map_err(|e| {
        BuildError::Storage(format!("failed to move download to {}: {}", dest.display(), e))
    })?;
    tracing::info!(url = %url, path = %dest.display(), size, "Guest additions downloaded");
    Ok(())
}

#[async_trait]
impl BuildStep<BuildContext> for DownloadGuestAdditionsStep {
    fn name(&self) -> &str {
        "download_guest_additions"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> BuildResult<StepAction> {
        if self.config.mode() == GuestAdditionsMode::Disable {
            tracing::debug!("Not downloading guest additions since it is disabled");
            return Ok(StepAction::Continue);
        }

        let version = ctx
            .driver
            .version()
            .await
            .map_err(|e| e.context("error reading version for guest additions download"))?
            .to_string();
        let additions_version = match lookup::additions_version(&version) {
            Some(mapped) => {
                tracing::info!(from = %version, to = %mapped, "Rewriting guest additions version");
                mapped.to_string()
            }
            None => version,
        };

        let path = match self.resolve(ctx, &additions_version) {
            Source::Local { path, sha256 } => {
                if !path.is_file() {
                    return Err(BuildError::NotFound(format!(
                        "guest additions ISO {}",
                        path.display()
                    )));
                }
                if let Some(expected) = sha256 {
                    let actual = sha256_file(&path).await?;
                    if actual != expected {
                        return Err(checksum_mismatch(&path.display().to_string(), &expected, &actual));
                    }
                }
                path
            }
            Source::Remote { url, sha256 } => {
                let dest = self.cache_path(&sha256)?;
                if dest.is_file() && sha256_file(&dest).await? == sha256 {
                    tracing::info!(path = %dest.display(), "Using cached guest additions");
                } else {
                    ctx.ui
                        .say(&format!("Downloading guest additions from {}...", url));
                    download(&url, &dest, &sha256).await?;
                }
                dest
            }
        };

        ctx.ui
            .message(&format!("Guest additions: {}", path.display()));
        ctx.guest_additions_path = Some(path);
        Ok(StepAction::Continue)
    }
}
