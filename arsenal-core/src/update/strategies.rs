//! One handler per install/update strategy tag
//!
//! Dispatch is by descriptor data, so new tools reuse an existing handler
//! instead of adding code.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::config::ToolsConfig;
use crate::process::{ProcessResult, ProcessRunner};
use crate::registry::{Package, Strategy, ToolDescriptor};
use crate::retry::is_transient_error;
use crate::update::github::{GitHubChecker, ReleaseAsset};
use crate::{Error, Result};

/// Apply the tool's install strategy
pub(crate) async fn install(
    desc: &ToolDescriptor,
    cfg: &ToolsConfig,
    github: &GitHubChecker,
) -> Result<()> {
    match desc.install {
        Strategy::GitRepo => git_clone(desc, cfg).await,
        Strategy::LanguagePackage => package_install(desc, cfg).await,
        Strategy::ReleaseBinary => release_binary(desc, cfg, github).await,
        Strategy::ExternalDb => external_db(desc, cfg).await,
    }
}

/// Apply the tool's update strategy
pub(crate) async fn update(
    desc: &ToolDescriptor,
    cfg: &ToolsConfig,
    github: &GitHubChecker,
) -> Result<()> {
    match desc.update {
        Strategy::GitRepo => git_pull(desc, cfg).await,
        // Ecosystem installers and release fetches are their own updaters
        Strategy::LanguagePackage => package_install(desc, cfg).await,
        Strategy::ReleaseBinary => release_binary(desc, cfg, github).await,
        Strategy::ExternalDb => external_db(desc, cfg).await,
    }
}

/// True when a clone directory contains everything the tool needs
pub(crate) fn clone_complete(desc: &ToolDescriptor, dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }
    if !desc.required_files.is_empty() {
        return desc.required_files.iter().all(|rel| dir.join(rel).exists());
    }
    // No manifest of required files: any content counts
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

async fn git_clone(desc: &ToolDescriptor, cfg: &ToolsConfig) -> Result<()> {
    require_command("git", "https://git-scm.com/downloads")?;
    tokio::fs::create_dir_all(&cfg.dir).await?;

    let dir = desc.install_dir(&cfg.dir);
    if dir.exists() && !clone_complete(desc, &dir) {
        info!(tool = desc.id, "removing incomplete clone before reinstall");
        tokio::fs::remove_dir_all(&dir).await?;
    }
    if dir.exists() {
        debug!(tool = desc.id, "clone already present");
        return Ok(());
    }

    let url = format!("https://github.com/{}.git", desc.repo);
    let result = ProcessRunner::run(
        "git",
        ["clone", "--depth", "1", &url, &dir.display().to_string()],
        install_timeout(cfg),
        None,
    )
    .await;
    if !result.success() {
        return Err(command_error(&format!("git clone of {}", desc.repo), &result));
    }
    Ok(())
}

async fn git_pull(desc: &ToolDescriptor, cfg: &ToolsConfig) -> Result<()> {
    require_command("git", "https://git-scm.com/downloads")?;
    let dir = desc.install_dir(&cfg.dir);
    if !dir.is_dir() {
        return Err(Error::Tool(format!("{} is not cloned at {}", desc.id, dir.display())));
    }

    // Fast-forward only: diverged history is an error, local edits are never
    // destroyed by a forced reset.
    let result = ProcessRunner::run(
        "git",
        ["-C", &dir.display().to_string(), "pull", "--ff-only"],
        install_timeout(cfg),
        None,
    )
    .await;
    if !result.success() {
        return Err(command_error(
            &format!("fast-forward pull of {}", desc.id),
            &result,
        ));
    }
    Ok(())
}

async fn package_install(desc: &ToolDescriptor, cfg: &ToolsConfig) -> Result<()> {
    let package = desc
        .package
        .ok_or_else(|| Error::Fatal(format!("{} has no package spec", desc.id)))?;

    let result = match package {
        Package::Go(module) => {
            require_command("go", "https://go.dev/dl/")?;
            ProcessRunner::run(
                "go",
                ["install", "-v", &format!("{module}@latest")],
                install_timeout(cfg),
                None,
            )
            .await
        }
        Package::Pip(spec) => {
            require_command("python3", "https://www.python.org/downloads/")?;
            ProcessRunner::run(
                "python3",
                ["-m", "pip", "install", "--upgrade", spec],
                install_timeout(cfg),
                None,
            )
            .await
        }
    };
    if !result.success() {
        return Err(command_error(&format!("package install of {}", desc.id), &result));
    }
    Ok(())
}

async fn release_binary(
    desc: &ToolDescriptor,
    cfg: &ToolsConfig,
    github: &GitHubChecker,
) -> Result<()> {
    let (version, assets) = github.latest_release(desc.repo).await?;
    let asset = select_asset(&assets).ok_or_else(|| {
        Error::Tool(format!(
            "{}: no release asset for {}/{}",
            desc.id,
            std::env::consts::OS,
            std::env::consts::ARCH
        ))
    })?;
    info!(tool = desc.id, version, asset = %asset.name, "fetching release binary");

    let bytes = github.download(&asset.browser_download_url).await?;
    let bin_dir = cfg.dir.join("bin");
    tokio::fs::create_dir_all(&bin_dir).await?;
    let dest = bin_dir.join(desc.id);

    let lower = asset.name.to_lowercase();
    if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        let archive = tempfile::Builder::new()
            .prefix(&format!("{}-", desc.id))
            .suffix(".tar.gz")
            .tempfile()?;
        tokio::fs::write(archive.path(), &bytes).await?;

        // Extract inside bin/ so the final rename stays on one filesystem
        let extract = tempfile::TempDir::new_in(&bin_dir)?;
        let result = ProcessRunner::run(
            "tar",
            [
                "-xzf",
                &archive.path().display().to_string(),
                "-C",
                &extract.path().display().to_string(),
            ],
            install_timeout(cfg),
            None,
        )
        .await;
        if !result.success() {
            return Err(command_error(&format!("unpack of {}", asset.name), &result));
        }

        let mut names: Vec<&str> = desc.aliases.to_vec();
        names.push(desc.id);
        let binary = find_file(extract.path(), &names).ok_or_else(|| {
            Error::Tool(format!("{}: binary not found in {}", desc.id, asset.name))
        })?;
        tokio::fs::rename(&binary, &dest).await?;
    } else if lower.ends_with(".zip") {
        return Err(Error::Tool(format!(
            "{}: zip release assets are not supported ({})",
            desc.id, asset.name
        )));
    } else {
        // Raw binary asset: download to a temp path, then move atomically
        let staged = tempfile::Builder::new()
            .prefix(&format!(".{}-", desc.id))
            .tempfile_in(&bin_dir)?;
        tokio::fs::write(staged.path(), &bytes).await?;
        let staged_path = staged.into_temp_path();
        staged_path.persist(&dest).map_err(|e| Error::Io(e.error))?;
    }

    set_executable(&dest).await?;
    Ok(())
}

async fn external_db(desc: &ToolDescriptor, cfg: &ToolsConfig) -> Result<()> {
    let (program, args) = desc
        .refresh
        .split_first()
        .ok_or_else(|| Error::Fatal(format!("{} has no refresh command", desc.id)))?;
    require_command(program, "the owning tool must be installed first")?;

    // Safe to re-run: the underlying updater is idempotent by construction
    let result = ProcessRunner::run(program, args.iter(), install_timeout(cfg), None).await;
    if !result.success() {
        return Err(command_error(&format!("database refresh for {}", desc.id), &result));
    }
    Ok(())
}

/// Pick the release asset built for this host, preferring tarballs over
/// checksums and foreign archives
fn select_asset(assets: &[ReleaseAsset]) -> Option<&ReleaseAsset> {
    let os_tokens: &[&str] = match std::env::consts::OS {
        "linux" => &["linux"],
        "macos" => &["darwin", "macos"],
        "windows" => &["windows"],
        other => return assets.iter().find(|a| a.name.contains(other)),
    };
    let matches_host = |asset: &&ReleaseAsset| {
        let name = asset.name.to_lowercase();
        let os_ok = os_tokens.iter().any(|t| name.contains(t));
        let arch_ok = match std::env::consts::ARCH {
            "x86_64" => name.contains("amd64") || name.contains("x86_64"),
            "aarch64" => name.contains("arm64") || name.contains("aarch64"),
            _ => true,
        };
        let not_checksum = !name.ends_with(".sha256") && !name.ends_with(".md5");
        os_ok && arch_ok && not_checksum
    };

    assets
        .iter()
        .filter(matches_host)
        .find(|a| {
            let name = a.name.to_lowercase();
            name.ends_with(".tar.gz") || name.ends_with(".tgz")
        })
        .or_else(|| assets.iter().find(matches_host))
}

/// Recursively locate a file with one of the expected names
fn find_file(dir: &Path, names: &[&str]) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut subdirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(path);
        } else if let Some(file_name) = path.file_name().and_then(|n| n.to_str()) {
            if names.contains(&file_name) {
                return Some(path);
            }
        }
    }
    subdirs.iter().find_map(|sub| find_file(sub, names))
}

fn require_command(program: &str, hint: &str) -> Result<()> {
    which::which(program)
        .map(|_| ())
        .map_err(|_| Error::Tool(format!("{program} is not installed ({hint})")))
}

fn install_timeout(cfg: &ToolsConfig) -> Duration {
    Duration::from_secs(cfg.install_timeout_secs)
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o755);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

fn command_error(context: &str, result: &ProcessResult) -> Error {
    let mut detail = result.error_text();
    if detail.len() > 300 {
        detail.truncate(300);
    }
    if result.timed_out {
        Error::Timeout(context.to_string())
    } else if is_transient_error(&detail) {
        Error::Network(format!("{context}: {detail}"))
    } else {
        Error::Tool(format!("{context}: {detail}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;

    fn asset(name: &str) -> ReleaseAsset {
        ReleaseAsset {
            name: name.to_string(),
            browser_download_url: format!("https://example.com/{name}"),
        }
    }

    #[test]
    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    fn test_select_asset_prefers_host_tarball() {
        let assets = vec![
            asset("ffuf_2.1.0_windows_amd64.zip"),
            asset("ffuf_2.1.0_linux_amd64.tar.gz"),
            asset("ffuf_2.1.0_linux_amd64.tar.gz.sha256"),
            asset("ffuf_2.1.0_macOS_arm64.tar.gz"),
        ];
        let picked = select_asset(&assets).unwrap();
        assert_eq!(picked.name, "ffuf_2.1.0_linux_amd64.tar.gz");
    }

    #[test]
    fn test_select_asset_none_for_foreign_builds() {
        let assets = vec![asset("tool_mips.tar.gz")];
        assert!(select_asset(&assets).is_none());
    }

    #[test]
    fn test_find_file_descends_into_subdirs() {
        let temp = tempfile::TempDir::new().unwrap();
        let nested = temp.path().join("release").join("bin");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("ffuf"), b"binary").unwrap();

        let found = find_file(temp.path(), &["ffuf"]).unwrap();
        assert!(found.ends_with("release/bin/ffuf"));
        assert!(find_file(temp.path(), &["missing"]).is_none());
    }

    #[test]
    fn test_clone_complete_requires_listed_files() {
        let temp = tempfile::TempDir::new().unwrap();
        let desc = registry::describe("sqlmap").unwrap();
        let dir = desc.install_dir(temp.path());

        assert!(!clone_complete(desc, &dir));
        std::fs::create_dir_all(&dir).unwrap();
        assert!(!clone_complete(desc, &dir));
        std::fs::write(dir.join("sqlmap.py"), b"#!/usr/bin/env python3").unwrap();
        assert!(clone_complete(desc, &dir));
    }

    #[test]
    fn test_require_command_missing() {
        let err = require_command("definitely-not-a-real-binary-xyz", "hint").unwrap_err();
        assert!(matches!(err, Error::Tool(_)));
    }
}
