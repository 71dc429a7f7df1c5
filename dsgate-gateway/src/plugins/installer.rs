//! # Plugin Installer Module
//!
//! Downloads, verifies, and unpacks one `(plugin_id, version)` artifact.
//!
//! ## Install Steps
//!
//! 1. Look the version up in the catalog; absent versions fail with
//!    `not_found`.
//! 2. Download the artifact to a temp path adjacent to the install root,
//!    hashing the bytes as they stream.
//! 3. When the manifest declares a checksum, compare. Only `sha256:<hex>`
//!    is accepted; a mismatch fails with `integrity`.
//! 4. Remove any previous unpack directory for the exact version.
//! 5. Unpack into `<install_root>/<plugin_id>/<version>/`. Every entry is
//!    resolved against the destination and entries escaping it are
//!    rejected (zip-slip). Directory modes fall back to `0755` and file
//!    modes to `0644` when the archive records none.
//! 6. Upsert the installed-plugin row.
//! 7. Delete the temp artifact.
//!
//! Failure at any step aborts the install, removes the temp file and any
//! partial unpack, and leaves no partial state visible. Reinstalling the
//! same version is idempotent.

use crate::gateway_error::GatewayError;
use crate::plugins::catalog::PluginCatalog;
use crate::plugins::downloader::DownloaderSet;
use crate::store::{InstalledPluginRow, SystemStore};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Installer for plugin artifacts.
pub struct PluginInstaller {
    catalog: Arc<PluginCatalog>,
    downloaders: Arc<DownloaderSet>,
    store: SystemStore,
    install_root: PathBuf,
}

impl PluginInstaller {
    pub fn new(
        catalog: Arc<PluginCatalog>,
        downloaders: Arc<DownloaderSet>,
        store: SystemStore,
        install_root: PathBuf,
    ) -> Self {
        Self {
            catalog,
            downloaders,
            store,
            install_root,
        }
    }

    /// The directory a version unpacks into.
    pub fn install_path(&self, plugin_id: &str, version: &str) -> PathBuf {
        self.install_root.join(plugin_id).join(version)
    }

    /// Install one `(plugin_id, version)`.
    pub async fn install(
        &self,
        plugin_id: &str,
        version: &str,
    ) -> Result<InstalledPluginRow, GatewayError> {
        let descriptor =
            self.catalog
                .get(plugin_id)
                .await
                .ok_or_else(|| GatewayError::NotFound {
                    message: format!("plugin {plugin_id} is not in the catalog"),
                })?;
        let plugin_version =
            descriptor
                .find_version(version)
                .ok_or_else(|| GatewayError::NotFound {
                    message: format!("plugin {plugin_id} has no version {version}"),
                })?;

        tokio::fs::create_dir_all(&self.install_root)
            .await
            .map_err(|e| GatewayError::Internal {
                message: format!("cannot create install root: {e}"),
            })?;

        let temp_path = self.install_root.join(format!(
            ".download-{plugin_id}-{version}-{}.part",
            uuid::Uuid::new_v4()
        ));
        let dest = self.install_path(plugin_id, version);

        let result = self
            .install_inner(plugin_version, &temp_path, &dest, plugin_id, version)
            .await;

        // The temp artifact never outlives the install attempt, and a
        // failed attempt leaves no partial unpack behind.
        let _ = tokio::fs::remove_file(&temp_path).await;
        if result.is_err() {
            let _ = tokio::fs::remove_dir_all(&dest).await;
        }

        result
    }

    async fn install_inner(
        &self,
        plugin_version: &dsgate_backend_sdk::models::PluginVersion,
        temp_path: &Path,
        dest: &Path,
        plugin_id: &str,
        version: &str,
    ) -> Result<InstalledPluginRow, GatewayError> {
        let digest = self
            .download_to(&plugin_version.source.url, temp_path)
            .await?;

        if let Some(declared) = &plugin_version.source.checksum {
            verify_checksum(declared, &digest)?;
        }

        if tokio::fs::try_exists(dest).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(dest)
                .await
                .map_err(|e| GatewayError::Internal {
                    message: format!("cannot remove previous install: {e}"),
                })?;
        }

        let archive = temp_path.to_path_buf();
        let unpack_dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || unpack_zip(&archive, &unpack_dest))
            .await
            .map_err(|e| GatewayError::Internal {
                message: format!("unpack task failed: {e}"),
            })??;

        // The manifest's exec descriptor is authoritative; persist it at
        // the artifact root so starts do not depend on catalog state.
        let exec_raw = serde_json::to_vec_pretty(&plugin_version.exec)?;
        tokio::fs::write(dest.join("plugin.json"), exec_raw)
            .await
            .map_err(|e| GatewayError::Internal {
                message: format!("cannot write plugin descriptor: {e}"),
            })?;

        let install_path = dest.to_string_lossy().into_owned();
        self.store
            .upsert_installed_plugin(plugin_id, version, &install_path)
            .await?;

        tracing::info!(plugin_id, version, path = %install_path, "Plugin installed");

        self.store
            .get_installed_plugin(plugin_id, version)
            .await?
            .ok_or_else(|| GatewayError::Internal {
                message: "installed-plugin row vanished after upsert".to_string(),
            })
    }

    /// Stream the artifact to `temp_path`, returning its sha256 digest.
    async fn download_to(&self, url: &str, temp_path: &Path) -> Result<String, GatewayError> {
        let mut stream = self.downloaders.fetch(url).await?;
        let mut file =
            tokio::fs::File::create(temp_path)
                .await
                .map_err(|e| GatewayError::Internal {
                    message: format!("cannot create temp artifact: {e}"),
                })?;

        let mut hasher = Sha256::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| GatewayError::Internal {
                    message: format!("cannot write temp artifact: {e}"),
                })?;
        }
        file.flush().await.map_err(|e| GatewayError::Internal {
            message: format!("cannot flush temp artifact: {e}"),
        })?;

        Ok(hex_digest(hasher))
    }

    /// Remove an installed version: the unpack directory and the row.
    pub async fn uninstall(&self, plugin_id: &str, version: &str) -> Result<(), GatewayError> {
        let dest = self.install_path(plugin_id, version);
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&dest)
                .await
                .map_err(|e| GatewayError::Internal {
                    message: format!("cannot remove install directory: {e}"),
                })?;
        }
        self.store.delete_installed_plugin(plugin_id, version).await?;
        tracing::info!(plugin_id, version, "Plugin uninstalled");
        Ok(())
    }
}

fn hex_digest(hasher: Sha256) -> String {
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Compare a declared `sha256:<hex>` checksum against the computed digest.
fn verify_checksum(declared: &str, computed_hex: &str) -> Result<(), GatewayError> {
    let Some(expected) = declared.strip_prefix("sha256:") else {
        return Err(GatewayError::Integrity {
            message: format!("unsupported checksum format: {declared}"),
        });
    };

    if !expected.eq_ignore_ascii_case(computed_hex) {
        return Err(GatewayError::Integrity {
            message: format!("checksum mismatch: expected {expected}, got {computed_hex}"),
        });
    }
    Ok(())
}

/// Unpack a zip archive into `dest`, rejecting entries that resolve
/// outside it.
fn unpack_zip(archive_path: &Path, dest: &Path) -> Result<(), GatewayError> {
    let file = std::fs::File::open(archive_path).map_err(|e| GatewayError::Internal {
        message: format!("cannot open artifact: {e}"),
    })?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| GatewayError::Integrity {
        message: format!("artifact is not a valid zip archive: {e}"),
    })?;

    std::fs::create_dir_all(dest).map_err(|e| GatewayError::Internal {
        message: format!("cannot create install directory: {e}"),
    })?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| GatewayError::Integrity {
                message: format!("corrupt archive entry: {e}"),
            })?;

        let Some(relative) = entry.enclosed_name() else {
            return Err(GatewayError::Integrity {
                message: format!("archive entry escapes destination: {}", entry.name()),
            });
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|e| GatewayError::Internal {
                message: format!("cannot create directory {}: {e}", out_path.display()),
            })?;
            set_mode(&out_path, entry.unix_mode(), 0o755)?;
        } else {
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| GatewayError::Internal {
                    message: format!("cannot create directory {}: {e}", parent.display()),
                })?;
            }
            let mut out = std::fs::File::create(&out_path).map_err(|e| GatewayError::Internal {
                message: format!("cannot create file {}: {e}", out_path.display()),
            })?;
            std::io::copy(&mut entry, &mut out).map_err(|e| GatewayError::Internal {
                message: format!("cannot write file {}: {e}", out_path.display()),
            })?;
            set_mode(&out_path, entry.unix_mode(), 0o644)?;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, recorded: Option<u32>, fallback: u32) -> Result<(), GatewayError> {
    use std::os::unix::fs::PermissionsExt;
    let mode = match recorded {
        Some(mode) if mode & 0o777 != 0 => mode & 0o777,
        _ => fallback,
    };
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
        GatewayError::Internal {
            message: format!("cannot set permissions on {}: {e}", path.display()),
        }
    })
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _recorded: Option<u32>, _fallback: u32) -> Result<(), GatewayError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositoryConfig;
    use serde_json::json;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    struct Fixture {
        _dir: tempfile::TempDir,
        installer: PluginInstaller,
        store: SystemStore,
        install_root: PathBuf,
    }

    /// Build a zip artifact, a manifest declaring it, and an installer
    /// wired to a file:// repository.
    async fn fixture(checksum: Option<String>, artifact: Vec<u8>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let artifact_path = dir.path().join("demo.zip");
        std::fs::write(&artifact_path, &artifact).unwrap();

        let manifest = json!({
            "plugins": [{
                "id": "demo.sqlite",
                "name": "Demo",
                "versions": [{
                    "version": "1.0.0",
                    "source": {
                        "url": format!("file://{}", artifact_path.display()),
                        "checksum": checksum,
                    },
                    "exec": {"entrypoint": "bin/backend", "args": ["--port", "{port}"]}
                }]
            }]
        });
        let manifest_path = dir.path().join("manifest.json");
        std::fs::write(&manifest_path, manifest.to_string()).unwrap();

        let downloaders = Arc::new(DownloaderSet::with_defaults());
        let catalog = Arc::new(PluginCatalog::new(
            vec![RepositoryConfig {
                name: "local".to_string(),
                url: format!("file://{}", manifest_path.display()),
                enabled: true,
            }],
            downloaders.clone(),
        ));
        catalog.refresh().await;

        let store = SystemStore::connect_in_memory().await.unwrap();
        let install_root = dir.path().join("plugins");
        let installer = PluginInstaller::new(
            catalog,
            downloaders,
            store.clone(),
            install_root.clone(),
        );

        Fixture {
            _dir: dir,
            installer,
            store,
            install_root,
        }
    }

    fn make_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            for (name, data) in entries {
                writer
                    .start_file(name.to_string(), SimpleFileOptions::default())
                    .unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    fn sha256_hex(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex_digest(hasher)
    }

    #[tokio::test]
    async fn test_install_happy_path() {
        let artifact = make_zip(&[("bin/backend", b"#!/bin/sh\n"), ("README", b"demo")]);
        let checksum = format!("sha256:{}", sha256_hex(&artifact));
        let fx = fixture(Some(checksum), artifact).await;

        let row = fx.installer.install("demo.sqlite", "1.0.0").await.unwrap();
        assert_eq!(row.plugin_id, "demo.sqlite");

        let dest = fx.install_root.join("demo.sqlite").join("1.0.0");
        assert!(dest.join("bin/backend").exists());
        assert!(dest.join("README").exists());

        // The exec descriptor is persisted alongside the artifact.
        let exec: dsgate_backend_sdk::ExecInfo =
            serde_json::from_slice(&std::fs::read(dest.join("plugin.json")).unwrap()).unwrap();
        assert_eq!(exec.entrypoint, "bin/backend");

        // No temp artifacts survive.
        let leftovers: Vec<_> = std::fs::read_dir(&fx.install_root)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".download-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_install_is_idempotent() {
        let artifact = make_zip(&[("bin/backend", b"v1")]);
        let fx = fixture(None, artifact).await;

        fx.installer.install("demo.sqlite", "1.0.0").await.unwrap();
        fx.installer.install("demo.sqlite", "1.0.0").await.unwrap();

        assert_eq!(fx.store.list_installed_plugins().await.unwrap().len(), 1);
        assert!(fx
            .install_root
            .join("demo.sqlite/1.0.0/bin/backend")
            .exists());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_leaves_no_state() {
        let artifact = make_zip(&[("bin/backend", b"payload")]);
        let bad = format!("sha256:{}", "0".repeat(64));
        let fx = fixture(Some(bad), artifact).await;

        let err = fx
            .installer
            .install("demo.sqlite", "1.0.0")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "integrity");

        assert!(fx
            .store
            .get_installed_plugin("demo.sqlite", "1.0.0")
            .await
            .unwrap()
            .is_none());
        assert!(!fx.install_root.join("demo.sqlite").join("1.0.0").exists());
    }

    #[tokio::test]
    async fn test_unsupported_checksum_format_rejected() {
        let artifact = make_zip(&[("bin/backend", b"payload")]);
        let fx = fixture(Some("md5:abcdef".to_string()), artifact).await;

        let err = fx
            .installer
            .install("demo.sqlite", "1.0.0")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "integrity");
    }

    #[tokio::test]
    async fn test_zip_slip_entry_rejected() {
        let artifact = make_zip(&[("../evil.sh", b"rm -rf /")]);
        let fx = fixture(None, artifact).await;

        let err = fx
            .installer
            .install("demo.sqlite", "1.0.0")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "integrity");
        assert!(!fx.install_root.join("demo.sqlite").join("1.0.0").exists());
        assert!(!fx.install_root.parent().unwrap().join("evil.sh").exists());
    }

    #[tokio::test]
    async fn test_unknown_plugin_or_version_not_found() {
        let artifact = make_zip(&[("bin/backend", b"payload")]);
        let fx = fixture(None, artifact).await;

        let err = fx
            .installer
            .install("ghost.plugin", "1.0.0")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");

        let err = fx
            .installer
            .install("demo.sqlite", "9.9.9")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_reinstall_replaces_previous_unpack() {
        let artifact = make_zip(&[("bin/backend", b"v1"), ("old-file", b"stale")]);
        let fx = fixture(None, artifact).await;
        fx.installer.install("demo.sqlite", "1.0.0").await.unwrap();
        assert!(fx.install_root.join("demo.sqlite/1.0.0/old-file").exists());

        // Replace the artifact with one that no longer carries old-file.
        let new_artifact = make_zip(&[("bin/backend", b"v2")]);
        std::fs::write(fx._dir.path().join("demo.zip"), &new_artifact).unwrap();

        fx.installer.install("demo.sqlite", "1.0.0").await.unwrap();
        assert!(!fx.install_root.join("demo.sqlite/1.0.0/old-file").exists());
        assert_eq!(
            std::fs::read(fx.install_root.join("demo.sqlite/1.0.0/bin/backend")).unwrap(),
            b"v2"
        );
    }

    #[tokio::test]
    async fn test_uninstall_removes_directory_and_row() {
        let artifact = make_zip(&[("bin/backend", b"v1")]);
        let fx = fixture(None, artifact).await;
        fx.installer.install("demo.sqlite", "1.0.0").await.unwrap();

        fx.installer.uninstall("demo.sqlite", "1.0.0").await.unwrap();
        assert!(!fx.install_root.join("demo.sqlite/1.0.0").exists());
        assert!(fx
            .store
            .get_installed_plugin("demo.sqlite", "1.0.0")
            .await
            .unwrap()
            .is_none());
    }
}
