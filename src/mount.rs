//! CIFS share mounting
//!
//! The filesystem provider behind the sync engine: given the configured
//! nodes and shares, it materializes `//<node>/<share>` under
//! `<base>/<node>/<share-without-$>`. The engine only ever consumes the
//! resulting directories; all mount plumbing and credentials stay here.
//!
//! The capture nodes run a legacy SMB stack, hence `vers=1.0`.

use anyhow::{anyhow, bail, Context, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

const CREDENTIALS_FILE: &str = "/etc/ucxsync/credentials";

/// Subdirectory name a share mounts under: administrative shares drop the
/// trailing `$`.
pub fn share_subdir(share: &str) -> &str {
    share.strip_suffix('$').unwrap_or(share)
}

/// Local mount point for one (node, share).
pub fn mount_point(base: &Path, node: &str, share: &str) -> PathBuf {
    base.join(node).join(share_subdir(share))
}

pub struct MountProvider {
    nodes: Vec<String>,
    shares: Vec<String>,
    username: String,
    password: String,
    base_mount_dir: PathBuf,
    mounted: Mutex<HashSet<String>>,
}

impl MountProvider {
    pub fn new(
        nodes: Vec<String>,
        shares: Vec<String>,
        username: String,
        password: String,
        base_mount_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            nodes,
            shares,
            username,
            password,
            base_mount_dir: base_mount_dir.into(),
            mounted: Mutex::new(HashSet::new()),
        }
    }

    /// Mount every configured (node, share). Individual failures are
    /// collected; the call errors only if at least one share failed.
    pub fn mount_all(&self) -> Result<()> {
        info!("mounting network shares");

        std::fs::create_dir_all(&self.base_mount_dir)
            .with_context(|| format!("creating {}", self.base_mount_dir.display()))?;

        // Prefer a root-owned credentials file over credentials on the
        // mount command line.
        let cred_file = match self.write_credentials_file(Path::new(CREDENTIALS_FILE)) {
            Ok(()) => Some(CREDENTIALS_FILE),
            Err(err) => {
                warn!(error = %err, "credentials file unavailable, using inline credentials");
                None
            }
        };

        let mut failures = Vec::new();
        let mut mounted = 0usize;

        for node in &self.nodes {
            for share in &self.shares {
                let key = format!("{node}/{share}");
                let point = mount_point(&self.base_mount_dir, node, share);

                if let Err(err) = std::fs::create_dir_all(&point) {
                    failures.push(format!("{key}: {err}"));
                    continue;
                }

                if is_mounted(&point) {
                    debug!(node = %node, share = %share, "already mounted");
                    self.mounted.lock().insert(key);
                    mounted += 1;
                    continue;
                }

                let unc = format!("//{node}/{share}");
                match mount_share(&unc, &point, cred_file, &self.username, &self.password) {
                    Ok(()) => {
                        info!(node = %node, share = %share, mount_point = %point.display(), "share mounted");
                        self.mounted.lock().insert(key);
                        mounted += 1;
                    }
                    Err(err) => {
                        warn!(node = %node, share = %share, error = %err, "failed to mount share");
                        failures.push(format!("{key}: {err}"));
                    }
                }
            }
        }

        info!(
            mounted,
            total = self.nodes.len() * self.shares.len(),
            "share mounting finished"
        );

        if !failures.is_empty() {
            bail!("failed to mount some shares:\n{}", failures.join("\n"));
        }
        Ok(())
    }

    /// Unmount everything this provider mounted.
    pub fn unmount_all(&self) -> Result<()> {
        info!("unmounting network shares");

        let mut mounted = self.mounted.lock();
        let mut failures = Vec::new();

        let keys: Vec<String> = mounted.iter().cloned().collect();
        for key in keys {
            let Some((node, share)) = key.split_once('/') else {
                continue;
            };
            let point = mount_point(&self.base_mount_dir, node, share);
            match unmount(&point) {
                Ok(()) => {
                    mounted.remove(&key);
                }
                Err(err) => failures.push(format!("{}: {err}", point.display())),
            }
        }

        if !failures.is_empty() {
            bail!("failed to unmount some shares:\n{}", failures.join("\n"));
        }
        Ok(())
    }

    fn write_credentials_file(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = format!("username={}\npassword={}\n", self.username, self.password);
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        info!(path = %path.display(), "credentials file written");
        Ok(())
    }
}

fn mount_share(
    unc: &str,
    point: &Path,
    cred_file: Option<&str>,
    username: &str,
    password: &str,
) -> Result<()> {
    let mut opts = vec![
        "rw".to_string(),
        "file_mode=0755".to_string(),
        "dir_mode=0755".to_string(),
    ];
    match cred_file {
        Some(file) => opts.push(format!("credentials={file}")),
        None => {
            opts.push(format!("username={username}"));
            opts.push(format!("password={password}"));
        }
    }
    opts.push("vers=1.0".to_string());

    let output = Command::new("mount")
        .args(["-t", "cifs", unc])
        .arg(point)
        .arg("-o")
        .arg(opts.join(","))
        .output()
        .context("spawning mount")?;

    if !output.status.success() {
        bail!(
            "mount failed: {} ({})",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

fn unmount(point: &Path) -> Result<()> {
    let output = Command::new("umount")
        .arg(point)
        .output()
        .context("spawning umount")?;

    if !output.status.success() {
        bail!(
            "umount failed: {} ({})",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    debug!(mount_point = %point.display(), "unmounted");
    Ok(())
}

fn is_mounted(point: &Path) -> bool {
    let Ok(mounts) = std::fs::read_to_string("/proc/mounts") else {
        return false;
    };
    mounts.lines().any(|line| {
        line.split_whitespace()
            .nth(1)
            .is_some_and(|mp| Path::new(mp) == point)
    })
}

/// Verify the host can actually mount CIFS shares.
pub fn check_requirements() -> Result<()> {
    find_in_path("mount.cifs").ok_or_else(|| {
        anyhow!("mount.cifs not found: install cifs-utils (e.g. apt-get install cifs-utils)")
    })?;

    if !rustix::process::geteuid().is_root() {
        bail!("mounting requires root privileges: run with sudo");
    }
    Ok(())
}

fn find_in_path(bin: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .chain([PathBuf::from("/sbin"), PathBuf::from("/usr/sbin")])
        .map(|dir| dir.join(bin))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn administrative_share_drops_dollar_suffix() {
        assert_eq!(share_subdir("E$"), "E");
        assert_eq!(share_subdir("F$"), "F");
        assert_eq!(share_subdir("data"), "data");
    }

    #[test]
    fn mount_point_layout() {
        let p = mount_point(Path::new("/mnt/ucx"), "WU03", "E$");
        assert_eq!(p, Path::new("/mnt/ucx/WU03/E"));
    }
}
