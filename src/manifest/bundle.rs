//! Deployment bundle: manifests plus apply/cleanup scripts and checksums

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use super::generator::ManifestPackage;
use crate::capacity::TenantSpec;

/// Directory holding the manifests inside a bundle
pub const MANIFEST_DIR: &str = "manifests";

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("Failed to write bundle file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize tenant spec: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One file of a bundle, path relative to the bundle root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleFile {
    pub path: String,
    pub contents: String,
    pub executable: bool,
}

/// An ordered, self-contained deployment bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub files: Vec<BundleFile>,
}

impl Bundle {
    /// Assemble a bundle for a rendered package
    pub fn build(spec: &TenantSpec, package: &ManifestPackage) -> Result<Self, BundleError> {
        let mut files: Vec<BundleFile> = package
            .documents
            .iter()
            .map(|(name, doc)| BundleFile {
                path: format!("{}/{}", MANIFEST_DIR, name),
                contents: doc.clone(),
                executable: false,
            })
            .collect();

        files.push(BundleFile {
            path: "apply.sh".to_string(),
            contents: apply_script(spec, package),
            executable: true,
        });
        files.push(BundleFile {
            path: "cleanup.sh".to_string(),
            contents: cleanup_script(spec),
            executable: true,
        });
        files.push(BundleFile {
            path: "tenant-spec.json".to_string(),
            contents: serde_json::to_string_pretty(spec)? + "\n",
            executable: false,
        });

        let sums: String = files
            .iter()
            .map(|f| format!("{}  {}\n", sha256_hex(f.contents.as_bytes()), f.path))
            .collect();
        files.push(BundleFile {
            path: "SHA256SUMS".to_string(),
            contents: sums,
            executable: false,
        });

        Ok(Self { files })
    }

    pub fn paths(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.path.as_str()).collect()
    }

    pub fn get(&self, path: &str) -> Option<&BundleFile> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Write every file under `dir`, creating directories as needed
    pub fn write_to(&self, dir: &Path) -> Result<(), BundleError> {
        for file in &self.files {
            let path = dir.join(&file.path);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|source| BundleError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            fs::write(&path, &file.contents).map_err(|source| BundleError::Io {
                path: path.clone(),
                source,
            })?;
            if file.executable {
                set_executable(&path)?;
            }
        }
        info!(dir = %dir.display(), files = self.files.len(), "Wrote bundle");
        Ok(())
    }
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<(), BundleError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(|source| {
        BundleError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<(), BundleError> {
    Ok(())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn apply_script(spec: &TenantSpec, package: &ManifestPackage) -> String {
    let mut script = String::from("#!/usr/bin/env bash\nset -euo pipefail\n\n");
    script.push_str("cd \"$(dirname \"$0\")\"\n");
    script.push_str(&format!("echo \"Applying tenant {}\"\n", spec.tenant_id));
    for name in package.documents.keys() {
        script.push_str(&format!("kubectl apply -f {}/{}\n", MANIFEST_DIR, name));
    }
    script.push_str(&format!(
        "kubectl -n {} get deployments\n",
        spec.namespace
    ));
    script
}

fn cleanup_script(spec: &TenantSpec) -> String {
    format!(
        "#!/usr/bin/env bash\nset -euo pipefail\n\necho \"Deleting tenant {}\"\nkubectl delete namespace {} --ignore-not-found\n",
        spec.tenant_id, spec.namespace
    )
}
