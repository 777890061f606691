use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use crate::bootstrap::artifact::{ArtifactConfig, Footer, RuntimeEntry, MAX_RUNTIME_PATH_LEN};
use crate::config::{LauncherConfig, ServerConfig};
use crate::core::wire::WireWriter;
use crate::error::{Result, ServerError};
use crate::state::digest_tree::visible_name;
use crate::state::{ServerKeyPair, SignedEnvelope};

/// Size and SHA-256 of a built launcher, signed and served over LAUNCHER.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherDigest {
    pub size: u64,
    pub sha256: [u8; 32],
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub output: PathBuf,
    pub digest: LauncherDigest,
    pub runtime_files: usize,
}

/// Produces the launcher artifact that carries the server's public key.
pub struct LauncherBuilder {
    base_archive: PathBuf,
    runtime_dir: PathBuf,
    output: PathBuf,
    address: String,
    port: u16,
    keys: Arc<ServerKeyPair>,
}

impl LauncherBuilder {
    /// Paths in `launcher` must already be resolved against the server dir.
    pub fn new(launcher: &LauncherConfig, server: &ServerConfig, keys: Arc<ServerKeyPair>) -> Self {
        Self {
            base_archive: launcher.base_archive.clone(),
            runtime_dir: launcher.runtime_dir.clone(),
            output: launcher.output.clone(),
            address: server.address.clone(),
            port: server.port,
            keys,
        }
    }

    pub fn base_archive(&self) -> &Path {
        &self.base_archive
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn has_base_archive(&self) -> bool {
        self.base_archive.is_file()
    }

    /// Build the artifact and replace the output file atomically.
    #[instrument(skip(self), fields(output = %self.output.display()))]
    pub fn build(&self) -> Result<BuildReport> {
        info!("Building launcher binary file");

        let mut runtime = Vec::new();
        collect_runtime(&self.runtime_dir, &self.runtime_dir, &mut runtime)?;
        runtime.sort_by(|a, b| a.0.cmp(&b.0));

        let tmp = temp_path(&self.output);
        let written = self.write_artifact(&tmp, &runtime);
        let digest = match written {
            Ok(digest) => digest,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        };
        fs::rename(&tmp, &self.output)?;

        info!(
            size = digest.size,
            sha256 = %hex::encode(digest.sha256),
            runtime_files = runtime.len(),
            "Launcher binary built"
        );
        Ok(BuildReport {
            output: self.output.clone(),
            digest,
            runtime_files: runtime.len(),
        })
    }

    /// Sign the digest of a build for the LAUNCHER opcode.
    pub fn sign(&self, digest: &LauncherDigest) -> Result<SignedEnvelope<LauncherDigest>> {
        SignedEnvelope::create(digest, self.keys.signing_key())
    }

    fn write_artifact(&self, tmp: &Path, runtime: &[(String, Vec<u8>)]) -> Result<LauncherDigest> {
        let mut out = HashingWriter::new(BufWriter::new(File::create(tmp)?));

        let mut base = File::open(&self.base_archive)?;
        io::copy(&mut base, &mut out)?;

        let mut section = WireWriter::new();
        let mut table = Vec::with_capacity(runtime.len());
        for (path, contents) in runtime {
            debug!(path = %path, len = contents.len(), "Packing runtime file");
            section.write_string(path, MAX_RUNTIME_PATH_LEN)?;
            section.write_u64(contents.len() as u64);
            section.write_raw(contents);
            table.push(RuntimeEntry::new(path.clone(), contents));
        }
        let section = section.into_bytes();
        out.write_all(&section)?;

        let blob = ArtifactConfig {
            address: self.address.clone(),
            port: self.port,
            public_key: self.keys.public_key_bytes().to_vec(),
            runtime: table,
        }
        .encode()?;
        out.write_all(&blob)?;

        let footer = Footer {
            runtime_len: section.len() as u64,
            blob_len: u32::try_from(blob.len()).map_err(|_| ServerError::OversizedFrame(blob.len()))?,
        };
        out.write_all(&footer.encode())?;

        let (writer, digest) = out.finish();
        writer
            .into_inner()
            .map_err(|e| ServerError::Io(e.into_error()))?
            .sync_all()?;
        Ok(digest)
    }
}

fn temp_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "launcher".to_string());
    output.with_file_name(format!(".{name}.tmp"))
}

fn collect_runtime(root: &Path, dir: &Path, out: &mut Vec<(String, Vec<u8>)>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Some(name) = visible_name(&entry) else {
            continue;
        };
        let path = dir.join(name);
        let meta = fs::metadata(&path)?;
        if meta.is_dir() {
            collect_runtime(root, &path, out)?;
        } else if meta.is_file() {
            let relative = path
                .strip_prefix(root)
                .map_err(|e| ServerError::Custom(e.to_string()))?
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            out.push((relative, fs::read(&path)?));
        }
    }
    Ok(())
}

/// Counts and hashes everything written through it.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    size: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            size: 0,
        }
    }

    fn finish(self) -> (W, LauncherDigest) {
        let digest = LauncherDigest {
            size: self.size,
            sha256: self.hasher.finalize().into(),
        };
        (self.inner, digest)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::bootstrap::artifact::{read_artifact_config, read_artifact_runtime};
    use crate::config::LaunchServerConfig;

    fn builder(root: &Path) -> LauncherBuilder {
        let config = LaunchServerConfig::default().resolve(root);
        LauncherBuilder::new(
            &config.launcher,
            &config.server,
            Arc::new(ServerKeyPair::from_seed(&[5; 32])),
        )
    }

    #[test]
    fn test_build_embeds_key_and_runtime() {
        let tmp = tempfile::tempdir().unwrap();
        let b = builder(tmp.path());
        fs::write(b.base_archive(), b"BASE-ARCHIVE").unwrap();
        fs::create_dir_all(tmp.path().join("runtime/lib")).unwrap();
        fs::write(tmp.path().join("runtime/init.js"), b"init()").unwrap();
        fs::write(tmp.path().join("runtime/lib/util.js"), b"util").unwrap();
        fs::write(tmp.path().join("runtime/.DS_Store"), b"junk").unwrap();

        let report = b.build().unwrap();
        assert_eq!(report.runtime_files, 2);

        let bytes = fs::read(b.output()).unwrap();
        assert!(bytes.starts_with(b"BASE-ARCHIVE"));
        assert_eq!(report.digest.size, bytes.len() as u64);
        assert_eq!(report.digest.sha256, <[u8; 32]>::from(Sha256::digest(&bytes)));

        let config = read_artifact_config(b.output()).unwrap();
        assert_eq!(config.port, 7240);
        assert_eq!(config.public_key, b.keys.public_key_bytes().to_vec());
        let paths: Vec<_> = config.runtime.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["init.js", "lib/util.js"]);

        let files = read_artifact_runtime(b.output()).unwrap();
        assert_eq!(files[1].1.as_ref(), b"util");
    }

    #[test]
    fn test_missing_runtime_dir_fails_without_output() {
        let tmp = tempfile::tempdir().unwrap();
        let b = builder(tmp.path());
        fs::write(b.base_archive(), b"BASE").unwrap();

        assert!(matches!(b.build(), Err(ServerError::Io(_))));
        assert!(!b.output().exists());
    }

    #[test]
    fn test_signed_digest_verifies() {
        let tmp = tempfile::tempdir().unwrap();
        let b = builder(tmp.path());
        fs::write(b.base_archive(), b"BASE").unwrap();
        fs::create_dir_all(tmp.path().join("runtime")).unwrap();

        let report = b.build().unwrap();
        let envelope = b.sign(&report.digest).unwrap();
        assert_eq!(envelope.open(b.keys.verifying_key()).unwrap(), report.digest);
    }
}
