//! On-disk layout of the distributed launcher.
//!
//! ```text
//! [base archive][runtime section][config blob][footer(17)]
//! ```
//! The footer sits at the very end so a client can find the blob by reading
//! backwards from its own file:
//!
//! ```text
//! magic "LSCF"(4) | version(1) | runtime section len u64 | blob len u32
//! ```
//! Runtime section: per file, path string + `u64` length + contents.
//! Config blob: address string, port `u16`, public key bytes, then a `u32`
//! count of runtime entries, each a path string plus its digest bytes.
//! All integers are big-endian, strings are `u16`-prefixed UTF-8.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use bytes::{Buf, Bytes};

use crate::core::wire::{WireReader, WireWriter};
use crate::error::{Result, ServerError};

pub const FOOTER_MAGIC: [u8; 4] = *b"LSCF";
pub const FORMAT_VERSION: u8 = 1;
pub const FOOTER_LEN: usize = 17;

pub const MAX_ADDRESS_LEN: usize = 255;
pub const MAX_RUNTIME_PATH_LEN: usize = 1024;
pub const MAX_KEY_LEN: usize = 1024;
pub const MAX_DIGEST_LEN: usize = 64;
/// Config blobs larger than this are rejected when reading.
pub const MAX_BLOB_LEN: usize = 16 * 1024 * 1024;

/// One runtime file and the CRC32 of its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEntry {
    pub path: String,
    pub digest: Vec<u8>,
}

impl RuntimeEntry {
    pub fn new(path: impl Into<String>, contents: &[u8]) -> Self {
        Self {
            path: path.into(),
            digest: crc32fast::hash(contents).to_be_bytes().to_vec(),
        }
    }

    pub fn matches(&self, contents: &[u8]) -> bool {
        self.digest == crc32fast::hash(contents).to_be_bytes()
    }
}

/// What the launcher learns about its server: where it is and which key
/// signs everything it will receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactConfig {
    pub address: String,
    pub port: u16,
    pub public_key: Vec<u8>,
    pub runtime: Vec<RuntimeEntry>,
}

impl ArtifactConfig {
    pub fn encode(&self) -> Result<Bytes> {
        let mut w = WireWriter::new();
        w.write_string(&self.address, MAX_ADDRESS_LEN)?;
        w.write_u16(self.port);
        w.write_bytes(&self.public_key)?;
        w.write_u32(self.runtime.len() as u32);
        for entry in &self.runtime {
            w.write_string(&entry.path, MAX_RUNTIME_PATH_LEN)?;
            w.write_bytes(&entry.digest)?;
        }
        Ok(w.into_bytes())
    }

    pub fn decode(blob: Bytes) -> Result<Self> {
        let mut r = WireReader::new(blob);
        let address = r.read_string(MAX_ADDRESS_LEN)?;
        let port = r.read_u16()?;
        let public_key = r.read_bytes(MAX_KEY_LEN)?.to_vec();
        let count = r.read_u32()? as usize;
        let mut runtime = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            runtime.push(RuntimeEntry {
                path: r.read_string(MAX_RUNTIME_PATH_LEN)?,
                digest: r.read_bytes(MAX_DIGEST_LEN)?.to_vec(),
            });
        }
        r.finish()?;
        Ok(Self {
            address,
            port,
            public_key,
            runtime,
        })
    }

    pub fn runtime_entry(&self, path: &str) -> Option<&RuntimeEntry> {
        self.runtime.iter().find(|e| e.path == path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub runtime_len: u64,
    pub blob_len: u32,
}

impl Footer {
    pub fn encode(&self) -> [u8; FOOTER_LEN] {
        let mut out = [0u8; FOOTER_LEN];
        out[..4].copy_from_slice(&FOOTER_MAGIC);
        out[4] = FORMAT_VERSION;
        out[5..13].copy_from_slice(&self.runtime_len.to_be_bytes());
        out[13..].copy_from_slice(&self.blob_len.to_be_bytes());
        out
    }

    pub fn decode(raw: &[u8; FOOTER_LEN]) -> Result<Self> {
        if raw[..4] != FOOTER_MAGIC {
            return Err(ServerError::ConfigError(
                "Not a launcher artifact (footer magic missing)".into(),
            ));
        }
        if raw[4] != FORMAT_VERSION {
            return Err(ServerError::ConfigError(format!(
                "Unsupported launcher artifact version {}",
                raw[4]
            )));
        }
        let mut rest = &raw[5..];
        Ok(Self {
            runtime_len: rest.get_u64(),
            blob_len: rest.get_u32(),
        })
    }
}

/// Footer plus the offsets of the config blob and the runtime section.
struct Trailer {
    footer: Footer,
    blob_start: u64,
    runtime_start: u64,
}

fn read_footer(file: &mut File) -> Result<Trailer> {
    let total = file.metadata()?.len();
    if total < FOOTER_LEN as u64 {
        return Err(ServerError::ConfigError("Launcher artifact truncated".into()));
    }
    file.seek(SeekFrom::Start(total - FOOTER_LEN as u64))?;
    let mut raw = [0u8; FOOTER_LEN];
    file.read_exact(&mut raw)?;
    let footer = Footer::decode(&raw)?;

    let out_of_range =
        || ServerError::ConfigError("Launcher artifact footer lengths out of range".into());
    if footer.blob_len as usize > MAX_BLOB_LEN {
        return Err(out_of_range());
    }
    let blob_start = (total - FOOTER_LEN as u64)
        .checked_sub(footer.blob_len as u64)
        .ok_or_else(out_of_range)?;
    let runtime_start = blob_start
        .checked_sub(footer.runtime_len)
        .ok_or_else(out_of_range)?;
    Ok(Trailer {
        footer,
        blob_start,
        runtime_start,
    })
}

/// Read the embedded config blob back out of a built launcher.
pub fn read_artifact_config<P: AsRef<Path>>(path: P) -> Result<ArtifactConfig> {
    let mut file = File::open(path)?;
    let trailer = read_footer(&mut file)?;

    file.seek(SeekFrom::Start(trailer.blob_start))?;
    let mut blob = vec![0u8; trailer.footer.blob_len as usize];
    file.read_exact(&mut blob)?;
    ArtifactConfig::decode(Bytes::from(blob))
}

/// Read the runtime files embedded in a built launcher and check each one
/// against the digest table of its config blob.
pub fn read_artifact_runtime<P: AsRef<Path>>(path: P) -> Result<Vec<(String, Bytes)>> {
    let path = path.as_ref();
    let config = read_artifact_config(path)?;
    let mut file = File::open(path)?;
    let trailer = read_footer(&mut file)?;

    file.seek(SeekFrom::Start(trailer.runtime_start))?;
    let mut section = vec![0u8; trailer.footer.runtime_len as usize];
    file.read_exact(&mut section)?;

    let mut r = WireReader::new(Bytes::from(section));
    let mut files = Vec::new();
    while r.remaining() > 0 {
        let name = r.read_string(MAX_RUNTIME_PATH_LEN)?;
        let len = usize::try_from(r.read_u64()?).map_err(|_| {
            ServerError::ConfigError(format!("Runtime file '{name}' length out of range"))
        })?;
        let contents = r.read_raw(len)?;
        match config.runtime_entry(&name) {
            Some(entry) if entry.matches(&contents) => files.push((name, contents)),
            Some(_) => return Err(ServerError::VerificationFailure),
            None => {
                return Err(ServerError::ConfigError(format!(
                    "Runtime file '{name}' missing from digest table"
                )))
            }
        }
    }
    if files.len() != config.runtime.len() {
        return Err(ServerError::ConfigError(
            "Runtime section and digest table disagree".into(),
        ));
    }
    Ok(files)
}
