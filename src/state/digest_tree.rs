//! # Digest Trees
//!
//! Content-addressed summaries of directory trees.
//!
//! A file's digest is the hash of its bytes. A directory's digest is the hash
//! of its children's `(kind, name, digest)` tuples taken in name order, so two
//! trees with the same names and contents always hash the same no matter how
//! the filesystem enumerates them. Comparing root digests is enough to tell
//! whether a client's copy of an update set is current; [`DigestNode::diff`]
//! narrows a mismatch down to the files that must be fetched.
//!
//! Hidden entries (names starting with `.`) are skipped. The walk is
//! fail-fast: any unreadable entry aborts the build and no partial tree is
//! returned.

use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256, Sha512};
use tracing::{debug, instrument, warn};

use crate::error::Result;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Hash function used for file contents and directory summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    /// Output width in bytes.
    pub fn output_len(self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha512 => 64,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha512 => "SHA-512",
        }
    }

    fn hasher(self) -> Hasher {
        match self {
            DigestAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            DigestAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }
}

enum Hasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    fn finish(self) -> Vec<u8> {
        match self {
            Hasher::Sha256(h) => h.finalize().to_vec(),
            Hasher::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// Whether a node is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    File,
    Directory,
}

impl NodeKind {
    fn tag(self) -> u8 {
        match self {
            NodeKind::File => 0,
            NodeKind::Directory => 1,
        }
    }
}

/// One entry of a digest tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestNode {
    pub name: String,
    pub kind: NodeKind,
    pub digest: Vec<u8>,
    /// Byte size, files only
    pub size: u64,
    /// Sorted by name, directories only
    pub children: Vec<DigestNode>,
}

/// Files that differ between two trees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeDiff {
    /// Present in the reference tree but missing or different locally
    pub mismatched: Vec<PathBuf>,
    /// Present locally but absent from the reference tree
    pub extra: Vec<PathBuf>,
}

impl TreeDiff {
    pub fn is_empty(&self) -> bool {
        self.mismatched.is_empty() && self.extra.is_empty()
    }
}

impl DigestNode {
    /// Hash the directory tree rooted at `root`.
    #[instrument(skip(algorithm), fields(root = %root.as_ref().display()))]
    pub fn build<P: AsRef<Path>>(root: P, algorithm: DigestAlgorithm) -> Result<Self> {
        let root = root.as_ref();
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let node = build_dir(root, name, algorithm)?;
        debug!(digest = %node.digest_hex(), "Digest tree built");
        Ok(node)
    }

    /// Leaf node for file contents held in memory.
    pub fn from_bytes(name: impl Into<String>, data: &[u8], algorithm: DigestAlgorithm) -> Self {
        let mut hasher = algorithm.hasher();
        hasher.update(data);
        Self {
            name: name.into(),
            kind: NodeKind::File,
            digest: hasher.finish(),
            size: data.len() as u64,
            children: Vec::new(),
        }
    }

    /// Directory node over already-built children.
    pub fn directory(
        name: impl Into<String>,
        mut children: Vec<DigestNode>,
        algorithm: DigestAlgorithm,
    ) -> Self {
        children.sort_by(|a, b| a.name.cmp(&b.name));
        let digest = combine(&children, algorithm);
        Self {
            name: name.into(),
            kind: NodeKind::Directory,
            digest,
            size: 0,
            children,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    pub fn digest_hex(&self) -> String {
        hex::encode(&self.digest)
    }

    /// Sum of file sizes below this node.
    pub fn total_size(&self) -> u64 {
        match self.kind {
            NodeKind::File => self.size,
            NodeKind::Directory => self.children.iter().map(DigestNode::total_size).sum(),
        }
    }

    /// Look up a descendant by relative path.
    pub fn find<P: AsRef<Path>>(&self, path: P) -> Option<&DigestNode> {
        let mut node = self;
        for component in path.as_ref().components() {
            let name = component.as_os_str().to_str()?;
            node = node
                .children
                .binary_search_by(|c| c.name.as_str().cmp(name))
                .ok()
                .map(|i| &node.children[i])?;
        }
        Some(node)
    }

    /// Compare a local tree (`self`) against a reference tree.
    pub fn diff(&self, reference: &DigestNode) -> TreeDiff {
        let mut out = TreeDiff::default();
        diff_into(Some(self), reference, PathBuf::new(), &mut out);
        out
    }
}

impl fmt::Display for DigestNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.digest_hex())
    }
}

pub(crate) fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Name of a directory entry that takes part in hashing. Hidden entries and
/// names that are not valid UTF-8 yield `None`.
pub(crate) fn visible_name(entry: &fs::DirEntry) -> Option<String> {
    match entry.file_name().into_string() {
        Ok(name) if is_hidden(&name) => None,
        Ok(name) => Some(name),
        Err(raw) => {
            warn!(path = %entry.path().display(), name = ?raw, "Skipping entry with non-UTF-8 name");
            None
        }
    }
}

fn build_dir(dir: &Path, name: String, algorithm: DigestAlgorithm) -> Result<DigestNode> {
    let mut children = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Some(child_name) = visible_name(&entry) else {
            continue;
        };

        let path = entry.path();
        let meta = fs::metadata(&path)?;
        if meta.is_dir() {
            children.push(build_dir(&path, child_name, algorithm)?);
        } else if meta.is_file() {
            children.push(hash_file(&path, child_name, algorithm)?);
        }
    }
    Ok(DigestNode::directory(name, children, algorithm))
}

fn hash_file(path: &Path, name: String, algorithm: DigestAlgorithm) -> Result<DigestNode> {
    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, File::open(path)?);
    let mut hasher = algorithm.hasher();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut size = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok(DigestNode {
        name,
        kind: NodeKind::File,
        digest: hasher.finish(),
        size,
        children: Vec::new(),
    })
}

/// Directory digest over name-sorted children.
fn combine(children: &[DigestNode], algorithm: DigestAlgorithm) -> Vec<u8> {
    let mut hasher = algorithm.hasher();
    for child in children {
        hasher.update(&[child.kind.tag()]);
        hasher.update(&(child.name.len() as u32).to_be_bytes());
        hasher.update(child.name.as_bytes());
        hasher.update(&child.digest);
    }
    hasher.finish()
}

fn diff_into(local: Option<&DigestNode>, reference: &DigestNode, path: PathBuf, out: &mut TreeDiff) {
    match (local, reference.kind) {
        (Some(l), _) if l.kind == reference.kind && l.digest == reference.digest => {}
        (Some(l), NodeKind::Directory) if l.is_dir() => {
            for child in &reference.children {
                diff_into(l.find(&child.name), child, path.join(&child.name), out);
            }
            for child in &l.children {
                if reference.find(&child.name).is_none() {
                    collect_files(child, path.join(&child.name), &mut out.extra);
                }
            }
        }
        (Some(l), NodeKind::File) if !l.is_dir() => out.mismatched.push(path),
        (Some(l), _) => {
            collect_files(l, path.clone(), &mut out.extra);
            collect_files(reference, path, &mut out.mismatched);
        }
        (None, _) => collect_files(reference, path, &mut out.mismatched),
    }
}

fn collect_files(node: &DigestNode, path: PathBuf, into: &mut Vec<PathBuf>) {
    match node.kind {
        NodeKind::File => into.push(path),
        NodeKind::Directory => {
            for child in &node.children {
                collect_files(child, path.join(&child.name), into);
            }
        }
    }
}
