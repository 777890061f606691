//! # Snapshot Store
//!
//! Published, immutable views of the signed update sets and profiles.
//!
//! A resync walks the updates and profiles directories, signs what it finds
//! and swaps a brand-new [`Snapshot`] in place of the old one. Readers clone
//! an `Arc` to the current snapshot and keep using it for as long as they
//! like; the write lock is only held for the pointer swap itself, never
//! during filesystem or signing work.
//!
//! ## Incremental resync
//! When a set of changed names is given, update sets outside that set that
//! already have an envelope in the previous snapshot are carried over as the
//! same `Arc`, skipping the rehash and the signature. Sets are only ever
//! taken from the current directory listing, so a deleted set disappears even
//! if it was not named as changed.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, TryLockError};

use tracing::{debug, info, instrument, warn};

use crate::error::{Result, ServerError};
use crate::state::digest_tree::{is_hidden, visible_name, DigestAlgorithm, DigestNode};
use crate::state::envelope::SignedEnvelope;
use crate::state::keys::ServerKeyPair;
use crate::state::profile::Profile;

pub type UpdateEnvelope = Arc<SignedEnvelope<DigestNode>>;
pub type ProfileEnvelope = Arc<SignedEnvelope<Profile>>;

/// Point-in-time view of everything the server distributes.
#[derive(Debug, Default)]
pub struct Snapshot {
    generation: u64,
    updates: BTreeMap<String, UpdateEnvelope>,
    profiles: Vec<ProfileEnvelope>,
}

impl Snapshot {
    /// Strictly increases with every publication; 0 is the empty startup view.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn updates(&self) -> &BTreeMap<String, UpdateEnvelope> {
        &self.updates
    }

    pub fn update(&self, name: &str) -> Option<&UpdateEnvelope> {
        self.updates.get(name)
    }

    pub fn update_names(&self) -> impl Iterator<Item = &str> {
        self.updates.keys().map(String::as_str)
    }

    /// Signed profiles in display order.
    pub fn profiles(&self) -> &[ProfileEnvelope] {
        &self.profiles
    }
}

/// What a resync did, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResyncReport {
    pub generation: u64,
    pub rehashed: Vec<String>,
    pub reused: Vec<String>,
    pub removed: Vec<String>,
    pub profiles: Option<usize>,
}

pub struct SnapshotStore {
    updates_dir: PathBuf,
    profiles_dir: PathBuf,
    algorithm: DigestAlgorithm,
    keys: Arc<ServerKeyPair>,
    current: RwLock<Arc<Snapshot>>,
    resync_gate: Mutex<()>,
}

impl SnapshotStore {
    pub fn new(
        updates_dir: impl Into<PathBuf>,
        profiles_dir: impl Into<PathBuf>,
        algorithm: DigestAlgorithm,
        keys: Arc<ServerKeyPair>,
    ) -> Self {
        Self {
            updates_dir: updates_dir.into(),
            profiles_dir: profiles_dir.into(),
            algorithm,
            keys,
            current: RwLock::new(Arc::new(Snapshot::default())),
            resync_gate: Mutex::new(()),
        }
    }

    pub fn updates_dir(&self) -> &Path {
        &self.updates_dir
    }

    pub fn profiles_dir(&self) -> &Path {
        &self.profiles_dir
    }

    pub fn keys(&self) -> &Arc<ServerKeyPair> {
        &self.keys
    }

    /// Currently published snapshot.
    pub fn current(&self) -> Arc<Snapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recompute updates and profiles and publish them together.
    ///
    /// `changed == None` rehashes every update set. Any failure leaves the
    /// previous snapshot published.
    #[instrument(skip(self, changed), fields(full = changed.is_none()))]
    pub fn resync(&self, changed: Option<&HashSet<String>>) -> Result<ResyncReport> {
        let _gate = self.enter()?;
        let prior = self.current();

        let mut report = ResyncReport::default();
        let updates = self.sync_updates(&prior, changed, &mut report)?;
        let profiles = self.sync_profiles()?;
        report.profiles = Some(profiles.len());

        report.generation = self.publish(Some(updates), Some(profiles));
        info!(
            generation = report.generation,
            rehashed = report.rehashed.len(),
            reused = report.reused.len(),
            removed = report.removed.len(),
            "Snapshot published"
        );
        Ok(report)
    }

    /// Recompute update sets only; profiles are carried over.
    #[instrument(skip(self, changed), fields(full = changed.is_none()))]
    pub fn resync_updates(&self, changed: Option<&HashSet<String>>) -> Result<ResyncReport> {
        let _gate = self.enter()?;
        let prior = self.current();

        let mut report = ResyncReport::default();
        let updates = self.sync_updates(&prior, changed, &mut report)?;
        report.generation = self.publish(Some(updates), None);
        info!(generation = report.generation, "Update sets published");
        Ok(report)
    }

    /// Recompute profiles only; update sets are carried over.
    #[instrument(skip(self))]
    pub fn resync_profiles(&self) -> Result<ResyncReport> {
        let _gate = self.enter()?;
        let profiles = self.sync_profiles()?;
        let count = profiles.len();
        let generation = self.publish(None, Some(profiles));
        info!(generation, profiles = count, "Profiles published");
        Ok(ResyncReport {
            generation,
            profiles: Some(count),
            ..ResyncReport::default()
        })
    }

    fn enter(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        match self.resync_gate.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Err(ServerError::ResyncInProgress),
        }
    }

    fn sync_updates(
        &self,
        prior: &Snapshot,
        changed: Option<&HashSet<String>>,
        report: &mut ResyncReport,
    ) -> Result<BTreeMap<String, UpdateEnvelope>> {
        info!(dir = %self.updates_dir.display(), "Syncing updates dir");
        let mut next = BTreeMap::new();

        for entry in fs::read_dir(&self.updates_dir)? {
            let entry = entry?;
            let Some(name) = visible_name(&entry) else {
                continue;
            };
            let path = entry.path();
            if !fs::metadata(&path)?.is_dir() {
                warn!(name = %name, "Not an update dir, skipping");
                continue;
            }

            if let Some(changed) = changed {
                if !changed.contains(&name) {
                    if let Some(envelope) = prior.updates.get(&name) {
                        debug!(name = %name, "Reusing signed update dir");
                        next.insert(name.clone(), Arc::clone(envelope));
                        report.reused.push(name);
                        continue;
                    }
                }
            }

            info!(name = %name, "Syncing update dir");
            let tree = DigestNode::build(&path, self.algorithm)?;
            let envelope = SignedEnvelope::create(&tree, self.keys.signing_key())?;
            next.insert(name.clone(), Arc::new(envelope));
            report.rehashed.push(name);
        }

        report.removed = prior
            .updates
            .keys()
            .filter(|name| !next.contains_key(*name))
            .cloned()
            .collect();
        report.rehashed.sort();
        report.reused.sort();
        Ok(next)
    }

    fn sync_profiles(&self) -> Result<Vec<ProfileEnvelope>> {
        info!(dir = %self.profiles_dir.display(), "Syncing profiles dir");
        let mut files = Vec::new();
        collect_profile_files(&self.profiles_dir, &mut files)?;

        let mut loaded = Vec::with_capacity(files.len());
        for file in files {
            debug!(file = %file.display(), "Syncing profile");
            let profile = Profile::load(&file)?;
            let envelope = SignedEnvelope::create(&profile, self.keys.signing_key())?;
            loaded.push((profile, Arc::new(envelope)));
        }

        loaded.sort_by(|(a, _), (b, _)| a.sort_key().cmp(&b.sort_key()));
        Ok(loaded.into_iter().map(|(_, envelope)| envelope).collect())
    }

    fn publish(
        &self,
        updates: Option<BTreeMap<String, UpdateEnvelope>>,
        profiles: Option<Vec<ProfileEnvelope>>,
    ) -> u64 {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let generation = current.generation + 1;
        let next = Snapshot {
            generation,
            updates: updates.unwrap_or_else(|| current.updates.clone()),
            profiles: profiles.unwrap_or_else(|| current.profiles.clone()),
        };
        *current = Arc::new(next);
        generation
    }
}

fn collect_profile_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        if is_hidden(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let path = entry.path();
        let meta = fs::metadata(&path)?;
        if meta.is_dir() {
            collect_profile_files(&path, out)?;
        } else if meta.is_file() {
            out.push(path);
        }
    }
    Ok(())
}
