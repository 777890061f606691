//! Property-based tests using proptest
//!
//! Digest trees must not depend on the order entries are discovered in, and
//! the frame codec must reassemble frames however the stream is split.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::fs;

use bytes::BytesMut;
use launch_server::core::codec::FrameCodec;
use launch_server::core::frame::Frame;
use launch_server::state::{DigestAlgorithm, DigestNode};
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

fn files() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map("[a-z]{1,8}", prop::collection::vec(any::<u8>(), 0..256), 1..8)
}

// Property: children order never changes a directory digest
proptest! {
    #[test]
    fn prop_directory_digest_order_independent(
        shuffled in files().prop_flat_map(|m| {
            let entries: Vec<_> = m.into_iter().collect();
            (Just(entries.clone()), Just(entries).prop_shuffle())
        })
    ) {
        let (sorted, permuted) = shuffled;
        let leaves = |entries: &[(String, Vec<u8>)]| -> Vec<DigestNode> {
            entries
                .iter()
                .map(|(name, data)| DigestNode::from_bytes(name.clone(), data, DigestAlgorithm::Sha256))
                .collect()
        };

        let a = DigestNode::directory("root", leaves(&sorted), DigestAlgorithm::Sha256);
        let b = DigestNode::directory("root", leaves(&permuted), DigestAlgorithm::Sha256);
        prop_assert_eq!(a, b);
    }
}

// Property: creation order on disk never changes the built tree
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]
    #[test]
    fn prop_built_tree_independent_of_creation_order(entries in files()) {
        let forward = tempfile::tempdir().unwrap();
        let backward = tempfile::tempdir().unwrap();
        for (name, data) in &entries {
            fs::write(forward.path().join(name), data).unwrap();
        }
        for (name, data) in entries.iter().rev() {
            fs::write(backward.path().join(name), data).unwrap();
        }

        let a = DigestNode::build(forward.path(), DigestAlgorithm::Sha256).unwrap();
        let b = DigestNode::build(backward.path(), DigestAlgorithm::Sha256).unwrap();
        prop_assert_eq!(&a.digest, &b.digest);
        prop_assert_eq!(a.total_size(), entries.values().map(|d| d.len() as u64).sum::<u64>());
    }
}

// Property: any content change shows up in the root digest and the diff
proptest! {
    #[test]
    fn prop_content_change_detected(
        entries in files(),
        flip in any::<prop::sample::Index>(),
    ) {
        let mut changed = entries.clone();
        let key = changed.keys().nth(flip.index(changed.len())).cloned().unwrap();
        changed.get_mut(&key).unwrap().push(0xFF);

        let tree = |m: &BTreeMap<String, Vec<u8>>| {
            let children = m
                .iter()
                .map(|(name, data)| DigestNode::from_bytes(name.clone(), data, DigestAlgorithm::Sha512))
                .collect();
            DigestNode::directory("root", children, DigestAlgorithm::Sha512)
        };
        let (local, reference) = (tree(&entries), tree(&changed));
        prop_assert_ne!(&local.digest, &reference.digest);

        let diff = local.diff(&reference);
        prop_assert_eq!(diff.mismatched.len(), 1);
        prop_assert!(diff.extra.is_empty());
    }
}

// Property: frames survive arbitrary stream fragmentation
proptest! {
    #[test]
    fn prop_frames_survive_fragmentation(
        bodies in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..512), 1..6),
        chunk in 1usize..64,
    ) {
        let mut codec = FrameCodec::new();
        let mut wire = BytesMut::new();
        let frames: Vec<Frame> = bodies
            .iter()
            .enumerate()
            .map(|(i, b)| Frame::new(i as u16, b.clone()))
            .collect();
        for frame in &frames {
            codec.encode(frame.clone(), &mut wire).unwrap();
        }

        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for piece in wire.chunks(chunk) {
            buf.extend_from_slice(piece);
            while let Some(frame) = codec.decode(&mut buf).unwrap() {
                decoded.push(frame);
            }
        }
        prop_assert!(buf.is_empty());
        prop_assert_eq!(decoded, frames);
    }
}
