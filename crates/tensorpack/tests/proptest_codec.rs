//! Property-based tests for the container codec and the shard planner.
//!
//! - Any tensor set with any string metadata survives encode/decode
//! - Decoding arbitrary bytes never panics
//! - Planned shards respect the budget unless a tensor is oversized

use std::collections::BTreeMap;

use proptest::prelude::*;

use tensorpack::{decode, encode, plan_shards, DType, Metadata, TensorBuffer};

/// Strategy for a dtype.
fn dtype_strategy() -> impl Strategy<Value = DType> {
    prop::sample::select(DType::ALL.to_vec())
}

/// Strategy for a small shape, including scalars and zero dimensions.
fn shape_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0usize..5, 0..4)
}

/// Strategy for a tensor with random bytes of the right length.
fn tensor_strategy() -> impl Strategy<Value = TensorBuffer> {
    (dtype_strategy(), shape_strategy()).prop_flat_map(|(dtype, shape)| {
        let len = dtype.size() * shape.iter().product::<usize>();
        prop::collection::vec(any::<u8>(), len)
            .prop_map(move |data| TensorBuffer::new(dtype, shape.clone(), data).unwrap())
    })
}

/// Strategy for tensor names that never collide with the metadata key.
fn name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_.]{0,12}"
}

/// Strategy for a non-empty tensor map.
fn tensors_strategy() -> impl Strategy<Value = BTreeMap<String, TensorBuffer>> {
    prop::collection::btree_map(name_strategy(), tensor_strategy(), 1..8)
}

/// Strategy for optional string metadata.
fn metadata_strategy() -> impl Strategy<Value = Option<Metadata>> {
    prop::option::of(prop::collection::btree_map(".{0,8}", ".{0,16}", 0..4))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 100,
        ..ProptestConfig::default()
    })]

    /// Property: decode(encode(T, M)) returns T and M unchanged.
    #[test]
    fn prop_round_trip(tensors in tensors_strategy(), metadata in metadata_strategy()) {
        let bytes = encode(&tensors, metadata.as_ref()).unwrap();
        let container = decode(&bytes).unwrap();

        prop_assert_eq!(container.metadata(), metadata.as_ref());
        prop_assert_eq!(container.len(), tensors.len());
        for (name, expected) in &tensors {
            let view = container.tensor(name).unwrap();
            prop_assert_eq!(view.dtype(), expected.dtype());
            prop_assert_eq!(view.shape(), expected.shape());
            prop_assert_eq!(view.data(), expected.data());
        }
    }

    /// Property: encoding is independent of input order.
    #[test]
    fn prop_encode_is_deterministic(tensors in tensors_strategy()) {
        let forward = encode(&tensors, None).unwrap();
        let reversed: Vec<_> = tensors.iter().rev().collect();
        let backward = encode(reversed, None).unwrap();
        prop_assert_eq!(forward, backward);
    }

    /// Property: arbitrary input is rejected or accepted, never a panic.
    #[test]
    fn prop_decode_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = decode(&bytes);
    }

    /// Property: corrupting the length prefix never yields a container that
    /// reads outside the buffer.
    #[test]
    fn prop_decode_corrupted_prefix(tensors in tensors_strategy(), declared in any::<u64>()) {
        let mut bytes = encode(&tensors, None).unwrap();
        bytes[..8].copy_from_slice(&declared.to_le_bytes());
        if let Ok(container) = decode(&bytes) {
            for (_, view) in container.tensors().flatten() {
                prop_assert!(view.data().len() <= container.data_len());
            }
        }
    }

    /// Property: every planned shard fits the budget or holds one oversized
    /// tensor, and every tensor lands in exactly one shard.
    #[test]
    fn prop_planner_budget(
        sizes in prop::collection::vec(0usize..1_000, 1..32),
        budget in 1u64..2_000,
    ) {
        let tensors: Vec<(String, TensorBuffer)> = sizes
            .iter()
            .enumerate()
            .map(|(i, &n)| (format!("t{i:03}"), TensorBuffer::zeros(DType::U8, vec![n]).unwrap()))
            .collect();

        let groups = plan_shards(tensors.iter().map(|(n, t)| (n, t)), budget).unwrap();

        let mut seen = 0;
        for group in &groups {
            prop_assert!(!group.is_empty());
            prop_assert!(group.byte_len() <= budget || group.len() == 1);
            seen += group.len();
        }
        prop_assert_eq!(seen, tensors.len());

        let total: u64 = groups.iter().map(|g| g.byte_len()).sum();
        prop_assert_eq!(total, sizes.iter().map(|&n| n as u64).sum::<u64>());
    }
}
