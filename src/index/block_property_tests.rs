//! Property-Based Tests for Logical Block Offset Encoding
//!
//! These tests validate the encode/decode bijection over a block's valid
//! offset range using property-based testing with proptest.

use super::{decode_offset, encode_offset, split_offset, OffsetDecoder};
use crate::storage::{CaseStore, MemoryCase};
use proptest::prelude::*;
use std::sync::Arc;

/// **Property: 编码/拆分互为双射**
///
/// *For any* 块号与块内偏移（偏移在块的有效范围内），
/// `split(encode(block, intra)) == (block, intra)`。
mod property_encode_split_bijection {
    use super::*;

    proptest! {
        #[test]
        fn prop_split_inverts_encode(
            block_bits in 10u32..=30,
            block in 0u64..=u32::MAX as u64,
            intra_seed in any::<u64>(),
        ) {
            let intra = intra_seed % (1u64 << block_bits);
            let encoded = encode_offset(block, intra, block_bits);
            prop_assert_eq!(split_offset(encoded, block_bits), (block, intra));
        }

        #[test]
        fn prop_distinct_offsets_encode_distinctly(
            block_bits in 10u32..=20,
            block in 0u64..1024,
            a in any::<u64>(),
            b in any::<u64>(),
        ) {
            let block_size = 1u64 << block_bits;
            let (a, b) = (a % block_size, b % block_size);
            prop_assume!(a != b);
            prop_assert_ne!(
                encode_offset(block, a, block_bits),
                encode_offset(block, b, block_bits)
            );
        }
    }
}

/// **Property: 多块对象的解码落在正确的块**
///
/// *For any* 两个对象各占若干连续块，解码任何编码偏移都回到
/// 正确的 (归属地址, 地址相对偏移)。
mod property_decode_owner {
    use super::*;

    proptest! {
        #[test]
        fn prop_decode_resolves_owner_and_local_offset(
            blocks_a in 1u64..8,
            blocks_b in 1u64..8,
            pick in any::<u64>(),
            intra_seed in any::<u64>(),
        ) {
            const BITS: u32 = 12;
            let store = MemoryCase::new();
            let a = store.add_evidence("obj-a", &b""[..]).unwrap();
            let b = store.add_evidence("obj-b", &b""[..]).unwrap();

            for _ in 0..blocks_a {
                store.allocate_block(&a).unwrap();
            }
            for _ in 0..blocks_b {
                store.allocate_block(&b).unwrap();
            }

            let total = blocks_a + blocks_b;
            let block = pick % total;
            let intra = intra_seed % (1u64 << BITS);
            let encoded = encode_offset(block, intra, BITS);

            let (address, local) = decode_offset(&store, encoded, BITS).unwrap();
            if block < blocks_a {
                prop_assert_eq!(address, a);
                prop_assert_eq!(local, (block << BITS) | intra);
            } else {
                prop_assert_eq!(address, b);
                prop_assert_eq!(local, ((block - blocks_a) << BITS) | intra);
            }
        }

        #[test]
        fn prop_cached_decoder_agrees_with_direct_decode(
            blocks in 1u64..6,
            intra_seed in any::<u64>(),
            pick in any::<u64>(),
        ) {
            const BITS: u32 = 12;
            let store = Arc::new(MemoryCase::new());
            let a = store.add_evidence("obj-a", &b""[..]).unwrap();
            for _ in 0..blocks {
                store.allocate_block(&a).unwrap();
            }

            let block = pick % blocks;
            let intra = intra_seed % (1u64 << BITS);
            let encoded = encode_offset(block, intra, BITS);

            let direct = decode_offset(&*store, encoded, BITS).unwrap();
            let decoder = OffsetDecoder::new(store.clone() as Arc<dyn CaseStore>, BITS);
            // 第二次走缓存命中路径
            prop_assert_eq!(decoder.decode(encoded).unwrap(), direct.clone());
            prop_assert_eq!(decoder.decode(encoded).unwrap(), direct);
        }
    }
}
