//! Property-based tests for the chunker, mirroring the teacher's
//! proptest-based integration tests for invariants over random inputs

use proptest::prelude::*;
use wherespace::chunker::Chunker;
use wherespace::config::ChunkingConfig;

prop_compose! {
    fn arb_chunking_config()(
        chunk_size in 20usize..200,
        chunk_overlap in 0usize..20,
    ) -> ChunkingConfig {
        ChunkingConfig { chunk_size, chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1).max(1)) }
    }
}

proptest! {
    #[test]
    fn chunks_never_exceed_size_plus_overlap(
        config in arb_chunking_config(),
        text in "[a-zA-Z0-9 .,\n]{0,2000}",
    ) {
        let chunker = Chunker::new(config.clone());
        let chunks = chunker.chunk(&text);
        for chunk in &chunks {
            prop_assert!(chunk.chars().count() <= config.chunk_size + config.chunk_overlap);
        }
    }

    #[test]
    fn chunking_is_deterministic(
        config in arb_chunking_config(),
        text in "[a-zA-Z0-9 .,\n]{0,2000}",
    ) {
        let chunker = Chunker::new(config);
        let first = chunker.chunk(&text);
        let second = chunker.chunk(&text);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn no_empty_or_whitespace_only_chunks(
        config in arb_chunking_config(),
        text in "[a-zA-Z0-9 .,\n]{0,2000}",
    ) {
        let chunker = Chunker::new(config);
        let chunks = chunker.chunk(&text);
        for chunk in &chunks {
            prop_assert!(!chunk.trim().is_empty());
        }
    }
}
