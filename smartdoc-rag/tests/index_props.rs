//! Property tests for vector index search and retrieval bounds.

use std::sync::Arc;

use proptest::prelude::*;
use smartdoc_rag::testing::HashEmbedder;
use smartdoc_rag::{Retriever, VectorIndex};

const DIM: usize = 64;

fn arb_texts() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec("[a-z]{2,6}( [a-z]{2,6}){0,5}", 1..20)
}

/// Search results come back closest first, at most `k` of them, and never
/// more than the index holds.
mod prop_search_ordering {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn results_ordered_descending_and_bounded(
            texts in arb_texts(),
            query in "[a-z]{2,6}( [a-z]{2,6}){0,3}",
            k in 1usize..25,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let temp = tempfile::tempdir().unwrap();
            let results = rt.block_on(async {
                let mut index =
                    VectorIndex::create(temp.path().join("i"), Arc::new(HashEmbedder::new(DIM)))
                        .await
                        .unwrap();
                index.insert(&texts, Some("doc.txt")).await.unwrap();
                index.similarity_search(&query, k).await.unwrap()
            });

            prop_assert_eq!(results.len(), k.min(texts.len()));
            let scores: Vec<f32> = results.iter().map(|r| r.metadata.score.unwrap()).collect();
            for pair in scores.windows(2) {
                prop_assert!(pair[0] >= pair[1], "scores not descending: {:?}", scores);
            }
            for score in &scores {
                prop_assert!((0.0..=1.0).contains(score));
            }
        }

        #[test]
        fn exact_text_scores_as_top_hit(
            texts in arb_texts(),
            pick in any::<prop::sample::Index>(),
        ) {
            let target = pick.get(&texts).clone();
            let rt = tokio::runtime::Runtime::new().unwrap();
            let temp = tempfile::tempdir().unwrap();
            let top = rt.block_on(async {
                let mut index =
                    VectorIndex::create(temp.path().join("i"), Arc::new(HashEmbedder::new(DIM)))
                        .await
                        .unwrap();
                index.insert(&texts, None).await.unwrap();
                index.similarity_search(&target, 1).await.unwrap()
            });

            prop_assert_eq!(top.len(), 1);
            prop_assert!(top[0].metadata.score.unwrap() > 0.999);
        }

        #[test]
        fn retriever_never_requests_more_than_stored(
            texts in arb_texts(),
            default_k in 0usize..30,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let temp = tempfile::tempdir().unwrap();
            let (effective, retrieved) = rt.block_on(async {
                let mut index =
                    VectorIndex::create(temp.path().join("i"), Arc::new(HashEmbedder::new(DIM)))
                        .await
                        .unwrap();
                index.insert(&texts, None).await.unwrap();
                let retriever = Retriever::new(default_k);
                let retrieved = retriever.retrieve(Some(&index), "anything at all").await;
                (retriever.effective_k(&index), retrieved.len())
            });

            prop_assert!(effective >= 1);
            prop_assert!(effective <= texts.len());
            prop_assert_eq!(retrieved, effective);
        }
    }
}
