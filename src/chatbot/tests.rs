//! End-to-end tests for the rendering pipeline and delivery ladder.
//!
//! Run with: cargo test chatbot

use super::*;

/// Whitespace-insensitive equality: splitting may drop separator whitespace
/// at chunk boundaries but must never drop or duplicate content.
fn same_content(a: &str, b: &str) -> bool {
    let strip = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
    strip(a) == strip(b)
}

// =============================================================================
// NO-OP AND SMALL-INPUT BEHAVIOR
// =============================================================================

mod no_op_path {
    use super::*;

    #[test]
    fn test_short_input_returned_verbatim() {
        let text = "word ".repeat(100); // 500 bytes
        let chunks = render(&text, 2000, false);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, text);
        assert_eq!(chunks[0].position, ChunkPosition::Only);
    }

    #[test]
    fn test_exact_budget_is_single_chunk() {
        let text = "a".repeat(2000);
        let chunks = render(&text, 2000, false);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, text);
    }

    #[test]
    fn test_empty_input() {
        let chunks = render("", 2000, false);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "");
    }

    #[test]
    fn test_markup_untouched_on_no_op_path() {
        let text = "**bold** and `code` stay exactly as written";
        let chunks = render(text, 2000, false);
        assert_eq!(chunks[0].content, text);
        assert_eq!(chunks[0].markup_mode, MarkupMode::Rich);
    }
}

// =============================================================================
// SEGMENTATION SCENARIOS
// =============================================================================

mod segmentation {
    use super::*;

    #[test]
    fn test_two_paragraphs_one_chunk_each() {
        let para_a = "a".repeat(1200);
        let para_b = "b".repeat(1200);
        let text = format!("{para_a}\n\n{para_b}");

        let chunks = render(&text, 2000, false);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, para_a);
        assert_eq!(chunks[1].content, para_b);
        assert_eq!(chunks[0].position, ChunkPosition::First);
        assert_eq!(chunks[1].position, ChunkPosition::Last);
    }

    #[test]
    fn test_giant_unbroken_line_cut_at_exact_budget() {
        let text = "a".repeat(10_000);
        let chunks = render(&text, 2000, false);
        assert_eq!(chunks.len(), 5);
        for chunk in &chunks {
            assert_eq!(chunk.content.len(), 2000);
        }
        let joined: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn test_small_paragraphs_grouped() {
        // eight 190-byte paragraphs: fill threshold is 1600, so several
        // paragraphs share a chunk instead of going out one by one
        let para = "p".repeat(190);
        let text = vec![para.as_str(); 8].join("\n\n") + "\n\n" + &"q".repeat(1000);
        let chunks = render(&text, 2000, false);
        assert!(chunks.len() < 9);
        assert!(chunks[0].content.contains("\n\n"));
    }

    #[test]
    fn test_sentences_split_when_paragraph_oversized() {
        let sentence = "A reasonably sized sentence that ends here. ";
        let text = sentence.repeat(60); // ~2640 bytes, one paragraph
        let chunks = render(&text, 2000, false);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.content.len() <= 2000);
            // sentence boundaries respected: chunks end with punctuation
            assert!(chunk.content.trim_end().ends_with('.'));
        }
    }

    #[test]
    fn test_long_word_inside_sentence_hard_cut() {
        let blob = "x".repeat(1500);
        let text = format!("start {blob} end. And a second sentence to pad this out a bit.");
        let chunks = render(&text, 1000, false);
        // 1500 > 60% of 1000, so the blob is sliced
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.content.len() <= 1000);
        }
        let joined: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(joined.matches('x').count(), 1500);
    }

    #[test]
    fn test_concatenation_fidelity() {
        let text = format!(
            "First paragraph with words.\n\n{}\n\nThird one. With two sentences!\n\n{}",
            "Second paragraph, quite long, repeated. ".repeat(60),
            "tail-".repeat(500),
        );
        let chunks = render(&text, 1000, false);
        assert!(chunks.len() > 1);
        let joined: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        assert!(same_content(&joined.join(" "), &text));
    }

    #[test]
    fn test_headroom_leaves_room_for_annotations() {
        // paragraph/sentence/word tier chunks stay under 80% of the budget,
        // so annotated delivery text still fits
        let text = "Sentence goes here. ".repeat(300); // 6000 bytes
        let chunks = render(&text, 2000, false);
        for chunk in &chunks {
            let annotated = delivery::annotate(&chunk.content, chunk.position);
            assert!(
                annotated.len() <= 2000,
                "annotated chunk of {} bytes",
                annotated.len()
            );
        }
    }
}

// =============================================================================
// PROTECTED SPANS
// =============================================================================

mod protected_spans {
    use super::*;

    #[test]
    fn test_small_fence_never_split() {
        let fence = format!("```\n{}\n```", "fn main() {}\n".repeat(30));
        let text = format!(
            "{}\n\n{fence}\n\n{}",
            "Intro sentence here. ".repeat(90),
            "Outro sentence here. ".repeat(90)
        );
        let chunks = render(&text, 2000, false);
        let holders: Vec<_> = chunks
            .iter()
            .filter(|c| c.content.contains("fn main()"))
            .collect();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].content.matches("```").count(), 2);
    }

    #[test]
    fn test_inline_code_survives_segmentation() {
        let text = format!(
            "Mentioning `a_very_specific_symbol` early.\n\n{}",
            "Padding sentence for length. ".repeat(100)
        );
        let chunks = render(&text, 2000, false);
        let joined: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert!(joined.contains("`a_very_specific_symbol`"));
    }

    #[test]
    fn test_code_content_never_rewritten() {
        // markers inside the fence would trip the sanitizer if it saw them
        let fence = "```\nunbalanced ** and [ and * inside\n```";
        let text = format!("{fence}\n\nBroken *marker outside.\n\n{}", "pad. ".repeat(500));
        let chunks = render(&text, 2000, false);
        let joined: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert!(joined.contains("unbalanced ** and [ and * inside"));
    }

    #[test]
    fn test_oversized_fence_goes_out_whole_and_over_budget() {
        let fence = format!("```\n{}\n```", "data".repeat(750)); // ~3008 bytes
        let text = format!(
            "Here is the dump you asked for.\n\n{fence}\n\nThat was all of it. {}",
            "More words to push the total over the budget. ".repeat(50)
        );
        let chunks = render(&text, 2000, false);

        let over: Vec<_> = chunks.iter().filter(|c| c.content.len() > 2000).collect();
        assert_eq!(over.len(), 1);
        assert_eq!(over[0].content.matches("```").count(), 2);

        // everything without the oversized span still honors the budget
        for chunk in chunks.iter().filter(|c| c.content.len() <= 2000) {
            assert!(!chunk.content.contains("data"));
        }
    }
}

// =============================================================================
// MARKUP MODES AND THE DELIVERY LADDER
// =============================================================================

mod delivery_ladder {
    use super::*;
    use crate::chatbot::delivery::DeliveryState;

    #[test]
    fn test_balanced_chunk_is_rich() {
        let chunks = render("all **good** here", 2000, false);
        assert_eq!(chunks[0].markup_mode, MarkupMode::Rich);
    }

    #[test]
    fn test_repairable_chunk_is_rich() {
        // dangling bold opener: the sanitizer can fix this
        let chunks = render("**dangling bold opener", 2000, false);
        assert_eq!(chunks[0].markup_mode, MarkupMode::Rich);
        // but the first rung is the sanitizer, not a raw rich attempt
        assert_eq!(
            delivery::initial_state(&chunks[0].content),
            DeliveryState::TrySanitized
        );
        let cleaned = markup::sanitize_outside_code(&chunks[0].content);
        assert!(markup::is_balanced(&cleaned));
    }

    #[test]
    fn test_unrepairable_chunk_is_plain() {
        // the sanitizer does not touch parentheses
        let text = "broken (paren and *odd marker";
        let chunks = render(text, 2000, false);
        assert_eq!(chunks[0].markup_mode, MarkupMode::Plain);
    }

    #[test]
    fn test_rich_chunks_pass_the_checker() {
        let text = format!(
            "Some **bold** and a [link](https://example.com).\n\n{}",
            "More balanced *markup* in every sentence. ".repeat(100)
        );
        for chunk in render(&text, 2000, false) {
            if chunk.markup_mode == MarkupMode::Rich {
                let (placeholder, _) = spans::extract(&chunk.content);
                assert!(
                    markup::is_balanced(&placeholder)
                        || markup::is_balanced(&markup::sanitize(&placeholder))
                );
            }
        }
    }

    #[test]
    fn test_plain_degrade_is_total() {
        for nasty in [
            "",
            "***",
            "`",
            "[[[((()))]]]",
            "**_*_*_*",
            &"*".repeat(10_000),
        ] {
            let out = degrade::degrade(nasty);
            // no active markup left
            assert!(!out.contains('*'), "input: {nasty:?}");
            assert!(!out.contains('`'), "input: {nasty:?}");
        }
    }

    #[test]
    fn test_degraded_chunk_has_no_markup() {
        let text = "# Title\n\n> quote\n\n- item\n\n**bold** `code` [label](url)";
        let out = degrade::degrade(text);
        assert!(out.contains("➤ Title"));
        assert!(out.contains("💬 quote"));
        assert!(out.contains("• item"));
        assert!(out.contains("«bold»"));
        assert!(out.contains("‹code›"));
        assert!(!out.contains("url"));
    }
}

// =============================================================================
// CONTINUATION ANNOTATIONS
// =============================================================================

mod annotations {
    use super::*;

    #[test]
    fn test_single_chunk_not_annotated() {
        let chunks = render("short", 2000, false);
        assert_eq!(
            delivery::annotate(&chunks[0].content, chunks[0].position),
            "short"
        );
    }

    #[test]
    fn test_two_chunk_annotations() {
        let text = format!("{}\n\n{}", "a".repeat(1200), "b".repeat(1200));
        let chunks = render(&text, 2000, false);
        assert_eq!(chunks.len(), 2);

        let first = delivery::annotate(&chunks[0].content, chunks[0].position);
        let last = delivery::annotate(&chunks[1].content, chunks[1].position);
        assert!(first.ends_with(delivery::CONTINUED_TAIL));
        assert!(!first.starts_with(delivery::CONTINUED_HEAD));
        assert!(last.starts_with(delivery::CONTINUED_HEAD));
        assert!(!last.ends_with(delivery::CONTINUED_TAIL));
    }

    #[test]
    fn test_middle_chunks_annotated_both_ways() {
        let text = [
            "a".repeat(1200),
            "b".repeat(1200),
            "c".repeat(1200),
        ]
        .join("\n\n");
        let chunks = render(&text, 2000, false);
        assert!(chunks.len() >= 3);
        let mid = delivery::annotate(&chunks[1].content, chunks[1].position);
        assert!(mid.starts_with(delivery::CONTINUED_HEAD));
        assert!(mid.ends_with(delivery::CONTINUED_TAIL));
    }

    #[test]
    fn test_stripping_annotations_recovers_content() {
        let text = format!("{}\n\n{}", "a".repeat(1200), "b".repeat(1200));
        let chunks = render(&text, 2000, false);
        let recovered: Vec<String> = chunks
            .iter()
            .map(|c| {
                delivery::annotate(&c.content, c.position)
                    .replace(delivery::CONTINUED_HEAD, "")
                    .replace(delivery::CONTINUED_TAIL, "")
                    .trim()
                    .to_string()
            })
            .collect();
        assert!(same_content(&recovered.join(" "), &text));
    }
}

// =============================================================================
// ATTACHMENT FLAGGING
// =============================================================================

mod attachments {
    use super::*;

    #[test]
    fn test_attachment_rides_the_last_chunk() {
        let text = format!("{}\n\n{}", "a".repeat(1200), "b".repeat(1200));
        let chunks = render(&text, 2000, true);
        assert!(!chunks[0].carries_attachment);
        assert!(chunks[1].carries_attachment);
    }

    #[test]
    fn test_single_chunk_carries_attachment() {
        let chunks = render("short reply", 2000, true);
        assert!(chunks[0].carries_attachment);
    }

    #[test]
    fn test_no_attachment_no_flags() {
        let text = format!("{}\n\n{}", "a".repeat(1200), "b".repeat(1200));
        assert!(render(&text, 2000, false).iter().all(|c| !c.carries_attachment));
    }
}

// =============================================================================
// BUDGET PROPERTY
// =============================================================================

mod budget {
    use super::*;

    #[test]
    fn test_budget_holds_without_oversized_spans() {
        let text = format!(
            "{}\n\n```\n{}\n```\n\n{}",
            "Opening prose with sentences. ".repeat(100),
            "short code\n".repeat(20),
            "Closing prose with sentences. ".repeat(100)
        );
        for chunk in render(&text, 2000, false) {
            assert!(chunk.content.len() <= 2000);
        }
    }

    #[test]
    fn test_various_budgets() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(200);
        for limit in [128, 500, 1000, 4000] {
            for chunk in render(&text, limit, false) {
                assert!(
                    chunk.content.len() <= limit,
                    "budget {limit}, chunk {}",
                    chunk.content.len()
                );
            }
        }
    }

    #[test]
    fn test_multibyte_text_respects_boundaries() {
        let text = "много букв и слов здесь написано подряд без остановки. ".repeat(100);
        for chunk in render(&text, 500, false) {
            assert!(chunk.content.len() <= 500);
            assert!(chunk.content.is_char_boundary(chunk.content.len()));
        }
    }
}
