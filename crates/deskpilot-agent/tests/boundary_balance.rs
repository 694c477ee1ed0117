//! Property: for any chunk sequence, boundary ends equal boundary starts,
//! every end matches the most recent unmatched start, and same-shape runs
//! collapse into single log entries.

use std::sync::Arc;

use deskpilot_agent::ChatEngine;
use deskpilot_core::{Boundary, Chunk, ChunkKind, EngineConfig, Role, StreamEvent};
use deskpilot_llm::ScriptedSource;
use proptest::prelude::*;

fn quiet_config() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.capture.enabled = false;
    cfg.conversation.history = false;
    cfg
}

fn role_strategy() -> impl Strategy<Value = Role> {
    prop_oneof![
        Just(Role::User),
        Just(Role::Assistant),
        Just(Role::Computer),
    ]
}

fn chunk_strategy() -> impl Strategy<Value = Chunk> {
    prop_oneof![
        (role_strategy(), "[a-z ]{0,6}").prop_map(|(role, text)| Chunk::text(role, text)),
        (
            role_strategy(),
            prop_oneof![Just(None), Just(Some("python")), Just(Some("shell"))],
            "[a-z]{1,6}"
        )
            .prop_map(|(role, format, content)| Chunk {
                role,
                kind: ChunkKind::Code,
                format: format.map(str::to_string),
                content: Some(content),
            }),
        "[a-z]{0,6}".prop_map(Chunk::console_output),
        (1u32..9).prop_map(Chunk::active_line),
        Just(Chunk::run_complete()),
        (role_strategy(), "[a-z]{1,6}")
            .prop_map(|(role, content)| Chunk::confirmation(role, content)),
        (role_strategy(), "[a-z]{1,6}").prop_map(|(role, content)| Chunk {
            role,
            kind: ChunkKind::Review,
            format: None,
            content: Some(content),
        }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn boundary_ends_match_their_starts(chunks in prop::collection::vec(chunk_strategy(), 0..40)) {
        let workspace = tempfile::tempdir().expect("workspace");
        let engine = ChatEngine::with_config(
            workspace.path(),
            quiet_config(),
            Arc::new(ScriptedSource::single(chunks)),
        )
        .expect("engine");

        let events: Vec<StreamEvent> = engine
            .chat_stream(Some("go".into()))
            .expect("stream")
            .collect::<Result<Vec<_>, _>>()
            .expect("events");

        let mut open: Option<Boundary> = None;
        let mut starts = 0_usize;
        let mut ends = 0_usize;
        for event in events {
            match event {
                StreamEvent::Start(boundary) => {
                    prop_assert!(open.is_none(), "start emitted over an open boundary");
                    open = Some(boundary);
                    starts += 1;
                }
                StreamEvent::End(boundary) => {
                    prop_assert_eq!(open.take(), Some(boundary));
                    ends += 1;
                }
                _ => {}
            }
        }
        prop_assert!(open.is_none(), "cycle finished with an unclosed boundary");
        prop_assert_eq!(starts, ends);
    }

    #[test]
    fn same_shape_runs_collapse_into_one_entry(
        role in role_strategy(),
        pieces in prop::collection::vec("[a-z]{1,5}", 1..10),
    ) {
        let workspace = tempfile::tempdir().expect("workspace");
        let chunks: Vec<Chunk> = pieces.iter().map(|p| Chunk::text(role, p.clone())).collect();
        let engine = ChatEngine::with_config(
            workspace.path(),
            quiet_config(),
            Arc::new(ScriptedSource::single(chunks)),
        )
        .expect("engine");

        let appended = engine.chat(Some("go".into())).expect("chat");
        prop_assert_eq!(appended.len(), 1);
        prop_assert_eq!(appended[0].content(), pieces.concat());
    }
}
