//! Integration tests for streaming deck reconstruction.

use bytes::Bytes;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use slide_stream::mocks::fixtures;
use slide_stream::streaming::SessionStats;
use slide_stream::transport::{ByteStream, TransportError};
use slide_stream::{
    DeckEvent, DeckEventStream, DeckSession, FrameFormat, SessionOptions, SessionState,
    SlideStreamError, SnapshotMode,
};
use std::time::Duration;
use test_case::test_case;

fn kinds(events: &[DeckEvent]) -> Vec<&'static str> {
    events.iter().map(DeckEvent::kind).collect()
}

fn slide_indices(events: &[DeckEvent]) -> Vec<usize> {
    events
        .iter()
        .filter_map(|event| match event {
            DeckEvent::Slide { index, .. } => Some(*index),
            _ => None,
        })
        .collect()
}

fn completed_slide_count(events: &[DeckEvent]) -> Option<usize> {
    events.iter().find_map(|event| match event {
        DeckEvent::Complete { data } => Some(data.slide_count()),
        _ => None,
    })
}

/// Feeds `chunks` into a fresh session and closes it.
fn run_session(options: SessionOptions, chunks: &[Vec<u8>]) -> (Vec<DeckEvent>, DeckSession) {
    let mut session = DeckSession::new(options);
    let mut events = Vec::new();
    for chunk in chunks {
        events.extend(session.push_bytes(chunk));
    }
    events.extend(session.finish());
    (events, session)
}

fn body(chunks: Vec<Result<Vec<u8>, TransportError>>) -> ByteStream {
    Box::pin(futures::stream::iter(
        chunks
            .into_iter()
            .map(|chunk| chunk.map(Bytes::from))
            .collect::<Vec<_>>(),
    ))
}

#[test]
fn test_three_chunks_emit_theme_once_object_balances() {
    // Arrange
    let mut session = DeckSession::new(SessionOptions::new(FrameFormat::Plain));

    // Act
    let first = session.push_text(r#"{"designTheme":{"nam"#);
    let second = session.push_text(r#"e":"Blue"},"slides":[{"title":"A"}"#);
    let third = session.push_text(r#",{"title":"B"}]}"#);
    let last = session.finish();

    // Assert
    assert!(first.is_empty());
    assert!(second.is_empty());
    assert_eq!(kinds(&third), vec!["theme", "slide", "slide"]);
    assert_eq!(kinds(&last), vec!["complete", "done"]);
    match &third[0] {
        DeckEvent::Theme { theme, .. } => assert_eq!(theme.name(), Some("Blue")),
        other => panic!("expected theme, got {:?}", other),
    }
    assert_eq!(slide_indices(&third), vec![0, 1]);
}

#[test]
fn test_single_shot_buffer_with_sentinel() {
    // Arrange
    let mut session = DeckSession::new(SessionOptions::new(FrameFormat::Plain));
    let input =
        r##"{"designTheme":{"colorPrimary":"#000"},"slides":[{"title":"X","content":["a"]}]}[DONE]"##;

    // Act
    let mut events = session.push_bytes(input.as_bytes());
    events.extend(session.finish());

    // Assert
    assert_eq!(kinds(&events), vec!["theme", "slide", "complete", "done"]);
    assert_eq!(slide_indices(&events), vec![0]);
    assert!(!session.buffer().contains("[DONE]"));
    assert_eq!(session.state(), SessionState::Done);
}

#[test]
fn test_sentinel_text_inside_slide_content_is_kept() {
    // Arrange
    let mut session = DeckSession::new(SessionOptions::new(FrameFormat::Plain));

    // Act
    let mut events = session.push_text(
        r#"{"designTheme":{},"slides":[{"title":"Status","content":["Task A [DONE]","Task B"]}]}"#,
    );
    events.extend(session.finish());

    // Assert
    assert_eq!(kinds(&events), vec!["theme", "slide", "complete", "done"]);
    match &events[1] {
        DeckEvent::Slide { slide, .. } => {
            assert_eq!(slide.content(), vec!["Task A [DONE]", "Task B"])
        }
        other => panic!("expected slide, got {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Done);
}

#[test]
fn test_truncated_buffer_ends_in_error() {
    // Arrange
    let mut session = DeckSession::new(SessionOptions::new(FrameFormat::Plain));

    // Act
    let mut events = session.push_text(r#"{"designTheme":{},"slides":[{"title":"X"}"#);
    events.extend(session.finish());

    // Assert
    assert_eq!(kinds(&events), vec!["error"]);
    assert_eq!(session.state(), SessionState::Error);
    assert!(matches!(session.error(), Some(SlideStreamError::Parse { .. })));
}

#[test]
fn test_garbled_theme_key_is_repaired() {
    // Arrange
    let mut session = DeckSession::new(SessionOptions::new(FrameFormat::Plain));

    // Act
    let mut events =
        session.push_text(r#"{"desigTh eme":{"name":"Coral"},"slides":[{"title":"A"}]}"#);
    events.extend(session.finish());

    // Assert
    assert_eq!(kinds(&events), vec!["theme", "slide", "complete", "done"]);
    match &events[0] {
        DeckEvent::Theme { theme, .. } => assert_eq!(theme.name(), Some("Coral")),
        other => panic!("expected theme, got {:?}", other),
    }
    assert_eq!(session.stats().repair_heuristic, Some("key_typo"));
}

#[test]
fn test_braces_and_escaped_quotes_inside_strings() {
    // Arrange
    let text = r#"{"designTheme":{"name":"Brace {"},"slides":[{"title":"Use {curly} braces"},{"title":"She said \"hi\" }"}]}"#;

    // Act
    let (events, _) = run_session(
        SessionOptions::new(FrameFormat::Plain),
        &fixtures::byte_chunks(text, 3),
    );

    // Assert
    assert_eq!(slide_indices(&events), vec![0, 1]);
    let titles: Vec<String> = events
        .iter()
        .filter_map(|event| match event {
            DeckEvent::Slide { slide, .. } => slide.title().map(str::to_string),
            _ => None,
        })
        .collect();
    assert_eq!(titles, vec!["Use {curly} braces", "She said \"hi\" }"]);
}

#[test_case(SnapshotMode::Balanced ; "balanced")]
#[test_case(SnapshotMode::Progressive ; "progressive")]
fn test_every_chunking_emits_each_slide_exactly_once(mode: SnapshotMode) {
    let deck = fixtures::sample_deck();
    let sse = fixtures::openai_sse(&deck, 9);

    for size in 1..=48 {
        // Arrange
        let options = SessionOptions::new(FrameFormat::EventStream).with_snapshot_mode(mode);

        // Act
        let (events, session) = run_session(options, &fixtures::byte_chunks(&sse, size));

        // Assert
        assert_eq!(slide_indices(&events), vec![0, 1, 2], "chunk size {}", size);
        assert_eq!(completed_slide_count(&events), Some(3), "chunk size {}", size);
        assert_eq!(
            kinds(&events).iter().filter(|k| **k == "theme").count(),
            1,
            "chunk size {}",
            size
        );
        assert_eq!(kinds(&events)[0], "theme");
        assert_eq!(kinds(&events).last(), Some(&"done"));

        let SessionStats {
            slides_streamed,
            slides_flushed,
            ..
        } = session.stats();
        assert_eq!(slides_streamed + slides_flushed, 3);
    }
}

#[test]
fn test_progressive_mode_emits_before_document_closes() {
    // Arrange
    let options =
        SessionOptions::new(FrameFormat::Plain).with_snapshot_mode(SnapshotMode::Progressive);
    let mut session = DeckSession::new(options);

    // Act
    let early =
        session.push_text(r#"{"designTheme":{"name":"Blue"},"slides":[{"title":"A"},{"tit"#);
    let late = session.push_text(r#"le":"B"}]}"#);
    let last = session.finish();

    // Assert
    assert_eq!(kinds(&early), vec!["theme", "slide"]);
    assert_eq!(slide_indices(&late), vec![1]);
    assert_eq!(kinds(&last), vec!["complete", "done"]);
    assert_eq!(session.stats().slides_streamed, 2);
}

#[test]
fn test_multibyte_characters_split_across_chunks() {
    // Arrange
    let deck = r#"{"designTheme":{"name":"Café"},"slides":[{"title":"日本の市場 ☕"},{"title":"Ünïcödé 🚀"}]}"#;
    let sse = fixtures::anthropic_sse(deck, 4);

    // Act
    let (events, _) = run_session(
        SessionOptions::new(FrameFormat::EventStream),
        &fixtures::byte_chunks(&sse, 1),
    );

    // Assert
    let titles: Vec<String> = events
        .iter()
        .filter_map(|event| match event {
            DeckEvent::Slide { slide, .. } => slide.title().map(str::to_string),
            _ => None,
        })
        .collect();
    assert_eq!(titles, vec!["日本の市場 ☕", "Ünïcödé 🚀"]);
}

#[test]
fn test_malformed_event_lines_are_skipped() {
    // Arrange
    let mut sse = String::from("data: {not json at all\n\n");
    sse.push_str(&fixtures::openai_sse(&fixtures::sample_deck(), 20));

    // Act
    let (events, session) = run_session(
        SessionOptions::new(FrameFormat::EventStream),
        &[sse.into_bytes()],
    );

    // Assert
    assert_eq!(completed_slide_count(&events), Some(3));
    assert_eq!(session.stats().malformed_frames, 1);
}

#[test]
fn test_in_stream_provider_error_fails_session() {
    // Arrange
    let sse = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"{\\\"designTheme\\\":{}\"}}]}\n\n",
        "data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
    );

    // Act
    let (events, session) = run_session(
        SessionOptions::new(FrameFormat::EventStream),
        &[sse.as_bytes().to_vec()],
    );

    // Assert
    assert_eq!(kinds(&events), vec!["error"]);
    match &events[0] {
        DeckEvent::Error { message } => assert!(message.contains("Overloaded")),
        other => panic!("expected error, got {:?}", other),
    }
    assert!(matches!(session.error(), Some(SlideStreamError::Stream { .. })));
}

#[test]
fn test_bedrock_envelopes_in_binary_chunks() {
    // Arrange
    let body = fixtures::bedrock_envelopes(&fixtures::sample_deck(), 11);

    for size in [1, 7, 64, 4096] {
        // Act
        let (events, _) = run_session(
            SessionOptions::new(FrameFormat::bedrock_converse()),
            &body.chunks(size).map(<[u8]>::to_vec).collect::<Vec<_>>(),
        );

        // Assert
        assert_eq!(slide_indices(&events), vec![0, 1, 2], "chunk size {}", size);
        assert_eq!(kinds(&events).last(), Some(&"done"), "chunk size {}", size);
    }
}

#[test]
fn test_invalid_utf8_in_event_stream_is_fatal() {
    // Arrange
    let chunks = vec![b"data: {\"text\":\"a".to_vec(), vec![0xff, 0xfe], b"\"}\n\n".to_vec()];

    // Act
    let (events, session) = run_session(SessionOptions::new(FrameFormat::EventStream), &chunks);

    // Assert
    assert_eq!(kinds(&events), vec!["error"]);
    assert!(matches!(session.error(), Some(SlideStreamError::Decode { .. })));
}

#[test]
fn test_no_events_after_terminal_state() {
    // Arrange
    let mut session = DeckSession::new(SessionOptions::new(FrameFormat::Plain));
    session.push_text(r#"{"designTheme":{},"slides":[{"title":"A"}]}"#);
    let first_finish = session.finish();

    // Act
    let pushed = session.push_text(r#"{"designTheme":{},"slides":[{"title":"B"}]}"#);
    let second_finish = session.finish();
    let failed = session.fail(SlideStreamError::Stream {
        message: "late".to_string(),
    });

    // Assert
    assert_eq!(kinds(&first_finish), vec!["theme", "slide", "complete", "done"]);
    assert!(pushed.is_empty());
    assert!(second_finish.is_empty());
    assert!(failed.is_empty());
}

#[tokio::test]
async fn test_event_stream_ends_with_error_on_transport_failure() {
    // Arrange
    let stream = DeckEventStream::new(
        body(vec![
            Ok(br#"{"designTheme":{},"slides":[{"title":"A"},"#.to_vec()),
            Err(TransportError::Connection {
                message: "connection reset".to_string(),
            }),
            Ok(br#"{"title":"B"}]}"#.to_vec()),
        ]),
        SessionOptions::new(FrameFormat::Plain),
    );

    // Act
    let events: Vec<DeckEvent> = stream.collect().await;

    // Assert
    assert_eq!(kinds(&events), vec!["error"]);
    match &events[0] {
        DeckEvent::Error { message } => assert!(message.contains("connection reset")),
        other => panic!("expected error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_sse_relay_frames() {
    // Arrange
    let stream = DeckEventStream::new(
        body(vec![Ok(
            br#"{"designTheme":{"name":"Blue"},"slides":[{"title":"A"}]}"#.to_vec(),
        )]),
        SessionOptions::new(FrameFormat::Plain),
    );

    // Act
    let frames: Vec<String> = stream.into_sse_frames().collect().await;

    // Assert
    assert_eq!(frames.len(), 4);
    assert!(frames.iter().all(|f| f.starts_with("data: ") && f.ends_with("\n\n")));
    assert!(frames[0].contains(r#""type":"theme""#));
    assert!(frames[1].contains(r#""type":"slide""#));
    assert_eq!(frames[3], "data: [DONE]\n\n");
}

#[tokio::test]
async fn test_spawned_session_delivers_all_events() {
    // Arrange
    let sse = fixtures::openai_sse(&fixtures::sample_deck(), 16);
    let chunks = fixtures::byte_chunks(&sse, 32).into_iter().map(Ok).collect();
    let stream = DeckEventStream::new(body(chunks), SessionOptions::new(FrameFormat::EventStream));

    // Act
    let (mut rx, handle) = stream.spawn(4);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    handle.await.unwrap();

    // Assert
    assert_eq!(kinds(&events), vec!["theme", "slide", "slide", "slide", "complete", "done"]);
}

#[tokio::test]
async fn test_spawned_session_stops_when_consumer_disconnects() {
    // Arrange
    let endless: ByteStream = Box::pin(
        futures::stream::iter(vec![Ok(Bytes::from_static(br#"{"designTheme":{"#))])
            .chain(futures::stream::pending()),
    );
    let stream = DeckEventStream::new(endless, SessionOptions::new(FrameFormat::Plain));

    // Act
    let (rx, handle) = stream.spawn(1);
    drop(rx);
    let joined = tokio::time::timeout(Duration::from_secs(2), handle).await;

    // Assert
    assert!(joined.is_ok(), "session task kept running after the receiver was dropped");
}
