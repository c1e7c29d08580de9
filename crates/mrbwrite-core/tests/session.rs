//! End-to-end flashing sessions against the simulated board

use std::time::Duration;

use mrbwrite_core::bytecode::{BytecodeError, BytecodeImage};
use mrbwrite_core::config::{AckPolicy, FlashSettings, VersionCheck};
use mrbwrite_core::protocol::{ProtocolError, SessionController, SessionPhase, SessionState};
use mrbwrite_core::sim::{SimulatedBoard, SIM_BANNER};
use pretty_assertions::assert_eq;

fn rite_image(extra: usize) -> BytecodeImage {
    let mut bytes = b"RITE".to_vec();
    bytes.extend((0..extra).map(|i| (i * 37 % 256) as u8));
    BytecodeImage::from_bytes(bytes).unwrap()
}

fn settings() -> FlashSettings {
    FlashSettings::default()
        .with_port("/dev/ttyUSB0")
        .with_baud_rate(19200)
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_transcript() {
    let image = rite_image(50);
    let mut session = SessionController::new(SimulatedBoard::booting(2), settings());

    let report = session.run(&image).await.unwrap();
    let board = session.into_transport();

    assert_eq!(board.opened_with(), Some(("/dev/ttyUSB0", 19200)));
    assert_eq!(report.handshake.probe_attempts, 3);
    assert_eq!(report.handshake.banner, SIM_BANNER);

    let mut expected: Vec<Vec<u8>> = vec![b"\n".to_vec(); 3];
    expected.push(b"version\r\n".to_vec());
    expected.push(b"write 54\r\n".to_vec());
    expected.push(image.as_bytes().to_vec());
    expected.push(b"execute\r\n".to_vec());
    assert_eq!(board.writes(), expected.as_slice());

    assert_eq!(board.payload().len(), 54);
    assert!(board.executed());
    assert_eq!(board.close_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concatenated_images_are_framed_as_one() {
    let first = rite_image(6);
    let second = rite_image(16);
    assert_eq!((first.len(), second.len()), (10, 20));
    let combined = BytecodeImage::concat([first.clone(), second.clone()]).unwrap();

    let mut session = SessionController::new(SimulatedBoard::ready(), settings());
    let report = session.run(&combined).await.unwrap();
    let board = session.into_transport();

    assert_eq!(report.upload.bytes_sent, 30);
    assert!(board.commands().contains(&"write 30".to_string()));
    let mut expected = first.as_bytes().to_vec();
    expected.extend_from_slice(second.as_bytes());
    assert_eq!(board.payload(), expected.as_slice());
}

#[test]
fn test_invalid_image_is_rejected_before_any_session() {
    let err = BytecodeImage::from_bytes(b"MZ\x90\x00rest".to_vec()).unwrap_err();
    assert!(matches!(
        err,
        BytecodeError::MissingMagic { found } if &found == b"MZ\x90\x00"
    ));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blink.rb");
    std::fs::write(&path, b"puts 'blink'").unwrap();
    assert!(BytecodeImage::from_file(&path).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_open_failure_still_closes_once() {
    let mut session =
        SessionController::new(SimulatedBoard::ready().failing_open(), settings());
    let err = session.run(&rite_image(8)).await.unwrap_err();
    assert_eq!(err.phase, SessionPhase::Connect);
    assert!(matches!(err.source, ProtocolError::PortNotFound(_)));
    assert_eq!(session.transport().close_calls(), 1);
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_handshake_failure_still_closes_once() {
    let mut s = settings();
    s.handshake.max_probe_attempts = Some(3);
    let mut session = SessionController::new(SimulatedBoard::silent(), s);
    let err = session.run(&rite_image(8)).await.unwrap_err();
    assert_eq!(err.phase, SessionPhase::Handshake);
    assert!(matches!(
        err.source,
        ProtocolError::HandshakeExhausted { attempts: 3 }
    ));
    let board = session.into_transport();
    assert_eq!(board.close_calls(), 1);
    // Only probes were sent
    assert_eq!(board.written(), b"\n\n\n".to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_handshake_deadline() {
    let mut s = settings();
    s.handshake.deadline_ms = Some(7_500);
    let mut session = SessionController::new(SimulatedBoard::silent(), s);
    let start = tokio::time::Instant::now();
    let err = session.run(&rite_image(8)).await.unwrap_err();
    assert_eq!(err.phase, SessionPhase::Handshake);
    assert!(matches!(err.source, ProtocolError::DeadlineExceeded { .. }));
    assert_eq!(start.elapsed(), Duration::from_millis(7_500));
    assert_eq!(session.transport().close_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_holds_while_console_keeps_printing() {
    let mut s = settings();
    s.handshake.deadline_ms = Some(2_000);
    let board = SimulatedBoard::ready().with_chatter("tick", Duration::from_millis(50));
    let mut session = SessionController::new(board, s);
    let start = tokio::time::Instant::now();
    let outcome = tokio::time::timeout(Duration::from_secs(600), session.run(&rite_image(8))).await;
    let err = outcome.expect("deadline did not end the handshake").unwrap_err();
    assert_eq!(err.phase, SessionPhase::Handshake);
    assert!(matches!(
        err.source,
        ProtocolError::DeadlineExceeded {
            deadline_ms: 2_000,
            ..
        }
    ));
    assert_eq!(start.elapsed(), Duration::from_millis(2_000));
    let board = session.into_transport();
    assert_eq!(board.close_calls(), 1);
    assert!(board.payload().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_missing_write_ack_aborts_upload() {
    let mut session =
        SessionController::new(SimulatedBoard::ready().without_write_ack(), settings());
    let err = session.run(&rite_image(8)).await.unwrap_err();
    assert_eq!(err.phase, SessionPhase::Upload);
    assert!(err.to_string().contains("write 12"));
    let board = session.into_transport();
    assert!(board.payload().is_empty());
    assert!(!board.executed());
    assert_eq!(board.close_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_lenient_policy_matches_reference_behaviour() {
    let mut s = settings();
    s.upload.ack_policy = AckPolicy::Lenient;
    let board = SimulatedBoard::ready()
        .without_write_ack()
        .without_transfer_ack();
    let mut session = SessionController::new(board, s);
    let report = session.run(&rite_image(8)).await.unwrap();
    assert_eq!(report.upload.write_ack, None);
    assert_eq!(report.upload.transfer_ack, None);
    assert!(report.upload.execute_ack.is_some());
    assert!(session.transport().executed());
}

#[tokio::test(start_paused = true)]
async fn test_write_error_during_upload() {
    // probe, version, write announce succeed; the payload write fails
    let board = SimulatedBoard::ready().fail_writes_after(3);
    let mut session = SessionController::new(board, settings());
    let err = session.run(&rite_image(8)).await.unwrap_err();
    assert_eq!(err.phase, SessionPhase::Upload);
    match &err.source {
        ProtocolError::WriteFailed { stage, .. } => assert_eq!(stage, "payload"),
        other => panic!("expected WriteFailed, got {:?}", other),
    }
    assert_eq!(session.transport().close_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_write_error_during_execute() {
    let mut s = settings();
    s.handshake.version_check = VersionCheck::Skip;
    // probe, write announce, payload succeed; execute fails
    let board = SimulatedBoard::ready().fail_writes_after(3);
    let mut session = SessionController::new(board, s);
    let err = session.run(&rite_image(8)).await.unwrap_err();
    assert_eq!(err.phase, SessionPhase::Execute);
    assert!(err.to_string().starts_with("execute failed"));
    assert_eq!(session.transport().close_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_boot_noise_is_ignored() {
    let board = SimulatedBoard::booting(3).with_boot_reply("\u{fffd}\u{fffd}garbage");
    let mut session = SessionController::new(board, settings());
    let report = session.run(&rite_image(20)).await.unwrap();
    assert_eq!(report.handshake.probe_attempts, 4);
    assert_eq!(report.upload.bytes_sent, 24);
}
