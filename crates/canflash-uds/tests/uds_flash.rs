//! End-to-end UDS flashing against the mock diagnostic link

use std::sync::Arc;
use std::time::Duration;

use canflash_core::{
    run_flash, FlashOptions, FlashSession, MemorySink, ProtocolError, XorSecretResolver,
};
use canflash_srec::{record_checksum, SrecordImage};
use canflash_uds::{
    AddressRole, MappingEvent, MockDiagTransport, UdsConfig, UdsSession, UdsState,
};
use pretty_assertions::assert_eq;

const HEADER: &str = "S00F000068656C6C6F202020202000003C";

fn s3(address: u32, data: &[u8]) -> String {
    let mut bytes = vec![(4 + data.len() + 1) as u8];
    bytes.extend_from_slice(&address.to_be_bytes());
    bytes.extend_from_slice(data);
    format!("S3{}{:02X}", hex::encode_upper(&bytes), record_checksum(&bytes))
}

fn s7(address: u32) -> String {
    let mut bytes = vec![5u8];
    bytes.extend_from_slice(&address.to_be_bytes());
    format!("S7{}{:02X}", hex::encode_upper(&bytes), record_checksum(&bytes))
}

/// Image with `data` laid out in 32-byte records from `address`
fn image_at(address: u32, data: &[u8]) -> SrecordImage {
    let mut lines = vec![HEADER.to_string()];
    for (i, chunk) in data.chunks(32).enumerate() {
        lines.push(s3(address + (i * 32) as u32, chunk));
    }
    lines.push(s7(address));
    SrecordImage::parse(&lines.join("\n")).unwrap()
}

fn two_segment_image() -> SrecordImage {
    let text = [
        HEADER.to_string(),
        s3(0x1000, &[0x01, 0x02, 0x03, 0x04]),
        s3(0x1004, &[0x05, 0x06, 0x07, 0x08]),
        s3(0x2000, &[0xA1, 0xA2, 0xA3, 0xA4]),
        s7(0x1000),
    ]
    .join("\n");
    SrecordImage::parse(&text).unwrap()
}

fn session(mock: &Arc<MockDiagTransport>, log: &Arc<MemorySink>) -> UdsSession {
    UdsSession::new(
        mock.clone(),
        UdsConfig::default(),
        Arc::new(XorSecretResolver::from_hex("01020304").unwrap()),
        log.clone(),
    )
}

fn options() -> FlashOptions {
    FlashOptions {
        connect_timeout: Duration::from_secs(2),
    }
}

#[tokio::test]
async fn test_full_programming_sequence() {
    let mock = Arc::new(MockDiagTransport::new());
    let log = Arc::new(MemorySink::new());
    let image = two_segment_image();
    let mut session = session(&mock, &log);

    run_flash(&mut session, &image, &options(), log.as_ref())
        .await
        .unwrap();

    use AddressRole::{Functional as F, Physical as P};
    let mut expected: Vec<(AddressRole, Vec<u8>)> = vec![
        (P, vec![0x10, 0x01]),
        (P, vec![0x10, 0x01]),
        (P, vec![0x10, 0x01]),
        (F, vec![0x10, 0x03]),
        (P, vec![0x10, 0x02]),
        (P, vec![0x27, 0x01]),
        (P, vec![0x27, 0x02, 0x10, 0x20, 0x30, 0x40]),
        (P, vec![0x31, 0x01, 0xFF, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x08]),
        (P, vec![0x34, 0x00, 0x44, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x08]),
        (P, vec![0x36, 0x01, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]),
        (P, vec![0x37]),
        (P, vec![0x31, 0x01, 0xFF, 0x00, 0x00, 0x00, 0x20, 0x00, 0x00, 0x00, 0x00, 0x04]),
        (P, vec![0x34, 0x00, 0x44, 0x00, 0x00, 0x20, 0x00, 0x00, 0x00, 0x00, 0x04]),
        (P, vec![0x36, 0x01, 0xA1, 0xA2, 0xA3, 0xA4]),
        (P, vec![0x37]),
    ];
    let mut integrity = vec![0x31, 0x01, 0x02, 0x02];
    integrity.extend_from_slice(&image.crc32_bytes());
    expected.push((P, integrity));
    expected.push((P, vec![0x31, 0x01, 0xFF, 0x01]));
    expected.push((P, vec![0x11, 0x01]));

    assert_eq!(mock.requests(), expected);
    assert_eq!(
        mock.mapping_events(),
        vec![
            MappingEvent::Added(P),
            MappingEvent::Removed(P),
            MappingEvent::Added(F),
            MappingEvent::Removed(F),
            MappingEvent::Added(P),
            MappingEvent::Removed(P),
            MappingEvent::Added(P),
            MappingEvent::Removed(P),
        ]
    );
    assert_eq!(mock.open_count(), 1);
    assert_eq!(mock.close_count(), 1);
    assert_eq!(session.state(), UdsState::Uninitialized);
    assert_eq!(log.progress_updates().last(), Some(&(12, 12)));
}

#[tokio::test]
async fn test_block_counter_wraps_to_one() {
    let mock = Arc::new(MockDiagTransport::new());
    // maxNumberOfBlockLength 4 leaves 2 payload bytes per block
    mock.add_response(vec![0x34], vec![0x74, 0x20, 0x00, 0x04]);
    let log = Arc::new(MemorySink::new());
    let data: Vec<u8> = (0..600u32).map(|i| (i % 251) as u8).collect();
    let image = image_at(0x4000, &data);
    let mut session = session(&mock, &log);

    run_flash(&mut session, &image, &options(), log.as_ref())
        .await
        .unwrap();

    let transfers: Vec<Vec<u8>> = mock
        .requests()
        .into_iter()
        .map(|(_, request)| request)
        .filter(|request| request[0] == 0x36)
        .collect();
    assert_eq!(transfers.len(), 300);

    let counters: Vec<u8> = transfers.iter().map(|r| r[1]).collect();
    let expected: Vec<u8> = (1..=255u8).chain(1..=45u8).collect();
    assert_eq!(counters, expected);
    assert!(!counters.contains(&0));

    let payload: Vec<u8> = transfers.iter().flat_map(|r| r[2..].to_vec()).collect();
    assert_eq!(payload, data);
}

#[tokio::test]
async fn test_oversized_block_length_is_limited_to_one_isotp_message() {
    let mock = Arc::new(MockDiagTransport::new());
    // maxNumberOfBlockLength 0x1002 is larger than a 12-bit ISO-TP length
    mock.add_response(vec![0x34], vec![0x74, 0x20, 0x10, 0x02]);
    let log = Arc::new(MemorySink::new());
    let data: Vec<u8> = (0..5000u32).map(|i| (i % 253) as u8).collect();
    let image = image_at(0x8000, &data);
    let mut session = session(&mock, &log);

    run_flash(&mut session, &image, &options(), log.as_ref())
        .await
        .unwrap();

    let transfers: Vec<Vec<u8>> = mock
        .requests()
        .into_iter()
        .map(|(_, request)| request)
        .filter(|request| request[0] == 0x36)
        .collect();
    assert_eq!(transfers.len(), 2);
    assert!(transfers.iter().all(|r| r.len() <= 4095));
    assert_eq!(transfers[0].len(), 4095);

    let payload: Vec<u8> = transfers.iter().flat_map(|r| r[2..].to_vec()).collect();
    assert_eq!(payload, data);
}

#[tokio::test]
async fn test_non_matching_ack_fails_every_step() {
    let cases: Vec<(Vec<u8>, Vec<u8>)> = vec![
        (vec![0x10, 0x02], vec![0x50, 0x03]),
        (vec![0x27, 0x01], vec![0x67, 0x03, 0x01]),
        (vec![0x27, 0x02], vec![0x77, 0x02]),
        (vec![0x31, 0x01, 0xFF, 0x00], vec![0x71, 0x01, 0xFF, 0x00, 0x01]),
        (vec![0x34], vec![0x75, 0x20, 0x01, 0x02]),
        (vec![0x36], vec![0x76, 0x00]),
        (vec![0x37], vec![0x76]),
        (vec![0x31, 0x01, 0x02, 0x02], vec![0x71, 0x01, 0x02, 0x02, 0x02]),
        (vec![0x31, 0x01, 0xFF, 0x01], vec![0x71, 0x01, 0xFF, 0x01, 0x05]),
        (vec![0x11, 0x01], vec![0x51, 0x02]),
    ];

    for (request, response) in cases {
        let mock = Arc::new(MockDiagTransport::new());
        mock.add_response(request.clone(), response);
        let log = Arc::new(MemorySink::new());
        let mut session = session(&mock, &log);

        let result = run_flash(&mut session, &two_segment_image(), &options(), log.as_ref()).await;

        assert!(result.is_err(), "bad ack for {:02X?} must fail", request);
        assert_eq!(mock.close_count(), 1, "{:02X?}", request);
        assert_eq!(mock.installed_mappings(), 0, "{:02X?}", request);
    }
}

#[tokio::test]
async fn test_negative_response_text_reaches_the_log() {
    let mock = Arc::new(MockDiagTransport::new());
    mock.add_response(vec![0x27, 0x02], vec![0x7F, 0x27, 0x35]);
    let log = Arc::new(MemorySink::new());
    let mut session = session(&mock, &log);

    let err = run_flash(&mut session, &two_segment_image(), &options(), log.as_ref())
        .await
        .unwrap_err();

    match &err {
        ProtocolError::NegativeResponse { code, description, .. } => {
            assert_eq!(*code, 0x35);
            assert_eq!(description, "invalid key");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(log.contains("invalid key"));
    // nothing is erased after a failed unlock
    assert!(!mock.requests().iter().any(|(_, r)| r[0] == 0x31));
}

#[tokio::test]
async fn test_integrity_failure_skips_reset() {
    let mock = Arc::new(MockDiagTransport::new());
    mock.add_response(
        vec![0x31, 0x01, 0x02, 0x02],
        vec![0x7F, 0x31, 0x72],
    );
    let log = Arc::new(MemorySink::new());
    let mut session = session(&mock, &log);

    let err = run_flash(&mut session, &two_segment_image(), &options(), log.as_ref())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("general programming failure"));
    assert!(!mock.requests().iter().any(|(_, r)| r[0] == 0x11));
}

#[tokio::test(start_paused = true)]
async fn test_connect_times_out_without_response() {
    let mock = Arc::new(MockDiagTransport::new());
    mock.add_silent(vec![0x10, 0x01]);
    let log = Arc::new(MemorySink::new());
    let mut session = session(&mock, &log);

    let err = run_flash(&mut session, &two_segment_image(), &options(), log.as_ref())
        .await
        .unwrap_err();

    assert!(matches!(err, ProtocolError::ConnectTimeout(_)));
    assert_eq!(mock.close_count(), 1);
    assert_eq!(mock.installed_mappings(), 0);
}

#[tokio::test]
async fn test_connect_needs_three_in_a_row() {
    let mock = Arc::new(MockDiagTransport::new());
    let mut dsc_calls = 0;
    mock.set_handler(move |request| {
        if request != [0x10, 0x01] {
            return None;
        }
        dsc_calls += 1;
        if dsc_calls == 2 {
            Some(vec![0x7F, 0x10, 0x21])
        } else {
            None
        }
    });
    let log = Arc::new(MemorySink::new());
    let mut session = session(&mock, &log);

    session.open().unwrap();
    session.connect(Duration::from_secs(1)).await.unwrap();
    assert_eq!(session.state(), UdsState::DefaultSession);

    let dsc = mock
        .requests()
        .iter()
        .filter(|(_, r)| r == &vec![0x10, 0x01])
        .count();
    assert_eq!(dsc, 5);
    session.close().unwrap();
}

#[tokio::test]
async fn test_response_pending_during_erase() {
    let mock = Arc::new(MockDiagTransport::new());
    let mut pending_sent = false;
    mock.set_handler(move |request| {
        if request.starts_with(&[0x31, 0x01, 0xFF, 0x00]) && !pending_sent {
            pending_sent = true;
            Some(vec![0x7F, 0x31, 0x78])
        } else {
            None
        }
    });
    mock.queue_followup(vec![0x71, 0x01, 0xFF, 0x00, 0x00]);
    let log = Arc::new(MemorySink::new());
    let mut session = session(&mock, &log);

    run_flash(&mut session, &two_segment_image(), &options(), log.as_ref())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_operations_out_of_order_are_rejected() {
    let mock = Arc::new(MockDiagTransport::new());
    let log = Arc::new(MemorySink::new());
    let mut session = session(&mock, &log);
    session.open().unwrap();

    let err = session
        .erase_write_program(&two_segment_image())
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidState { .. }));
    assert!(session.unlock().await.is_err());
    assert!(mock.requests().is_empty());
    session.close().unwrap();
}
