//! CCP flashing, unlock and calibration against the ECU simulator

mod common;

use std::sync::Arc;
use std::time::Duration;

use canflash_ccp::{resource, CcpState};
use canflash_conv::{CalibrationItem, DataType, ItemDescriptor};
use canflash_core::{
    run_flash, CanTransport, FlashOptions, FlashSession, ProtocolError, TransportError,
    XorSecretResolver,
};
use canflash_srec::SrecordImage;
use common::*;
use pretty_assertions::assert_eq;
use rstest::rstest;

fn options() -> FlashOptions {
    FlashOptions {
        connect_timeout: Duration::from_secs(1),
    }
}

#[tokio::test]
async fn test_full_flash_sequence() {
    let mut rig = rig();
    let image = two_segment_image();

    let report = run_flash(&mut rig.session, &image, &options(), rig.log.as_ref())
        .await
        .unwrap();
    assert_eq!(report.bytes, 16);
    assert_eq!(report.segments, 2);

    let sim = rig.sim.lock();
    assert_eq!(
        sim.commands(),
        vec![
            0x01, // CONNECT
            0x17, 0x12, 0x13, // EXCHANGE_ID, GET_SEED, UNLOCK
            0x02, 0x10, 0x02, 0x18, 0x18, 0x18, // segment 0: 12 bytes in 5+5+2
            0x02, 0x10, 0x02, 0x18, // segment 1
            0x18, // final empty PROGRAM
            0x02, 0x0E, 0x02, 0x0E, // verify both segments
            LAUNCH,
        ]
    );

    // CONNECT carries the station address, SET_MTA a little-endian address
    assert_eq!(sim.cros[0], vec![0x01, 0x00, 0x00, 0x00, 0, 0, 0, 0]);
    let set_mta_1 = &sim.cros[10];
    assert_eq!(set_mta_1[2..8], [0x00, 0x00, 0x00, 0x20, 0x00, 0x00]);
    let unlock = &sim.cros[3];
    assert_eq!(unlock[2..6], EcuSim::expected_key()[..]);

    // counters run 0, 1, 2, ...
    let counters: Vec<u8> = sim.cros.iter().map(|c| c[1]).collect();
    assert_eq!(counters, (0..sim.cros.len() as u8).collect::<Vec<_>>());

    assert_eq!(sim.read(0x1000, 12), (1..=12).collect::<Vec<u8>>());
    assert_eq!(sim.read(0x2000, 4), vec![0xA1, 0xA2, 0xA3, 0xA4]);
    assert_eq!(sim.empty_programs, 1);
    assert_eq!(sim.launched, Some(0x1000));
    drop(sim);

    assert_eq!(rig.log.progress_updates().last(), Some(&(16, 16)));
    assert_eq!(rig.mock.close_count(), 1);
    assert!(!rig.mock.is_open());
    assert_eq!(rig.session.state(), CcpState::Uninitialized);
}

#[tokio::test]
async fn test_checksum_mismatch_names_segment() {
    let sim = EcuSim {
        corrupt_checksum_at: Some(0x2000),
        ..EcuSim::default()
    };
    let mut rig = rig_with(sim, config());
    let image = two_segment_image();

    let err = run_flash(&mut rig.session, &image, &options(), rig.log.as_ref())
        .await
        .unwrap_err();

    let local = image.segments()[1].crc16_modbus() as u32;
    match err {
        ProtocolError::VerificationFailed {
            segment,
            device,
            local: reported,
        } => {
            assert_eq!(segment, 1);
            assert_eq!(reported, local);
            assert_eq!(device, local ^ 0x0101);
        }
        other => panic!("expected verification failure, got {:?}", other),
    }
    assert_eq!(rig.sim.lock().launched, None);
    assert!(rig.log.contains("segment 1"));
    assert_eq!(rig.mock.close_count(), 1);
}

#[rstest]
#[case::exchange_id(0x17)]
#[case::get_seed(0x12)]
#[case::unlock(0x13)]
#[case::set_mta(0x02)]
#[case::clear_memory(0x10)]
#[case::program(0x18)]
#[case::build_checksum(0x0E)]
#[case::launch(LAUNCH)]
#[tokio::test]
async fn test_rejected_command_fails_flash(#[case] command: u8) {
    let sim = EcuSim {
        fail: Some((command, 0x31)),
        ..EcuSim::default()
    };
    let mut rig = rig_with(sim, config());

    let err = run_flash(&mut rig.session, &two_segment_image(), &options(), rig.log.as_ref())
        .await
        .unwrap_err();
    match err {
        ProtocolError::NegativeResponse { code, description, .. } => {
            assert_eq!(code, 0x31);
            assert_eq!(description, "command syntax");
        }
        other => panic!("expected negative response, got {:?}", other),
    }
    assert_eq!(rig.sim.lock().commands().last(), Some(&command));
    assert_eq!(rig.mock.close_count(), 1);
}

#[rstest]
#[case::exchange_id(0x17)]
#[case::set_mta(0x02)]
#[case::program(0x18)]
#[case::build_checksum(0x0E)]
#[tokio::test]
async fn test_wrong_counter_fails_flash(#[case] command: u8) {
    let sim = EcuSim {
        wrong_ctr_for: Some(command),
        ..EcuSim::default()
    };
    let mut rig = rig_with(sim, config());

    let err = run_flash(&mut rig.session, &two_segment_image(), &options(), rig.log.as_ref())
        .await
        .unwrap_err();
    assert!(
        matches!(err, ProtocolError::UnexpectedResponse { .. }),
        "{:?}",
        err
    );
    assert_eq!(rig.session.counters().unexpected, 1);
    assert_eq!(rig.sim.lock().launched, None);
}

#[tokio::test]
async fn test_event_messages_are_skipped() {
    let sim = EcuSim {
        event_before: Some(0x12),
        ..EcuSim::default()
    };
    let mut rig = rig_with(sim, config());

    run_flash(&mut rig.session, &two_segment_image(), &options(), rig.log.as_ref())
        .await
        .unwrap();
    assert!(rig.log.contains("event message: cold start request"));
}

#[tokio::test]
async fn test_wrong_key_is_rejected() {
    let mut rig = rig();
    rig.session = canflash_ccp::CcpSession::new(
        Arc::new(rig.mock.clone()),
        Default::default(),
        config(),
        Arc::new(XorSecretResolver::from_hex("FFFFFFFF").unwrap()),
        rig.log.clone(),
    );

    let err = run_flash(&mut rig.session, &two_segment_image(), &options(), rig.log.as_ref())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("access locked"), "{}", err);
    assert!(rig.log.contains("access locked"));
    assert!(!rig.sim.lock().commands().contains(&0x10));
}

#[tokio::test]
async fn test_unprotected_resource_skips_unlock() {
    let sim = EcuSim {
        protected: 0,
        ..EcuSim::default()
    };
    let mut rig = rig_with(sim, config());
    // the simulator still gates CLEAR_MEMORY on the unlock mask
    rig.sim.lock().unlocked = resource::PGM;

    run_flash(&mut rig.session, &two_segment_image(), &options(), rig.log.as_ref())
        .await
        .unwrap();
    assert!(!rig.sim.lock().commands().contains(&0x13));
}

#[tokio::test(start_paused = true)]
async fn test_connect_retries_until_acknowledged() {
    let sim = EcuSim {
        ignore_connects: 2,
        ..EcuSim::default()
    };
    let mut rig = rig_with(sim, config());
    rig.session.open().unwrap();

    rig.session.connect(Duration::from_secs(1)).await.unwrap();
    assert_eq!(rig.session.state(), CcpState::Connected);
    assert_eq!(rig.sim.lock().commands(), vec![0x01, 0x01, 0x01]);
    assert_eq!(rig.session.counters().timeouts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout() {
    let sim = EcuSim {
        silent: true,
        ..EcuSim::default()
    };
    let mut rig = rig_with(sim, config());

    let err = run_flash(&mut rig.session, &two_segment_image(), &options(), rig.log.as_ref())
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectTimeout(_)));
    // 1 s deadline with 100 ms per attempt
    let attempts = rig.sim.lock().commands().len();
    assert!((9..=10).contains(&attempts), "{} attempts", attempts);
    assert_eq!(rig.mock.close_count(), 1);
}

#[tokio::test]
async fn test_operations_require_state() {
    let mut rig = rig();
    let image = two_segment_image();

    let err = rig.session.connect(Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, ProtocolError::Transport(TransportError::NotOpen)));

    rig.session.open().unwrap();
    let err = rig.session.erase_write_program(&image).await.unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidState { .. }));

    rig.session.connect(Duration::from_secs(1)).await.unwrap();
    let err = rig.session.erase_write_program(&image).await.unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidState { .. }));

    // DAQ access does not grant programming
    rig.session.unlock_resource(resource::DAQ).await.unwrap();
    assert_eq!(rig.session.state(), CcpState::Unlocked);
    let err = rig.session.erase_write_program(&image).await.unwrap_err();
    assert!(matches!(err, ProtocolError::SecurityAccess(_)));

    rig.session.disconnect().await.unwrap();
    assert_eq!(rig.session.state(), CcpState::Disconnected);
    assert!(!rig.sim.lock().connected);
    rig.session.close().unwrap();
    assert_eq!(rig.mock.close_count(), 1);
}

#[tokio::test]
async fn test_version_and_exchange_id() {
    let mut rig = rig();
    rig.session.open().unwrap();
    rig.session.connect(Duration::from_secs(1)).await.unwrap();

    assert_eq!(rig.session.get_ccp_version().await.unwrap(), (2, 1));
    let id = rig.session.exchange_id().await.unwrap();
    assert_eq!(id.resources_protected, resource::CAL | resource::DAQ | resource::PGM);
    rig.session.close().unwrap();
}

#[tokio::test]
async fn test_calibration_round_trip() {
    let mut rig = rig();
    rig.session.open().unwrap();
    rig.session.connect(Duration::from_secs(1)).await.unwrap();
    rig.session.unlock_resource(resource::CAL).await.unwrap();

    let item = CalibrationItem::new(
        ItemDescriptor::linear("idle_target", DataType::Uword, 0x3000, 10.0, 0.0)
            .with_limits(0.0, 100.0),
    );
    rig.session.write_calibration(&item, "12.5").await.unwrap();
    assert_eq!(rig.sim.lock().read(0x3000, 2), vec![0x00, 0x7D]);
    assert_eq!(rig.session.read_calibration(&item).await.unwrap(), "12.5");

    let err = rig.session.write_calibration(&item, "150").await.unwrap_err();
    assert!(matches!(err, ProtocolError::Conversion(_)));
    assert_eq!(rig.sim.lock().read(0x3000, 2), vec![0x00, 0x7D]);
    assert!(rig.log.contains("idle_target = 12.5"));
}

#[tokio::test]
async fn test_upload_and_download_chunking() {
    let mut rig = rig();
    rig.session.open().unwrap();
    rig.session.connect(Duration::from_secs(1)).await.unwrap();

    let data: Vec<u8> = (0..12).collect();
    rig.session.download(0x4000, 0, &data).await.unwrap();
    assert_eq!(rig.session.upload(0x4000, 0, 12).await.unwrap(), data);

    let commands = rig.sim.lock().commands();
    // SET_MTA + 3 DNLOAD, SET_MTA + 3 UPLOAD
    assert_eq!(
        commands[1..].to_vec(),
        vec![0x02, 0x03, 0x03, 0x03, 0x02, 0x04, 0x04, 0x04]
    );
}

#[tokio::test]
async fn test_epk_check() {
    let epk_image = SrecordImage::parse(
        &[
            "S00F000068656C6C6F202020202000003C".to_string(),
            s3(0x1000, &[0x01, 0x02]),
            s3(0x8000, b"EPK_V1"),
            s7(0x1000),
        ]
        .join("\n"),
    )
    .unwrap();

    let mut rig = rig();
    rig.sim.lock().write(0x8000, b"EPK_V1");
    rig.session.open().unwrap();
    rig.session.connect(Duration::from_secs(1)).await.unwrap();

    rig.session.check_epk(&epk_image, 0x8000).await.unwrap();
    assert_eq!(rig.session.read_epk(0x8000, 6).await.unwrap(), "EPK_V1");

    rig.sim.lock().write(0x8000, b"EPK_V2");
    let err = rig.session.check_epk(&epk_image, 0x8000).await.unwrap_err();
    match err {
        ProtocolError::EpkMismatch { device, expected } => {
            assert_eq!(device, "EPK_V2");
            assert_eq!(expected, "EPK_V1");
        }
        other => panic!("expected EPK mismatch, got {:?}", other),
    }

    let err = rig.session.check_epk(&epk_image, 0x9000).await.unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidConfig(_)));
}
