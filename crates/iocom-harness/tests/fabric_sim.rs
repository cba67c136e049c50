//! Deterministic two-node simulation: a fabric controller accepting one
//! connection over turmoil's simulated TCP, driven by a minimal hand-rolled
//! peer that plays the device side of the protocol directly against
//! `iocom_core::Connection`.
//!
//! `sim.host`/`sim.client` with `sim.run()` driven to completion; the real
//! driver is tested against direct protocol-level peer code rather than a
//! second full simulated peer implementation.

use std::sync::Arc;

use iocom_core::auth::AllowAllAuthenticator;
use iocom_core::connection::{Connection, ConnectionAction, ConnectionConfig, ConnectionEvent};
use iocom_core::mblk::ChangeKind;
use iocom_core::mblk_info::MblkKey;
use iocom_core::tbuf::TargetBuffer;
use iocom_core::{Environment, MblkFlags, MemoryBlock};
use iocom_fabric::root::Root;
use iocom_harness::{SimAcceptor, SimConnector, SimEnv};
use iocom_proto::header::{FrameFlags, Transport};
use iocom_transport::framed::{write_raw, FrameReader};
use iocom_transport::{Acceptor, Connector, ReceivedFrame};

const PORT: &str = "controller:6368";

fn config(device_name: &str, device_nr: u32, connect_up: bool) -> ConnectionConfig {
    ConnectionConfig {
        transport: Transport::Socket,
        timings: iocom_core::mblk::LinkTimings::TCP,
        device_name: device_name.to_string(),
        device_nr,
        network_name: "factory".to_string(),
        password: "secret".to_string(),
        password_tls: None,
        is_tls: false,
        connect_up,
        bidirectional: false,
    }
}

#[test]
fn device_receives_controllers_advertised_block() {
    let mut sim = turmoil::Builder::new().build();

    sim.host("controller", || async {
        let root = Arc::new(Root::new(Arc::new(AllowAllAuthenticator {
            network_name: "factory".to_string(),
        })));
        root.with_registry(|reg| {
            reg.insert(
                MblkKey {
                    network_name: "factory".to_string(),
                    device_name: "plc1".to_string(),
                    device_nr: 1,
                    mblk_name: "inputs".to_string(),
                },
                MemoryBlock::new("inputs", "factory", "plc1", 1, 32, MblkFlags::UP),
            );
        });

        let acceptor = SimAcceptor::bind("0.0.0.0:6368").await?;
        let (link, peer) = acceptor.accept().await?;
        let env = SimEnv::with_seed(1);

        iocom_fabric::driver::run(
            &root,
            link,
            peer,
            Transport::Socket,
            config("plc1", 1, false),
            &env,
            "factory".to_string(),
            "plc1".to_string(),
            false,
        )
        .await?;

        Ok(())
    });

    sim.client("device", async {
        let mut link = SimConnector::new(PORT).connect().await?;
        let env = SimEnv::with_seed(2);
        let mut conn = Connection::new(env.now(), config("scanner1", 2, true));
        let authenticator = AllowAllAuthenticator { network_name: "factory".to_string() };

        for action in conn.send_auth(env.now())? {
            if let iocom_core::connection::ConnectionAction::SendBytes(bytes) = action {
                write_raw(&mut link, &bytes).await?;
            }
        }

        let mut reader = FrameReader::new(Transport::Socket);
        let mut mblk_seen = None;

        // The controller sends its own auth frame up front, then an
        // mblk-info advertisement once it has processed ours in turn; read
        // frames until both have arrived rather than assuming an exact
        // count or order.
        while mblk_seen.is_none() {
            let frame = reader.read_frame(&mut link).await?;
            let ReceivedFrame::Data { header, payload } = frame else { continue };
            for event in conn.handle_frame(&header, &payload, &authenticator, "device", env.now())? {
                if let ConnectionEvent::MblkInfo(info) = event {
                    mblk_seen = Some(info);
                }
            }
        }

        let info = mblk_seen.expect("controller should advertise its configured block");
        assert_eq!(info.mblk_name.as_deref(), Some("inputs"));
        assert_eq!(info.nbytes, 32);
        assert_eq!(info.device_name.as_deref(), Some("plc1"));

        drop(link);
        Ok(())
    });

    sim.run().expect("simulation failed");
}

/// Drives `iocom_fabric::driver::run` on the controller side through a full
/// replication cycle: the initial advertise produces a key frame, and a
/// local write after that produces a delta frame, both decoded by a
/// hand-rolled target buffer on the device side exactly as
/// `iocom_fabric::driver::apply_data_frame` would.
#[test]
fn controller_replicates_keyframe_then_delta_to_device() {
    let mut sim = turmoil::Builder::new().build();

    let key = MblkKey {
        network_name: "factory".to_string(),
        device_name: "plc1".to_string(),
        device_nr: 1,
        mblk_name: "inputs".to_string(),
    };
    let root = Arc::new(Root::new(Arc::new(AllowAllAuthenticator {
        network_name: "factory".to_string(),
    })));
    root.with_registry(|reg| {
        reg.insert(key.clone(), MemoryBlock::new("inputs", "factory", "plc1", 1, 4, MblkFlags::UP));
        reg.get_mut(&key).unwrap().write(0, &[1, 2, 3, 4], ChangeKind::Write);
    });
    let write_ready = Arc::new(tokio::sync::Notify::new());

    {
        let root = root.clone();
        let write_ready = write_ready.clone();
        let key = key.clone();
        sim.host("controller", move || {
            let root = root.clone();
            let write_ready = write_ready.clone();
            let key = key.clone();
            async move {
                let acceptor = SimAcceptor::bind("0.0.0.0:6369").await?;
                let (link, peer) = acceptor.accept().await?;
                let env = SimEnv::with_seed(1);

                tokio::spawn({
                    let root = root.clone();
                    async move {
                        write_ready.notified().await;
                        root.with_registry(|reg| {
                            reg.get_mut(&key).unwrap().write(0, &[9, 9, 9, 9], ChangeKind::Write);
                        });
                    }
                });

                iocom_fabric::driver::run(
                    &root,
                    link,
                    peer,
                    Transport::Socket,
                    config("plc1", 1, false),
                    &env,
                    "factory".to_string(),
                    "plc1".to_string(),
                    false,
                )
                .await?;

                Ok(())
            }
        });
    }

    sim.client("device", async move {
        let mut link = SimConnector::new("controller:6369").connect().await?;
        let env = SimEnv::with_seed(2);
        let mut conn = Connection::new(env.now(), config("scanner1", 2, true));

        for action in conn.send_auth(env.now())? {
            if let ConnectionAction::SendBytes(bytes) = action {
                write_raw(&mut link, &bytes).await?;
            }
        }

        let mut reader = FrameReader::new(Transport::Socket);
        let mut mirror = TargetBuffer::new(4, false);
        let mut mblk = MemoryBlock::new("inputs", "factory", "plc1", 1, 4, MblkFlags::DOWN);
        let mut frames_seen = 0;

        loop {
            let ReceivedFrame::Data { header, payload } = reader.read_frame(&mut link).await? else {
                continue;
            };
            if header.flags.contains(FrameFlags::SYSTEM_FRAME) {
                continue;
            }

            let is_keyframe = !header.flags.contains(FrameFlags::DELTA_ENCODED);
            let compressed = header.flags.contains(FrameFlags::COMPRESSED);
            mirror.accept(header.addr as usize, &payload, is_keyframe, compressed)?;
            if header.flags.contains(FrameFlags::SYNC_COMPLETE) {
                mirror.commit(&mut mblk);
            }
            frames_seen += 1;

            if frames_seen == 1 {
                assert!(is_keyframe, "first frame from a freshly bound source must be a key frame");
                assert_eq!(mblk.data(), &[1, 2, 3, 4]);
                write_ready.notify_one();
            } else if frames_seen == 2 {
                assert!(!is_keyframe, "second frame, after a local write, must be a delta frame");
                assert_eq!(mblk.data(), &[9, 9, 9, 9]);
                break;
            }
        }

        drop(link);
        Ok(())
    });

    sim.run().expect("simulation failed");
}
