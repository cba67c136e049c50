//! Per-connection driver: owns one link, one `Connection<E::Instant>`, and
//! the source/target buffers for whatever memory blocks get bound to it
//! over the lifetime of the link.
//!
//! Split between pure dispatch and I/O: [`iocom_core::Connection`] stays
//! sans-I/O, this module is the only place that actually awaits a socket
//! read or write. One task per connection, matching the "optional
//! worker-thread-per-connection" half of the concurrency model; nothing here
//! is shared across connections except through [`crate::root::Root`]'s
//! locked registry.
//!
//! Generic over the environment's instant type (not pinned to
//! `std::time::Instant`) so the exact same code drives both a production
//! node and `iocom-harness`'s turmoil simulation, which virtualises
//! `tokio::time` but not `std::time`.

use std::collections::HashMap;
use std::time::Duration;

use iocom_core::connection::{Connection, ConnectionAction, ConnectionConfig, ConnectionEvent};
use iocom_core::mblk_info::{BindOutcome, MblkKey};
use iocom_core::sbuf::{FramePlan, PrepareOutcome, SourceBuffer};
use iocom_core::tbuf::TargetBuffer;
use iocom_core::{Environment, MblkFlags};
use iocom_proto::header::{FrameFlags, Header, Transport};
use iocom_transport::{FrameReader, Link, ReceivedFrame};
use tokio::time::interval;

use crate::error::FabricError;
use crate::root::Root;

/// Memory block ids a connection assigns to blocks bound over it start
/// here; lower ids are reserved, matching `ioc_identifiers`.
const FIRST_MBLK_ID: u32 = 8;

/// One memory block bound over this connection. Which of `source`/`target`
/// is present follows the block's local direction flags: `UP` gets a
/// [`SourceBuffer`], `DOWN` a [`TargetBuffer`], `BIDIRECTIONAL` both.
struct BoundMblk {
    key: MblkKey,
    source: Option<SourceBuffer>,
    target: Option<TargetBuffer>,
    /// A plan already built by `source.prepare()` but not yet sent, because
    /// the link's flow-control budget didn't allow it on the tick it was
    /// built. Retried on later ticks without re-preparing.
    pending_send: Option<FramePlan>,
}

/// Builds the buffers a bound block needs for this connection, from its own
/// already-resolved direction flags (`bind` flips them for a dynamically
/// mirrored block, so this never has to compare local vs. peer itself).
fn bind_buffers(key: MblkKey, nbytes: usize, flags: MblkFlags) -> BoundMblk {
    let bidirectional = flags.contains(MblkFlags::BIDIRECTIONAL);
    let source =
        (bidirectional || flags.contains(MblkFlags::UP)).then(|| SourceBuffer::new(nbytes, bidirectional));
    let target = (bidirectional || flags.contains(MblkFlags::DOWN))
        .then(|| TargetBuffer::new(nbytes, bidirectional));
    BoundMblk { key, source, target, pending_send: None }
}

/// Runs one connection end to end: sends the initial auth frame, then
/// alternates between reading frames off `link` and ticking the connection
/// state machine for keep-alive/silence timeouts, until the link closes.
///
/// # Errors
///
/// Returns [`FabricError`] if the initial auth frame cannot be sent.
pub async fn run<E: Environment>(
    root: &Root,
    mut link: Box<dyn Link>,
    peer: String,
    transport: Transport,
    config: ConnectionConfig,
    env: &E,
    network_name: String,
    device_name: String,
    allow_dynamic_mblk: bool,
) -> Result<(), FabricError> {
    let connection_id = root.next_connection_id();
    let now = env.now();
    let mut conn = Connection::new(now, config);
    let mut bindings: HashMap<u32, BoundMblk> = HashMap::new();
    let mut next_mblk_id = FIRST_MBLK_ID;
    let mut reader = FrameReader::new(transport);
    let authenticator = root.authenticator();

    for action in conn.send_auth(now)? {
        execute(&mut link, action).await?;
    }

    let mut ticker = interval(Duration::from_millis(50));
    loop {
        tokio::select! {
            frame = reader.read_frame(&mut link) => {
                let frame = match frame {
                    Ok(f) => f,
                    Err(iocom_transport::TransportError::Closed) => {
                        tracing::info!(connection_id, peer = %peer, "link closed by peer");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(connection_id, peer = %peer, error = %e, "link read failed");
                        return Err(e.into());
                    }
                };
                let now = env.now();
                match frame {
                    ReceivedFrame::Ack { bytes_received } => {
                        conn.on_ack_received(bytes_received, now);
                    }
                    ReceivedFrame::Data { header, payload } => {
                        if header.flags.contains(FrameFlags::SYSTEM_FRAME) {
                            let events = conn.handle_frame(
                                &header, &payload, authenticator.as_ref(), &peer, now,
                            )?;
                            for event in events {
                                let actions = handle_event(
                                    root, event, &network_name, &device_name,
                                    allow_dynamic_mblk, env, &mut bindings, &mut next_mblk_id,
                                    &mut conn, now,
                                );
                                for action in actions {
                                    execute(&mut link, action).await?;
                                }
                            }
                        } else if conn.is_open() {
                            apply_data_frame(root, &header, &payload, &mut bindings);
                        }
                    }
                }
            }
            _ = ticker.tick() => {
                let now = env.now();
                for action in conn.tick(now) {
                    if matches!(action, ConnectionAction::Close { .. }) {
                        execute(&mut link, action).await?;
                        tracing::info!(connection_id, peer = %peer, "connection closed locally");
                        return Ok(());
                    }
                    execute(&mut link, action).await?;
                }
                if conn.is_open() {
                    for action in drive_outbound(root, &mut bindings, &mut conn, now) {
                        execute(&mut link, action).await?;
                    }
                }
            }
        }
    }

    Ok(())
}

async fn execute(link: &mut Box<dyn Link>, action: ConnectionAction) -> Result<(), FabricError> {
    match action {
        ConnectionAction::SendBytes(bytes) => {
            iocom_transport::framed::write_raw(link, &bytes).await?;
            Ok(())
        }
        ConnectionAction::Close { reason } => {
            tracing::debug!(reason, "connection action requested close");
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_event<E: Environment>(
    root: &Root,
    event: ConnectionEvent,
    network_name: &str,
    device_name: &str,
    allow_dynamic_mblk: bool,
    env: &E,
    bindings: &mut HashMap<u32, BoundMblk>,
    next_mblk_id: &mut u32,
    conn: &mut Connection<E::Instant>,
    now: E::Instant,
) -> Vec<ConnectionAction> {
    match event {
        ConnectionEvent::AuthAccepted(allowed) => {
            tracing::debug!(networks = allowed.len(), "authentication accepted");
            advertise_local_mblks(root, network_name, device_name, bindings, next_mblk_id, conn, now)
        }
        ConnectionEvent::MblkInfo(info) => {
            let outcome =
                root.with_registry(|reg| reg.bind(&info, network_name, device_name, allow_dynamic_mblk, env));
            match outcome {
                BindOutcome::Matched(key) | BindOutcome::Created(key) => {
                    let Some((nbytes, flags)) =
                        root.with_registry(|reg| reg.get(&key).map(|b| (b.len(), b.flags())))
                    else {
                        return vec![];
                    };
                    let id = *next_mblk_id;
                    *next_mblk_id += 1;
                    bindings.insert(id, bind_buffers(key, nbytes, flags));
                }
                BindOutcome::Rejected => {
                    tracing::warn!(mblk = %info.mblk_name.unwrap_or_default(), "mblk bind rejected");
                }
            }
            vec![]
        }
        ConnectionEvent::RemoveMblk(request) => {
            bindings.retain(|_, b| b.key.mblk_name != request.mblk_name);
            vec![]
        }
    }
}

/// Advertises every block this node owns on `network_name`/`device_name` to
/// a peer whose auth frame was just accepted, so the peer's own
/// `MblkInfo` handling can bind or mirror them without either side needing
/// to be separately configured to poll the other.
///
/// Also binds each advertised block on this side, since it's the owner of
/// the data, not the receiver of an `MblkInfo` event, and `handle_event`'s
/// `MblkInfo` arm only ever sees the peer's side of the exchange.
fn advertise_local_mblks<E: Environment>(
    root: &Root,
    network_name: &str,
    device_name: &str,
    bindings: &mut HashMap<u32, BoundMblk>,
    next_mblk_id: &mut u32,
    conn: &mut Connection<E::Instant>,
    now: E::Instant,
) -> Vec<ConnectionAction> {
    let owned = root.with_registry(|reg| {
        reg.owned_by(network_name, device_name)
            .map(|(key, block)| {
                let info = iocom_proto::payload::mblk_info::MblkInfo {
                    device_nr: block.device_nr(),
                    nbytes: block.len() as u32,
                    mblk_flags: block.flags().bits(),
                    device_name: Some(device_name.to_string()),
                    network_name: Some(network_name.to_string()),
                    mblk_name: Some(key.mblk_name.clone()),
                };
                (key.clone(), block.len(), block.flags(), info)
            })
            .collect::<Vec<_>>()
    });

    let mut actions = Vec::new();
    for (key, nbytes, flags, info) in owned {
        match conn.send_mblk_info(&info, now) {
            Ok(sent) => actions.extend(sent),
            Err(e) => {
                tracing::warn!(error = %e, "failed to advertise local memory block");
                continue;
            }
        }
        let id = *next_mblk_id;
        *next_mblk_id += 1;
        bindings.insert(id, bind_buffers(key, nbytes, flags));
    }
    actions
}

fn apply_data_frame(
    root: &Root,
    header: &Header,
    payload: &[u8],
    bindings: &mut HashMap<u32, BoundMblk>,
) {
    let Some(bound) = bindings.get_mut(&header.mblk_id) else { return };
    let Some(target) = bound.target.as_mut() else { return };
    let is_keyframe = !header.flags.contains(FrameFlags::DELTA_ENCODED);
    let compressed = header.flags.contains(FrameFlags::COMPRESSED);
    if let Err(e) = target.accept(header.addr as usize, payload, is_keyframe, compressed) {
        tracing::warn!(error = %e, "failed to decode incoming frame payload");
        return;
    }
    if header.flags.contains(FrameFlags::SYNC_COMPLETE) {
        root.with_registry(|reg| {
            if let Some(block) = reg.get_mut(&bound.key) {
                target.commit(block);
            }
        });
    }
}

/// Round-robin over every bound [`SourceBuffer`], building and sending one
/// data frame per block that has something pending, honouring the
/// connection's in-air flow-control budget.
fn drive_outbound<E: Environment>(
    root: &Root,
    bindings: &mut HashMap<u32, BoundMblk>,
    conn: &mut Connection<E::Instant>,
    now: E::Instant,
) -> Vec<ConnectionAction> {
    let mut actions = Vec::new();
    for (&id, bound) in bindings.iter_mut() {
        let Some(source) = bound.source.as_mut() else { continue };

        if bound.pending_send.is_none() {
            let Some(current) =
                root.with_registry(|reg| reg.get(&bound.key).map(|b| b.data().to_vec()))
            else {
                continue;
            };
            if current.is_empty() {
                continue;
            }
            source.invalidate(0, current.len() - 1);
            if let PrepareOutcome::Plan(plan) = source.prepare(&current) {
                bound.pending_send = Some(plan);
            }
        }

        let Some(plan) = bound.pending_send.as_ref() else { continue };
        if !conn.may_send(plan.data.len() as u16) {
            continue;
        }
        let plan = bound.pending_send.take().expect("checked Some above");
        match conn.send_data_frame(id, &plan, now) {
            Ok(sent) => actions.extend(sent),
            Err(e) => tracing::warn!(error = %e, "failed to send data frame"),
        }
        source.mark_sent();
    }
    actions
}
