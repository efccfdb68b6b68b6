//! Shared harness for integration tests: an in-memory recording mesh, a
//! hand-driven clock, and helpers to wire engines together.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use cadence_lockstep::wire::codec;
use cadence_lockstep::wire::messages::{
    self, FrameDto, PlayersSnapshotInstallCommand, PlayersUpdateCommand, PlayersUpdateKind,
};
use cadence_lockstep::{
    Frame, LockstepConfig, LockstepEngine, ManualClock, MeshSocket, OutboundPacket, PeerId,
    PlayerId, WallMs,
};

pub const DELTA: f64 = 1.0 / 30.0;

pub type Outbox = Rc<RefCell<Vec<(PeerId, OutboundPacket)>>>;

/// Mesh stub that records every outbound packet with its addressee.
pub struct RecordingMesh {
    pub outbox: Outbox,
}

impl MeshSocket for RecordingMesh {
    fn send_to(&mut self, peer: &PeerId, packet: OutboundPacket) {
        self.outbox.borrow_mut().push((*peer, packet));
    }
}

pub fn peer(tag: u8) -> PeerId {
    PeerId::from_bytes([tag; 16])
}

/// One engine attached to a recording mesh, with a frame collector.
pub struct TestPeer {
    pub engine: LockstepEngine,
    pub id: PeerId,
    pub outbox: Outbox,
    pub frames: Rc<RefCell<Vec<Frame>>>,
}

pub fn networked_peer(tag: u8, clock: Rc<ManualClock>) -> TestPeer {
    let id = peer(tag);
    let outbox: Outbox = Rc::new(RefCell::new(Vec::new()));
    let mut engine = LockstepEngine::new(LockstepConfig::default());
    engine.attach_session(
        id,
        "test-game".to_owned(),
        Box::new(RecordingMesh {
            outbox: outbox.clone(),
        }),
        Box::new(clock),
    );
    let frames = Rc::new(RefCell::new(Vec::new()));
    let sink = frames.clone();
    engine
        .events_mut()
        .on_step
        .subscribe(Box::new(move |frame: &mut Frame| {
            sink.borrow_mut().push(frame.clone());
        }));
    TestPeer {
        engine,
        id,
        outbox,
        frames,
    }
}

/// Installs a server roster snapshot into one engine.
pub fn install_roster(
    target: &mut TestPeer,
    update_id: i32,
    current_player: i32,
    roster: &[(i32, PeerId)],
) {
    let mut players = BTreeMap::new();
    for (player_id, peer_id) in roster {
        players.insert(PlayerId::new(*player_id), *peer_id);
    }
    let command = PlayersSnapshotInstallCommand {
        update_id,
        current_player_id: PlayerId::new(current_player),
        players,
    };
    let payload = codec::encode(&command).expect("encode roster snapshot");
    target
        .engine
        .handle_packet(messages::PLAYERS_INSTALL_SNAPSHOT_ROUTE, &payload)
        .expect("install roster snapshot");
}

/// Sends a server roster update into one engine.
pub fn send_roster_update(
    target: &mut TestPeer,
    kind: PlayersUpdateKind,
    update_id: i32,
    player_id: i32,
    peer_id: PeerId,
) {
    let command = PlayersUpdateCommand {
        command_type: kind,
        update_id,
        player_id: PlayerId::new(player_id),
        player_session_id: peer_id,
    };
    let payload = codec::encode(&command).expect("encode roster update");
    target
        .engine
        .handle_packet(messages::PLAYERS_UPDATE_ROUTE, &payload)
        .expect("roster update");
}

/// A frame update with empty command batch and hash.
pub fn frame_dto(sent_on: WallMs, gameplay: f64, validated: f64) -> FrameDto {
    FrameDto {
        sent_on,
        gameplay_time_seconds: gameplay,
        validated_gameplay_time_seconds: validated,
        delta_time_per_frame_seconds: DELTA,
        first_command_received: Default::default(),
        last_command_received: Default::default(),
        consistency_data: Vec::new(),
        commands: Default::default(),
    }
}

/// Injects a crafted frame update as if peer `from` had sent it.
pub fn inject_frame(target: &mut TestPeer, from: PeerId, dto: &FrameDto) {
    let packet = messages::frame_packet(&from, dto).expect("encode frame");
    target
        .engine
        .handle_packet(packet.route, &packet.payload)
        .expect("frame update");
}

/// Delivers every queued packet to its addressee among `peers`.
pub fn deliver_all(peers: &mut [TestPeer]) {
    let mut in_flight = Vec::new();
    for test_peer in peers.iter_mut() {
        in_flight.extend(test_peer.outbox.borrow_mut().drain(..));
    }
    for (dest, packet) in in_flight {
        if let Some(target) = peers.iter_mut().find(|p| p.id == dest) {
            target
                .engine
                .handle_packet(packet.route, &packet.payload)
                .expect("deliver packet");
        }
    }
}

/// Drains packets queued for one specific addressee, returning them.
pub fn drain_packets_to(from: &mut TestPeer, dest: PeerId) -> Vec<OutboundPacket> {
    let mut kept = Vec::new();
    let mut matched = Vec::new();
    for (addr, packet) in from.outbox.borrow_mut().drain(..) {
        if addr == dest {
            matched.push(packet);
        } else {
            kept.push((addr, packet));
        }
    }
    from.outbox.borrow_mut().extend(kept);
    matched
}

/// Runs one `adjust_tick`/`tick`/`end_frame` cycle, returning the granted
/// delta.
pub fn drive(test_peer: &mut TestPeer, target_delta: f64) -> f64 {
    let granted = test_peer.engine.adjust_tick(target_delta, target_delta);
    test_peer.engine.tick(granted, target_delta);
    test_peer.engine.end_frame();
    granted
}
