//! Secure UDP transport
//!
//! Owns the socket, the handshake state machine, per-peer session state and
//! the background receive loop. Everything observable — established sessions,
//! reassembled frames, audio, errors, dead-peer warnings — is published as
//! [`TransportEvent`]s on a channel; the caller drains them at its own pace.
//!
//! The receive loop blocks on the socket with a short timeout so it can poll
//! the shutdown flag and the keepalive timers between datagrams. Shutdown
//! clears the running flag, joins the thread, and only then lets the socket
//! handles drop.

use bytes::Bytes;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};

use rtcast_control::{NetworkMonitor, QosPolicy};
use rtcast_crypto::{verify, CryptoError, Identity, ReplayWindow, SessionCipher};
use rtcast_io::{SocketError, Timer, Timestamp, UdpTransportSocket};
use rtcast_protocol::{
    chunk_frame, AudioHeader, ChunkError, ChunkHeader, FrameAssembler, HandshakePacket, Packet,
    PacketError, PacketType, PingInfo, CHUNK_HEADER_SIZE, FLAG_ENCRYPTED, FLAG_HANDSHAKE_RESPONSE,
    MAX_CHUNK_DATA, MAX_PACKET_SIZE, MAX_PAYLOAD_SIZE,
};

/// Interval between keepalive pings once established
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Interval between handshake retransmissions while awaiting the response
pub const HANDSHAKE_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Silence after which the peer is flagged as unresponsive
pub const UNRESPONSIVE_AFTER: Duration = Duration::from_secs(15);

/// Bytes an encrypted payload grows by: 8-byte nonce prefix + 16-byte tag
const ENCRYPTION_OVERHEAD: usize = 24;

/// Handshake progression; never regresses except through `shutdown`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Disconnected,
    Connecting,
    HandshakeSent,
    Established,
}

/// Events published by the transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Handshake completed; the session is usable
    Connected { peer_id: u64 },
    /// A video frame finished reassembly
    FrameReady {
        payload: Bytes,
        width: u32,
        height: u32,
        timestamp_us: u64,
        keyframe: bool,
    },
    /// An audio payload arrived
    AudioReady { payload: Bytes, timestamp_us: u64 },
    /// No pong for [`UNRESPONSIVE_AFTER`]; connection may be dead
    PeerUnresponsive,
    /// A non-fatal protocol or crypto failure on the receive path
    Error(String),
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub bind_addr: SocketAddr,
    /// Encrypt video and audio payloads with the session cipher
    pub encrypt: bool,
    /// Prefer small kernel buffers over deep queues
    pub low_latency: bool,
}

impl TransportConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        TransportConfig {
            bind_addr,
            encrypt: true,
            low_latency: true,
        }
    }
}

struct PeerSession {
    addr: SocketAddr,
    peer_id: u64,
    cipher: Option<SessionCipher>,
    send_nonce: u64,
    recv_window: ReplayWindow,
    assembler: FrameAssembler,
    /// Encoded handshake request, kept for retransmission until the
    /// response arrives
    pending_handshake: Option<Vec<u8>>,
    handshake_retry: Timer,
    keepalive: Timer,
    ping_seq: u32,
    last_pong: Timestamp,
    flagged_unresponsive: bool,
}

struct ConnState {
    handshake: HandshakeState,
    session: Option<PeerSession>,
}

struct Shared {
    identity: Identity,
    monitor: Arc<NetworkMonitor>,
    conn: Mutex<ConnState>,
    /// Frame dimensions attached to delivered frames; set out of band
    dims: Mutex<(u32, u32)>,
    events: Sender<TransportEvent>,
    epoch: Timestamp,
    encrypt: bool,
}

impl Shared {
    fn now_us(&self) -> u64 {
        Timestamp::now().micros_since(self.epoch)
    }
}

/// Secure peer-to-peer streaming transport
pub struct Transport {
    shared: Arc<Shared>,
    socket: UdpTransportSocket,
    qos: QosPolicy,
    running: Arc<AtomicBool>,
    recv_thread: Option<JoinHandle<()>>,
    next_frame_id: u32,
    last_send: Option<Timestamp>,
}

impl Transport {
    /// Bind the socket and start the receive loop
    ///
    /// Returns the transport together with its event stream.
    pub fn new(
        config: TransportConfig,
        identity: Identity,
        monitor: Arc<NetworkMonitor>,
    ) -> Result<(Self, Receiver<TransportEvent>), TransportError> {
        let socket = UdpTransportSocket::bind(config.bind_addr)?;
        if config.low_latency {
            socket.tune_low_latency()?;
        } else {
            socket.tune_throughput()?;
        }

        info!(
            addr = %socket.local_addr()?,
            fingerprint = %identity.fingerprint(),
            "transport bound"
        );

        let (tx, rx) = unbounded();
        let shared = Arc::new(Shared {
            identity,
            monitor,
            conn: Mutex::new(ConnState {
                handshake: HandshakeState::Disconnected,
                session: None,
            }),
            dims: Mutex::new((0, 0)),
            events: tx,
            epoch: Timestamp::now(),
            encrypt: config.encrypt,
        });

        let running = Arc::new(AtomicBool::new(true));
        let recv_socket = socket.try_clone()?;
        let recv_shared = Arc::clone(&shared);
        let recv_running = Arc::clone(&running);
        let recv_thread = std::thread::Builder::new()
            .name("rtcast-recv".into())
            .spawn(move || receive_loop(recv_socket, recv_shared, recv_running))
            .map_err(TransportError::Io)?;

        Ok((
            Transport {
                shared,
                socket,
                qos: QosPolicy::new(),
                running,
                recv_thread: Some(recv_thread),
                next_frame_id: 0,
                last_send: None,
            },
            rx,
        ))
    }

    /// Local socket address
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn handshake_state(&self) -> HandshakeState {
        self.shared.conn.lock().handshake
    }

    /// Attach dimensions to subsequently delivered frames
    ///
    /// The wire format carries no width or height, so the embedder supplies
    /// them out of band. Frames report 0x0 until this is called.
    pub fn set_frame_dimensions(&self, width: u32, height: u32) {
        *self.shared.dims.lock() = (width, height);
    }

    /// Initiate a handshake with a remote peer
    ///
    /// The request is kept and retransmitted on [`HANDSHAKE_RETRY_INTERVAL`]
    /// by the receive loop until the response arrives.
    pub fn connect(&mut self, remote: SocketAddr) -> Result<(), TransportError> {
        {
            let mut conn = self.shared.conn.lock();
            if conn.handshake == HandshakeState::Established {
                return Err(TransportError::AlreadyConnected);
            }
            conn.handshake = HandshakeState::Connecting;
        }

        let timestamp_us = unix_micros();
        let signature = self
            .shared
            .identity
            .sign(&timestamp_us.to_be_bytes());
        let hs = HandshakePacket::request(
            self.shared.identity.public_key(),
            timestamp_us,
            signature,
        );
        let packet = Packet::new(PacketType::Handshake, 0, hs.to_bytes())?;
        let bytes = packet.to_bytes().to_vec();

        // The receive loop may see the response the moment the datagram is
        // out, so the session and state move first.
        {
            let mut conn = self.shared.conn.lock();
            let mut session = PeerSession::new(remote);
            session.pending_handshake = Some(bytes.clone());
            conn.session = Some(session);
            conn.handshake = HandshakeState::HandshakeSent;
        }

        self.socket.send_to(&bytes, remote)?;
        debug!(%remote, "handshake sent");
        Ok(())
    }

    /// Chunk, optionally encrypt, and send one video frame
    pub fn send_video(
        &mut self,
        frame: &[u8],
        timestamp_us: u64,
        keyframe: bool,
    ) -> Result<(), TransportError> {
        let (addr, frame_id) = {
            let conn = self.shared.conn.lock();
            if conn.handshake != HandshakeState::Established {
                return Err(TransportError::NotConnected);
            }
            let session = conn.session.as_ref().ok_or(TransportError::NotConnected)?;
            let frame_id = self.next_frame_id;
            (session.addr, frame_id)
        };
        self.next_frame_id = self.next_frame_id.wrapping_add(1);

        let priority = self.qos.classify(frame.len());
        self.socket.set_tos(priority.dscp());

        let max_data = if self.shared.encrypt {
            MAX_CHUNK_DATA - ENCRYPTION_OVERHEAD
        } else {
            MAX_CHUNK_DATA
        };
        let chunks = chunk_frame(frame_id, frame, timestamp_us, keyframe, max_data)?;

        let mut sent_bytes = 0usize;
        for chunk in chunks {
            let packet = self.wrap_media(PacketType::Video, chunk)?;
            sent_bytes += self.socket.send_to(&packet, addr)?;
        }

        let now = Timestamp::now();
        if let Some(last) = self.last_send {
            self.shared.monitor.record_throughput(sent_bytes, now - last);
        }
        self.last_send = Some(now);
        Ok(())
    }

    /// Send one audio payload
    pub fn send_audio(&mut self, payload: &[u8], timestamp_us: u64) -> Result<(), TransportError> {
        let addr = {
            let conn = self.shared.conn.lock();
            if conn.handshake != HandshakeState::Established {
                return Err(TransportError::NotConnected);
            }
            conn.session.as_ref().ok_or(TransportError::NotConnected)?.addr
        };

        let header = AudioHeader { timestamp_us };
        let mut body = bytes::BytesMut::with_capacity(8 + payload.len());
        header.encode(&mut body);
        body.extend_from_slice(payload);

        let packet = self.wrap_media(PacketType::Audio, body.freeze())?;
        self.socket.send_to(&packet, addr)?;
        Ok(())
    }

    /// Wrap a media payload in a packet, sealing it when encryption is on
    fn wrap_media(
        &self,
        packet_type: PacketType,
        body: Bytes,
    ) -> Result<Vec<u8>, TransportError> {
        if !self.shared.encrypt {
            let packet = Packet::new(packet_type, 0, body)?;
            return Ok(packet.to_bytes().to_vec());
        }

        let mut conn = self.shared.conn.lock();
        let session = conn.session.as_mut().ok_or(TransportError::NotConnected)?;
        let cipher = session.cipher.as_ref().ok_or(TransportError::NotConnected)?;

        let counter = session.send_nonce;
        session.send_nonce += 1;
        let sealed = cipher.seal(counter, &body)?;

        let mut payload = bytes::BytesMut::with_capacity(8 + sealed.len());
        payload.extend_from_slice(&counter.to_be_bytes());
        payload.extend_from_slice(&sealed);
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TransportError::Packet(PacketError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            }));
        }
        let packet = Packet::new(packet_type, FLAG_ENCRYPTED, payload.freeze())?;
        Ok(packet.to_bytes().to_vec())
    }

    /// Stop the receive loop and tear the session down
    ///
    /// Joins the receive thread before any socket handle drops, then zeroes
    /// session secrets by dropping the peer session.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.recv_thread.take() {
            if handle.join().is_err() {
                warn!("receive thread panicked during shutdown");
            }
        }
        let mut conn = self.shared.conn.lock();
        conn.handshake = HandshakeState::Disconnected;
        conn.session = None;
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl PeerSession {
    fn new(addr: SocketAddr) -> Self {
        PeerSession {
            addr,
            peer_id: 0,
            cipher: None,
            send_nonce: 0,
            recv_window: ReplayWindow::new(),
            assembler: FrameAssembler::new(),
            pending_handshake: None,
            handshake_retry: Timer::new(HANDSHAKE_RETRY_INTERVAL),
            keepalive: Timer::new(KEEPALIVE_INTERVAL),
            ping_seq: 0,
            last_pong: Timestamp::now(),
            flagged_unresponsive: false,
        }
    }
}

fn unix_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

fn receive_loop(socket: UdpTransportSocket, shared: Arc<Shared>, running: Arc<AtomicBool>) {
    let mut buf = [0u8; MAX_PACKET_SIZE];

    while running.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok(Some((n, from))) => {
                if let Err(e) = handle_datagram(&socket, &shared, &buf[..n], from) {
                    debug!(%from, error = %e, "dropped datagram");
                    let _ = shared.events.send(TransportEvent::Error(e.to_string()));
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "receive failed, stopping");
                let _ = shared.events.send(TransportEvent::Error(e.to_string()));
                break;
            }
        }

        run_keepalive(&socket, &shared);
    }
}

/// Drive the session timers: handshake retransmits, pings, dead-peer checks
fn run_keepalive(socket: &UdpTransportSocket, shared: &Arc<Shared>) {
    let mut to_send: Option<(Vec<u8>, SocketAddr)> = None;
    let mut probe: Option<u32> = None;

    {
        let mut conn = shared.conn.lock();
        let state = conn.handshake;
        let Some(session) = conn.session.as_mut() else {
            return;
        };

        match state {
            HandshakeState::HandshakeSent => {
                // Handshake datagrams are unacknowledged; resend the kept
                // request until the response lands.
                if session.handshake_retry.try_fire() {
                    if let Some(bytes) = &session.pending_handshake {
                        debug!(peer = %session.addr, "handshake retransmitted");
                        to_send = Some((bytes.clone(), session.addr));
                    }
                }
            }
            HandshakeState::Established => {
                if session.last_pong.elapsed() >= UNRESPONSIVE_AFTER
                    && !session.flagged_unresponsive
                {
                    session.flagged_unresponsive = true;
                    warn!(peer_id = session.peer_id, "peer unresponsive");
                    let _ = shared.events.send(TransportEvent::PeerUnresponsive);
                }

                if session.keepalive.try_fire() {
                    session.ping_seq = session.ping_seq.wrapping_add(1);
                    let ping = PingInfo::new(session.ping_seq, shared.now_us());
                    if let Ok(packet) = Packet::new(PacketType::Ping, 0, ping.to_bytes()) {
                        to_send = Some((packet.to_bytes().to_vec(), session.addr));
                        probe = Some(session.ping_seq);
                    }
                }
            }
            _ => return,
        }
    }

    if let Some((bytes, addr)) = to_send {
        if let Some(seq) = probe {
            shared.monitor.record_sent(seq, shared.now_us());
        }
        if let Err(e) = socket.send_to(&bytes, addr) {
            warn!(error = %e, "keepalive send failed");
        }
    }
}

fn handle_datagram(
    socket: &UdpTransportSocket,
    shared: &Arc<Shared>,
    datagram: &[u8],
    from: SocketAddr,
) -> Result<(), TransportError> {
    let packet = Packet::from_bytes(datagram)?;

    match packet.header.packet_type {
        PacketType::Handshake => handle_handshake(socket, shared, &packet, from),
        PacketType::Video => handle_video(shared, &packet),
        PacketType::Audio => handle_audio(shared, &packet),
        PacketType::Ping => {
            // Echo the probe back unchanged as a pong.
            let ping = PingInfo::from_bytes(&packet.payload)?;
            let pong = Packet::new(PacketType::Pong, 0, ping.to_bytes())?;
            socket.send_to(&pong.to_bytes(), from)?;
            Ok(())
        }
        PacketType::Pong => {
            let pong = PingInfo::from_bytes(&packet.payload)?;
            shared.monitor.record_ack(pong.seq, shared.now_us());
            let mut conn = shared.conn.lock();
            if let Some(session) = conn.session.as_mut() {
                session.last_pong = Timestamp::now();
                session.flagged_unresponsive = false;
            }
            Ok(())
        }
    }
}

fn handle_handshake(
    socket: &UdpTransportSocket,
    shared: &Arc<Shared>,
    packet: &Packet,
    from: SocketAddr,
) -> Result<(), TransportError> {
    let is_response = packet.header.has_flag(FLAG_HANDSHAKE_RESPONSE);
    let hs = HandshakePacket::from_bytes(&packet.payload, is_response)?;

    // Fail closed: a bad signature aborts the attempt entirely.
    verify(&hs.public_key, &hs.signed_bytes(), &hs.signature)?;

    if is_response {
        // Initiator side: the responder's reply completes the handshake.
        let peer_id = hs.peer_id.ok_or(TransportError::Packet(
            PacketError::Truncated {
                expected: rtcast_protocol::HANDSHAKE_RESPONSE_SIZE,
                actual: packet.payload.len(),
            },
        ))?;
        let secret = shared.identity.shared_secret(&hs.public_key)?;

        let mut conn = shared.conn.lock();
        if conn.handshake != HandshakeState::HandshakeSent {
            debug!("unexpected handshake response, ignoring");
            return Ok(());
        }
        let session = conn.session.as_mut().ok_or(TransportError::NotConnected)?;
        session.peer_id = peer_id;
        session.cipher = Some(SessionCipher::new(&secret));
        session.pending_handshake = None;
        session.last_pong = Timestamp::now();
        conn.handshake = HandshakeState::Established;

        info!(peer_id, fingerprint = %rtcast_crypto::fingerprint(&hs.public_key), "session established");
        let _ = shared.events.send(TransportEvent::Connected { peer_id });
        return Ok(());
    }

    // Responder side: verify, assign a peer id, reply with our signed key.
    let peer_id: u64 = rand::thread_rng().gen();
    let secret = shared.identity.shared_secret(&hs.public_key)?;

    let timestamp_us = unix_micros();
    let signature = shared.identity.sign(&timestamp_us.to_be_bytes());
    let reply = HandshakePacket::response(
        shared.identity.public_key(),
        timestamp_us,
        signature,
        peer_id,
    );
    let reply_packet = Packet::new(
        PacketType::Handshake,
        FLAG_HANDSHAKE_RESPONSE,
        reply.to_bytes(),
    )?;
    socket.send_to(&reply_packet.to_bytes(), from)?;

    let mut conn = shared.conn.lock();
    let mut session = PeerSession::new(from);
    session.peer_id = peer_id;
    session.cipher = Some(SessionCipher::new(&secret));
    // Both directions share one key; the responder counts nonces from the
    // top half of the range so the two senders never collide.
    session.send_nonce = 1 << 63;
    conn.session = Some(session);
    conn.handshake = HandshakeState::Established;

    info!(peer_id, fingerprint = %rtcast_crypto::fingerprint(&hs.public_key), "accepted session");
    let _ = shared.events.send(TransportEvent::Connected { peer_id });
    Ok(())
}

/// Strip the nonce prefix and open an encrypted payload
fn unseal(shared: &Arc<Shared>, packet: &Packet) -> Result<Bytes, TransportError> {
    if !packet.header.has_flag(FLAG_ENCRYPTED) {
        return Ok(packet.payload.clone());
    }
    if packet.payload.len() < 8 {
        return Err(TransportError::Packet(PacketError::Truncated {
            expected: 8,
            actual: packet.payload.len(),
        }));
    }

    let mut counter_bytes = [0u8; 8];
    counter_bytes.copy_from_slice(&packet.payload[..8]);
    let counter = u64::from_be_bytes(counter_bytes);

    let mut conn = shared.conn.lock();
    let session = conn.session.as_mut().ok_or(TransportError::NotConnected)?;
    let cipher = session.cipher.as_ref().ok_or(TransportError::NotConnected)?;
    let opened = cipher.open(counter, &packet.payload[8..])?;
    // Only counters that authenticated advance the window, so a forged
    // datagram cannot block the legitimate one.
    if !session.recv_window.accept(counter) {
        return Err(TransportError::Crypto(CryptoError::ReplayedCounter(counter)));
    }
    Ok(Bytes::from(opened))
}

fn handle_video(shared: &Arc<Shared>, packet: &Packet) -> Result<(), TransportError> {
    let body = unseal(shared, packet)?;
    let header = ChunkHeader::decode(&body)?;
    let data = &body[CHUNK_HEADER_SIZE..];

    let complete = {
        let mut conn = shared.conn.lock();
        let session = conn.session.as_mut().ok_or(TransportError::NotConnected)?;
        session.assembler.push(&header, data)?
    };

    if let Some(frame) = complete {
        let (width, height) = *shared.dims.lock();
        let _ = shared.events.send(TransportEvent::FrameReady {
            payload: frame.payload,
            width,
            height,
            timestamp_us: frame.timestamp_us,
            keyframe: frame.keyframe,
        });
    }
    Ok(())
}

fn handle_audio(shared: &Arc<Shared>, packet: &Packet) -> Result<(), TransportError> {
    let body = unseal(shared, packet)?;
    let header = AudioHeader::decode(&body)?;
    let _ = shared.events.send(TransportEvent::AudioReady {
        payload: body.slice(8..),
        timestamp_us: header.timestamp_us,
    });
    Ok(())
}

/// Transport failures
///
/// Protocol and crypto variants reject a single packet or handshake attempt;
/// socket errors from the send path are terminal for the caller to handle.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Socket(#[from] SocketError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("chunk error: {0}")]
    Chunk(#[from] ChunkError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> (Transport, Receiver<TransportEvent>) {
        let config = TransportConfig::new("127.0.0.1:0".parse().unwrap());
        Transport::new(config, Identity::generate(), Arc::new(NetworkMonitor::new())).unwrap()
    }

    #[test]
    fn test_starts_disconnected() {
        let (t, _events) = transport();
        assert_eq!(t.handshake_state(), HandshakeState::Disconnected);
    }

    #[test]
    fn test_send_before_connect_fails() {
        let (mut t, _events) = transport();
        assert!(matches!(
            t.send_video(&[0u8; 100], 0, false),
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            t.send_audio(&[0u8; 100], 0),
            Err(TransportError::NotConnected)
        ));
    }

    #[test]
    fn test_connect_advances_state() {
        let (mut t, _events) = transport();
        let sink = UdpTransportSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        t.connect(sink.local_addr().unwrap()).unwrap();
        assert_eq!(t.handshake_state(), HandshakeState::HandshakeSent);
    }

    #[test]
    fn test_shutdown_idempotent() {
        let (mut t, _events) = transport();
        t.shutdown();
        t.shutdown();
        assert_eq!(t.handshake_state(), HandshakeState::Disconnected);
    }
}
