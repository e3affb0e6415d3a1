//! The session state machine (§4.4, §5, §9): a single actor task owns the
//! write half of the transport and all mutable state, fed by two satellite
//! tasks (inbound framing, heartbeat/liveness ticking) over channels rather
//! than a shared mutex. [`Session`] is the cheap, cloneable handle the
//! caller uses to drive it.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::admin::{self, PipeDelimited};
use crate::codec::{self, GroupDictionary, Message};
use crate::config::SessionConfig;
use crate::error::{FixError, Result};
use crate::identity::SessionIdentity;
use crate::replay::{self, ReplayAction};
use crate::store::{MessageStore, SequenceState, SequenceStore};

/// Which side of the connection this session plays. An initiator sends the
/// first Logon after `start()`; an acceptor waits for one and answers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Acceptor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    LogonSent,
    LoggedOn,
    LogoutSent,
}

/// Why a session stopped producing [`SessionEvent::Application`] events.
/// Closed to the five causes named by the external interface contract;
/// a missed-heartbeat liveness timeout is reported as
/// `IOError(ErrorKind::TimedOut)` rather than a sixth variant.
#[derive(Debug, Clone)]
pub enum TerminalReason {
    PeerClosed,
    LogoutReceived,
    SequenceFatal,
    IOError(io::ErrorKind),
    MalformedPeer,
}

#[derive(Debug)]
pub enum SessionEvent {
    Application(Message),
    Terminal(TerminalReason),
}

/// Receives [`SessionEvent`]s from a session's actor task.
pub struct SessionEvents {
    rx: mpsc::Receiver<SessionEvent>,
}

impl SessionEvents {
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }
}

/// A cheap, cloneable handle to a running session. Dropping every clone
/// does not stop the actor; call [`Session::stop`] explicitly.
#[derive(Clone)]
pub struct Session {
    app_tx: mpsc::Sender<Message>,
    state_rx: watch::Receiver<SessionState>,
    started_tx: watch::Sender<bool>,
    stop_tx: watch::Sender<bool>,
}

impl Session {
    /// Construct a session over an already-connected, framed-at-the-byte-level
    /// transport. No bytes are sent or read until [`Session::start`] is
    /// called; this crate owns no accept or dial loop (§1, Non-goals).
    pub async fn new<S>(
        stream: S,
        identity: SessionIdentity,
        role: Role,
        config: SessionConfig,
        msg_store: Arc<dyn MessageStore>,
    ) -> Result<(Session, SessionEvents)>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let file_key = identity.file_key();
        let seq_store = SequenceStore::new(&config.store_dir, &file_key);
        let mut seq = seq_store.load().await?;
        if config.reset_on_logon {
            seq = SequenceState::default();
            seq_store.persist(&seq).await?;
        }

        let (read_half, write_half) = tokio::io::split(stream);

        let (app_tx, app_rx) = mpsc::channel(64);
        let (internal_tx, internal_rx) = mpsc::channel(256);
        let (app_event_tx, app_event_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let (started_tx, started_rx) = watch::channel(false);
        let (stop_tx, stop_rx) = watch::channel(false);

        tokio::spawn(run_receiver(read_half, internal_tx.clone(), stop_rx.clone(), started_rx.clone()));
        tokio::spawn(run_ticker(internal_tx, stop_rx.clone(), started_rx.clone()));

        let actor = Actor {
            identity,
            dict: config.group_dictionary.clone(),
            config,
            role,
            state: SessionState::Disconnected,
            seq,
            seq_store,
            msg_store,
            file_key,
            write_half,
            last_sent: Instant::now(),
            last_received: Instant::now(),
            pending_test_req: None,
            app_event_tx,
            state_tx,
        };
        tokio::spawn(actor.run(app_rx, internal_rx, stop_rx, started_rx));

        Ok((Session { app_tx, state_rx, started_tx, stop_tx }, SessionEvents { rx: app_event_rx }))
    }

    /// Begin I/O: an initiator sends its Logon, an acceptor starts waiting
    /// for one. Idempotent.
    pub fn start(&self) {
        let _ = self.started_tx.send(true);
    }

    /// Request an orderly shutdown; satellite tasks and the actor observe
    /// this at their next suspension point. Idempotent.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Enqueue an application message for sending. Rejected at this API
    /// boundary, without touching the wire, if the session is not currently
    /// logged on.
    pub async fn send(&self, msg: Message) -> Result<()> {
        if self.state() != SessionState::LoggedOn {
            return Err(FixError::NotLoggedOn);
        }
        self.app_tx.send(msg).await.map_err(|_| FixError::ChannelClosed)
    }
}

enum Internal {
    Inbound(Bytes),
    Tick,
    ReadError(TerminalReason),
}

async fn wait_started(rx: &mut watch::Receiver<bool>) {
    if *rx.borrow() {
        return;
    }
    while rx.changed().await.is_ok() {
        if *rx.borrow() {
            return;
        }
    }
}

async fn run_receiver<R>(
    mut read_half: R,
    internal_tx: mpsc::Sender<Internal>,
    mut stop_rx: watch::Receiver<bool>,
    mut started_rx: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    wait_started(&mut started_rx).await;
    let mut framer = crate::framer::Framer::new();
    let mut buf = [0u8; 4096];
    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    return;
                }
            }
            result = tokio::time::timeout(Duration::from_secs(5), read_half.read(&mut buf)) => {
                match result {
                    Ok(Ok(0)) => {
                        let _ = internal_tx.send(Internal::ReadError(TerminalReason::PeerClosed)).await;
                        return;
                    }
                    Ok(Ok(n)) => {
                        framer.push(&buf[..n]);
                        while let Some(msg) = framer.next_message() {
                            if internal_tx.send(Internal::Inbound(msg)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        let _ = internal_tx.send(Internal::ReadError(TerminalReason::IOError(e.kind()))).await;
                        return;
                    }
                    Err(_elapsed) => {
                        // No bytes in 5s; loop back around so the stop flag
                        // and liveness ticking keep being observed.
                    }
                }
            }
        }
        if *stop_rx.borrow() {
            return;
        }
    }
}

async fn run_ticker(
    internal_tx: mpsc::Sender<Internal>,
    mut stop_rx: watch::Receiver<bool>,
    mut started_rx: watch::Receiver<bool>,
) {
    wait_started(&mut started_rx).await;
    let mut interval = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    return;
                }
            }
            _ = interval.tick() => {
                if internal_tx.send(Internal::Tick).await.is_err() {
                    return;
                }
            }
        }
        if *stop_rx.borrow() {
            return;
        }
    }
}

fn now_str() -> String {
    chrono::Utc::now().format("%Y%m%d-%H:%M:%S%.3f").to_string()
}

struct Actor<W> {
    identity: SessionIdentity,
    config: SessionConfig,
    role: Role,
    dict: GroupDictionary,
    state: SessionState,
    seq: SequenceState,
    seq_store: SequenceStore,
    msg_store: Arc<dyn MessageStore>,
    file_key: String,
    write_half: W,
    last_sent: Instant,
    last_received: Instant,
    pending_test_req: Option<(String, Instant)>,
    app_event_tx: mpsc::Sender<SessionEvent>,
    state_tx: watch::Sender<SessionState>,
}

impl<W> Actor<W>
where
    W: AsyncWrite + Unpin,
{
    async fn run(
        mut self,
        mut app_rx: mpsc::Receiver<Message>,
        mut internal_rx: mpsc::Receiver<Internal>,
        mut stop_rx: watch::Receiver<bool>,
        mut started_rx: watch::Receiver<bool>,
    ) {
        wait_started(&mut started_rx).await;

        if self.role == Role::Initiator {
            if let Err(e) = self.send_logon().await {
                let reason = self.error_to_terminal(&e);
                self.terminate(reason).await;
                return;
            }
            self.set_state(SessionState::LogonSent);
        }

        loop {
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                maybe = app_rx.recv() => {
                    match maybe {
                        Some(msg) => {
                            if let Err(e) = self.send_internal(msg).await {
                                let reason = self.error_to_terminal(&e);
                                self.terminate(reason).await;
                                break;
                            }
                        }
                        None => break,
                    }
                }
                maybe = internal_rx.recv() => {
                    match maybe {
                        Some(Internal::Inbound(raw)) => {
                            match self.handle_inbound(raw).await {
                                Ok(Some(reason)) => { self.terminate(reason).await; break; }
                                Ok(None) => {}
                                Err(e) => { let reason = self.error_to_terminal(&e); self.terminate(reason).await; break; }
                            }
                        }
                        Some(Internal::Tick) => {
                            match self.handle_tick().await {
                                Ok(Some(reason)) => { self.terminate(reason).await; break; }
                                Ok(None) => {}
                                Err(e) => { let reason = self.error_to_terminal(&e); self.terminate(reason).await; break; }
                            }
                        }
                        Some(Internal::ReadError(reason)) => { self.terminate(reason).await; break; }
                        None => break,
                    }
                }
            }
            if *stop_rx.borrow() {
                break;
            }
        }
    }

    fn error_to_terminal(&self, err: &FixError) -> TerminalReason {
        match err {
            FixError::Codec(_) => TerminalReason::MalformedPeer,
            FixError::Store(e) => TerminalReason::IOError(e.kind()),
            _ => TerminalReason::IOError(io::ErrorKind::Other),
        }
    }

    fn set_state(&mut self, s: SessionState) {
        self.state = s;
        let _ = self.state_tx.send(s);
    }

    async fn terminate(&mut self, reason: TerminalReason) {
        self.set_state(SessionState::Disconnected);
        let _ = self.app_event_tx.send(SessionEvent::Terminal(reason)).await;
    }

    async fn write_raw(&mut self, bytes: &Bytes) -> io::Result<()> {
        tracing::debug!(msg = %PipeDelimited(bytes), "SEND");
        self.write_half.write_all(bytes).await?;
        self.last_sent = Instant::now();
        Ok(())
    }

    /// The outbound send contract (§4.4): stamp header fields, assign the
    /// next sequence number, persist before the bytes go on the wire, only
    /// then advance the counter and write.
    async fn send_internal(&mut self, mut msg: Message) -> Result<()> {
        msg.set(49, self.identity.sender_comp_id.clone());
        msg.set(56, self.identity.target_comp_id.clone());
        let seq_no = self.seq.next_outbound;
        msg.set(34, seq_no.to_string());
        msg.set(52, now_str());

        let bytes = codec::encode(&msg, &self.identity.begin_string)?;
        self.msg_store.append_outbound(&self.file_key, seq_no, &bytes).await?;
        self.seq.next_outbound = seq_no + 1;
        self.seq_store.persist(&self.seq).await?;
        self.write_raw(&bytes).await?;
        Ok(())
    }

    async fn send_logon(&mut self) -> Result<()> {
        let msg = admin::build_logon(self.config.heartbeat_interval_secs, self.config.reset_on_logon);
        self.send_internal(msg).await
    }

    async fn accept_and_advance(&mut self, new_expected: u32) -> Result<()> {
        self.seq.next_expected_inbound = new_expected;
        self.seq_store.persist(&self.seq).await?;
        Ok(())
    }

    async fn handle_inbound(&mut self, raw: Bytes) -> Result<Option<TerminalReason>> {
        self.last_received = Instant::now();
        self.pending_test_req = None;
        tracing::debug!(msg = %PipeDelimited(&raw), "RECV");

        let decoded = match codec::decode(&raw, &self.dict) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "malformed inbound message");
                let _ = self.send_internal(admin::build_reject(0, Some(&e.to_string()))).await;
                return Ok(Some(TerminalReason::MalformedPeer));
            }
        };

        let n = match decoded.get_u32(34) {
            Some(v) => v,
            None => {
                let _ = self.send_internal(admin::build_reject(0, Some("missing MsgSeqNum"))).await;
                return Ok(Some(TerminalReason::MalformedPeer));
            }
        };

        match decoded.msg_type() {
            admin::MSG_TYPE_RESEND_REQUEST => {
                self.handle_resend_request(&decoded).await?;
                self.validate_and_advance(n, &decoded).await
            }
            admin::MSG_TYPE_SEQUENCE_RESET => self.handle_sequence_reset(n, &decoded).await,
            _ => self.validate_and_advance(n, &decoded).await,
        }
    }

    /// The per-inbound sequence gate (§4.4): exact match dispatches, ahead
    /// triggers a Resend Request and (per the simplified gap policy) jumps
    /// the expectation forward immediately, behind is either a silently
    /// ignored duplicate or fatal.
    async fn validate_and_advance(&mut self, n: u32, decoded: &Message) -> Result<Option<TerminalReason>> {
        let expected = self.seq.next_expected_inbound;
        if n == expected {
            self.accept_and_advance(expected + 1).await?;
            self.dispatch_accepted(decoded).await
        } else if n > expected {
            tracing::warn!(expected, got = n, "sequence gap detected, requesting resend");
            self.send_internal(admin::build_resend_request(expected, 0)).await?;
            self.accept_and_advance(n + 1).await?;
            self.dispatch_accepted(decoded).await
        } else if decoded.get(43) == Some("Y") {
            tracing::debug!(seq = n, "ignoring possible-duplicate retransmission");
            Ok(None)
        } else {
            tracing::error!(expected, got = n, "fatal sequence error, terminating session");
            let _ = self.send_internal(admin::build_logout(Some("sequence fatal"))).await;
            Ok(Some(TerminalReason::SequenceFatal))
        }
    }

    async fn dispatch_accepted(&mut self, decoded: &Message) -> Result<Option<TerminalReason>> {
        match decoded.msg_type() {
            admin::MSG_TYPE_LOGON => self.handle_logon(decoded).await,
            admin::MSG_TYPE_HEARTBEAT => Ok(None),
            admin::MSG_TYPE_TEST_REQUEST => self.handle_test_request(decoded).await,
            admin::MSG_TYPE_REJECT => {
                tracing::warn!("peer sent a Reject");
                Ok(None)
            }
            admin::MSG_TYPE_LOGOUT => self.handle_logout_received().await,
            admin::MSG_TYPE_RESEND_REQUEST => Ok(None), // already serviced in handle_inbound
            _ => {
                self.app_event_tx
                    .send(SessionEvent::Application(decoded.clone()))
                    .await
                    .map_err(|_| FixError::ChannelClosed)?;
                Ok(None)
            }
        }
    }

    async fn handle_logon(&mut self, decoded: &Message) -> Result<Option<TerminalReason>> {
        match self.role {
            Role::Initiator => {
                if self.state == SessionState::LogonSent {
                    self.set_state(SessionState::LoggedOn);
                }
            }
            Role::Acceptor => {
                if self.state == SessionState::Disconnected {
                    let hb = decoded.get_u32(108).unwrap_or(self.config.heartbeat_interval_secs);
                    self.send_internal(admin::build_logon(hb, false)).await?;
                    self.set_state(SessionState::LoggedOn);
                }
            }
        }
        Ok(None)
    }

    async fn handle_test_request(&mut self, decoded: &Message) -> Result<Option<TerminalReason>> {
        let id = decoded.get(112).map(|s| s.to_string());
        self.send_internal(admin::build_heartbeat(id.as_deref())).await?;
        Ok(None)
    }

    async fn handle_logout_received(&mut self) -> Result<Option<TerminalReason>> {
        let _ = self.send_internal(admin::build_logout(None)).await;
        Ok(Some(TerminalReason::LogoutReceived))
    }

    /// Sequence Reset (§4.4): Gap Fill advances the expectation without
    /// validating against the strict sequence gate; Reset mode sets the
    /// expectation outright and accepts a lower NewSeqNo only as a no-op.
    async fn handle_sequence_reset(&mut self, n: u32, decoded: &Message) -> Result<Option<TerminalReason>> {
        let new_seq = match decoded.get_u32(36) {
            Some(v) => v,
            None => return Ok(Some(TerminalReason::MalformedPeer)),
        };
        let gap_fill = decoded.get(123) == Some("Y");
        let expected = self.seq.next_expected_inbound;

        if gap_fill {
            if n < expected {
                return if decoded.get(43) == Some("Y") {
                    Ok(None)
                } else {
                    Ok(Some(TerminalReason::SequenceFatal))
                };
            }
            if new_seq <= expected {
                return Ok(Some(TerminalReason::SequenceFatal));
            }
            self.accept_and_advance(new_seq).await?;
            Ok(None)
        } else if new_seq > expected {
            self.accept_and_advance(new_seq).await?;
            Ok(None)
        } else {
            tracing::error!(new_seq, expected, "sequence reset would move expectation backward");
            Ok(Some(TerminalReason::SequenceFatal))
        }
    }

    /// Answer an inbound Resend Request (§4.5) by writing resends and gap
    /// fills directly to the wire. These writes bypass [`Self::send_internal`]
    /// entirely: a resend must carry its *original* MsgSeqNum, and neither a
    /// resend nor a Gap Fill consumes a fresh outbound sequence number.
    async fn handle_resend_request(&mut self, decoded: &Message) -> Result<()> {
        let (begin, end) = match (decoded.get_u32(7), decoded.get_u32(16)) {
            (Some(b), Some(e)) => (b, e),
            _ => {
                tracing::warn!("resend request missing BeginSeqNo/EndSeqNo, ignoring");
                return Ok(());
            }
        };
        let query_end = if end == 0 { self.seq.next_outbound.saturating_sub(1) } else { end };
        let log = self.msg_store.load_range(&self.file_key, begin, query_end).await?;
        let actions = replay::plan(begin, query_end, &log, &self.dict);

        for action in actions {
            match action {
                ReplayAction::Resend { seq, raw } => {
                    let mut m = codec::decode(&raw, &self.dict)?;
                    m.set(43, "Y");
                    m.set(52, now_str());
                    let refreshed = codec::encode(&m, &self.identity.begin_string)?;
                    self.write_raw(&refreshed).await?;
                    tracing::info!(seq, "resent message with PossDupFlag");
                }
                ReplayAction::GapFill { gap_start, new_seq_no } => {
                    let mut m = admin::build_sequence_reset(new_seq_no, true);
                    m.set(49, self.identity.sender_comp_id.clone());
                    m.set(56, self.identity.target_comp_id.clone());
                    m.set(34, gap_start.to_string());
                    m.set(52, now_str());
                    let bytes = codec::encode(&m, &self.identity.begin_string)?;
                    self.write_raw(&bytes).await?;
                    tracing::info!(gap_start, new_seq_no, "sent gap fill");
                }
            }
        }
        Ok(())
    }

    /// Drive heartbeat emission and the Test Request liveness probe (§4.4,
    /// §5). Invoked on a fixed sub-second tick so both timers stay accurate
    /// without depending on inbound traffic to make progress.
    async fn handle_tick(&mut self) -> Result<Option<TerminalReason>> {
        if self.state != SessionState::LoggedOn {
            return Ok(None);
        }
        let now = Instant::now();
        let hb = Duration::from_secs(self.config.heartbeat_interval_secs as u64);

        if now.duration_since(self.last_sent) >= hb {
            self.send_internal(admin::build_heartbeat(None)).await?;
        }

        let idle_threshold = hb.mul_f64(self.config.inbound_idle_multiplier);
        if now.duration_since(self.last_received) >= idle_threshold {
            match &self.pending_test_req {
                None => {
                    let id = uuid::Uuid::new_v4().to_string();
                    self.send_internal(admin::build_test_request(&id)).await?;
                    self.pending_test_req = Some((id, now));
                }
                Some((_, sent_at)) => {
                    if now.duration_since(*sent_at) >= hb {
                        tracing::error!("no response to Test Request within one heartbeat interval, declaring session dead");
                        return Ok(Some(TerminalReason::IOError(io::ErrorKind::TimedOut)));
                    }
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileMessageStore;
    use tokio::io::duplex;

    async fn harness(
        role: Role,
        reset_on_logon: bool,
    ) -> (Session, SessionEvents, tokio::io::DuplexStream, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn MessageStore> = Arc::new(FileMessageStore::new(dir.path()));
        let identity = SessionIdentity::new("CLIENT1", "SERVER1");
        let config = SessionConfig::builder()
            .heartbeat_interval_secs(30)
            .reset_on_logon(reset_on_logon)
            .store_dir(dir.path())
            .build()
            .unwrap();

        let (ours, theirs) = duplex(8192);
        let (session, events) = Session::new(ours, identity, role, config, store).await.unwrap();
        (session, events, theirs, dir)
    }

    async fn read_one(peer: &mut tokio::io::DuplexStream) -> Message {
        let mut framer = crate::framer::Framer::new();
        let mut buf = [0u8; 4096];
        loop {
            if let Some(raw) = framer.next_message() {
                return codec::decode(&raw, &GroupDictionary::standard()).unwrap();
            }
            let n = peer.read(&mut buf).await.unwrap();
            framer.push(&buf[..n]);
        }
    }

    async fn write_msg(peer: &mut tokio::io::DuplexStream, msg: &Message, begin_string: &str) {
        let bytes = codec::encode(msg, begin_string).unwrap();
        peer.write_all(&bytes).await.unwrap();
    }

    #[tokio::test]
    async fn initiator_sends_logon_and_completes_handshake() {
        let (session, _events, mut peer, _dir) = harness(Role::Initiator, false).await;
        session.start();

        let logon = read_one(&mut peer).await;
        assert_eq!(logon.msg_type(), admin::MSG_TYPE_LOGON);
        assert_eq!(logon.get_u32(34), Some(1));

        let mut reply = admin::build_logon(30, false);
        reply.set(49, "SERVER1");
        reply.set(56, "CLIENT1");
        reply.set(34, "1");
        reply.set(52, "20240101-00:00:00.000");
        write_msg(&mut peer, &reply, "FIX.4.2").await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.state(), SessionState::LoggedOn);
    }

    #[tokio::test]
    async fn gap_detection_requests_resend_and_advances_immediately() {
        let (session, mut events, mut peer, _dir) = harness(Role::Acceptor, false).await;
        session.start();

        let mut logon = admin::build_logon(30, false);
        logon.set(49, "SERVER1");
        logon.set(56, "CLIENT1");
        logon.set(34, "1");
        logon.set(52, "20240101-00:00:00.000");
        write_msg(&mut peer, &logon, "FIX.4.2").await;

        let _logon_reply = read_one(&mut peer).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.state(), SessionState::LoggedOn);

        // Peer jumps straight to seq 7, skipping 2..6.
        let mut app = Message::new("D");
        app.set(49, "SERVER1");
        app.set(56, "CLIENT1");
        app.set(34, "7");
        app.set(52, "20240101-00:00:00.000");
        write_msg(&mut peer, &app, "FIX.4.2").await;

        let resend_req = read_one(&mut peer).await;
        assert_eq!(resend_req.msg_type(), admin::MSG_TYPE_RESEND_REQUEST);
        assert_eq!(resend_req.get_u32(7), Some(2));
        assert_eq!(resend_req.get_u32(16), Some(0));

        let event = tokio::time::timeout(Duration::from_millis(200), events.recv()).await.unwrap().unwrap();
        match event {
            SessionEvent::Application(m) => assert_eq!(m.get_u32(34), Some(7)),
            other => panic!("expected Application event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_with_poss_dup_is_silently_ignored() {
        let (session, mut events, mut peer, _dir) = harness(Role::Acceptor, false).await;
        session.start();

        let mut logon = admin::build_logon(30, false);
        logon.set(49, "SERVER1");
        logon.set(56, "CLIENT1");
        logon.set(34, "1");
        logon.set(52, "20240101-00:00:00.000");
        write_msg(&mut peer, &logon, "FIX.4.2").await;
        let _ = read_one(&mut peer).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut app = Message::new("D");
        app.set(49, "SERVER1");
        app.set(56, "CLIENT1");
        app.set(34, "2");
        app.set(52, "20240101-00:00:00.000");
        write_msg(&mut peer, &app, "FIX.4.2").await;
        let first = tokio::time::timeout(Duration::from_millis(200), events.recv()).await.unwrap().unwrap();
        assert!(matches!(first, SessionEvent::Application(_)));

        // Resend the same seq with PossDup set; must not surface again.
        let mut dup = app.clone();
        dup.set(43, "Y");
        write_msg(&mut peer, &dup, "FIX.4.2").await;

        let mut probe = Message::new("D");
        probe.set(49, "SERVER1");
        probe.set(56, "CLIENT1");
        probe.set(34, "3");
        probe.set(52, "20240101-00:00:00.000");
        write_msg(&mut peer, &probe, "FIX.4.2").await;

        let next = tokio::time::timeout(Duration::from_millis(200), events.recv()).await.unwrap().unwrap();
        match next {
            SessionEvent::Application(m) => assert_eq!(m.get_u32(34), Some(3)),
            other => panic!("expected seq 3 application event, got {other:?}"),
        }

        assert_eq!(session.state(), SessionState::LoggedOn);
    }

    #[tokio::test]
    async fn send_before_logon_is_rejected_without_touching_the_wire() {
        let (session, _events, _peer, _dir) = harness(Role::Acceptor, false).await;
        session.start();
        let err = session.send(Message::new("D")).await.unwrap_err();
        assert!(matches!(err, FixError::NotLoggedOn));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (session, _events, _peer, _dir) = harness(Role::Acceptor, false).await;
        session.start();
        session.stop();
        session.stop();
    }
}
