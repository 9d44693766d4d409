//! Packet hand-off between the guest and the NAT engine.
//!
//! Each live NAT session owns two independent regions:
//! - the outbound region (`guest`), held while the guest's callbacks run;
//! - the inbound region (`engine`), held while a guest frame is injected into the engine.
//!
//! `trigger` never holds both. The engine may emit frames synchronously from `input`, so the only
//! nesting that can occur is inbound → outbound, never the reverse.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use crate::descriptor::BackendKind;
use crate::engine::NatEngine;
use crate::guest::GuestLink;

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cumulative relay counters for a multiplexer's NAT family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayStats {
    pub guest_to_host_frames: u64,
    pub host_to_guest_frames: u64,
    /// Frames larger than the session's frame capacity, in either direction.
    pub dropped_oversized: u64,
    /// Host → guest frames emitted while no session was bound.
    pub dropped_no_session: u64,
}

#[derive(Debug, Default)]
struct RelayCounters {
    guest_to_host_frames: AtomicU64,
    host_to_guest_frames: AtomicU64,
    dropped_oversized: AtomicU64,
    dropped_no_session: AtomicU64,
}

impl RelayCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RelayStats {
        RelayStats {
            guest_to_host_frames: self.guest_to_host_frames.load(Ordering::Relaxed),
            host_to_guest_frames: self.host_to_guest_frames.load(Ordering::Relaxed),
            dropped_oversized: self.dropped_oversized.load(Ordering::Relaxed),
            dropped_no_session: self.dropped_no_session.load(Ordering::Relaxed),
        }
    }
}

/// One open NAT session. Dropping the last reference destroys both relay regions.
pub(crate) struct NatSession {
    id: u64,
    kind: BackendKind,
    frame_capacity: usize,
    guest: Mutex<Box<dyn GuestLink>>,
    engine: Mutex<Option<Box<dyn NatEngine>>>,
}

impl NatSession {
    pub(crate) fn new(
        id: u64,
        kind: BackendKind,
        frame_capacity: usize,
        guest: Box<dyn GuestLink>,
        engine: Box<dyn NatEngine>,
    ) -> Self {
        Self {
            id,
            kind,
            frame_capacity,
            guest: Mutex::new(guest),
            engine: Mutex::new(Some(engine)),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Run `f` against the engine inside the inbound region, if the engine is still attached.
    pub(crate) fn with_engine<R>(&self, f: impl FnOnce(&mut dyn NatEngine) -> R) -> Option<R> {
        let mut engine = lock(&self.engine);
        engine.as_mut().map(|engine| f(&mut **engine))
    }

    /// Detach the engine; later relays through this session become no-ops.
    pub(crate) fn take_engine(&self) -> Option<Box<dyn NatEngine>> {
        lock(&self.engine).take()
    }
}

/// Holder of the single active NAT session.
#[derive(Default)]
pub(crate) struct ActiveNatSlot {
    current: Mutex<Option<Arc<NatSession>>>,
    counters: RelayCounters,
}

impl ActiveNatSlot {
    pub(crate) fn current(&self) -> Option<Arc<NatSession>> {
        lock(&self.current).clone()
    }

    /// The active session, if it is the one identified by `id`.
    pub(crate) fn current_if(&self, id: u64) -> Option<Arc<NatSession>> {
        self.current().filter(|session| session.id() == id)
    }

    pub(crate) fn is_active(&self) -> bool {
        lock(&self.current).is_some()
    }

    /// Install `session` unless another one is already bound.
    pub(crate) fn install(&self, session: Arc<NatSession>) -> Result<(), Arc<NatSession>> {
        let mut current = lock(&self.current);
        if current.is_some() {
            return Err(session);
        }
        *current = Some(session);
        Ok(())
    }

    /// Unbind the active session if it is the one identified by `id`.
    pub(crate) fn clear_if(&self, id: u64) -> Option<Arc<NatSession>> {
        let mut current = lock(&self.current);
        if current.as_ref().is_some_and(|session| session.id() == id) {
            current.take()
        } else {
            None
        }
    }

    pub(crate) fn stats(&self) -> RelayStats {
        self.counters.snapshot()
    }
}

/// Host → guest delivery handle given to the NAT engine at `init`.
///
/// Cheap to clone and safe to call from any thread. Frames emitted while no session is bound are
/// dropped silently.
#[derive(Clone)]
pub struct NatSink {
    slot: Arc<ActiveNatSlot>,
}

impl NatSink {
    pub(crate) fn new(slot: Arc<ActiveNatSlot>) -> Self {
        Self { slot }
    }

    /// Deliver one frame to the guest. Returns whether a guest callback received it.
    pub fn output(&self, frame: &[u8]) -> bool {
        let Some(session) = self.slot.current() else {
            RelayCounters::bump(&self.slot.counters.dropped_no_session);
            return false;
        };
        if frame.len() > session.frame_capacity {
            warn!(
                len = frame.len(),
                max = session.frame_capacity,
                "dropping oversized host frame"
            );
            RelayCounters::bump(&self.slot.counters.dropped_oversized);
            return false;
        }

        lock(&session.guest).deliver(frame);
        RelayCounters::bump(&self.slot.counters.host_to_guest_frames);
        true
    }
}

impl core::fmt::Debug for NatSink {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NatSink")
            .field("active", &self.slot.is_active())
            .finish()
    }
}

/// Pull at most one frame from the guest and inject it into the engine.
///
/// `scratch` is the caller-owned frame buffer; its length bounds what the guest may produce.
pub(crate) fn relay_guest_to_host(slot: &ActiveNatSlot, session: &NatSession, scratch: &mut [u8]) {
    let produced = lock(&session.guest).poll_transmit(scratch);
    let Some(len) = produced else {
        return;
    };
    if len > scratch.len() {
        warn!(len, max = scratch.len(), "dropping oversized guest frame");
        RelayCounters::bump(&slot.counters.dropped_oversized);
        return;
    }

    if session.with_engine(|engine| engine.input(&scratch[..len])).is_some() {
        RelayCounters::bump(&slot.counters.guest_to_host_frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::guest::QueuedGuest;
    use crate::redirect::Transport;
    use core::net::Ipv4Addr;

    #[derive(Default)]
    struct Capture {
        inputs: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl NatEngine for Capture {
        fn init(&mut self, _sink: NatSink) -> Result<(), EngineError> {
            Ok(())
        }
        fn redirect(&mut self, _: Transport, _: u16, _: Ipv4Addr, _: u16) -> Result<(), EngineError> {
            Ok(())
        }
        fn start(&mut self) -> Result<(), EngineError> {
            Ok(())
        }
        fn input(&mut self, frame: &[u8]) {
            self.inputs.lock().unwrap().push(frame.to_vec());
        }
        fn end(&mut self) {}
        fn cleanup(&mut self) {}
    }

    fn session(guest: Arc<Mutex<QueuedGuest>>, engine: Capture, id: u64) -> Arc<NatSession> {
        Arc::new(NatSession::new(
            id,
            BackendKind::NatOutbound,
            32,
            Box::new(guest),
            Box::new(engine),
        ))
    }

    #[test]
    fn sink_drops_without_session() {
        let slot = Arc::new(ActiveNatSlot::default());
        let sink = NatSink::new(slot.clone());
        assert!(!sink.output(&[1, 2, 3]));
        assert_eq!(slot.stats().dropped_no_session, 1);
    }

    #[test]
    fn sink_delivers_and_bounds_frames() {
        let slot = Arc::new(ActiveNatSlot::default());
        let guest = Arc::new(Mutex::new(QueuedGuest::new()));
        assert!(slot.install(session(guest.clone(), Capture::default(), 1)).is_ok());

        let sink = NatSink::new(slot.clone());
        assert!(sink.output(&[1; 32]));
        assert!(!sink.output(&[2; 33]));

        assert_eq!(guest.lock().unwrap().drain_rx(), vec![vec![1; 32]]);
        let stats = slot.stats();
        assert_eq!(stats.host_to_guest_frames, 1);
        assert_eq!(stats.dropped_oversized, 1);
    }

    #[test]
    fn slot_refuses_second_install_and_ignores_foreign_clear() {
        let slot = ActiveNatSlot::default();
        let guest = Arc::new(Mutex::new(QueuedGuest::new()));
        assert!(slot.install(session(guest.clone(), Capture::default(), 1)).is_ok());
        assert!(slot.install(session(guest, Capture::default(), 2)).is_err());

        assert!(slot.clear_if(2).is_none());
        assert!(slot.current_if(1).is_some());
        assert!(slot.clear_if(1).is_some());
        assert!(!slot.is_active());
    }

    #[test]
    fn relay_moves_one_frame_per_call() {
        let slot = ActiveNatSlot::default();
        let guest = Arc::new(Mutex::new(QueuedGuest::new()));
        guest.lock().unwrap().push_tx(vec![5; 10]);
        guest.lock().unwrap().push_tx(vec![6; 10]);
        let engine = Capture::default();
        let inputs = engine.inputs.clone();
        let session = session(guest, engine, 7);

        let mut scratch = vec![0u8; 32];
        relay_guest_to_host(&slot, &session, &mut scratch);
        assert_eq!(*inputs.lock().unwrap(), vec![vec![5; 10]]);
        relay_guest_to_host(&slot, &session, &mut scratch);
        relay_guest_to_host(&slot, &session, &mut scratch);
        assert_eq!(inputs.lock().unwrap().len(), 2);
        assert_eq!(slot.stats().guest_to_host_frames, 2);
    }

    #[test]
    fn relay_after_engine_detached_is_a_no_op() {
        let slot = ActiveNatSlot::default();
        let guest = Arc::new(Mutex::new(QueuedGuest::new()));
        guest.lock().unwrap().push_tx(vec![1]);
        let session = session(guest, Capture::default(), 1);
        assert!(session.take_engine().is_some());

        let mut scratch = vec![0u8; 32];
        relay_guest_to_host(&slot, &session, &mut scratch);
        assert_eq!(slot.stats().guest_to_host_frames, 0);
    }
}
