//! Per-family lifecycle: how a descriptor is opened, relayed and torn down.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::config::NetConfig;
use crate::descriptor::{BackendDescriptor, BackendKind};
use crate::engine::{CaptureEngine, NatEngine};
use crate::error::{EthernetError, Result};
use crate::guest::GuestLink;
use crate::redirect::{plan_redirects, register_redirects, Redirect};
use crate::relay::{relay_guest_to_host, ActiveNatSlot, NatSession, NatSink};

/// Ownership token for one open session, returned by [`crate::EthernetMux::open`].
///
/// For NAT sessions it also owns the guest → host frame buffer, sized to the backend's MTU plus
/// header slack.
#[derive(Debug)]
pub struct SessionHandle {
    kind: BackendKind,
    id: u64,
    scratch: Box<[u8]>,
}

impl SessionHandle {
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Capacity of the guest → host frame buffer (zero for raw-capture sessions).
    pub fn frame_capacity(&self) -> usize {
        self.scratch.len()
    }
}

pub(crate) trait BackendFamily {
    fn is_available(&self) -> bool;

    fn open(
        &mut self,
        descriptor: &BackendDescriptor,
        guest: Box<dyn GuestLink>,
        promiscuous: bool,
    ) -> Result<SessionHandle>;

    fn close(&mut self, handle: &SessionHandle);

    fn close_driver(&mut self, descriptor: &BackendDescriptor);

    fn trigger(&self, handle: &mut SessionHandle);

    fn session_data_size(&self) -> usize;
}

fn unsupported(descriptor: &BackendDescriptor) -> EthernetError {
    EthernetError::Unsupported {
        name: descriptor.name().to_string(),
        kind: descriptor.kind(),
    }
}

/// Both NAT kinds, sharing one engine and one active-session slot.
pub(crate) struct NatFamily {
    /// The engine while no session is open; lent to the session otherwise. Only touched through
    /// `&mut self`.
    engine: Mutex<Option<Box<dyn NatEngine>>>,
    available: bool,
    slot: Arc<ActiveNatSlot>,
    pub(crate) config: NetConfig,
    redirects: Vec<Redirect>,
    next_id: u64,
}

impl NatFamily {
    pub(crate) fn new(engine: Option<Box<dyn NatEngine>>, config: NetConfig) -> Self {
        Self {
            available: engine.is_some(),
            engine: Mutex::new(engine),
            slot: Arc::new(ActiveNatSlot::default()),
            config,
            redirects: Vec::new(),
            next_id: 1,
        }
    }

    pub(crate) fn slot(&self) -> &Arc<ActiveNatSlot> {
        &self.slot
    }

    pub(crate) fn redirects(&self) -> &[Redirect] {
        &self.redirects
    }

    #[cfg(test)]
    pub(crate) fn engine_parked(&self) -> bool {
        self.engine.lock().map_or(false, |engine| engine.is_some())
    }

    fn parked(&mut self) -> &mut Option<Box<dyn NatEngine>> {
        self.engine
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn teardown(&mut self, session: &NatSession) {
        if let Some(mut engine) = session.take_engine() {
            engine.end();
            engine.cleanup();
            *self.parked() = Some(engine);
        }
        self.redirects.clear();
    }
}

impl BackendFamily for NatFamily {
    fn is_available(&self) -> bool {
        self.available
    }

    fn open(
        &mut self,
        descriptor: &BackendDescriptor,
        guest: Box<dyn GuestLink>,
        _promiscuous: bool,
    ) -> Result<SessionHandle> {
        if self.slot.is_active() {
            return Err(EthernetError::NatSessionActive);
        }
        let Some(mut engine) = self.parked().take() else {
            return Err(unsupported(descriptor));
        };

        if let Err(err) = engine.init(NatSink::new(self.slot.clone())) {
            *self.parked() = Some(engine);
            return Err(err.into());
        }

        let plan = plan_redirects(
            self.config.redirects.rules(),
            descriptor.kind(),
            engine.guest_addr(),
        );
        let redirects = register_redirects(&mut *engine, &plan);

        let id = self.next_id;
        self.next_id += 1;
        let capacity = descriptor.frame_capacity();
        let session = Arc::new(NatSession::new(
            id,
            descriptor.kind(),
            capacity,
            guest,
            engine,
        ));
        if let Err(session) = self.slot.install(session) {
            // Unreachable while open/close are serialized by `&mut self`.
            self.teardown(&session);
            return Err(EthernetError::NatSessionActive);
        }

        let started = self.slot.current_if(id).and_then(|s| s.with_engine(|e| e.start()));
        if let Some(Err(err)) = started {
            warn!(backend = descriptor.name(), "NAT engine failed to start: {err}");
            if let Some(session) = self.slot.clear_if(id) {
                self.teardown(&session);
            }
            return Err(err.into());
        }

        info!(
            backend = descriptor.name(),
            session = id,
            redirects = redirects.len(),
            "NAT session opened"
        );
        self.redirects = redirects;
        Ok(SessionHandle {
            kind: descriptor.kind(),
            id,
            scratch: vec![0u8; capacity].into_boxed_slice(),
        })
    }

    fn close(&mut self, handle: &SessionHandle) {
        // Unbind first so no new relay can pick the session up.
        let Some(session) = self.slot.clear_if(handle.id) else {
            debug!(session = handle.id, "NAT session already closed");
            return;
        };
        self.teardown(&session);
        info!(session = handle.id, kind = ?session.kind(), "NAT session closed");
    }

    fn close_driver(&mut self, _descriptor: &BackendDescriptor) {}

    fn trigger(&self, handle: &mut SessionHandle) {
        let Some(session) = self.slot.current_if(handle.id) else {
            return;
        };
        relay_guest_to_host(&self.slot, &session, &mut handle.scratch);
    }

    fn session_data_size(&self) -> usize {
        std::mem::size_of::<SessionHandle>()
    }
}

/// Host interfaces driven by the raw-capture engine.
pub(crate) struct CaptureFamily {
    engine: Option<Arc<dyn CaptureEngine>>,
    open_sessions: HashSet<u64>,
}

impl CaptureFamily {
    pub(crate) fn new(engine: Option<Arc<dyn CaptureEngine>>) -> Self {
        Self {
            engine,
            open_sessions: HashSet::new(),
        }
    }

    pub(crate) fn engine(&self) -> Option<Arc<dyn CaptureEngine>> {
        self.engine.clone()
    }
}

impl BackendFamily for CaptureFamily {
    fn is_available(&self) -> bool {
        self.engine.is_some()
    }

    fn open(
        &mut self,
        descriptor: &BackendDescriptor,
        guest: Box<dyn GuestLink>,
        promiscuous: bool,
    ) -> Result<SessionHandle> {
        let Some(engine) = &self.engine else {
            return Err(unsupported(descriptor));
        };
        if !descriptor.is_supported() {
            return Err(unsupported(descriptor));
        }

        let id = engine.open(descriptor, guest, promiscuous)?;
        self.open_sessions.insert(id);
        info!(
            backend = descriptor.name(),
            session = id,
            promiscuous,
            "capture session opened"
        );
        Ok(SessionHandle {
            kind: BackendKind::RawCapture,
            id,
            scratch: Box::default(),
        })
    }

    fn close(&mut self, handle: &SessionHandle) {
        if !self.open_sessions.remove(&handle.id) {
            debug!(session = handle.id, "capture session already closed");
            return;
        }
        if let Some(engine) = &self.engine {
            engine.close(handle.id);
            info!(session = handle.id, "capture session closed");
        }
    }

    fn close_driver(&mut self, descriptor: &BackendDescriptor) {
        if let Some(engine) = &self.engine {
            engine.close_driver(descriptor);
        }
    }

    fn trigger(&self, handle: &mut SessionHandle) {
        if !self.open_sessions.contains(&handle.id) {
            return;
        }
        if let Some(engine) = &self.engine {
            engine.trigger(handle.id);
        }
    }

    fn session_data_size(&self) -> usize {
        self.engine
            .as_ref()
            .map_or(0, |engine| engine.session_data_len())
    }
}
