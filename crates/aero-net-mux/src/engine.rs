//! Interfaces of the host-side engines the multiplexer drives.
//!
//! Neither engine interprets anything on behalf of this crate; frames are opaque byte slices.

use core::net::Ipv4Addr;

use crate::descriptor::BackendDescriptor;
use crate::error::EngineError;
use crate::guest::GuestLink;
use crate::redirect::Transport;
use crate::relay::NatSink;

/// Virtual address the user-mode NAT assigns to the guest.
pub const DEFAULT_GUEST_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 2, 15);

/// User-mode NAT engine shared by both NAT backend kinds.
///
/// Call order for one session is `init` → `redirect`* → `start` → `input`* → `end` → `cleanup`.
/// The engine may call [`NatSink::output`] from any thread once `init` has returned, including
/// synchronously from inside `input`.
pub trait NatEngine: Send {
    fn init(&mut self, sink: NatSink) -> Result<(), EngineError>;

    fn redirect(
        &mut self,
        transport: Transport,
        host_port: u16,
        guest_addr: Ipv4Addr,
        guest_port: u16,
    ) -> Result<(), EngineError>;

    /// Begin accepting traffic.
    fn start(&mut self) -> Result<(), EngineError>;

    /// Inject one guest → host frame.
    fn input(&mut self, frame: &[u8]);

    /// Stop traffic. No `output` calls may be made after this returns.
    fn end(&mut self);

    fn cleanup(&mut self);

    fn guest_addr(&self) -> Ipv4Addr {
        DEFAULT_GUEST_ADDR
    }
}

impl<T: NatEngine + ?Sized> NatEngine for Box<T> {
    fn init(&mut self, sink: NatSink) -> Result<(), EngineError> {
        <T as NatEngine>::init(&mut **self, sink)
    }

    fn redirect(
        &mut self,
        transport: Transport,
        host_port: u16,
        guest_addr: Ipv4Addr,
        guest_port: u16,
    ) -> Result<(), EngineError> {
        <T as NatEngine>::redirect(&mut **self, transport, host_port, guest_addr, guest_port)
    }

    fn start(&mut self) -> Result<(), EngineError> {
        <T as NatEngine>::start(&mut **self)
    }

    fn input(&mut self, frame: &[u8]) {
        <T as NatEngine>::input(&mut **self, frame);
    }

    fn end(&mut self) {
        <T as NatEngine>::end(&mut **self);
    }

    fn cleanup(&mut self) {
        <T as NatEngine>::cleanup(&mut **self);
    }

    fn guest_addr(&self) -> Ipv4Addr {
        <T as NatEngine>::guest_addr(&**self)
    }
}

/// Engine-assigned identifier of an open raw-capture session.
pub type CaptureSessionId = u64;

/// Raw host-interface capture engine.
///
/// The engine owns its own locking; the multiplexer calls it through a shared reference from
/// whichever thread the guest uses.
pub trait CaptureEngine: Send + Sync {
    /// Discover host interfaces. May allocate host resources that live until
    /// [`CaptureEngine::enumerate_free`].
    fn enumerate(&self) -> Vec<BackendDescriptor>;

    /// Look up one interface by internal name (case-insensitive).
    fn find(&self, name: &str) -> Option<BackendDescriptor> {
        self.enumerate()
            .into_iter()
            .find(|device| device.matches_name(name))
    }

    fn enumerate_free(&self);

    /// Open `device`, validating the request (e.g. promiscuous support) itself.
    fn open(
        &self,
        device: &BackendDescriptor,
        guest: Box<dyn GuestLink>,
        promiscuous: bool,
    ) -> Result<CaptureSessionId, EngineError>;

    fn close(&self, session: CaptureSessionId);

    /// Move pending guest frames to the host interface.
    fn trigger(&self, session: CaptureSessionId);

    fn close_driver(&self, device: &BackendDescriptor);

    /// Size of the engine's per-session state.
    fn session_data_len(&self) -> usize;
}
