use std::sync::Arc;

use tracing::debug;

use crate::backend::{BackendFamily, CaptureFamily, NatFamily, SessionHandle};
use crate::config::NetConfig;
use crate::descriptor::{BackendDescriptor, BackendKind};
use crate::engine::{CaptureEngine, NatEngine};
use crate::error::{EthernetError, Result};
use crate::guest::GuestLink;
use crate::redirect::Redirect;
use crate::registry::Registry;
use crate::relay::{NatSink, RelayStats};

/// Routes an emulated Ethernet adapter to one of the host-side backends.
///
/// Typical use by a guest NIC model:
/// 1. [`EthernetMux::enumerate`] / [`EthernetMux::enumerate_by_name`] to pick a backend, then
///    [`EthernetMux::enumerate_free`].
/// 2. [`EthernetMux::open`] with the device's [`GuestLink`].
/// 3. [`EthernetMux::trigger`] whenever the guest has frames to send. Host → guest frames arrive
///    through the engine calling [`NatSink::output`] (or the capture engine's own delivery).
/// 4. [`EthernetMux::close`].
///
/// `open`/`close` take `&mut self` and so cannot race each other; `trigger` only needs `&self`.
/// At most one NAT-family session is open per multiplexer; a second `open` of either NAT kind is
/// rejected with [`EthernetError::NatSessionActive`] until the first is closed.
pub struct EthernetMux {
    registry: Registry,
    nat: NatFamily,
    capture: CaptureFamily,
}

impl Default for EthernetMux {
    fn default() -> Self {
        Self::new(NetConfig::default())
    }
}

impl EthernetMux {
    /// A multiplexer with no engines attached; every backend reports unsupported until engines
    /// are added.
    pub fn new(config: NetConfig) -> Self {
        Self {
            registry: Registry::new(false, None),
            nat: NatFamily::new(None, config),
            capture: CaptureFamily::new(None),
        }
    }

    pub fn with_nat_engine(mut self, engine: impl NatEngine + 'static) -> Self {
        let config = std::mem::take(&mut self.nat.config);
        self.nat = NatFamily::new(Some(Box::new(engine)), config);
        self.registry.set_nat_supported(self.nat.is_available());
        self
    }

    /// Attach a capture engine. Discovery still pending on a previously attached engine is
    /// released first.
    pub fn with_capture_engine(mut self, engine: Arc<dyn CaptureEngine>) -> Self {
        self.capture = CaptureFamily::new(Some(engine));
        self.registry.set_capture(self.capture.engine());
        self
    }

    /// Configuration applied by the next NAT `open`. An open session keeps its redirects.
    pub fn set_config(&mut self, config: NetConfig) {
        self.nat.config = config;
    }

    pub fn config(&self) -> &NetConfig {
        &self.nat.config
    }

    fn family(&self, kind: BackendKind) -> &dyn BackendFamily {
        if kind.is_nat() {
            &self.nat
        } else {
            &self.capture
        }
    }

    fn family_mut(&mut self, kind: BackendKind) -> &mut dyn BackendFamily {
        if kind.is_nat() {
            &mut self.nat
        } else {
            &mut self.capture
        }
    }

    /// All selectable backends: the NAT descriptors first, then discovered capture devices.
    ///
    /// Pair with [`EthernetMux::enumerate_free`].
    pub fn enumerate(&mut self) -> Vec<BackendDescriptor> {
        self.registry.enumerate_all()
    }

    /// Case-insensitive lookup by internal name.
    pub fn enumerate_by_name(&mut self, name: &str) -> Result<BackendDescriptor> {
        self.registry
            .find(name)
            .ok_or_else(|| EthernetError::NotFound(name.to_string()))
    }

    pub fn enumerate_free(&mut self) {
        self.registry.release();
    }

    /// Bind `guest` to the backend described by `descriptor`.
    ///
    /// On error nothing has changed: no session is bound and the engine (if any) is idle.
    pub fn open(
        &mut self,
        descriptor: &BackendDescriptor,
        guest: impl GuestLink + 'static,
        promiscuous: bool,
    ) -> Result<SessionHandle> {
        let family = self.family_mut(descriptor.kind());
        if !family.is_available() {
            return Err(EthernetError::Unsupported {
                name: descriptor.name().to_string(),
                kind: descriptor.kind(),
            });
        }
        family.open(descriptor, Box::new(guest), promiscuous)
    }

    /// Tear down the session behind `handle`. Closing an already-closed session is a no-op.
    pub fn close(&mut self, handle: &SessionHandle) {
        self.family_mut(handle.kind()).close(handle);
    }

    pub fn close_driver(&mut self, descriptor: &BackendDescriptor) {
        debug!(backend = descriptor.name(), "closing backend driver");
        self.family_mut(descriptor.kind()).close_driver(descriptor);
    }

    /// Size of the per-session state the backend family keeps.
    pub fn session_data_size(&self, descriptor: &BackendDescriptor) -> usize {
        self.family(descriptor.kind()).session_data_size()
    }

    /// Move at most one pending guest frame to the backend. A no-op if the session is closed.
    pub fn trigger(&self, handle: &mut SessionHandle) {
        self.family(handle.kind()).trigger(handle);
    }

    /// Delivery handle for host → guest NAT frames. Engines also receive one at `init`.
    pub fn nat_sink(&self) -> NatSink {
        NatSink::new(self.nat.slot().clone())
    }

    pub fn is_nat_active(&self) -> bool {
        self.nat.slot().is_active()
    }

    /// Kind of the active NAT session, if any.
    pub fn active_nat_kind(&self) -> Option<BackendKind> {
        self.nat.slot().current().map(|session| session.kind())
    }

    /// Redirects the engine accepted for the active NAT session, in registration order.
    pub fn active_redirects(&self) -> &[Redirect] {
        self.nat.redirects()
    }

    pub fn relay_stats(&self) -> RelayStats {
        self.nat.slot().stats()
    }
}
