use std::sync::Arc;

use tracing::debug;

use crate::descriptor::BackendDescriptor;
use crate::engine::CaptureEngine;

/// Catalog of selectable backends: the two NAT descriptors, then whatever the capture engine
/// currently reports.
pub(crate) struct Registry {
    nat: [BackendDescriptor; 2],
    capture: Option<Arc<dyn CaptureEngine>>,
    discovery_pending: bool,
}

impl Registry {
    pub(crate) fn new(nat_supported: bool, capture: Option<Arc<dyn CaptureEngine>>) -> Self {
        Self {
            nat: [
                BackendDescriptor::nat_outbound().with_supported(nat_supported),
                BackendDescriptor::nat_inbound().with_supported(nat_supported),
            ],
            capture,
            discovery_pending: false,
        }
    }

    pub(crate) fn enumerate_all(&mut self) -> Vec<BackendDescriptor> {
        let mut out = self.nat.to_vec();
        if let Some(capture) = &self.capture {
            self.discovery_pending = true;
            out.extend(
                capture
                    .enumerate()
                    .into_iter()
                    .filter(BackendDescriptor::is_supported),
            );
        }
        out
    }

    pub(crate) fn find(&mut self, name: &str) -> Option<BackendDescriptor> {
        if let Some(nat) = self.nat.iter().find(|d| d.matches_name(name)) {
            return Some(nat.clone());
        }
        let capture = self.capture.as_ref()?;
        self.discovery_pending = true;
        capture.find(name).filter(BackendDescriptor::is_supported)
    }

    pub(crate) fn set_nat_supported(&mut self, supported: bool) {
        for descriptor in &mut self.nat {
            *descriptor = descriptor.clone().with_supported(supported);
        }
    }

    /// Swap the capture engine, releasing any discovery still pending on the previous one.
    pub(crate) fn set_capture(&mut self, capture: Option<Arc<dyn CaptureEngine>>) {
        self.release();
        self.capture = capture;
    }

    /// Release whatever host resources discovery allocated. A no-op if nothing was discovered.
    pub(crate) fn release(&mut self) {
        if !std::mem::take(&mut self.discovery_pending) {
            return;
        }
        if let Some(capture) = &self.capture {
            debug!("releasing capture device enumeration");
            capture.enumerate_free();
        }
    }
}
