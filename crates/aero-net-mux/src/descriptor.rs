use core::fmt;

use serde::{Deserialize, Serialize};

/// Bytes reserved on top of a backend's MTU when sizing frame buffers: Ethernet header (14),
/// 802.1Q tag (4) and FCS (4).
pub const FRAME_HEADER_SLACK: usize = 22;

/// MTU advertised by both NAT descriptors.
pub const NAT_MTU: u16 = 1500;

/// Synthetic hardware address advertised by both NAT descriptors.
pub const NAT_MAC: MacAddr = MacAddr([0x00, 0x00, 0x00, 0x32, 0x33, 0x34]);

pub const NAT_OUTBOUND_NAME: &str = "slirp";
pub const NAT_INBOUND_NAME: &str = "slirp_inbound";

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Host-side backend family a descriptor routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// User-mode NAT, outbound connections only.
    NatOutbound,
    /// User-mode NAT plus inbound port forwarding (well-known ports open by default).
    NatInboundAndOutbound,
    /// A host interface attached through the raw-capture engine.
    RawCapture,
}

impl BackendKind {
    /// Both NAT kinds share one engine and are subject to the single-session rule.
    pub fn is_nat(self) -> bool {
        matches!(self, Self::NatOutbound | Self::NatInboundAndOutbound)
    }

    pub fn opens_well_known_ports(self) -> bool {
        self == Self::NatInboundAndOutbound
    }
}

/// Static description of one selectable network backend.
///
/// NAT descriptors are fixed for the lifetime of the process; raw-capture descriptors are produced
/// by the capture engine during enumeration and may come and go between enumerations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    kind: BackendKind,
    name: String,
    display_name: String,
    mtu: u16,
    mac: MacAddr,
    supported: bool,
}

impl BackendDescriptor {
    pub fn nat_outbound() -> Self {
        Self {
            kind: BackendKind::NatOutbound,
            name: NAT_OUTBOUND_NAME.to_string(),
            display_name: "SLIRP User Mode NAT".to_string(),
            mtu: NAT_MTU,
            mac: NAT_MAC,
            supported: true,
        }
    }

    pub fn nat_inbound() -> Self {
        Self {
            kind: BackendKind::NatInboundAndOutbound,
            name: NAT_INBOUND_NAME.to_string(),
            display_name: "SLIRP + Open ports (21-23,80)".to_string(),
            mtu: NAT_MTU,
            mac: NAT_MAC,
            supported: true,
        }
    }

    /// Descriptor for a host interface discovered by a capture engine.
    pub fn raw_capture(
        name: impl Into<String>,
        display_name: impl Into<String>,
        mtu: u16,
        mac: MacAddr,
        supported: bool,
    ) -> Self {
        Self {
            kind: BackendKind::RawCapture,
            name: name.into(),
            display_name: display_name.into(),
            mtu,
            mac,
            supported,
        }
    }

    pub(crate) fn with_supported(mut self, supported: bool) -> Self {
        self.supported = supported;
        self
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Internal name used by configuration files and [`crate::EthernetMux::enumerate_by_name`].
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }

    /// Case-insensitive exact match against the internal name.
    pub fn matches_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Largest frame either relay direction will carry for this backend.
    pub fn frame_capacity(&self) -> usize {
        usize::from(self.mtu) + FRAME_HEADER_SLACK
    }
}
