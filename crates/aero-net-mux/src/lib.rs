//! Virtual Ethernet adapter multiplexer.
//!
//! An emulated NIC opens one session through [`EthernetMux`] and exchanges raw frames with
//! whichever host-side backend it selected:
//! - user-mode NAT (outbound only),
//! - user-mode NAT with inbound port forwarding,
//! - a host interface attached through a raw-capture engine.
//!
//! The NAT and capture engines themselves live elsewhere and are plugged in through
//! [`NatEngine`] and [`CaptureEngine`]. Frames are opaque to this crate; it only decides which
//! session owns a frame and serializes access to the guest and engine sides.
#![forbid(unsafe_code)]

mod backend;
pub mod config;
pub mod descriptor;
pub mod engine;
mod error;
pub mod guest;
mod mux;
pub mod redirect;
mod registry;
mod relay;

pub use backend::SessionHandle;
pub use config::{NetConfig, RedirectProtocol, RedirectRule, RedirectTable, MAX_REDIRECTS};
pub use descriptor::{BackendDescriptor, BackendKind, MacAddr};
pub use engine::{CaptureEngine, CaptureSessionId, NatEngine, DEFAULT_GUEST_ADDR};
pub use error::{ConfigError, EngineError, EthernetError, Result};
pub use guest::{GuestCallbacks, GuestLink, QueuedGuest, QueuedGuestStats};
pub use mux::EthernetMux;
pub use redirect::{plan_redirects, Redirect, RedirectOrigin, Transport, WELL_KNOWN_INBOUND_PORTS};
pub use relay::{NatSink, RelayStats};
