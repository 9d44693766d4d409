#![allow(dead_code)]

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use aero_net_mux::{
    BackendDescriptor, CaptureEngine, CaptureSessionId, EngineError, GuestLink, MacAddr,
    NatEngine, NatSink, Transport,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NatCall {
    Init,
    Redirect {
        transport: Transport,
        host_port: u16,
        guest_addr: Ipv4Addr,
        guest_port: u16,
    },
    Start,
    Input(Vec<u8>),
    End,
    Cleanup,
}

#[derive(Default)]
pub struct NatState {
    pub calls: Vec<NatCall>,
    pub sink: Option<NatSink>,
    pub fail_init: bool,
    pub fail_start: bool,
    pub reject_host_ports: Vec<u16>,
    /// Emit every input frame straight back through the sink, from inside `input`.
    pub echo: bool,
}

/// NAT engine that records every call. Clone the `state` handle before moving the engine into a
/// multiplexer.
#[derive(Clone, Default)]
pub struct ScriptedNat {
    pub state: Arc<Mutex<NatState>>,
}

impl ScriptedNat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<NatCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn redirects(&self) -> Vec<(Transport, u16, Ipv4Addr, u16)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                NatCall::Redirect {
                    transport,
                    host_port,
                    guest_addr,
                    guest_port,
                } => Some((transport, host_port, guest_addr, guest_port)),
                _ => None,
            })
            .collect()
    }

    pub fn inputs(&self) -> Vec<Vec<u8>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                NatCall::Input(frame) => Some(frame),
                _ => None,
            })
            .collect()
    }

    pub fn sink(&self) -> NatSink {
        self.state.lock().unwrap().sink.clone().expect("engine not initialised")
    }
}

impl NatEngine for ScriptedNat {
    fn init(&mut self, sink: NatSink) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(NatCall::Init);
        if state.fail_init {
            return Err(EngineError::Init("scripted failure".into()));
        }
        state.sink = Some(sink);
        Ok(())
    }

    fn redirect(
        &mut self,
        transport: Transport,
        host_port: u16,
        guest_addr: Ipv4Addr,
        guest_port: u16,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if state.reject_host_ports.contains(&host_port) {
            return Err(EngineError::Redirect(format!("port {host_port} in use")));
        }
        state.calls.push(NatCall::Redirect {
            transport,
            host_port,
            guest_addr,
            guest_port,
        });
        Ok(())
    }

    fn start(&mut self) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(NatCall::Start);
        if state.fail_start {
            return Err(EngineError::Start("scripted failure".into()));
        }
        Ok(())
    }

    fn input(&mut self, frame: &[u8]) {
        let sink = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(NatCall::Input(frame.to_vec()));
            state.echo.then(|| state.sink.clone()).flatten()
        };
        if let Some(sink) = sink {
            sink.output(frame);
        }
    }

    fn end(&mut self) {
        self.state.lock().unwrap().calls.push(NatCall::End);
    }

    fn cleanup(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(NatCall::Cleanup);
        state.sink = None;
    }
}

/// Raw-capture engine with a mutable device list and per-session guests.
#[derive(Default)]
pub struct FakeCapture {
    pub devices: Mutex<Vec<BackendDescriptor>>,
    pub sessions: Mutex<HashMap<CaptureSessionId, Box<dyn GuestLink>>>,
    pub next_id: AtomicU64,
    pub enumerations: AtomicU64,
    pub frees: AtomicU64,
    pub triggers: AtomicU64,
    pub closed: Mutex<Vec<CaptureSessionId>>,
    pub closed_drivers: Mutex<Vec<String>>,
    pub promiscuous_capable: bool,
}

impl FakeCapture {
    pub fn with_devices(devices: Vec<BackendDescriptor>) -> Self {
        Self {
            devices: Mutex::new(devices),
            next_id: AtomicU64::new(100),
            promiscuous_capable: true,
            ..Self::default()
        }
    }

    pub fn device(name: &str, supported: bool) -> BackendDescriptor {
        BackendDescriptor::raw_capture(
            name,
            format!("Host adapter {name}"),
            1500,
            MacAddr([0x02, 0, 0, 0, 0, 1]),
            supported,
        )
    }
}

impl CaptureEngine for FakeCapture {
    fn enumerate(&self) -> Vec<BackendDescriptor> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        self.devices.lock().unwrap().clone()
    }

    fn enumerate_free(&self) {
        self.frees.fetch_add(1, Ordering::SeqCst);
    }

    fn open(
        &self,
        device: &BackendDescriptor,
        guest: Box<dyn GuestLink>,
        promiscuous: bool,
    ) -> Result<CaptureSessionId, EngineError> {
        if promiscuous && !self.promiscuous_capable {
            return Err(EngineError::PromiscuousUnsupported(device.name().to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sessions.lock().unwrap().insert(id, guest);
        Ok(id)
    }

    fn close(&self, session: CaptureSessionId) {
        self.sessions.lock().unwrap().remove(&session);
        self.closed.lock().unwrap().push(session);
    }

    fn trigger(&self, session: CaptureSessionId) {
        self.triggers.fetch_add(1, Ordering::SeqCst);
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(guest) = sessions.get_mut(&session) {
            let mut buf = [0u8; 1518];
            if let Some(len) = guest.poll_transmit(&mut buf) {
                // Loop the frame straight back, as a hub would.
                guest.deliver(&buf[..len]);
            }
        }
    }

    fn close_driver(&self, device: &BackendDescriptor) {
        self.closed_drivers
            .lock()
            .unwrap()
            .push(device.name().to_string());
    }

    fn session_data_len(&self) -> usize {
        64
    }
}
