//! Guest-facing side of a session: how frames reach and leave the emulated NIC.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Callbacks supplied by the emulated network device when it opens a session.
///
/// Calls are serialized by the session's outbound relay region, so implementations never see
/// `deliver` and `poll_transmit` concurrently.
pub trait GuestLink: Send {
    /// Deliver one host → guest frame.
    fn deliver(&mut self, frame: &[u8]);

    /// Copy one pending guest → host frame into `buf` and return its length, or `None` if the
    /// guest has nothing to send.
    ///
    /// Returning a length larger than `buf.len()` is a contract violation; the frame is dropped.
    fn poll_transmit(&mut self, buf: &mut [u8]) -> Option<usize>;
}

impl<T: GuestLink + ?Sized> GuestLink for Box<T> {
    fn deliver(&mut self, frame: &[u8]) {
        <T as GuestLink>::deliver(&mut **self, frame);
    }

    fn poll_transmit(&mut self, buf: &mut [u8]) -> Option<usize> {
        <T as GuestLink>::poll_transmit(&mut **self, buf)
    }
}

impl<T: GuestLink + ?Sized> GuestLink for &mut T {
    fn deliver(&mut self, frame: &[u8]) {
        <T as GuestLink>::deliver(&mut **self, frame);
    }

    fn poll_transmit(&mut self, buf: &mut [u8]) -> Option<usize> {
        <T as GuestLink>::poll_transmit(&mut **self, buf)
    }
}

impl<T: GuestLink + ?Sized> GuestLink for Mutex<T> {
    fn deliver(&mut self, frame: &[u8]) {
        self.get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .deliver(frame);
    }

    fn poll_transmit(&mut self, buf: &mut [u8]) -> Option<usize> {
        self.get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .poll_transmit(buf)
    }
}

impl<T: GuestLink + ?Sized> GuestLink for Arc<Mutex<T>> {
    fn deliver(&mut self, frame: &[u8]) {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .deliver(frame);
    }

    fn poll_transmit(&mut self, buf: &mut [u8]) -> Option<usize> {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .poll_transmit(buf)
    }
}

/// Adapts a pair of closures (received-frame sink, transmit-frame source) into a [`GuestLink`].
///
/// Whatever per-device state the closures capture plays the role of the device's user data.
pub struct GuestCallbacks<G, P> {
    got: G,
    get: P,
}

impl<G, P> GuestCallbacks<G, P>
where
    G: FnMut(&[u8]) + Send,
    P: FnMut(&mut [u8]) -> Option<usize> + Send,
{
    pub fn new(got: G, get: P) -> Self {
        Self { got, get }
    }
}

impl<G, P> GuestLink for GuestCallbacks<G, P>
where
    G: FnMut(&[u8]) + Send,
    P: FnMut(&mut [u8]) -> Option<usize> + Send,
{
    fn deliver(&mut self, frame: &[u8]) {
        (self.got)(frame);
    }

    fn poll_transmit(&mut self, buf: &mut [u8]) -> Option<usize> {
        (self.get)(buf)
    }
}

/// Default per-direction queue depth for [`QueuedGuest`].
pub const DEFAULT_MAX_QUEUED_FRAMES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueuedGuestStats {
    pub pending_tx: usize,
    pub pending_rx: usize,
    /// Guest frames refused because the TX queue was full.
    pub dropped_tx: u64,
    /// Host frames refused because the RX queue was full.
    pub dropped_rx: u64,
    /// Guest frames that did not fit the session's frame buffer.
    pub dropped_oversized: u64,
}

/// [`GuestLink`] backed by bounded FIFO queues.
///
/// Suited to NIC models that pump frames once per emulation tick: the device pushes transmitted
/// frames with [`QueuedGuest::push_tx`] and drains received ones with [`QueuedGuest::pop_rx`].
/// When a queue is full the newest frame is dropped, so the oldest frames are kept in order.
/// Share it with the multiplexer as `Arc<Mutex<QueuedGuest>>`.
#[derive(Debug)]
pub struct QueuedGuest {
    tx: VecDeque<Vec<u8>>,
    rx: VecDeque<Vec<u8>>,
    max_frames: usize,
    dropped_tx: u64,
    dropped_rx: u64,
    dropped_oversized: u64,
}

impl Default for QueuedGuest {
    fn default() -> Self {
        Self::with_max_frames(DEFAULT_MAX_QUEUED_FRAMES)
    }
}

impl QueuedGuest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frames(max_frames: usize) -> Self {
        Self {
            tx: VecDeque::new(),
            rx: VecDeque::new(),
            max_frames,
            dropped_tx: 0,
            dropped_rx: 0,
            dropped_oversized: 0,
        }
    }

    /// Queue a guest → host frame. Returns `false` if it was dropped.
    pub fn push_tx(&mut self, frame: Vec<u8>) -> bool {
        if self.tx.len() >= self.max_frames {
            self.dropped_tx += 1;
            return false;
        }
        self.tx.push_back(frame);
        true
    }

    pub fn pop_rx(&mut self) -> Option<Vec<u8>> {
        self.rx.pop_front()
    }

    pub fn drain_rx(&mut self) -> Vec<Vec<u8>> {
        self.rx.drain(..).collect()
    }

    pub fn stats(&self) -> QueuedGuestStats {
        QueuedGuestStats {
            pending_tx: self.tx.len(),
            pending_rx: self.rx.len(),
            dropped_tx: self.dropped_tx,
            dropped_rx: self.dropped_rx,
            dropped_oversized: self.dropped_oversized,
        }
    }
}

impl GuestLink for QueuedGuest {
    fn deliver(&mut self, frame: &[u8]) {
        if self.rx.len() >= self.max_frames {
            self.dropped_rx += 1;
            return;
        }
        self.rx.push_back(frame.to_vec());
    }

    fn poll_transmit(&mut self, buf: &mut [u8]) -> Option<usize> {
        loop {
            let frame = self.tx.pop_front()?;
            if frame.len() > buf.len() {
                self.dropped_oversized += 1;
                continue;
            }
            buf[..frame.len()].copy_from_slice(&frame);
            return Some(frame.len());
        }
    }
}
