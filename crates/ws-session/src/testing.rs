//! An in-memory [`Transport`] for exercising the session state machine
//! without opening real sockets, plus a small script DSL to drive it.
//! Grounded on the same idea as a fake protocol manager: the session
//! core talks to a trait object, and tests substitute a scripted double.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::transport::{Transport, TransportError};

/// Shared with test code so it can inspect what the session sent and
/// push scripted server frames.
#[derive(Clone)]
pub struct FakeWire {
    pub sent: Arc<Mutex<Vec<String>>>,
    to_client: mpsc::UnboundedSender<String>,
}

pub struct FakeTransport {
    sent: Arc<Mutex<Vec<String>>>,
    from_server: mpsc::UnboundedReceiver<String>,
}

impl FakeWire {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                sent: Arc::new(Mutex::new(Vec::new())),
                to_client: tx,
            },
            rx,
        )
    }

    /// Deliver a frame as if the server sent it.
    pub fn push(&self, frame: impl Into<String>) {
        let _ = self.to_client.send(frame.into());
    }

    pub fn sent_frames(&self) -> Vec<String> {
        self.sent.lock().expect("fake wire mutex poisoned").clone()
    }
}

thread_local! {
    static NEXT_FAKE: std::cell::RefCell<Option<(Arc<Mutex<Vec<String>>>, mpsc::UnboundedReceiver<String>)>> =
        const { std::cell::RefCell::new(None) };
}

impl FakeTransport {
    /// Registers the fake that the next `FakeTransport::connect` call
    /// should return. `ws-session` tests run single-threaded per test
    /// (`#[tokio::test]`), so a thread-local slot is enough to avoid
    /// threading a transport instance through `Session::spawn`'s generic
    /// `T::connect(&Url)` constructor.
    pub fn install(wire: &FakeWire, rx: mpsc::UnboundedReceiver<String>) {
        NEXT_FAKE.with(|slot| {
            *slot.borrow_mut() = Some((wire.sent.clone(), rx));
        });
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(_url: &Url) -> Result<Self, TransportError> {
        let installed = NEXT_FAKE.with(|slot| slot.borrow_mut().take());
        let (sent, from_server) = installed.expect("FakeTransport::install must be called before connecting");
        Ok(Self { sent, from_server })
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.sent.lock().expect("fake wire mutex poisoned").push(text);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.from_server.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.from_server.close();
    }
}
