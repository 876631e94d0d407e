//! Shared test fixtures: an in-memory recording gateway and a fully wired
//! lifecycle over an in-memory store.

#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use quartermaster::errors::GatewayError;
use quartermaster::gateway::{Gateway, Marker};
use quartermaster::lifecycle::Lifecycle;
use quartermaster::requisition::{ChannelId, MessageHandle, ParticipantId};
use quartermaster::settings::Settings;
use quartermaster::store::{DbHandle, Store};

/// The identity the lifecycle treats as the service itself.
pub const SERVICE: ParticipantId = ParticipantId(0);

/// Records every outbound call so tests can assert on delivery.
#[derive(Default)]
pub struct MockGateway {
    next_handle: AtomicU64,
    pub posts: Mutex<Vec<(ChannelId, MessageHandle, String)>>,
    pub edits: Mutex<Vec<(ChannelId, MessageHandle, String)>>,
    pub deletes: Mutex<Vec<(ChannelId, MessageHandle)>>,
    pub markers: Mutex<Vec<(ChannelId, MessageHandle, Marker)>>,
    pub directs: Mutex<Vec<(ParticipantId, String)>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1000),
            ..Self::default()
        }
    }

    /// Texts posted to a channel, in order.
    pub fn posts_in(&self, channel: ChannelId) -> Vec<(MessageHandle, String)> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _, _)| *c == channel)
            .map(|(_, h, t)| (*h, t.clone()))
            .collect()
    }

    /// Direct messages sent to a participant, in order.
    pub fn directs_to(&self, participant: ParticipantId) -> Vec<String> {
        self.directs
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == participant)
            .map(|(_, t)| t.clone())
            .collect()
    }

    pub fn deleted(&self, channel: ChannelId, handle: MessageHandle) -> bool {
        self.deletes
            .lock()
            .unwrap()
            .iter()
            .any(|(c, h)| *c == channel && *h == handle)
    }

    pub fn markers_on(&self, handle: MessageHandle) -> Vec<Marker> {
        self.markers
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, h, _)| *h == handle)
            .map(|(_, _, m)| *m)
            .collect()
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn post_message(
        &self,
        channel: ChannelId,
        text: &str,
    ) -> Result<MessageHandle, GatewayError> {
        let handle = MessageHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.posts
            .lock()
            .unwrap()
            .push((channel, handle, text.to_string()));
        Ok(handle)
    }

    async fn edit_message(
        &self,
        channel: ChannelId,
        handle: MessageHandle,
        text: &str,
    ) -> Result<(), GatewayError> {
        self.edits
            .lock()
            .unwrap()
            .push((channel, handle, text.to_string()));
        Ok(())
    }

    async fn delete_message(
        &self,
        channel: ChannelId,
        handle: MessageHandle,
    ) -> Result<(), GatewayError> {
        self.deletes.lock().unwrap().push((channel, handle));
        Ok(())
    }

    async fn add_marker(
        &self,
        channel: ChannelId,
        handle: MessageHandle,
        marker: Marker,
    ) -> Result<(), GatewayError> {
        self.markers
            .lock()
            .unwrap()
            .push((channel, handle, marker));
        Ok(())
    }

    async fn send_direct(
        &self,
        participant: ParticipantId,
        text: &str,
    ) -> Result<(), GatewayError> {
        self.directs
            .lock()
            .unwrap()
            .push((participant, text.to_string()));
        Ok(())
    }
}

/// A lifecycle wired to a fresh in-memory store and recording gateway.
pub fn fixture(settings: Settings) -> (Arc<Lifecycle>, Arc<MockGateway>, DbHandle) {
    let gateway = Arc::new(MockGateway::new());
    let store = DbHandle::new(Store::open_in_memory().expect("in-memory store"));
    let lifecycle = Lifecycle::new(gateway.clone(), store.clone(), settings, SERVICE);
    (lifecycle, gateway, store)
}

/// Poll until `condition` holds; panics after ~2 seconds.
pub async fn eventually<F: Fn() -> bool>(condition: F, what: &str) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time: {}", what);
}
