//! Process-wide active-call registry (C7 back-end).
//!
//! Grounded on `server/device.rs`'s `DeviceRegistry`: an `Arc<Self>` +
//! `RwLock<HashMap>` with explicit register/unregister/list methods,
//! rather than module-level global state (see SPEC_FULL.md §9's
//! redesign guidance).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::info;

use crate::call::model::CustomParams;
use crate::server::telephony::OutboundFrame;

const MODE_AI: u8 = 0;
const MODE_OPERATOR: u8 = 1;

/// Cross-task handle to one active call. Owned by the registry;
/// cloned (as `Arc`) into the operator WS handler for the duration of
/// a takeover.
pub struct CallHandle {
    pub call_uuid: String,
    pub custom_params: CustomParams,
    mode: AtomicU8,
    /// Where to send audio destined for the customer leg. Shared with
    /// the session task's outbound-telephony sender (§4.2.2).
    pub egress_tx: mpsc::Sender<OutboundFrame>,
    /// Where to send recorder chunks from the operator leg.
    pub recorder_tx: mpsc::Sender<Vec<i16>>,
    /// Set while an operator is attached; used to route customer audio
    /// to the operator during takeover.
    operator_tx: RwLock<Option<mpsc::Sender<Vec<u8>>>>,
}

impl CallHandle {
    pub fn new(
        call_uuid: String,
        custom_params: CustomParams,
        egress_tx: mpsc::Sender<OutboundFrame>,
        recorder_tx: mpsc::Sender<Vec<i16>>,
    ) -> Self {
        Self {
            call_uuid,
            custom_params,
            mode: AtomicU8::new(MODE_AI),
            egress_tx,
            recorder_tx,
            operator_tx: RwLock::new(None),
        }
    }

    pub fn mode(&self) -> super::model::CallMode {
        match self.mode.load(Ordering::Acquire) {
            MODE_OPERATOR => super::model::CallMode::Operator,
            _ => super::model::CallMode::Ai,
        }
    }

    pub async fn attach_operator(&self, tx: mpsc::Sender<Vec<u8>>) {
        *self.operator_tx.write().await = Some(tx);
        self.mode.store(MODE_OPERATOR, Ordering::Release);
    }

    pub async fn detach_operator(&self) {
        *self.operator_tx.write().await = None;
        self.mode.store(MODE_AI, Ordering::Release);
    }

    pub async fn forward_to_operator(&self, customer_audio: Vec<u8>) {
        let guard = self.operator_tx.read().await;
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(customer_audio).await;
        }
    }
}

/// Snapshot of one call for the operator's `list_calls` reply.
pub struct CallSummary {
    pub call_uuid: String,
    pub custom_params: CustomParams,
    pub mode: super::model::CallMode,
}

pub struct CallRegistry {
    calls: RwLock<HashMap<String, Arc<CallHandle>>>,
}

impl CallRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: RwLock::new(HashMap::new()),
        })
    }

    pub async fn register(&self, handle: Arc<CallHandle>) {
        let call_uuid = handle.call_uuid.clone();
        self.calls.write().await.insert(call_uuid.clone(), handle);
        info!("call registered: {}", call_uuid);
    }

    pub async fn unregister(&self, call_uuid: &str) {
        if self.calls.write().await.remove(call_uuid).is_some() {
            info!("call unregistered: {}", call_uuid);
        }
    }

    pub async fn get(&self, call_uuid: &str) -> Option<Arc<CallHandle>> {
        self.calls.read().await.get(call_uuid).cloned()
    }

    pub async fn list(&self) -> Vec<CallSummary> {
        self.calls
            .read()
            .await
            .values()
            .map(|h| CallSummary {
                call_uuid: h.call_uuid.clone(),
                custom_params: h.custom_params.clone(),
                mode: h.mode(),
            })
            .collect()
    }

    /// Atomically set `mode = OPERATOR` and attach the operator channel.
    /// Fails if the call is absent (§4.7).
    pub async fn request_takeover(
        &self,
        call_uuid: &str,
        operator_tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<Arc<CallHandle>, TakeoverError> {
        let handle = self
            .get(call_uuid)
            .await
            .ok_or(TakeoverError::UnknownCall)?;
        handle.attach_operator(operator_tx).await;
        Ok(handle)
    }

    pub async fn end_takeover(&self, call_uuid: &str) -> Result<(), TakeoverError> {
        let handle = self
            .get(call_uuid)
            .await
            .ok_or(TakeoverError::UnknownCall)?;
        handle.detach_operator().await;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeoverError {
    UnknownCall,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_handle(call_uuid: &str) -> Arc<CallHandle> {
        let (egress_tx, _egress_rx) = mpsc::channel(8);
        let (recorder_tx, _recorder_rx) = mpsc::channel(8);
        Arc::new(CallHandle::new(
            call_uuid.to_string(),
            CustomParams::new(),
            egress_tx,
            recorder_tx,
        ))
    }

    #[tokio::test]
    async fn takeover_on_unknown_call_fails_without_state_change() {
        let registry = CallRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        let result = registry.request_takeover("missing", tx).await;
        assert_eq!(result.err(), Some(TakeoverError::UnknownCall));
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn takeover_flips_mode_and_end_takeover_reverts_it() {
        let registry = CallRegistry::new();
        registry.register(dummy_handle("abc")).await;

        let (tx, _rx) = mpsc::channel(8);
        registry.request_takeover("abc", tx).await.unwrap();
        let summary = registry.list().await;
        assert_eq!(summary[0].mode, super::super::model::CallMode::Operator);

        registry.end_takeover("abc").await.unwrap();
        let summary = registry.list().await;
        assert_eq!(summary[0].mode, super::super::model::CallMode::Ai);
    }

    #[tokio::test]
    async fn unregister_removes_the_call() {
        let registry = CallRegistry::new();
        registry.register(dummy_handle("abc")).await;
        registry.unregister("abc").await;
        assert!(registry.get("abc").await.is_none());
    }
}
