use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::connector::EngineHandle;
use crate::error::DriverError;
use crate::transaction::bridge::RwBridge;
use crate::transaction::read_only::ReadOnlyHandle;

/// Transaction currently owned by a connection.
#[derive(Clone, Default)]
pub(crate) enum ActiveTx {
    #[default]
    None,
    ReadOnly {
        id: u64,
        handle: Arc<ReadOnlyHandle>,
    },
    ReadWrite {
        id: u64,
        bridge: Arc<RwBridge>,
    },
}

impl ActiveTx {
    fn id(&self) -> Option<u64> {
        match self {
            ActiveTx::None => None,
            ActiveTx::ReadOnly { id, .. } | ActiveTx::ReadWrite { id, .. } => Some(*id),
        }
    }

    /// Let go of whatever the transaction holds on the engine side.
    pub(crate) fn release(self) {
        match self {
            ActiveTx::None => {}
            ActiveTx::ReadOnly { handle, .. } => handle.release(),
            ActiveTx::ReadWrite { bridge, .. } => bridge.abandon(),
        }
    }
}

struct Inner {
    closed: bool,
    canceled: Option<DriverError>,
    watching: bool,
    active: ActiveTx,
    next_tx_id: u64,
    engine: Option<EngineHandle>,
}

/// Connection flags and the active transaction slot, shared between the
/// caller and the cancellation watcher.
pub(crate) struct ConnState {
    inner: Mutex<Inner>,
}

impl ConnState {
    pub(crate) fn new(engine: EngineHandle) -> Self {
        Self {
            inner: Mutex::new(Inner {
                closed: false,
                canceled: None,
                watching: false,
                active: ActiveTx::None,
                next_tx_id: 1,
                engine: Some(engine),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every critical section leaves the state consistent, so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Flip `closed` from false to true. Only the first caller gets `true`.
    pub(crate) fn try_close(&self) -> bool {
        let mut inner = self.lock();
        if inner.closed {
            return false;
        }
        inner.closed = true;
        true
    }

    /// Record the cancellation error unless one is already stored.
    pub(crate) fn set_canceled(&self, err: DriverError) -> bool {
        let mut inner = self.lock();
        if inner.canceled.is_some() {
            return false;
        }
        inner.canceled = Some(err);
        true
    }

    pub(crate) fn canceled(&self) -> Option<DriverError> {
        self.lock().canceled.clone()
    }

    /// Mark a watch as registered. `false` if one is already registered.
    pub(crate) fn begin_watch(&self) -> bool {
        let mut inner = self.lock();
        if inner.watching {
            return false;
        }
        inner.watching = true;
        true
    }

    pub(crate) fn end_watch(&self) {
        self.lock().watching = false;
    }

    pub(crate) fn engine(&self) -> Option<EngineHandle> {
        self.lock().engine.clone()
    }

    pub(crate) fn take_engine(&self) -> Option<EngineHandle> {
        self.lock().engine.take()
    }

    pub(crate) fn active(&self) -> ActiveTx {
        self.lock().active.clone()
    }

    pub(crate) fn in_transaction(&self) -> bool {
        !matches!(self.lock().active, ActiveTx::None)
    }

    pub(crate) fn is_active(&self, id: u64) -> bool {
        self.lock().active.id() == Some(id)
    }

    pub(crate) fn install_read_only(&self, handle: Arc<ReadOnlyHandle>) -> Result<u64, DriverError> {
        self.install(|id| ActiveTx::ReadOnly { id, handle })
    }

    pub(crate) fn install_read_write(&self, bridge: Arc<RwBridge>) -> Result<u64, DriverError> {
        self.install(|id| ActiveTx::ReadWrite { id, bridge })
    }

    fn install(&self, build: impl FnOnce(u64) -> ActiveTx) -> Result<u64, DriverError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(DriverError::InvalidConnection);
        }
        if !matches!(inner.active, ActiveTx::None) {
            return Err(DriverError::AlreadyInTransaction);
        }
        let id = inner.next_tx_id;
        inner.next_tx_id += 1;
        inner.active = build(id);
        Ok(id)
    }

    /// Detach the active transaction if it is the one identified by `id`.
    pub(crate) fn take_active_if(&self, id: u64) -> Option<ActiveTx> {
        let mut inner = self.lock();
        if inner.active.id() == Some(id) {
            Some(std::mem::take(&mut inner.active))
        } else {
            None
        }
    }

    pub(crate) fn take_active(&self) -> ActiveTx {
        std::mem::take(&mut self.lock().active)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::connector::EngineHandle;
    use crate::engine::{Engine, TimestampBound};
    use crate::test_utils::FakeEngine;

    fn state() -> (ConnState, FakeEngine) {
        let engine = FakeEngine::new();
        let handle = EngineHandle::new(Arc::new(engine.clone()));
        (ConnState::new(handle), engine)
    }

    #[test]
    fn closed_flips_once() {
        let (state, _) = state();
        assert!(!state.is_closed());
        assert!(state.try_close());
        assert!(!state.try_close());
        assert!(state.is_closed());
    }

    #[test]
    fn canceled_error_is_write_once() {
        let (state, _) = state();
        assert!(state.canceled().is_none());
        assert!(state.set_canceled(DriverError::Canceled));
        assert!(!state.set_canceled(DriverError::DeadlineExceeded));
        assert!(matches!(state.canceled(), Some(DriverError::Canceled)));
    }

    #[test]
    fn only_one_watch_at_a_time() {
        let (state, _) = state();
        assert!(state.begin_watch());
        assert!(!state.begin_watch());
        state.end_watch();
        assert!(state.begin_watch());
    }

    #[test]
    fn active_slot_holds_one_transaction() {
        let (state, engine) = state();
        let snapshot = engine.read_only_transaction(TimestampBound::Strong);
        let id = state.install_read_only(Arc::new(ReadOnlyHandle::new(snapshot))).unwrap();
        assert!(state.in_transaction());
        assert!(state.is_active(id));

        let again = engine.read_only_transaction(TimestampBound::Strong);
        assert!(matches!(
            state.install_read_only(Arc::new(ReadOnlyHandle::new(again))),
            Err(DriverError::AlreadyInTransaction)
        ));

        assert!(state.take_active_if(id + 1).is_none());
        assert!(state.take_active_if(id).is_some());
        assert!(!state.in_transaction());
        assert!(state.take_active_if(id).is_none());
    }
}
