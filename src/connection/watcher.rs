use std::sync::Weak;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::ConnShared;
use super::state::ConnState;
use crate::context::Context;

/// An operation asking to be torn down if `ctx` fires before it finishes.
struct WatchRequest {
    ctx: Context,
    finished: oneshot::Receiver<()>,
}

/// Handle to the connection's cancellation watcher task.
///
/// The task lives as long as the connection. It takes one registration at a
/// time and races the registered context against the operation's finish
/// acknowledgement; if the context wins, the connection is canceled.
pub(crate) struct Watcher {
    requests: mpsc::UnboundedSender<WatchRequest>,
}

impl Watcher {
    pub(crate) fn spawn(conn: Weak<ConnShared>, closing: CancellationToken) -> Self {
        let (requests, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run(conn, closing, receiver));
        Self { requests }
    }

    /// Hand `ctx` to the task. `None` if the task has already stopped.
    pub(crate) fn register(&self, ctx: Context) -> Option<oneshot::Sender<()>> {
        let (finish, finished) = oneshot::channel();
        self.requests
            .send(WatchRequest { ctx, finished })
            .ok()
            .map(|()| finish)
    }
}

async fn run(
    conn: Weak<ConnShared>,
    closing: CancellationToken,
    mut requests: mpsc::UnboundedReceiver<WatchRequest>,
) {
    loop {
        let request = tokio::select! {
            biased;
            () = closing.cancelled() => return,
            request = requests.recv() => match request {
                Some(request) => request,
                None => return,
            },
        };

        let WatchRequest { ctx, finished } = request;
        tokio::select! {
            biased;
            () = closing.cancelled() => return,
            // A dropped sender counts as finished too.
            _ = finished => {}
            err = ctx.done() => {
                if let Some(conn) = conn.upgrade() {
                    conn.cancel(err);
                }
                return;
            }
        }
    }
}

/// Registration of one operation with the watcher.
///
/// Dropping the guard acknowledges that the operation has finished.
pub(crate) struct WatchGuard<'a> {
    state: Option<&'a ConnState>,
    finish: Option<oneshot::Sender<()>>,
}

impl<'a> WatchGuard<'a> {
    pub(crate) fn active(state: &'a ConnState, finish: oneshot::Sender<()>) -> Self {
        Self {
            state: Some(state),
            finish: Some(finish),
        }
    }

    /// A guard for a context that can never fire.
    pub(crate) fn inert() -> Self {
        Self {
            state: None,
            finish: None,
        }
    }
}

impl Drop for WatchGuard<'_> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            state.end_watch();
        }
        if let Some(finish) = self.finish.take() {
            let _ = finish.send(());
        }
    }
}
