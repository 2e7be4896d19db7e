use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

// Every task runs under a child of the root token.
#[derive(Debug)]
pub struct SessionTasks {
    root: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Default for SessionTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTasks {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Spawns `future` on the current runtime. The returned token cancels
    /// just this task; the future is dropped at its next await point.
    pub fn spawn<F>(&mut self, future: F) -> CancellationToken
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.reap();
        let token = self.root.child_token();
        let guard = token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = guard.cancelled() => {}
                _ = future => {}
            }
        });
        self.handles.push(handle);
        token
    }

    pub fn active(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    pub fn cancel_all(&mut self) {
        let count = self.handles.len();
        self.root.cancel();
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        self.root = CancellationToken::new();
        debug!(count, "cancelled session tasks");
    }

    fn reap(&mut self) {
        self.handles.retain(|h| !h.is_finished());
    }
}

impl Drop for SessionTasks {
    fn drop(&mut self) {
        self.root.cancel();
        for handle in &self.handles {
            handle.abort();
        }
    }
}
