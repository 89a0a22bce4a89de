use postern_common::Signal;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};

/// A worker's view of the run's shutdown broadcast.
///
/// Latches: once any [`Signal`] has been seen it stays triggered.
#[derive(Debug)]
pub struct ShutdownWatch {
    receiver: broadcast::Receiver<Signal>,
    triggered: bool,
}

impl ShutdownWatch {
    pub const fn new(receiver: broadcast::Receiver<Signal>) -> Self {
        Self {
            receiver,
            triggered: false,
        }
    }

    /// Non-blocking check.
    pub fn is_triggered(&mut self) -> bool {
        if !self.triggered {
            match self.receiver.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => self.triggered = true,
                Err(TryRecvError::Empty | TryRecvError::Closed) => {}
            }
        }

        self.triggered
    }

    /// Resolves once shutdown has been signalled. Never resolves if the
    /// sending side is gone without having signalled.
    pub async fn triggered(&mut self) {
        if self.triggered {
            return;
        }

        match self.receiver.recv().await {
            Ok(_) | Err(RecvError::Lagged(_)) => self.triggered = true,
            Err(RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}
