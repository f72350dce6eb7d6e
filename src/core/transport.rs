use crate::core::model::TransportKind;
use tokio::task::AbortHandle;

/// The one live delivery mechanism of a session, if any.
#[derive(Debug, Default)]
pub(crate) enum Transport {
    Streaming(AbortHandle),
    Polling(AbortHandle),
    #[default]
    None,
}

impl Transport {
    pub(crate) fn kind(&self) -> TransportKind {
        match self {
            Self::Streaming(_) => TransportKind::Streaming,
            Self::Polling(_) => TransportKind::Polling,
            Self::None => TransportKind::None,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Aborts the live task and leaves `None` behind. Returns what was closed.
    ///
    /// A transport task may close itself; the abort then lands at its next
    /// await point, so callers on that task must return without awaiting.
    pub(crate) fn close(&mut self) -> TransportKind {
        let kind = self.kind();
        match std::mem::take(self) {
            Self::Streaming(handle) | Self::Polling(handle) => handle.abort(),
            Self::None => {}
        }
        kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn close_aborts_exactly_once() {
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let mut transport = Transport::Polling(task.abort_handle());
        assert!(transport.is_active());

        assert_eq!(transport.close(), TransportKind::Polling);
        assert_eq!(transport.kind(), TransportKind::None);
        assert_eq!(transport.close(), TransportKind::None);

        let err = task.await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
