//! Collaborator seams
//!
//! The engine never talks to the remote decision service itself. Remote
//! calls go through a caller-supplied `Transport`; failures that must not
//! break decisioning are reported to an optional `ExceptionHandler`;
//! artifact lifecycle events go to an optional `DecisioningHandler`.

use crate::error::{DecisioningError, Result};
use crate::types::{TargetDeliveryRequest, TargetDeliveryResponse};
use async_trait::async_trait;
use std::sync::Arc;

/// Remote delivery API
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute a delivery request remotely
    async fn execute_request(&self, request: &TargetDeliveryRequest) -> Result<TargetDeliveryResponse>;

    /// Deliver a notification batch, returning the HTTP status
    async fn execute_notification(&self, request: &TargetDeliveryRequest) -> Result<u16>;
}

/// Receives recoverable internal failures
#[cfg_attr(test, mockall::automock)]
pub trait ExceptionHandler: Send + Sync {
    fn handle(&self, error: &DecisioningError);
}

/// Artifact lifecycle callbacks; every method defaults to a no-op
pub trait DecisioningHandler: Send + Sync {
    /// First artifact published, on-device decisions are now possible
    fn on_ready(&self) {}

    fn artifact_download_succeeded(&self, _body: &[u8]) {}

    fn artifact_download_failed(&self, _error: &DecisioningError) {}
}

/// Pass an error to the exception handler, if any
pub(crate) fn report(handler: Option<&Arc<dyn ExceptionHandler>>, error: &DecisioningError) {
    if let Some(handler) = handler {
        handler.handle(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_reaches_handler() {
        let mut mock = MockExceptionHandler::new();
        mock.expect_handle()
            .withf(|e| matches!(e, DecisioningError::NotificationQueueFull))
            .times(1)
            .return_const(());
        let handler: Arc<dyn ExceptionHandler> = Arc::new(mock);

        report(Some(&handler), &DecisioningError::NotificationQueueFull);
        report(None, &DecisioningError::NotificationQueueFull);
    }
}
