//! Notification collaborator seam.
//!
//! Notifier calls sit in terminal workflow steps: a failure there is
//! retryable through the normal step machinery, but it never rolls back
//! the domain writes the earlier steps already committed.

use trainloop_types::error::StepError;

/// One outbound message to a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub user_id: String,
    pub subject: String,
    pub body: String,
}

impl Notification {
    pub fn new(
        user_id: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// Errors a notifier implementation can surface.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Transport-level failure. Transient.
    #[error("notification delivery failed: {0}")]
    Connection(String),

    /// The provider rejected the message. Retrying the same message will
    /// not help.
    #[error("notification rejected: {0}")]
    Rejected(String),
}

impl From<NotifyError> for StepError {
    fn from(err: NotifyError) -> Self {
        match err {
            NotifyError::Connection(msg) => StepError::Connection(msg),
            NotifyError::Rejected(msg) => StepError::Invalid(msg),
        }
    }
}

/// Fire-and-forget delivery of user notifications.
pub trait Notifier: Send + Sync {
    fn notify(
        &self,
        notification: &Notification,
    ) -> impl std::future::Future<Output = Result<(), NotifyError>> + Send;
}

/// Notifier that writes to the log instead of a delivery provider.
///
/// The default in `trainloopd` until a real email/push integration is
/// configured; also what workflow tests run against.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            user = %notification.user_id,
            subject = %notification.subject,
            body = %notification.body,
            "notification delivered (log sink)"
        );
        Ok(())
    }
}
