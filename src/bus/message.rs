//! Purpose: Message, delivery options, and reply failure types for the event bus.
//! Exports: `Message`, `DeliveryOptions`, `Headers`, `ReplyFailure`, `FailureKind`.
//! Invariants: A request message resolves its reply channel exactly once.
//! Invariants: Dropping an unanswered request fails it as `RecipientFailure`.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::core::error::{Error, ErrorKind, from_failure_code, to_failure_code};

pub type Headers = BTreeMap<String, String>;

pub(crate) type ReplySender = oneshot::Sender<Result<Value, ReplyFailure>>;

#[derive(Clone, Debug, Default)]
pub struct DeliveryOptions {
    pub headers: Headers,
    pub timeout: Option<Duration>,
}

impl DeliveryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureKind {
    NoHandlers,
    RecipientFailure,
    Timeout,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReplyFailure {
    pub kind: FailureKind,
    pub code: i32,
    pub message: String,
}

impl ReplyFailure {
    pub fn recipient(code: i32, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::RecipientFailure,
            code,
            message: message.into(),
        }
    }

    pub fn no_handlers(address: &str) -> Self {
        Self {
            kind: FailureKind::NoHandlers,
            code: -1,
            message: format!("no handlers for address {address}"),
        }
    }

    pub fn timeout(address: &str, after: Duration) -> Self {
        Self {
            kind: FailureKind::Timeout,
            code: -1,
            message: format!(
                "timed out after {}ms waiting for reply from {address}",
                after.as_millis()
            ),
        }
    }

    pub fn into_error(self, address: &str) -> Error {
        let kind = match self.kind {
            FailureKind::RecipientFailure => from_failure_code(self.code),
            FailureKind::NoHandlers | FailureKind::Timeout => ErrorKind::Internal,
        };
        Error::new(kind)
            .with_message(self.message)
            .with_address(address)
    }
}

impl From<&Error> for ReplyFailure {
    fn from(err: &Error) -> Self {
        Self::recipient(to_failure_code(err.kind()), err.describe())
    }
}

impl fmt::Display for ReplyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({}): {}", self.kind, self.code, self.message)
    }
}

impl std::error::Error for ReplyFailure {}

/// One delivery on the bus. Requests carry a private reply channel that acts
/// as the correlation token; sends and publishes carry none.
#[derive(Debug)]
pub struct Message {
    address: String,
    headers: Headers,
    body: Value,
    reply: Option<ReplySender>,
}

impl Message {
    pub(crate) fn new(
        address: impl Into<String>,
        headers: Headers,
        body: Value,
        reply: Option<ReplySender>,
    ) -> Self {
        Self {
            address: address.into(),
            headers,
            body,
            reply,
        }
    }

    pub(crate) fn copy_for_publish(&self) -> Self {
        Self::new(self.address.clone(), self.headers.clone(), self.body.clone(), None)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn take_body(&mut self) -> Value {
        std::mem::take(&mut self.body)
    }

    pub fn expects_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Returns false when there was nothing to reply to or the requester went away.
    pub fn reply(&mut self, body: Value) -> bool {
        self.complete(Ok(body))
    }

    pub fn fail(&mut self, failure: ReplyFailure) -> bool {
        self.complete(Err(failure))
    }

    fn complete(&mut self, outcome: Result<Value, ReplyFailure>) -> bool {
        match self.reply.take() {
            Some(sender) => sender.send(outcome).is_ok(),
            None => false,
        }
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        if let Some(sender) = self.reply.take() {
            let _ = sender.send(Err(ReplyFailure::recipient(
                to_failure_code(ErrorKind::Internal),
                format!("handler at {} dropped the request without replying", self.address),
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FailureKind, Message, ReplyFailure};
    use crate::core::error::{Error, ErrorKind};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[test]
    fn reply_resolves_only_once() {
        let (tx, mut rx) = oneshot::channel();
        let mut message = Message::new("a", Default::default(), json!(1), Some(tx));
        assert!(message.expects_reply());
        assert!(message.reply(json!("first")));
        assert!(!message.reply(json!("second")));
        assert!(!message.fail(ReplyFailure::recipient(1, "late")));
        assert_eq!(rx.try_recv().expect("reply"), Ok(json!("first")));
    }

    #[test]
    fn dropped_request_fails_as_recipient_failure() {
        let (tx, mut rx) = oneshot::channel();
        let message = Message::new("pages", Default::default(), json!(null), Some(tx));
        drop(message);
        let failure = rx.try_recv().expect("reply").expect_err("failure");
        assert_eq!(failure.kind, FailureKind::RecipientFailure);
        assert!(failure.message.contains("pages"));
    }

    #[test]
    fn recipient_failure_keeps_error_kind() {
        let err = Error::new(ErrorKind::Store).with_message("disk full");
        let failure = ReplyFailure::from(&err);
        let back = failure.into_error("wikidb.queue");
        assert_eq!(back.kind(), ErrorKind::Store);
        assert_eq!(back.message(), Some("disk full"));
        assert_eq!(back.address(), Some("wikidb.queue"));
    }

    #[test]
    fn timeout_message_names_address() {
        let failure = ReplyFailure::timeout("x.y", Duration::from_millis(250));
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert!(failure.message.contains("250ms"));
        assert!(failure.message.contains("x.y"));
    }
}
