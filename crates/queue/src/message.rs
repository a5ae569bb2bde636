//! Outbound message type.

use crate::error::{ExecutionFailure, MessageExecutionError};
use crate::priority::Priority;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Error type returned by user send actions and result callbacks.
pub type ActionError = Box<dyn std::error::Error + Send + Sync>;

/// The send action: performs one remote call with the payload.
pub type SendAction = Box<dyn FnOnce(Payload) -> Result<Option<Value>, ActionError> + Send>;

/// Invoked with `(result, context)` after the send action succeeds.
pub type ResultCallback =
    Box<dyn FnOnce(Option<Value>, Option<Value>) -> Result<(), ActionError> + Send>;

/// Longest description attached to a failure log.
pub const MAX_DESCRIPTION_LEN: usize = 120;

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique message sequence number, assigned at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(u64);

impl MessageId {
    fn next() -> Self {
        Self(NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Message payload.
///
/// A stream carries many sub-items in a single send call (a batch of log
/// records, for example) instead of many separate messages.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Single(Value),
    Stream(Vec<Value>),
}

impl Payload {
    pub fn single(value: impl Into<Value>) -> Self {
        Payload::Single(value.into())
    }

    pub fn stream<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Payload::Stream(items.into_iter().map(Into::into).collect())
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Payload::Stream(_))
    }

    /// Number of items carried (1 for a single payload).
    pub fn item_count(&self) -> usize {
        match self {
            Payload::Single(_) => 1,
            Payload::Stream(items) => items.len(),
        }
    }

    /// Flatten into one JSON value (streams become arrays).
    pub fn into_value(self) -> Value {
        match self {
            Payload::Single(value) => value,
            Payload::Stream(items) => Value::Array(items),
        }
    }
}

/// One unit of outbound work.
///
/// Moved into the queue on enqueue and moved out to exactly one worker on
/// dequeue; there is no shared access to a message once posted.
pub struct Message {
    id: MessageId,
    priority: Priority,
    payload: Payload,
    action: SendAction,
    on_result: Option<ResultCallback>,
    context: Option<Value>,
}

impl Message {
    /// Create a message that runs `action(payload)` when dispatched.
    pub fn new<F>(priority: impl Into<Priority>, payload: Payload, action: F) -> Self
    where
        F: FnOnce(Payload) -> Result<Option<Value>, ActionError> + Send + 'static,
    {
        Self {
            id: MessageId::next(),
            priority: priority.into(),
            payload,
            action: Box::new(action),
            on_result: None,
            context: None,
        }
    }

    /// Attach a result callback and the opaque context it receives.
    pub fn with_on_result<F>(mut self, on_result: F, context: Option<Value>) -> Self
    where
        F: FnOnce(Option<Value>, Option<Value>) -> Result<(), ActionError> + Send + 'static,
    {
        self.on_result = Some(Box::new(on_result));
        self.context = context;
        self
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn context(&self) -> Option<&Value> {
        self.context.as_ref()
    }

    pub fn is_stream(&self) -> bool {
        self.payload.is_stream()
    }

    pub fn has_on_result(&self) -> bool {
        self.on_result.is_some()
    }

    /// Short description for logs, at most [`MAX_DESCRIPTION_LEN`] chars.
    pub fn describe(&self) -> String {
        let payload = match &self.payload {
            Payload::Single(_) => "single".to_string(),
            Payload::Stream(items) => format!("stream[{}]", items.len()),
        };
        let mut description = format!(
            "message {} priority={} payload={}",
            self.id, self.priority, payload
        );
        if let Some(context) = &self.context {
            description.push_str(&format!(" context={}", context));
        }
        truncate(description, MAX_DESCRIPTION_LEN)
    }

    /// Run the send action, then the result callback if there is one.
    ///
    /// The callback only runs when the action succeeded.
    pub fn send(self) -> Result<(), MessageExecutionError> {
        let description = self.describe();
        let Message {
            id,
            priority,
            payload,
            action,
            on_result,
            context,
        } = self;

        let fail = |failure| MessageExecutionError {
            priority,
            message_id: id,
            description,
            failure,
        };

        let result = match action(payload) {
            Ok(result) => result,
            Err(e) => return Err(fail(ExecutionFailure::Action(e))),
        };

        if let Some(on_result) = on_result {
            if let Err(e) = on_result(result, context) {
                return Err(fail(ExecutionFailure::OnResult(e)));
            }
        }
        Ok(())
    }

    /// Build an execution error for this message without running it.
    pub fn failure(&self, failure: ExecutionFailure) -> MessageExecutionError {
        MessageExecutionError {
            priority: self.priority,
            message_id: self.id,
            description: self.describe(),
            failure,
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("payload", &self.payload)
            .field("on_result", &self.on_result.is_some())
            .field("context", &self.context)
            .finish()
    }
}

fn truncate(mut s: String, max: usize) -> String {
    if s.chars().count() <= max {
        return s;
    }
    let cut = s
        .char_indices()
        .nth(max.saturating_sub(3))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    s.truncate(cut);
    s.push_str("...");
    s
}
