//! Error taxonomy for the client protocol layer.
//!
//! Unrecognised enum codes are not errors: they decode to a default variant
//! (see [`crate::wire`]). Nothing in this crate retries on error.

use crate::types::{Order, OrderResult};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Wrong field count or unparsable field in a wire record.
    #[error("malformed {kind} record: {reason}")]
    MalformedRecord { kind: &'static str, reason: String },

    /// Historical store unreachable, query failed, or a stored cell did not decode.
    #[error("archive access failed: {0}")]
    ArchiveAccess(String),

    #[error("channel {topic} unavailable: {reason}")]
    ChannelUnavailable { topic: String, reason: String },

    /// Records were dropped because the channel's bounds were exceeded.
    #[error("channel {topic} overflowed: {dropped} record(s) dropped")]
    ChannelOverflow { topic: String, dropped: u64 },

    #[error("duplicate submission of order {order_id}")]
    DuplicateSubmission { order_id: String },

    #[error("gateway rejected order {order_id}: {result:?}")]
    GatewayRejected { order_id: String, result: OrderResult },

    /// The link failed mid-submission. The order may or may not have been placed;
    /// reconcile through a historical query.
    #[error("outcome of order unknown: {reason}")]
    OutcomeUnknown { order: Box<Order>, reason: String },

    #[error("gateway link failed: {0}")]
    Link(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    pub(crate) fn malformed(kind: &'static str, reason: impl Into<String>) -> Self {
        ClientError::MalformedRecord {
            kind,
            reason: reason.into(),
        }
    }

    pub(crate) fn unavailable(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        ClientError::ChannelUnavailable {
            topic: topic.into(),
            reason: reason.into(),
        }
    }
}
