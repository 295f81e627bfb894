// JSON frames exchanged with external bridge clients.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::{FailureKind, Headers, ReplyFailure};

pub const ACCESS_DENIED: &str = "access_denied";

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundFrame {
    Send {
        address: String,
        #[serde(default)]
        body: Value,
        #[serde(default, rename = "replyAddress")]
        reply_address: Option<String>,
        #[serde(default)]
        headers: Headers,
    },
    Publish {
        address: String,
        #[serde(default)]
        body: Value,
        #[serde(default)]
        headers: Headers,
    },
    Register {
        address: String,
    },
    Unregister {
        address: String,
    },
    Ping,
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundFrame {
    Rec {
        address: String,
        body: Value,
        #[serde(skip_serializing_if = "Headers::is_empty")]
        headers: Headers,
    },
    Err {
        #[serde(skip_serializing_if = "Option::is_none")]
        address: Option<String>,
        #[serde(rename = "failureCode", skip_serializing_if = "Option::is_none")]
        failure_code: Option<i32>,
        #[serde(rename = "failureType", skip_serializing_if = "Option::is_none")]
        failure_type: Option<String>,
        body: String,
    },
}

impl OutboundFrame {
    pub fn access_denied(reply_address: Option<String>) -> Self {
        OutboundFrame::Err {
            address: reply_address,
            failure_code: None,
            failure_type: None,
            body: ACCESS_DENIED.to_string(),
        }
    }

    pub fn failure(reply_address: String, failure: ReplyFailure) -> Self {
        let failure_type = match failure.kind {
            FailureKind::NoHandlers => "NO_HANDLERS",
            FailureKind::RecipientFailure => "RECIPIENT_FAILURE",
            FailureKind::Timeout => "TIMEOUT",
        };
        OutboundFrame::Err {
            address: Some(reply_address),
            failure_code: Some(failure.code),
            failure_type: Some(failure_type.to_string()),
            body: failure.message,
        }
    }
}
