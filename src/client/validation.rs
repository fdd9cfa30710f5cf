//! 请求校验：消息序列形状与序列化大小上限。
//!
//! Request validation, run before any admission or I/O.

use crate::types::Message;
use crate::{Error, ErrorContext, Result};

/// Messages that passed validation, with the size measured on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedMessages {
    pub messages: Vec<Message>,
    /// Summed JSON size of `messages`, in bytes.
    pub serialized_bytes: usize,
}

/// Checks message sequence shape and the serialized size ceiling.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestValidator;

impl RequestValidator {
    /// Validate `messages` against `max_request_size` (bytes) and hand them back.
    ///
    /// Size is the sum of each message's JSON encoding, which is what every
    /// adapter puts on the wire modulo envelope fields.
    pub fn validate(messages: Vec<Message>, max_request_size: usize) -> Result<ValidatedMessages> {
        if messages.is_empty() {
            return Err(Error::validation_with_context(
                "message list is empty",
                ErrorContext::new()
                    .with_field_path("request.messages")
                    .with_source("request_validator"),
            ));
        }

        let mut total: usize = 0;
        for (idx, message) in messages.iter().enumerate() {
            total = total.saturating_add(serde_json::to_vec(message)?.len());
            if total > max_request_size {
                return Err(Error::validation_with_context(
                    "request exceeds the maximum serialized size",
                    ErrorContext::new()
                        .with_field_path(format!("request.messages[{}]", idx))
                        .with_details(format!("limit {} bytes, reached {} bytes", max_request_size, total))
                        .with_source("request_validator"),
                ));
            }
        }

        Ok(ValidatedMessages {
            messages,
            serialized_bytes: total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_list_rejected() {
        let err = RequestValidator::validate(Vec::new(), 1024).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_size_ceiling_enforced() {
        let messages = vec![Message::system("You are helpful"), Message::user("Hi")];
        let size = RequestValidator::validate(messages.clone(), usize::MAX)
            .unwrap()
            .serialized_bytes;
        let expected: usize = messages
            .iter()
            .map(|m| serde_json::to_vec(m).unwrap().len())
            .sum();
        assert_eq!(size, expected);

        assert!(RequestValidator::validate(messages.clone(), size).is_ok());
        let err = RequestValidator::validate(messages, size - 1).unwrap_err();
        let ctx = err.context().unwrap();
        assert_eq!(ctx.field_path.as_deref(), Some("request.messages[1]"));
    }

    #[test]
    fn test_order_preserved() {
        let messages = vec![
            Message::user("first"),
            Message::assistant("second"),
            Message::user("third"),
        ];
        let out = RequestValidator::validate(messages.clone(), 10_000).unwrap();
        assert_eq!(out.messages, messages);
    }
}
