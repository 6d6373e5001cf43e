use super::reply_writer::Reply;
use crate::error::{PaymentError, Result};
use serde_json::Value;
use std::collections::HashMap;

/// Remembers successful replies so later lines can refer to server-assigned
/// values.
///
/// Any string of the form `"@<line>.<field>"` inside a request is replaced
/// by `field` of the `ok` payload produced by that earlier line, e.g.
/// `"@1.invoice_id"` or `"@4.version"`. The replacement keeps the JSON type
/// of the referenced value. Strings that merely start with `@`, such as
/// `"@home delivery"`, are left alone.
#[derive(Debug, Default)]
pub struct Session {
    replies: HashMap<usize, Value>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, reply: &Reply) {
        if let Some(ok) = &reply.ok {
            self.replies.insert(reply.line, ok.clone());
        }
    }

    pub fn resolve(&self, line: usize, mut envelope: Value) -> Result<Value> {
        self.substitute(line, &mut envelope)?;
        Ok(envelope)
    }

    fn substitute(&self, line: usize, value: &mut Value) -> Result<()> {
        match value {
            Value::String(text) => {
                if let Some((source, field)) = parse_reference(text) {
                    *value = self.lookup(line, source, field)?;
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.substitute(line, item)?;
                }
            }
            Value::Object(fields) => {
                for field in fields.values_mut() {
                    self.substitute(line, field)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn lookup(&self, line: usize, source: &str, field: &str) -> Result<Value> {
        let unresolved = || {
            PaymentError::ValidationError(format!("line {line}: unresolved reference @{source}.{field}"))
        };
        let source: usize = source.parse().map_err(|_| unresolved())?;
        self.replies
            .get(&source)
            .and_then(|ok| ok.get(field))
            .cloned()
            .ok_or_else(unresolved)
    }
}

/// Splits `@<line>.<field>` into its parts; anything else is plain text.
fn parse_reference(text: &str) -> Option<(&str, &str)> {
    let (source, field) = text.strip_prefix('@')?.split_once('.')?;
    let is_line = !source.is_empty() && source.bytes().all(|b| b.is_ascii_digit());
    (is_line && !field.is_empty()).then_some((source, field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolves_references_to_earlier_replies() {
        let mut session = Session::new();
        session.record(&Reply {
            line: 1,
            call: Some("CreateInvoice"),
            ok: Some(json!({"invoice_id": "abc", "version": 1})),
            error: None,
        });

        let resolved = session
            .resolve(
                2,
                json!({"call": "CancelInvoice", "request": {"invoice_id": "@1.invoice_id", "expected_version": "@1.version"}}),
            )
            .unwrap();
        assert_eq!(
            resolved,
            json!({"call": "CancelInvoice", "request": {"invoice_id": "abc", "expected_version": 1}})
        );
    }

    #[test]
    fn test_text_starting_with_at_sign_is_not_a_reference() {
        let session = Session::new();
        let request = json!({
            "line_items": [
                {"description": "@home delivery", "amount": "5"},
                {"description": "@", "amount": "1"},
                {"description": "@2.", "amount": "1"},
                {"description": "@x.total", "amount": "1"}
            ]
        });
        let resolved = session.resolve(3, request.clone()).unwrap();
        assert_eq!(resolved, request);

        let missing = session.resolve(3, json!({"invoice_id": "@2.invoice_id"}));
        assert!(matches!(missing, Err(PaymentError::ValidationError(_))));
    }

    #[test]
    fn test_failed_replies_are_not_referenceable() {
        let mut session = Session::new();
        session.record(&Reply {
            line: 1,
            call: Some("CreateInvoice"),
            ok: None,
            error: None,
        });
        let result = session.resolve(2, json!({"invoice_id": "@1.invoice_id"}));
        assert!(matches!(result, Err(PaymentError::ValidationError(_))));
    }
}
