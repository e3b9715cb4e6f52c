//! Context-value equality with the acting subject.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{Condition, MatchContext};

/// Fulfilled when the context value under the condition key equals the
/// acting subject — the request subject the engine matched for the
/// candidate policy.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EqualsSubject {}

impl Condition for EqualsSubject {
    fn name(&self) -> &'static str {
        "EqualsSubject"
    }

    fn fulfills(&self, key: &str, ctx: &MatchContext<'_>) -> bool {
        matches!(ctx.request.context.get(key), Some(Value::String(value)) if value == ctx.subject)
    }

    fn params(&self) -> Value {
        json!({})
    }

    fn boxed_clone(&self) -> Box<dyn Condition> {
        Box::new(*self)
    }
}

pub(super) fn factory(params: Value) -> Result<Box<dyn Condition>, serde_json::Error> {
    serde_json::from_value::<EqualsSubject>(params)
        .map(|condition| Box::new(condition) as Box<dyn Condition>)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Delimiters;
    use crate::request::Request;

    #[test]
    fn compares_context_value_with_acting_subject() {
        let mut request = Request::default();
        request.context.insert("owner", json!("user:alice"));

        let alice = MatchContext {
            request: &request,
            subject: "user:alice",
            delimiters: Delimiters::default(),
        };
        let bob = MatchContext {
            request: &request,
            subject: "user:bob",
            delimiters: Delimiters::default(),
        };
        let condition = EqualsSubject::default();
        assert!(condition.fulfills("owner", &alice));
        assert!(!condition.fulfills("owner", &bob));
        assert!(!condition.fulfills("missing", &alice));
    }

    #[test]
    fn non_string_context_value_is_unfulfilled() {
        let mut request = Request::default();
        request.context.insert("owner", json!(["user:alice"]));
        let ctx = MatchContext {
            request: &request,
            subject: "user:alice",
            delimiters: Delimiters::default(),
        };
        assert!(!EqualsSubject::default().fulfills("owner", &ctx));
    }
}
