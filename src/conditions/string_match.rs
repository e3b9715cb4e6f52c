//! Regex match against a context value.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{Condition, MatchContext};
use crate::compiler;

/// Fulfilled when the context value stored under the condition key is a
/// string fully matched by `matches` (a pattern in the owning policy's
/// delimiter syntax).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StringMatch {
    pub matches: String,
}

impl Condition for StringMatch {
    fn name(&self) -> &'static str {
        "StringMatch"
    }

    fn fulfills(&self, key: &str, ctx: &MatchContext<'_>) -> bool {
        let Some(Value::String(value)) = ctx.request.context.get(key) else {
            return false;
        };
        match compiler::compiled(&self.matches, ctx.delimiters.start, ctx.delimiters.end) {
            Ok(regex) => regex.is_match(value),
            Err(error) => {
                tracing::warn!(pattern = %self.matches, %error, "condition pattern failed to compile");
                false
            }
        }
    }

    fn params(&self) -> Value {
        json!({ "matches": self.matches })
    }

    fn boxed_clone(&self) -> Box<dyn Condition> {
        Box::new(self.clone())
    }
}

pub(super) fn factory(params: Value) -> Result<Box<dyn Condition>, serde_json::Error> {
    serde_json::from_value::<StringMatch>(params)
        .map(|condition| Box::new(condition) as Box<dyn Condition>)
}
