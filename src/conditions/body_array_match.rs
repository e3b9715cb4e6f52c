//! Quantified regex match over an array extracted from the JSON body.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::body_match::read_json_body;
use super::{Condition, MatchContext};
use crate::compiler;
use crate::jsonpath;

/// Quantifier applied to the array elements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Every element must be a string matching the pattern. Vacuously
    /// true for an empty array.
    #[default]
    All,
    /// At least one element must be a string matching the pattern.
    Any,
}

/// Fulfilled when the value at `path` in the JSON body is an array whose
/// elements satisfy `matches` under the chosen quantifier. Non-string
/// elements count as a mismatch for that element.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BodyArrayMatch {
    pub mode: MatchMode,
    pub path: String,
    pub matches: String,
}

impl Condition for BodyArrayMatch {
    fn name(&self) -> &'static str {
        "BodyArrayMatch"
    }

    fn fulfills(&self, _key: &str, ctx: &MatchContext<'_>) -> bool {
        let Some(body) = read_json_body(ctx) else {
            return false;
        };
        let Ok(Value::Array(items)) = jsonpath::json_query(&body, &self.path) else {
            return false;
        };
        let regex = match compiler::compiled(&self.matches, ctx.delimiters.start, ctx.delimiters.end)
        {
            Ok(regex) => regex,
            Err(error) => {
                tracing::warn!(pattern = %self.matches, %error, "condition pattern failed to compile");
                return false;
            }
        };

        let element_matches =
            |item: &Value| matches!(item, Value::String(s) if regex.is_match(s));
        match self.mode {
            MatchMode::All => items.iter().all(element_matches),
            MatchMode::Any => items.iter().any(element_matches),
        }
    }

    fn params(&self) -> Value {
        json!({ "mode": self.mode, "path": self.path, "matches": self.matches })
    }

    fn boxed_clone(&self) -> Box<dyn Condition> {
        Box::new(self.clone())
    }
}

pub(super) fn factory(params: Value) -> Result<Box<dyn Condition>, serde_json::Error> {
    serde_json::from_value::<BodyArrayMatch>(params)
        .map(|condition| Box::new(condition) as Box<dyn Condition>)
}
