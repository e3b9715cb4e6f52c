//! Regex match against a scalar extracted from the JSON request body.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{Condition, MatchContext};
use crate::compiler;
use crate::jsonpath;
use crate::request::RawHttpRequest;

/// Fulfilled when the inbound request carries a JSON body whose value at
/// `path` — coerced to a string — fully matches `matches`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BodyMatch {
    pub path: String,
    pub matches: String,
}

impl Condition for BodyMatch {
    fn name(&self) -> &'static str {
        "BodyMatch"
    }

    fn fulfills(&self, _key: &str, ctx: &MatchContext<'_>) -> bool {
        evaluate(&self.path, &self.matches, ctx)
    }

    fn params(&self) -> Value {
        json!({ "path": self.path, "matches": self.matches })
    }

    fn boxed_clone(&self) -> Box<dyn Condition> {
        Box::new(self.clone())
    }
}

/// Backward-compatible alias of [`BodyMatch`]; kept as its own registered
/// type so stored policies round-trip under the name they were written
/// with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonBodyMatch {
    pub path: String,
    pub matches: String,
}

impl Condition for JsonBodyMatch {
    fn name(&self) -> &'static str {
        "JsonBodyMatch"
    }

    fn fulfills(&self, _key: &str, ctx: &MatchContext<'_>) -> bool {
        evaluate(&self.path, &self.matches, ctx)
    }

    fn params(&self) -> Value {
        json!({ "path": self.path, "matches": self.matches })
    }

    fn boxed_clone(&self) -> Box<dyn Condition> {
        Box::new(self.clone())
    }
}

fn evaluate(path: &str, matches: &str, ctx: &MatchContext<'_>) -> bool {
    let Some(body) = read_json_body(ctx) else {
        return false;
    };
    let value = match jsonpath::json_query(&body, path) {
        Ok(value) => value,
        Err(_) => return false,
    };
    let text = jsonpath::coerce_string(&value);
    match compiler::compiled(matches, ctx.delimiters.start, ctx.delimiters.end) {
        Ok(regex) => regex.is_match(&text),
        Err(error) => {
            tracing::warn!(pattern = %matches, %error, "condition pattern failed to compile");
            false
        }
    }
}

/// Read the raw request body, restoring a fresh copy immediately so the
/// body stays replayable for downstream conditions and the application.
/// Returns `None` unless the request is present with a JSON content type.
pub(super) fn read_json_body(ctx: &MatchContext<'_>) -> Option<Vec<u8>> {
    let raw: &RawHttpRequest = ctx.request.context.raw_request()?;
    let content_type = raw.content_type()?;
    if !content_type.eq_ignore_ascii_case("application/json") {
        return None;
    }
    let body = raw.body().take()?;
    raw.body().restore(body.clone());
    Some(body)
}

pub(super) fn factory(params: Value) -> Result<Box<dyn Condition>, serde_json::Error> {
    serde_json::from_value::<BodyMatch>(params)
        .map(|condition| Box::new(condition) as Box<dyn Condition>)
}

pub(super) fn json_factory(params: Value) -> Result<Box<dyn Condition>, serde_json::Error> {
    serde_json::from_value::<JsonBodyMatch>(params)
        .map(|condition| Box::new(condition) as Box<dyn Condition>)
}
