//! Decision requests and their environmental context.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved context key under which the raw inbound HTTP request travels.
/// Body-inspecting conditions look it up through [`Context::raw_request`].
pub const KEY_RAW_REQUEST: &str = "http-request";

/// A single access decision request: who (`subjects`) wants to do what
/// (`action`) to which `resource`, under which environmental `context`.
///
/// On the wire the subjects list is carried in a field named `subject`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Request {
    pub resource: String,
    pub action: String,
    #[serde(rename = "subject")]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub context: Context,
}

/// The request's environmental context: a JSON-shaped key/value map plus
/// an out-of-band slot for the raw HTTP request. The raw request is never
/// serialized; it exists only for the lifetime of one decision.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Context {
    #[serde(flatten)]
    values: serde_json::Map<String, Value>,
    #[serde(skip)]
    raw_request: Option<Arc<RawHttpRequest>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Attach the raw inbound HTTP request (reserved slot
    /// [`KEY_RAW_REQUEST`]).
    pub fn set_raw_request(&mut self, raw: Arc<RawHttpRequest>) {
        self.raw_request = Some(raw);
    }

    pub fn raw_request(&self) -> Option<&RawHttpRequest> {
        self.raw_request.as_deref()
    }
}

impl From<serde_json::Map<String, Value>> for Context {
    fn from(values: serde_json::Map<String, Value>) -> Self {
        Self {
            values,
            raw_request: None,
        }
    }
}

/// The raw inbound HTTP request as the engine sees it: header pairs plus a
/// replayable body. Header lookup is case-insensitive.
#[derive(Debug)]
pub struct RawHttpRequest {
    headers: Vec<(String, String)>,
    body: BodyCapsule,
}

impl RawHttpRequest {
    pub fn new(headers: Vec<(String, String)>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers,
            body: BodyCapsule::new(body.into()),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn body(&self) -> &BodyCapsule {
        &self.body
    }
}

/// The body is a single-shot stream at the HTTP layer; the capsule makes
/// that explicit. Readers take the bytes out, and must restore a copy
/// before returning so the next reader (another condition, or the
/// application itself) still sees a body.
#[derive(Debug, Default)]
pub struct BodyCapsule {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl BodyCapsule {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Mutex::new(Some(bytes)),
        }
    }

    /// Consume the body. Returns `None` if it was already taken and not
    /// restored.
    pub fn take(&self) -> Option<Vec<u8>> {
        self.bytes.lock().ok().and_then(|mut guard| guard.take())
    }

    /// Put a fresh body back for downstream readers.
    pub fn restore(&self, bytes: Vec<u8>) {
        if let Ok(mut guard) = self.bytes.lock() {
            *guard = Some(bytes);
        }
    }

    pub fn is_consumed(&self) -> bool {
        self.bytes
            .lock()
            .map(|guard| guard.is_none())
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_field_subject_carries_the_plural_list() {
        let raw = r#"{
            "resource": "articles:42",
            "action": "create",
            "subject": ["user:alice", "role:admin"],
            "context": { "remoteIP": "10.0.0.1" }
        }"#;
        let request: Request = serde_json::from_str(raw).unwrap();
        assert_eq!(request.subjects, vec!["user:alice", "role:admin"]);
        assert_eq!(request.context.get("remoteIP"), Some(&json!("10.0.0.1")));

        let out = serde_json::to_value(&request).unwrap();
        assert!(out.get("subject").is_some());
        assert!(out.get("subjects").is_none());
    }

    #[test]
    fn context_serializes_flat() {
        let mut context = Context::new();
        context.insert("ip", json!("127.0.0.1"));
        context.set_raw_request(Arc::new(RawHttpRequest::new(vec![], Vec::new())));
        let out = serde_json::to_value(&context).unwrap();
        assert_eq!(out, json!({"ip": "127.0.0.1"}));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let raw = RawHttpRequest::new(
            vec![("Content-Type".into(), "application/json".into())],
            b"{}".to_vec(),
        );
        assert_eq!(raw.content_type(), Some("application/json"));
        assert_eq!(raw.header("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(raw.header("x-missing"), None);
    }

    #[test]
    fn body_take_and_restore() {
        let capsule = BodyCapsule::new(b"payload".to_vec());
        let bytes = capsule.take().unwrap();
        assert!(capsule.is_consumed());
        assert!(capsule.take().is_none());
        capsule.restore(bytes);
        assert!(!capsule.is_consumed());
        assert_eq!(capsule.take().unwrap(), b"payload");
    }
}
