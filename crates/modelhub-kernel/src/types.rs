//! Value types exchanged between callers, the orchestration layer and backends.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Default confidence assigned to a response when the backend reports none.
pub const DEFAULT_CONFIDENCE: f64 = 1.0;

/// Standardized response produced by every generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Generated text
    pub content: String,
    /// Backend-reported confidence; no range is enforced
    pub confidence: f64,
    /// Wall-clock seconds spent producing the response
    pub processing_time: f64,
    /// Identifier of the producer (the ensemble name for combined responses)
    pub model_name: String,
    /// Strategy- or backend-specific extras
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl ModelResponse {
    /// Create a response with the default confidence and no timing yet.
    pub fn new(model_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            confidence: DEFAULT_CONFIDENCE,
            processing_time: 0.0,
            model_name: model_name.into(),
            metadata: HashMap::new(),
        }
    }

    /// Set the confidence.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Set the processing time in seconds.
    pub fn with_processing_time(mut self, seconds: f64) -> Self {
        self.processing_time = seconds;
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Enumerated generation options.
///
/// `temperature` and `max_tokens` are understood by every backend; anything
/// backend-specific goes into `extra`. Ordering of `extra` never matters: the
/// map is sorted, and [`GenerationOptions::canonical`] sorts nested objects too.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Upper bound on generated tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Backend-specific options
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl GenerationOptions {
    /// Empty options; backends apply their own defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the temperature.
    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the token limit.
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Add a backend-specific option.
    pub fn extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Canonical JSON text of the options: object keys sorted at every depth.
    ///
    /// Backend-specific options sit under their own `extra` object, so an
    /// extra named like a typed option never aliases or shadows it.
    pub fn canonical(&self) -> String {
        let mut value = serde_json::Map::new();
        if let Some(t) = self.temperature {
            value.insert("temperature".to_string(), Value::from(t));
        }
        if let Some(m) = self.max_tokens {
            value.insert("max_tokens".to_string(), Value::from(m));
        }
        if !self.extra.is_empty() {
            let extra: serde_json::Map<String, Value> = self
                .extra
                .iter()
                .map(|(key, v)| (key.clone(), v.clone()))
                .collect();
            value.insert("extra".to_string(), Value::Object(extra));
        }
        canonical_json(&Value::Object(value))
    }
}

/// Serialize a JSON value with object keys sorted recursively.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
