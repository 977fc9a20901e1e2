//! Scriptable in-process [`ModelHandle`] for integration tests.
//!
//! [`MockModel`] returns queued outcomes in FIFO order and falls back to a
//! default response when the queue is empty. Every call is recorded.
//!
//! ```rust,ignore
//! let model = MockModel::builder("llama", "8b")
//!     .respond_with("Pong!")
//!     .fail_with("server overloaded")
//!     .confidence(0.7)
//!     .build();
//!
//! registry.register(model.clone()).await?;
//! ```

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use modelhub_kernel::{GenerationOptions, ModelError, ModelHandle, ModelResponse, ModelResult};

#[derive(Default)]
struct MockState {
    prompts: Vec<String>,
    options: Vec<GenerationOptions>,
    embed_calls: usize,
    load_calls: usize,
    unload_calls: usize,
    outcomes: VecDeque<Result<String, String>>,
}

pub struct MockModel {
    name: String,
    version: String,
    confidence: f64,
    delay: Option<Duration>,
    default_response: String,
    unload_error: Option<String>,
    loaded: AtomicBool,
    state: Mutex<MockState>,
}

impl MockModel {
    pub fn builder(name: &str, version: &str) -> MockModelBuilder {
        MockModelBuilder {
            name: name.to_string(),
            version: version.to_string(),
            confidence: 1.0,
            delay: None,
            default_response: None,
            unload_error: None,
            outcomes: VecDeque::new(),
        }
    }

    /// Shorthand for a model answering every prompt with `content`.
    pub fn answering(name: &str, version: &str, content: &str, confidence: f64) -> Arc<Self> {
        Self::builder(name, version)
            .default_response(content)
            .confidence(confidence)
            .build()
    }

    pub fn generate_call_count(&self) -> usize {
        self.state.lock().expect("mock state poisoned").prompts.len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.state.lock().expect("mock state poisoned").prompts.clone()
    }

    pub fn last_options(&self) -> Option<GenerationOptions> {
        self.state
            .lock()
            .expect("mock state poisoned")
            .options
            .last()
            .cloned()
    }

    pub fn embed_call_count(&self) -> usize {
        self.state.lock().expect("mock state poisoned").embed_calls
    }

    pub fn load_call_count(&self) -> usize {
        self.state.lock().expect("mock state poisoned").load_calls
    }

    pub fn unload_call_count(&self) -> usize {
        self.state.lock().expect("mock state poisoned").unload_calls
    }
}

pub struct MockModelBuilder {
    name: String,
    version: String,
    confidence: f64,
    delay: Option<Duration>,
    default_response: Option<String>,
    unload_error: Option<String>,
    outcomes: VecDeque<Result<String, String>>,
}

impl MockModelBuilder {
    /// Queue a successful response.
    pub fn respond_with(mut self, content: &str) -> Self {
        self.outcomes.push_back(Ok(content.to_string()));
        self
    }

    /// Queue a backend failure.
    pub fn fail_with(mut self, message: &str) -> Self {
        self.outcomes.push_back(Err(message.to_string()));
        self
    }

    /// Response used once the queue is empty. Defaults to `"<name> response"`.
    pub fn default_response(mut self, content: &str) -> Self {
        self.default_response = Some(content.to_string());
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Sleep before every generate call.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn unload_fails(mut self, message: &str) -> Self {
        self.unload_error = Some(message.to_string());
        self
    }

    pub fn build(self) -> Arc<MockModel> {
        let default_response = self
            .default_response
            .unwrap_or_else(|| format!("{} response", self.name));
        Arc::new(MockModel {
            name: self.name,
            version: self.version,
            confidence: self.confidence,
            delay: self.delay,
            default_response,
            unload_error: self.unload_error,
            loaded: AtomicBool::new(false),
            state: Mutex::new(MockState {
                outcomes: self.outcomes,
                ..MockState::default()
            }),
        })
    }
}

#[async_trait]
impl ModelHandle for MockModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    async fn load(&self) -> ModelResult<()> {
        self.state.lock().expect("mock state poisoned").load_calls += 1;
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn unload(&self) -> ModelResult<()> {
        self.state.lock().expect("mock state poisoned").unload_calls += 1;
        match &self.unload_error {
            Some(message) => Err(ModelError::backend(message.clone())),
            None => {
                self.loaded.store(false, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> ModelResult<ModelResponse> {
        let outcome = {
            let mut state = self.state.lock().expect("mock state poisoned");
            state.prompts.push(prompt.to_string());
            state.options.push(options.clone());
            state.outcomes.pop_front()
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match outcome.unwrap_or_else(|| Ok(self.default_response.clone())) {
            Ok(content) => Ok(ModelResponse::new(self.id(), content)
                .with_confidence(self.confidence)
                .with_processing_time(self.delay.map_or(0.0, |d| d.as_secs_f64()))),
            Err(message) => Err(ModelError::backend(message)),
        }
    }

    async fn embed(&self, text: &str) -> ModelResult<Vec<f32>> {
        self.state.lock().expect("mock state poisoned").embed_calls += 1;
        Ok(vec![text.len() as f32, 1.0])
    }

    fn info(&self) -> HashMap<String, Value> {
        HashMap::from([
            ("name".to_string(), Value::from(self.name.clone())),
            ("version".to_string(), Value::from(self.version.clone())),
            ("mock".to_string(), Value::from(true)),
        ])
    }

    async fn is_available(&self) -> bool {
        true
    }
}
