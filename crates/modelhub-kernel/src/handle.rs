//! Model Handle Trait
//!
//! A [`ModelHandle`] is the capability the orchestration layer consumes for a
//! single backend-served model. Backend crates (an HTTP client for a model
//! server, an in-process engine, a test double) implement it; the registry only
//! calls through it.
//!
//! Handles are shared as `Arc<dyn ModelHandle>` across concurrent tasks, so
//! every method takes `&self` and implementers keep their mutable state
//! (loaded flag, connection pool) behind interior mutability.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::ModelResult;
use crate::types::{GenerationOptions, ModelResponse};

/// Handle to one backend model.
#[async_trait]
pub trait ModelHandle: Send + Sync {
    /// Model name, e.g. `"llama3.1"`.
    fn name(&self) -> &str;

    /// Model version or tag, e.g. `"8b"`.
    fn version(&self) -> &str;

    /// Registry key for this model.
    ///
    /// Defaults to `"name:version"`.
    fn id(&self) -> String {
        format!("{}:{}", self.name(), self.version())
    }

    /// Load the model so that it can serve requests.
    async fn load(&self) -> ModelResult<()>;

    /// Release the model's resources.
    async fn unload(&self) -> ModelResult<()>;

    /// Whether the model is currently loaded.
    fn is_loaded(&self) -> bool;

    /// Generate a response for one prompt.
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> ModelResult<ModelResponse>;

    /// Generate responses for several prompts, one response per prompt in order.
    ///
    /// The default implementation calls [`ModelHandle::generate`] sequentially
    /// and stops at the first failure.
    async fn batch_generate(
        &self,
        prompts: &[String],
        options: &GenerationOptions,
    ) -> ModelResult<Vec<ModelResponse>> {
        let mut responses = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            responses.push(self.generate(prompt, options).await?);
        }
        Ok(responses)
    }

    /// Embedding vector for the input text.
    async fn embed(&self, text: &str) -> ModelResult<Vec<f32>>;

    /// Static information about the model.
    fn info(&self) -> HashMap<String, Value>;

    /// Availability check; never fails, reports `false` instead.
    async fn is_available(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Upper {
        loaded: AtomicBool,
    }

    #[async_trait]
    impl ModelHandle for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn version(&self) -> &str {
            "1"
        }

        async fn load(&self) -> ModelResult<()> {
            self.loaded.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn unload(&self) -> ModelResult<()> {
            self.loaded.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_loaded(&self) -> bool {
            self.loaded.load(Ordering::SeqCst)
        }

        async fn generate(
            &self,
            prompt: &str,
            _options: &GenerationOptions,
        ) -> ModelResult<ModelResponse> {
            if prompt.is_empty() {
                return Err(ModelError::backend("empty prompt"));
            }
            Ok(ModelResponse::new(self.id(), prompt.to_uppercase()))
        }

        async fn embed(&self, text: &str) -> ModelResult<Vec<f32>> {
            Ok(vec![text.len() as f32])
        }

        fn info(&self) -> HashMap<String, Value> {
            HashMap::from([("family".to_string(), Value::from("test"))])
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_default_id() {
        let handle = Upper {
            loaded: AtomicBool::new(false),
        };
        assert_eq!(handle.id(), "upper:1");
    }

    #[tokio::test]
    async fn test_default_batch_generate_preserves_order() {
        let handle = Upper {
            loaded: AtomicBool::new(false),
        };
        let prompts = vec!["a".to_string(), "b".to_string()];
        let responses = handle
            .batch_generate(&prompts, &GenerationOptions::default())
            .await
            .unwrap();
        let contents: Vec<_> = responses.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_default_batch_generate_stops_at_failure() {
        let handle = Upper {
            loaded: AtomicBool::new(false),
        };
        let prompts = vec!["a".to_string(), String::new(), "c".to_string()];
        let err = handle
            .batch_generate(&prompts, &GenerationOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, ModelError::Backend("empty prompt".to_string()));
    }
}
