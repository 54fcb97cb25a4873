//! Scripted AI backend for unit tests

use super::{AiBackend, AiProviderConfig, BackendFactory};
use crate::error::AiError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Returns queued replies in order, then repeats `fallback`
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<String, AiError>>>,
    fallback: String,
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: fallback.into(),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, reply: Result<String, AiError>) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> Result<String, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

/// Hands out the same backend for every configuration
pub struct FixedFactory(pub Arc<ScriptedBackend>);

impl BackendFactory for FixedFactory {
    fn build(&self, _config: &AiProviderConfig) -> Result<Arc<dyn AiBackend>, AiError> {
        Ok(self.0.clone())
    }
}
