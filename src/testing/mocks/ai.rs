//! Mock AI invoker for testing

use crate::abstractions::{AiInvocationResult, AiInvoker, InvokeOptions};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Handler = Arc<dyn Fn(&str) -> Result<String, String> + Send + Sync>;

/// Scripted [`AiInvoker`]
///
/// Responses are chosen in this order: a handler closure, a response whose
/// trigger substring appears in the prompt, then the default response.
/// Every prompt and its options are recorded.
pub struct MockAiInvoker {
    handler: Option<Handler>,
    keyed: Vec<(String, Result<String, String>)>,
    default_response: Result<String, String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    options: Mutex<Vec<InvokeOptions>>,
}

impl Default for MockAiInvoker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAiInvoker {
    pub fn new() -> Self {
        Self {
            handler: None,
            keyed: Vec::new(),
            default_response: Ok("Mock response".to_string()),
            delay: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            options: Mutex::new(Vec::new()),
        }
    }

    pub fn with_default_response(mut self, response: &str) -> Self {
        self.default_response = Ok(response.to_string());
        self
    }

    /// Every call fails with `error` unless a keyed response matches
    pub fn with_failure(mut self, error: &str) -> Self {
        self.default_response = Err(error.to_string());
        self
    }

    /// Respond with `response` when the prompt contains `trigger`
    pub fn with_response(mut self, trigger: &str, response: &str) -> Self {
        self.keyed
            .push((trigger.to_string(), Ok(response.to_string())));
        self
    }

    /// Fail with `error` when the prompt contains `trigger`
    pub fn with_error(mut self, trigger: &str, error: &str) -> Self {
        self.keyed.push((trigger.to_string(), Err(error.to_string())));
        self
    }

    pub fn with_handler(
        mut self,
        handler: impl Fn(&str) -> Result<String, String> + Send + Sync + 'static,
    ) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Sleep before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed running at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn recorded_options(&self) -> Vec<InvokeOptions> {
        self.options.lock().unwrap().clone()
    }

    fn respond(&self, prompt: &str) -> Result<String, String> {
        if let Some(handler) = &self.handler {
            return handler(prompt);
        }
        self.keyed
            .iter()
            .find(|(trigger, _)| prompt.contains(trigger.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| self.default_response.clone())
    }
}

#[async_trait]
impl AiInvoker for MockAiInvoker {
    async fn invoke(&self, prompt: &str, options: &InvokeOptions) -> AiInvocationResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.options.lock().unwrap().push(options.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let response = self.respond(prompt);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match response {
            Ok(text) => AiInvocationResult::ok(text),
            Err(error) => AiInvocationResult::failed(error),
        }
    }
}
