//! A generator that replays queued replies. Used by tests and dry runs.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use parley_types::{ParleyError, Result};

use crate::{Generation, GenerationRequest, Generator};

enum Scripted {
    Reply(Generation),
    Fail(String),
    Hang,
}

/// Replays replies in FIFO order and records every request it receives.
///
/// When the queue is empty the generator fails, so a test that expects no
/// model call can assert on [`ScriptedGenerator::calls`].
#[derive(Default)]
pub struct ScriptedGenerator {
    queue: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply.
    pub fn reply(self, generation: Generation) -> Self {
        self.push(Scripted::Reply(generation));
        self
    }

    /// Queue a failure with the given message.
    pub fn fail(self, message: impl Into<String>) -> Self {
        self.push(Scripted::Fail(message.into()));
        self
    }

    /// Queue a call that never completes unless cancelled.
    pub fn hang(self) -> Self {
        self.push(Scripted::Hang);
        self
    }

    /// Number of `generate` calls observed so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Requests observed so far, oldest first.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn push(&self, item: Scripted) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(item);
        }
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<Generation> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let next = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            Some(Scripted::Reply(generation)) => Ok(generation),
            Some(Scripted::Fail(message)) => Err(ParleyError::Generation {
                generator: self.name().to_string(),
                message,
            }),
            Some(Scripted::Hang) => {
                cancel.cancelled().await;
                Err(ParleyError::Cancelled)
            }
            None => Err(ParleyError::Generation {
                generator: self.name().to_string(),
                message: "no scripted reply left".into(),
            }),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_in_order_then_fails() {
        let generator = ScriptedGenerator::new()
            .reply(Generation::text("first"))
            .fail("rate limited");
        let cancel = CancellationToken::new();
        let req = GenerationRequest::default();

        assert_eq!(generator.generate(&req, &cancel).await.unwrap().message, "first");
        let err = generator.generate(&req, &cancel).await.unwrap_err();
        assert!(err.to_string().contains("rate limited"));
        assert!(generator.generate(&req, &cancel).await.is_err());
        assert_eq!(generator.calls(), 3);
    }

    #[tokio::test]
    async fn hang_resolves_on_cancel() {
        let generator = ScriptedGenerator::new().hang();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move { trigger.cancel() });

        let err = generator
            .generate(&GenerationRequest::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::Cancelled));
    }
}
