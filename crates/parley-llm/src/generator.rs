use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use parley_types::Result;

use crate::{Generation, GenerationRequest};

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// The external language-model call. Invoked at most once per turn.
///
/// Implementations own retries and timeouts; the engine never retries.
/// `cancel` is the caller's signal; implementations may watch it, but the
/// executor also races the call against it.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<Generation>;

    fn name(&self) -> &str;
}

/// Lets a caller keep a handle on a generator it hands to the executor.
#[async_trait]
impl<T: Generator + ?Sized> Generator for std::sync::Arc<T> {
    async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<Generation> {
        (**self).generate(request, cancel).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

// ---------------------------------------------------------------------------
// DynGenerator
// ---------------------------------------------------------------------------

pub struct DynGenerator(Box<dyn Generator>);

impl DynGenerator {
    pub fn new(generator: impl Generator + 'static) -> Self {
        Self(Box::new(generator))
    }

    pub async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<Generation> {
        self.0.generate(request, cancel).await
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }
}

impl std::fmt::Debug for DynGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DynGenerator").field(&self.name()).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::ParleyError;

    struct EchoGenerator;

    #[async_trait]
    impl Generator for EchoGenerator {
        async fn generate(
            &self,
            request: &GenerationRequest,
            cancel: &CancellationToken,
        ) -> Result<Generation> {
            if cancel.is_cancelled() {
                return Err(ParleyError::Cancelled);
            }
            Ok(Generation::text(request.system_prompt.clone()))
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    #[tokio::test]
    async fn dyn_generator_delegates() {
        let generator = DynGenerator::new(EchoGenerator);
        assert_eq!(generator.name(), "echo");

        let request = GenerationRequest {
            system_prompt: "collect the name".into(),
            ..Default::default()
        };
        let reply = generator
            .generate(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply.message, "collect the name");
    }

    #[tokio::test]
    async fn dyn_generator_surfaces_cancellation() {
        let generator = DynGenerator::new(EchoGenerator);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = generator
            .generate(&GenerationRequest::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::Cancelled));
    }
}
