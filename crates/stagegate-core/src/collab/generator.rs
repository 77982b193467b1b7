//! Text generation seam.

use std::sync::Mutex;

use async_trait::async_trait;

/// Number of prompt characters echoed back by [`DeterministicGenerator`].
const ECHO_PREFIX_CHARS: usize = 200;

/// Produces text from a prompt. Content is opaque to the pipeline.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Offline generator that echoes a prompt prefix, or a fixed response.
///
/// Records every prompt it receives so tests can assert on what agents asked for.
#[derive(Debug, Default)]
pub struct DeterministicGenerator {
    fixed: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl DeterministicGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer with `response`, regardless of the prompt.
    pub fn with_fixed_response(response: impl Into<String>) -> Self {
        Self {
            fixed: Some(response.into()),
            prompts: Mutex::default(),
        }
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Generator for DeterministicGenerator {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(prompt.to_string());

        if let Some(fixed) = &self.fixed {
            return Ok(fixed.clone());
        }
        let prefix: String = prompt.chars().take(ECHO_PREFIX_CHARS).collect();
        Ok(format!("GENERATED (deterministic): {prefix}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echoes_bounded_prefix() {
        let gen = DeterministicGenerator::new();
        let long = "é".repeat(500);
        let out = gen.generate(&long).await.unwrap();
        assert!(out.starts_with("GENERATED (deterministic): "));
        assert_eq!(out.chars().filter(|c| *c == 'é').count(), ECHO_PREFIX_CHARS);
        assert_eq!(gen.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_fixed_response() {
        let gen = DeterministicGenerator::with_fixed_response("int main(void) { return 0; }");
        assert_eq!(
            gen.generate("anything").await.unwrap(),
            "int main(void) { return 0; }"
        );
        assert_eq!(gen.prompts(), vec!["anything".to_string()]);
    }
}
