//! Model client abstraction.
//!
//! The executor only depends on [`ModelClient`]; concrete backends live in
//! sibling modules. `generate` performs one blocking turn, `generate_stream`
//! delivers the same turn as incremental [`StreamEvent`]s over a channel.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::types::{ModelMessage, ModelResponse, StreamEvent, ToolSchema};

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Identifier logged alongside failures, e.g. a model name.
    fn model_id(&self) -> &str;

    /// One complete request/response turn.
    async fn generate(
        &self,
        messages: &[ModelMessage],
        tools: &[ToolSchema],
    ) -> Result<ModelResponse>;

    /// Streaming turn. The receiver yields events until a terminal
    /// `Finished` or `Error`; dropping it abandons the turn.
    async fn generate_stream(
        &self,
        messages: &[ModelMessage],
        tools: &[ToolSchema],
        cancel: CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>>;
}

/// Tries the primary client, falling back to a secondary on failure.
pub struct FallbackClient {
    primary: Arc<dyn ModelClient>,
    fallback: Arc<dyn ModelClient>,
}

impl FallbackClient {
    pub fn new(primary: Arc<dyn ModelClient>, fallback: Arc<dyn ModelClient>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl ModelClient for FallbackClient {
    fn model_id(&self) -> &str {
        self.primary.model_id()
    }

    async fn generate(
        &self,
        messages: &[ModelMessage],
        tools: &[ToolSchema],
    ) -> Result<ModelResponse> {
        match self.primary.generate(messages, tools).await {
            Ok(response) => Ok(response),
            Err(err) => {
                warn!(
                    primary = self.primary.model_id(),
                    fallback = self.fallback.model_id(),
                    error = %err,
                    "primary model failed, retrying with fallback"
                );
                self.fallback.generate(messages, tools).await
            }
        }
    }

    async fn generate_stream(
        &self,
        messages: &[ModelMessage],
        tools: &[ToolSchema],
        cancel: CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>> {
        match self
            .primary
            .generate_stream(messages, tools, cancel.clone())
            .await
        {
            Ok(rx) => Ok(rx),
            Err(err) => {
                warn!(
                    primary = self.primary.model_id(),
                    fallback = self.fallback.model_id(),
                    error = %err,
                    "primary model failed to open stream, retrying with fallback"
                );
                self.fallback.generate_stream(messages, tools, cancel).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::mock::MockModelClient;
    use anyhow::bail;

    struct AlwaysFails;

    #[async_trait]
    impl ModelClient for AlwaysFails {
        fn model_id(&self) -> &str {
            "broken"
        }

        async fn generate(
            &self,
            _messages: &[ModelMessage],
            _tools: &[ToolSchema],
        ) -> Result<ModelResponse> {
            bail!("connection refused")
        }

        async fn generate_stream(
            &self,
            _messages: &[ModelMessage],
            _tools: &[ToolSchema],
            _cancel: CancellationToken,
        ) -> Result<mpsc::UnboundedReceiver<StreamEvent>> {
            bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn falls_back_on_primary_failure() {
        let fallback = Arc::new(MockModelClient::with_default_reply("from fallback"));
        let client = FallbackClient::new(Arc::new(AlwaysFails), fallback);

        let response = client
            .generate(&[ModelMessage::user("hi")], &[])
            .await
            .unwrap();
        assert_eq!(response.content, "from fallback");
    }
}
