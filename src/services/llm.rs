//! Response generation stage.

use crate::error::ProviderError;
use crate::pipeline::frames::{Frame, Speaker};
use crate::pipeline::metrics::Usage;
use crate::pipeline::stage::{Emitter, Stage};
use crate::services::LanguageModel;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Turns each context snapshot into one streamed assistant reply.
///
/// A reply is framed by the assistant's start-of-turn and end-of-turn
/// markers. If the provider fails part way, a cancel marker is emitted in
/// place of the end-of-turn marker so the partial reply is never committed.
pub struct LlmStage {
    provider: Arc<dyn LanguageModel>,
}

impl LlmStage {
    pub fn new(provider: Arc<dyn LanguageModel>) -> Self {
        Self { provider }
    }

    async fn respond(
        &self,
        snapshot: &crate::context::ContextSnapshot,
        out: &mut Emitter,
    ) -> Result<(), ProviderError> {
        match snapshot.last_user() {
            Some(m) => info!("generating reply to: {}", m.content),
            None => info!("generating opening greeting"),
        }
        let gen_start = Instant::now();

        out.push(Frame::start_of_turn(Speaker::Assistant)).await?;
        let mut tokens = match self.provider.generate(snapshot).await {
            Ok(tokens) => tokens,
            Err(e) => {
                out.push(Frame::cancel()).await?;
                return Err(e);
            }
        };

        let mut token_count: u64 = 0;
        while let Some(token) = tokens.next().await {
            match token {
                Ok(text) if text.is_empty() => {}
                Ok(text) => {
                    token_count += 1;
                    out.record_usage(Usage::LlmTokens(1));
                    out.push(Frame::text(text)).await?;
                }
                Err(e) => {
                    out.push(Frame::cancel()).await?;
                    return Err(e);
                }
            }
        }

        out.push(Frame::end_of_turn(Speaker::Assistant)).await?;
        debug!(
            "{} produced {token_count} tokens in {:.2}s",
            self.provider.name(),
            gen_start.elapsed().as_secs_f64()
        );
        Ok(())
    }
}

#[async_trait]
impl Stage for LlmStage {
    fn name(&self) -> &str {
        "llm"
    }

    async fn process(&mut self, frame: Frame, out: &mut Emitter) -> Result<(), ProviderError> {
        match frame {
            Frame::ContextSnapshot(snapshot) => self.respond(&snapshot, out).await,
            other => out.push(other).await,
        }
    }
}
