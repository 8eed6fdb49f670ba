//! Stages that write recognized and generated utterances into the context.
//!
//! Each aggregator owns writes for one role. The user side commits a turn
//! when the user's end-of-turn marker arrives and then asks the generation
//! stage for a reply; the assistant side commits only when the assistant's
//! end-of-turn marker arrives, so a reply cut short by cancellation never
//! reaches the log.

use crate::context::{ConversationContext, Message};
use crate::error::ProviderError;
use crate::pipeline::frames::{ControlMarker, Frame, Speaker};
use crate::pipeline::stage::{Emitter, Stage};
use async_trait::async_trait;
use tracing::{debug, info};

/// Collects final transcripts into one user message per turn.
pub struct UserContextAggregator {
    context: ConversationContext,
    pending: Vec<String>,
}

impl UserContextAggregator {
    pub fn new(context: ConversationContext) -> Self {
        Self {
            context,
            pending: Vec::new(),
        }
    }
}

#[async_trait]
impl Stage for UserContextAggregator {
    fn name(&self) -> &str {
        "user_aggregator"
    }

    async fn process(&mut self, frame: Frame, out: &mut Emitter) -> Result<(), ProviderError> {
        match frame {
            Frame::Transcription(t) => {
                if t.is_final && !t.text.trim().is_empty() {
                    self.pending.push(t.text.trim().to_owned());
                }
                Ok(())
            }
            Frame::Control(ControlMarker::EndOfTurn(Speaker::User)) => {
                out.push(frame).await?;
                if self.pending.is_empty() {
                    debug!("user turn ended without a transcript");
                    return Ok(());
                }
                let text = std::mem::take(&mut self.pending).join(" ");
                info!("user: {text}");
                self.context.append(Message::user(text));
                out.push(Frame::ContextSnapshot(self.context.snapshot())).await
            }
            Frame::Control(ControlMarker::Cancel) => {
                self.pending.clear();
                out.push(frame).await
            }
            other => out.push(other).await,
        }
    }
}

/// Collects generated text into one assistant message per completed reply.
pub struct AssistantContextAggregator {
    context: ConversationContext,
    reply: Option<String>,
}

impl AssistantContextAggregator {
    pub fn new(context: ConversationContext) -> Self {
        Self {
            context,
            reply: None,
        }
    }
}

#[async_trait]
impl Stage for AssistantContextAggregator {
    fn name(&self) -> &str {
        "assistant_aggregator"
    }

    async fn process(&mut self, frame: Frame, out: &mut Emitter) -> Result<(), ProviderError> {
        match &frame {
            Frame::Control(ControlMarker::StartOfTurn(Speaker::Assistant)) => {
                self.reply = Some(String::new());
            }
            Frame::Text(t) => {
                if let Some(reply) = self.reply.as_mut() {
                    reply.push_str(&t.text);
                }
            }
            Frame::Control(ControlMarker::EndOfTurn(Speaker::Assistant)) => {
                if let Some(reply) = self.reply.take() {
                    let reply = reply.trim();
                    if reply.is_empty() {
                        debug!("assistant turn ended without text");
                    } else {
                        info!("assistant: {reply}");
                        self.context.append(Message::assistant(reply));
                    }
                }
            }
            Frame::Control(ControlMarker::Cancel) => {
                if self.reply.take().is_some() {
                    debug!("discarding interrupted assistant reply");
                }
            }
            _ => {}
        }
        out.push(frame).await
    }
}
