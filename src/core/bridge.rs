//! Upstream bridge: one realtime API connection per session.
//!
//! The bridge translates client input into realtime client events and turns
//! upstream frames into history updates and relay events. Every upstream
//! text frame is relayed verbatim, in arrival order, before the relay events
//! it caused.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tokio::select;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::agent::{AgentCatalog, AgentDefinition, ToolRegistry};
use crate::core::realtime::{
    BaseRealtime, ContentPart, RealtimeConfig, RealtimeError, RealtimeFactoryFn, ServerEvent,
    UpstreamFrame,
};
use crate::core::session::history::Upsert;
use crate::core::session::{
    CLOSE_UPSTREAM_GONE, ConversationHistory, HistoryItem, RelayEvent, Session,
    pcm16_from_samples,
};
use crate::errors::{RelayError, RelayResult};

/// Derive history changes and relay events from one upstream event.
///
/// Pure with respect to everything but `history`; runs under the session's
/// fan-out lock.
pub fn apply_server_event(history: &mut ConversationHistory, event: &ServerEvent) -> Vec<RelayEvent> {
    match event {
        ServerEvent::ConversationItemCreated { item, .. } | ServerEvent::OutputItemDone { item, .. } => {
            let Some(item) = HistoryItem::from_conversation_item(item) else {
                return Vec::new();
            };
            let mut events = Vec::with_capacity(2);
            if history.upsert(item.clone()) == Upsert::Added {
                events.push(RelayEvent::HistoryAdded { item });
            }
            events.push(RelayEvent::HistoryUpdated {
                history: history.snapshot(),
            });
            events
        }
        ServerEvent::TranscriptionCompleted {
            item_id,
            content_index,
            transcript,
        }
        | ServerEvent::AudioTranscriptDone {
            item_id,
            content_index,
            transcript,
        } => {
            if history.set_transcript(item_id, *content_index, transcript) {
                vec![RelayEvent::HistoryUpdated {
                    history: history.snapshot(),
                }]
            } else {
                Vec::new()
            }
        }
        ServerEvent::TextDone {
            item_id,
            content_index,
            text,
        } => {
            if history.set_text(item_id, *content_index, text) {
                vec![RelayEvent::HistoryUpdated {
                    history: history.snapshot(),
                }]
            } else {
                Vec::new()
            }
        }
        ServerEvent::ConversationItemDeleted { item_id } => {
            if history.remove(item_id) {
                vec![RelayEvent::HistoryUpdated {
                    history: history.snapshot(),
                }]
            } else {
                Vec::new()
            }
        }
        ServerEvent::AudioDone { .. } => vec![RelayEvent::AudioEnd],
        ServerEvent::SpeechStarted { .. } => vec![RelayEvent::AudioInterrupted],
        ServerEvent::Error { .. }
        | ServerEvent::ResponseCreated { .. }
        | ServerEvent::ResponseDone { .. }
        | ServerEvent::OutputItemAdded { .. }
        | ServerEvent::FunctionCallArgumentsDone { .. }
        | ServerEvent::Passthrough => Vec::new(),
    }
}

/// `agent_start` / `agent_end` for the agent whose turn a response belongs to.
pub fn agent_turn_event(event: &ServerEvent, agent: &str) -> Option<RelayEvent> {
    match event {
        ServerEvent::ResponseCreated { .. } => Some(RelayEvent::AgentStart {
            agent: agent.to_string(),
        }),
        ServerEvent::ResponseDone { .. } => Some(RelayEvent::AgentEnd {
            agent: agent.to_string(),
        }),
        _ => None,
    }
}

pub struct UpstreamBridge {
    session: Arc<Session>,
    provider: Arc<dyn BaseRealtime>,
    agents: Arc<AgentCatalog>,
    tools: Arc<ToolRegistry>,
    base_config: RealtimeConfig,
    active_agent: Mutex<String>,
    /// call_id -> function name, from `response.output_item.added`
    pending_calls: Mutex<HashMap<String, String>>,
}

impl UpstreamBridge {
    /// Dial the upstream API for `session` and start relaying its frames.
    ///
    /// The provider is attached to the session before connecting, so a
    /// failed connect is still cleaned up by the session teardown.
    pub async fn open(
        session: Arc<Session>,
        factory: &RealtimeFactoryFn,
        base_config: RealtimeConfig,
        agents: Arc<AgentCatalog>,
        tools: Arc<ToolRegistry>,
    ) -> RelayResult<Arc<Self>> {
        let agent = agents.starting().ok_or_else(|| {
            RealtimeError::InvalidConfiguration(format!(
                "starting agent {} is not defined",
                agents.starting_agent
            ))
        })?;
        let config = agents.realtime_config(&base_config, agent, &tools);
        let active_agent = agent.name.clone();

        let provider: Arc<dyn BaseRealtime> = Arc::from(factory(config)?);
        session.attach_upstream(provider.clone())?;

        let frames = provider.connect().await?;
        if !session.mark_active() {
            // torn down while dialing
            return Err(RelayError::NotFound(session.id().to_string()));
        }
        info!(
            session_id = %session.id(),
            agent = %active_agent,
            provider = %provider.get_provider_info(),
            "Upstream connected"
        );

        let bridge = Arc::new(Self {
            session,
            provider,
            agents,
            tools,
            base_config,
            active_agent: Mutex::new(active_agent),
            pending_calls: Mutex::new(HashMap::new()),
        });
        tokio::spawn(bridge.clone().run_upstream(frames));
        Ok(bridge)
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn active_agent(&self) -> String {
        self.active_agent.lock().clone()
    }

    // -------------------------------------------------------------------------
    // Client -> upstream
    // -------------------------------------------------------------------------

    /// One `input_audio_buffer.append` per audio message.
    pub async fn send_audio(&self, samples: &[i16]) -> RelayResult<()> {
        self.provider
            .send_audio(pcm16_from_samples(samples))
            .await
            .map_err(Into::into)
    }

    pub async fn send_text(&self, text: &str) -> RelayResult<()> {
        if text.is_empty() {
            return Err(RelayError::EmptyText);
        }
        self.provider
            .send_user_message(vec![ContentPart::input_text(text)])
            .await?;
        self.session
            .send_to_client(RelayEvent::info("text_enqueued"))
            .await;
        Ok(())
    }

    /// Send an image (plus prompt) as a single user item, then request a
    /// response.
    pub async fn send_image(
        &self,
        upload_id: Option<&str>,
        data_url: &str,
        prompt: &str,
    ) -> RelayResult<()> {
        if data_url.is_empty() {
            return Err(RelayError::MissingDataUrl);
        }
        info!(
            session_id = %self.session.id(),
            "Forwarding image to realtime API (len={})",
            data_url.len()
        );

        let mut content = vec![ContentPart::input_image(data_url)];
        if !prompt.is_empty() {
            content.push(ContentPart::input_text(prompt));
        }
        self.provider.send_user_message(content).await?;
        self.session
            .send_to_client(RelayEvent::image_enqueued(upload_id, data_url.len()))
            .await;
        Ok(())
    }

    pub async fn interrupt(&self) -> RelayResult<()> {
        self.provider.cancel_response().await.map_err(Into::into)
    }

    pub async fn commit_audio(&self) -> RelayResult<()> {
        self.provider.commit_audio_buffer().await.map_err(Into::into)
    }

    // -------------------------------------------------------------------------
    // Upstream -> client / viewers
    // -------------------------------------------------------------------------

    async fn run_upstream(self: Arc<Self>, mut frames: mpsc::Receiver<UpstreamFrame>) {
        let cancel = self.session.cancel_token();
        loop {
            select! {
                _ = cancel.cancelled() => {
                    debug!(session_id = %self.session.id(), "Upstream relay cancelled");
                    break;
                }
                frame = frames.recv() => match frame {
                    Some(frame) => self.handle_frame(frame).await,
                    None => {
                        self.on_upstream_closed().await;
                        break;
                    }
                }
            }
        }
    }

    async fn on_upstream_closed(&self) {
        let err = RelayError::UpstreamDisconnect("realtime connection closed".to_string());
        if self.session.is_closing() {
            return;
        }
        warn!(session_id = %self.session.id(), "{}", err);
        self.session
            .broadcast(vec![RelayEvent::error(err.client_message())])
            .await;
        self.session
            .close_client(CLOSE_UPSTREAM_GONE, "upstream closed")
            .await;
        self.session.cancel_token().cancel();
    }

    async fn handle_frame(self: &Arc<Self>, frame: UpstreamFrame) {
        let UpstreamFrame { raw, event } = frame;

        if let ServerEvent::Error { error } = &event {
            warn!(
                session_id = %self.session.id(),
                "Realtime API error: {} ({})",
                error.message,
                error.error_type
            );
        }

        let agent = self.active_agent();
        self.session
            .publish(Some(raw), |history| {
                let mut events = apply_server_event(history, &event);
                events.extend(agent_turn_event(&event, &agent));
                events
            })
            .await;

        match event {
            ServerEvent::OutputItemAdded { item, .. } if item.item_type == "function_call" => {
                if let (Some(call_id), Some(name)) = (item.call_id, item.name) {
                    debug!(session_id = %self.session.id(), call_id = %call_id, "Function call pending: {}", name);
                    self.pending_calls.lock().insert(call_id, name);
                }
            }
            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
                ..
            } => {
                let pending = self.pending_calls.lock().remove(&call_id);
                let Some(name) = name.or(pending) else {
                    warn!(session_id = %self.session.id(), call_id = %call_id, "Function call without a name");
                    return;
                };
                // a slow tool must not stall the relay
                tokio::spawn(self.clone().run_tool(call_id, name, arguments));
            }
            _ => {}
        }
    }

    async fn run_tool(self: Arc<Self>, call_id: String, name: String, arguments: String) {
        let from = self.active_agent();
        let result = match self.agents.handoff_target(&from, &name).cloned() {
            Some(target) => self.handoff(&call_id, from, target).await,
            None => self.call_function(&call_id, name, &arguments).await,
        };
        if let Err(e) = result {
            warn!(session_id = %self.session.id(), call_id = %call_id, "Tool call failed: {}", e);
        }
    }

    async fn call_function(&self, call_id: &str, name: String, arguments: &str) -> RelayResult<()> {
        info!(session_id = %self.session.id(), tool = %name, "Running tool");
        self.session
            .broadcast(vec![RelayEvent::ToolStart { tool: name.clone() }])
            .await;

        let output = match self.tools.invoke(&name, arguments).await {
            Ok(output) => output,
            Err(e) => {
                warn!(session_id = %self.session.id(), tool = %name, "{}", e);
                format!("Error: {e}")
            }
        };

        self.session
            .publish(None, |history| {
                let mut events = vec![RelayEvent::ToolEnd {
                    tool: name,
                    output: output.clone(),
                }];
                if history.set_tool_output(call_id, &output) {
                    events.push(RelayEvent::HistoryUpdated {
                        history: history.snapshot(),
                    });
                }
                events
            })
            .await;

        self.provider.submit_function_result(call_id, &output).await?;
        self.provider.create_response().await?;
        Ok(())
    }

    async fn handoff(&self, call_id: &str, from: String, target: AgentDefinition) -> RelayResult<()> {
        info!(
            session_id = %self.session.id(),
            "Handoff from {} to {}",
            from,
            target.name
        );
        *self.active_agent.lock() = target.name.clone();

        let to = target.name.clone();
        self.session
            .publish(None, |history| {
                let item = HistoryItem::Handoff {
                    item_id: format!("handoff_{}", Uuid::new_v4().simple()),
                    from: from.clone(),
                    to: to.clone(),
                };
                history.upsert(item.clone());
                vec![
                    RelayEvent::Handoff { from, to },
                    RelayEvent::HistoryAdded { item },
                    RelayEvent::HistoryUpdated {
                        history: history.snapshot(),
                    },
                ]
            })
            .await;

        let config = self
            .agents
            .realtime_config(&self.base_config, &target, &self.tools);
        self.provider.update_session(&config).await?;

        let output = json!({ "assistant": target.name }).to_string();
        self.provider.submit_function_result(call_id, &output).await?;
        self.provider.create_response().await?;
        Ok(())
    }
}
