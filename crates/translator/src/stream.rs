use crate::response::map_stop_reason;
use llm_relay_core::middleware::StreamSummary;
use llm_relay_core::types::claude::{
    ClaudeContent, ClaudeContentDelta, ClaudeMessageDelta, ClaudeMessagesResponse,
    ClaudeStreamEvent, ClaudeUsage,
};
use llm_relay_core::types::openai::{ChatCompletionChunk, ChunkToolCall};
use serde_json::json;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text(u32),
    /// Keyed by the OpenAI tool_call index, not the Anthropic block index.
    Tool(u32),
}

#[derive(Default)]
struct ToolBlock {
    claude_index: u32,
    id: Option<String>,
    name: Option<String>,
    /// Argument fragments that arrived before the block could open.
    pending_args: String,
    started: bool,
}

/// Stateful OpenAI-SSE → Anthropic-event translator for one stream.
///
/// Frames are ingested in upstream order; emitted events satisfy the
/// Anthropic ordering contract: `content_block_start(i)` precedes every
/// delta and the stop for `i`, indices are non-decreasing, and the
/// terminal `message_delta` / `message_stop` pair is emitted at most once.
pub struct StreamMachine {
    message_id: String,
    model: String,
    started: bool,
    finished: bool,
    next_index: u32,
    open_block: Option<OpenBlock>,
    tools: HashMap<u32, ToolBlock>,
    stop_reason: Option<&'static str>,
    usage: ClaudeUsage,
    tool_call_order: Vec<String>,
    signatures: HashMap<String, String>,
}

impl StreamMachine {
    pub fn new(model: &str) -> Self {
        Self {
            message_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            model: model.to_string(),
            started: false,
            finished: false,
            next_index: 0,
            open_block: None,
            tools: HashMap::new(),
            stop_reason: None,
            usage: ClaudeUsage::default(),
            tool_call_order: Vec::new(),
            signatures: HashMap::new(),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Ingest one SSE data payload and return the Anthropic events it
    /// produces. Unparseable payloads are dropped with a debug log.
    pub fn ingest(&mut self, data: &str) -> Vec<ClaudeStreamEvent> {
        if self.finished {
            return Vec::new();
        }
        if data == "[DONE]" {
            return self.terminal_events();
        }

        let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!(error = %e, "dropping unparseable upstream frame");
                return Vec::new();
            }
        };

        let mut events = Vec::new();
        if !self.started {
            self.started = true;
            events.push(self.message_start());
        }

        if let Some(usage) = &chunk.usage {
            self.usage = ClaudeUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            };
        }

        let Some(choice) = chunk.choices.first() else {
            return events;
        };

        if let Some(text) = &choice.delta.content {
            self.emit_text_delta(text, &mut events);
        }

        if let Some(tool_calls) = &choice.delta.tool_calls {
            for tc in tool_calls {
                self.emit_tool_delta(tc, &mut events);
            }
        }

        if let Some(finish_reason) = &choice.finish_reason {
            self.stop_reason = Some(map_stop_reason(finish_reason));
            self.close_open_block(&mut events);
        }

        events
    }

    /// Close out the stream if the upstream ended without a `[DONE]`.
    pub fn finish(&mut self) -> Vec<ClaudeStreamEvent> {
        self.terminal_events()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Accumulated view for middleware completion hooks.
    pub fn summary(&self) -> StreamSummary {
        StreamSummary {
            message_id: Some(self.message_id.clone()),
            stop_reason: self.stop_reason.map(|s| s.to_string()),
            usage: self.usage.clone(),
            tool_call_ids: self.tool_call_order.clone(),
            tool_signatures: self.signatures.clone(),
            cancelled: false,
        }
    }

    fn message_start(&self) -> ClaudeStreamEvent {
        ClaudeStreamEvent::MessageStart {
            message: ClaudeMessagesResponse {
                id: self.message_id.clone(),
                response_type: "message".into(),
                role: "assistant".into(),
                model: self.model.clone(),
                content: Vec::new(),
                stop_reason: None,
                stop_sequence: None,
                usage: ClaudeUsage::default(),
            },
        }
    }

    fn emit_text_delta(&mut self, text: &str, events: &mut Vec<ClaudeStreamEvent>) {
        let index = match self.open_block {
            Some(OpenBlock::Text(index)) => index,
            other => {
                if let Some(OpenBlock::Tool(_)) = other {
                    self.close_open_block(events);
                }
                let index = self.next_index;
                self.next_index += 1;
                self.open_block = Some(OpenBlock::Text(index));
                events.push(ClaudeStreamEvent::ContentBlockStart {
                    index,
                    content_block: ClaudeContent::Text {
                        text: String::new(),
                        extra: json!({}),
                    },
                });
                index
            }
        };
        events.push(ClaudeStreamEvent::ContentBlockDelta {
            index,
            delta: ClaudeContentDelta::TextDelta {
                text: text.to_string(),
            },
        });
    }

    fn emit_tool_delta(&mut self, tc: &ChunkToolCall, events: &mut Vec<ClaudeStreamEvent>) {
        let key = tc.index;

        // A tool delta ends any open text block; a delta for a different
        // tool index ends the previously open tool block.
        match self.open_block {
            Some(OpenBlock::Text(_)) => self.close_open_block(events),
            Some(OpenBlock::Tool(open)) if open != key => self.close_open_block(events),
            _ => {}
        }

        // The block is taken out of the map so the machine's other fields
        // stay freely writable, and reinserted on every exit path.
        let mut block = self.tools.remove(&key).unwrap_or_default();

        if let Some(id) = &tc.id
            && block.id.is_none()
        {
            block.id = Some(id.clone());
            self.tool_call_order.push(id.clone());
        }

        let mut fragment: Option<String> = None;
        if let Some(function) = &tc.function {
            if let Some(name) = &function.name
                && block.name.is_none()
            {
                block.name = Some(name.clone());
            }
            if let Some(arguments) = &function.arguments
                && !arguments.is_empty()
            {
                fragment = Some(arguments.clone());
            }
        }

        if let Some(signature) = tc
            .extra
            .get("extra_content")
            .and_then(|e| e.get("google"))
            .and_then(|g| g.get("thought_signature"))
            .and_then(|s| s.as_str())
            && let Some(id) = &block.id
        {
            self.signatures.insert(id.clone(), signature.to_string());
        }

        if !block.started {
            if let (Some(id), Some(name)) = (block.id.clone(), block.name.clone()) {
                let index = self.next_index;
                self.next_index += 1;
                block.started = true;
                block.claude_index = index;
                self.open_block = Some(OpenBlock::Tool(key));

                events.push(ClaudeStreamEvent::ContentBlockStart {
                    index,
                    content_block: ClaudeContent::ToolUse {
                        id,
                        name,
                        input: json!({}),
                    },
                });

                let buffered = std::mem::take(&mut block.pending_args);
                if !buffered.is_empty() {
                    events.push(ClaudeStreamEvent::ContentBlockDelta {
                        index,
                        delta: ClaudeContentDelta::InputJsonDelta {
                            partial_json: buffered,
                        },
                    });
                }
                if let Some(fragment) = fragment {
                    events.push(ClaudeStreamEvent::ContentBlockDelta {
                        index,
                        delta: ClaudeContentDelta::InputJsonDelta {
                            partial_json: fragment,
                        },
                    });
                }
            } else if let Some(fragment) = fragment {
                // Cannot open the block yet; hold the fragment until the
                // id and name arrive.
                block.pending_args.push_str(&fragment);
            }
        } else {
            self.open_block = Some(OpenBlock::Tool(key));
            if let Some(fragment) = fragment {
                events.push(ClaudeStreamEvent::ContentBlockDelta {
                    index: block.claude_index,
                    delta: ClaudeContentDelta::InputJsonDelta {
                        partial_json: fragment,
                    },
                });
            }
        }

        self.tools.insert(key, block);
    }

    fn close_open_block(&mut self, events: &mut Vec<ClaudeStreamEvent>) {
        if let Some(open) = self.open_block.take() {
            let index = match open {
                OpenBlock::Text(index) => index,
                OpenBlock::Tool(key) => self.tools[&key].claude_index,
            };
            events.push(ClaudeStreamEvent::ContentBlockStop { index });
        }
    }

    fn terminal_events(&mut self) -> Vec<ClaudeStreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events = Vec::new();
        if !self.started {
            self.started = true;
            events.push(self.message_start());
        }
        self.close_open_block(&mut events);
        events.push(ClaudeStreamEvent::MessageDelta {
            delta: ClaudeMessageDelta {
                stop_reason: Some(self.stop_reason.unwrap_or("end_turn").to_string()),
                stop_sequence: None,
            },
            usage: Some(self.usage.clone()),
        });
        events.push(ClaudeStreamEvent::MessageStop);
        events
    }
}
