use futures::StreamExt;
use serde_json::{Value, json};
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};

use crate::decoder::{EventDecoder, StreamEvent};
use crate::provider::{
    AssistantReply, BoxFuture, BuildHttpClientSnafu, CompletionParseSnafu, EmptyMessageSetSnafu,
    LlmProvider, MissingApiTokenSnafu, ProviderConfig, ProviderError, ProviderResult,
    ProviderStreamHandle, StreamEventMapped, StreamEventPayload, StreamRequest, StreamTarget,
    TransportSnafu, UpstreamStatusSnafu, make_event_stream,
};
use crate::wire::{TokenUsage, WireCompletion};

pub const HTTP_PROVIDER_ID: &str = "anthropic-proxy";

/// Credential header the upstream expects on every request.
pub const API_TOKEN_HEADER: &str = "X-Anthropic-API-Token";

/// Upstream default reasoning budget, applied when the caller sets none.
pub const DEFAULT_THINKING_BUDGET_TOKENS: u64 = 16_000;

/// Provider adapter speaking the proxy's `"data: " + <json>` line protocol
/// directly over reqwest.
pub struct HttpProviderAdapter {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl HttpProviderAdapter {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        ensure!(
            !config.api_token.trim().is_empty(),
            MissingApiTokenSnafu {
                stage: "http-adapter-new",
                provider_id: config.provider_id.clone(),
            }
        );

        let client = reqwest::Client::builder()
            .build()
            .context(BuildHttpClientSnafu {
                stage: "build-client",
            })?;

        Ok(Self { config, client })
    }

    fn build_payload(request: &StreamRequest, stream: bool) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|message| {
                json!({
                    "role": message.role.as_wire_str(),
                    "content": message.content,
                })
            })
            .collect();

        let mut payload = json!({
            "stream": stream,
            "system": request.preamble.clone().unwrap_or_default(),
            "messages": messages,
            "model": request.model_id,
            "thinking": {
                "type": "enabled",
                "budget_tokens": request
                    .thinking_budget_tokens
                    .unwrap_or(DEFAULT_THINKING_BUDGET_TOKENS),
            },
        });
        if let Some(max_tokens) = request.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }

        payload
    }

    async fn open_response(
        client: &reqwest::Client,
        config: &ProviderConfig,
        request: &StreamRequest,
        stream: bool,
    ) -> ProviderResult<reqwest::Response> {
        let payload = Self::build_payload(request, stream);
        let response = client
            .post(&config.endpoint)
            .header(API_TOKEN_HEADER, config.api_token.as_str())
            .json(&payload)
            .send()
            .await
            .context(TransportSnafu {
                stage: "send-chat-request",
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return UpstreamStatusSnafu {
                stage: "chat-http-status",
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        Ok(response)
    }

    fn emit(
        event_tx: &mpsc::UnboundedSender<StreamEventMapped>,
        target: StreamTarget,
        payload: StreamEventPayload,
    ) -> bool {
        event_tx.send(StreamEventMapped { target, payload }).is_ok()
    }

    async fn run_stream_worker(
        client: reqwest::Client,
        config: ProviderConfig,
        request: StreamRequest,
        event_tx: mpsc::UnboundedSender<StreamEventMapped>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let target = request.target;

        let response = match Self::open_response(&client, &config, &request, true).await {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(
                    target = ?target,
                    provider_id = %config.provider_id,
                    model_id = %request.model_id,
                    error = %error,
                    "failed to open provider stream"
                );
                Self::emit(
                    &event_tx,
                    target,
                    StreamEventPayload::TransportFailed(error.to_string()),
                );
                return;
            }
        };

        let mut decoder = EventDecoder::new();
        let mut body = response.bytes_stream();
        let mut cancelled = false;
        let mut saw_terminal = false;

        'read: loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    cancelled = true;
                    // Dropping the body aborts the in-flight HTTP exchange.
                    tracing::debug!(target = ?target, "provider stream cancelled");
                    break;
                }
                next_chunk = body.next() => {
                    match next_chunk {
                        Some(Ok(bytes)) => {
                            for event in decoder.push_chunk(&bytes) {
                                let terminal = matches!(
                                    event,
                                    StreamEvent::Stop | StreamEvent::Error { .. }
                                );
                                if !Self::emit(
                                    &event_tx,
                                    target,
                                    StreamEventPayload::Decoded(event),
                                ) {
                                    return;
                                }
                                if terminal {
                                    saw_terminal = true;
                                    break 'read;
                                }
                            }
                        }
                        Some(Err(source)) => {
                            tracing::warn!(
                                target = ?target,
                                error = %source,
                                "provider stream read failed"
                            );
                            let error = ProviderError::Transport {
                                stage: "read-stream-chunk",
                                source,
                            };
                            Self::emit(
                                &event_tx,
                                target,
                                StreamEventPayload::TransportFailed(error.to_string()),
                            );
                            saw_terminal = true;
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        if !cancelled && !saw_terminal {
            // The body ran dry without a completion marker; the partial
            // message is the controller's to keep, but the turn failed.
            Self::emit(
                &event_tx,
                target,
                StreamEventPayload::TransportFailed(
                    "stream ended before a completion marker".to_string(),
                ),
            );
        }
    }

    async fn complete_inner(&self, request: StreamRequest) -> ProviderResult<AssistantReply> {
        let response =
            Self::open_response(&self.client, &self.config, &request, false).await?;
        let body = response.text().await.context(TransportSnafu {
            stage: "read-completion-body",
        })?;

        let completion: WireCompletion =
            serde_json::from_str(&body).context(CompletionParseSnafu {
                stage: "parse-completion-body",
            })?;

        let mut reply = AssistantReply::default();
        for block in completion.content {
            if block.is_thinking() {
                reply
                    .thinking
                    .get_or_insert_with(String::new)
                    .push_str(&block.thinking.unwrap_or_default());
            } else {
                reply.content.push_str(&block.text);
            }
        }
        reply.usage = completion
            .combined_usage
            .as_ref()
            .map(TokenUsage::from_wire);

        Ok(reply)
    }
}

impl LlmProvider for HttpProviderAdapter {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn name(&self) -> &str {
        "Anthropic proxy"
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        ensure!(
            !request.messages.is_empty(),
            EmptyMessageSetSnafu {
                stage: "stream-chat",
                target: request.target,
            }
        );

        let (event_tx, stream, cancel, cancel_rx) = make_event_stream(request.target);
        let worker = Box::pin(Self::run_stream_worker(
            self.client.clone(),
            self.config.clone(),
            request,
            event_tx,
            cancel_rx,
        ));

        Ok(ProviderStreamHandle {
            stream,
            worker,
            cancel,
        })
    }

    fn complete<'a>(
        &'a self,
        request: StreamRequest,
    ) -> BoxFuture<'a, ProviderResult<AssistantReply>> {
        Box::pin(async move {
            ensure!(
                !request.messages.is_empty(),
                EmptyMessageSetSnafu {
                    stage: "complete",
                    target: request.target,
                }
            );
            self.complete_inner(request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ConversationId, ProviderMessage, Role, StreamSessionId};
    use uuid::Uuid;

    fn request_fixture() -> StreamRequest {
        let target = StreamTarget::new(
            ConversationId::new(Uuid::now_v7()),
            StreamSessionId::new(1),
        );
        StreamRequest::new(
            target,
            "claude-3-7-sonnet-20250219",
            vec![ProviderMessage::new(Role::User, "hello")],
        )
        .with_preamble("be brief")
        .with_max_tokens(512)
    }

    #[test]
    fn payload_carries_stream_flag_and_thinking_budget() {
        let payload = HttpProviderAdapter::build_payload(&request_fixture(), true);

        assert_eq!(payload["stream"], json!(true));
        assert_eq!(payload["system"], json!("be brief"));
        assert_eq!(payload["model"], json!("claude-3-7-sonnet-20250219"));
        assert_eq!(payload["max_tokens"], json!(512));
        assert_eq!(payload["thinking"]["type"], json!("enabled"));
        assert_eq!(
            payload["thinking"]["budget_tokens"],
            json!(DEFAULT_THINKING_BUDGET_TOKENS)
        );
        assert_eq!(payload["messages"][0]["role"], json!("user"));
        assert_eq!(payload["messages"][0]["content"], json!("hello"));
    }

    #[test]
    fn payload_omits_max_tokens_when_unset() {
        let mut request = request_fixture();
        request.max_tokens = None;
        let payload = HttpProviderAdapter::build_payload(&request, false);
        assert_eq!(payload["stream"], json!(false));
        assert!(payload.get("max_tokens").is_none());
    }

    #[test]
    fn adapter_refuses_empty_api_token() {
        let config = ProviderConfig::new(HTTP_PROVIDER_ID, "  ", "http://localhost:1");
        let error = HttpProviderAdapter::new(config).expect_err("must refuse blank token");
        assert!(matches!(error, ProviderError::MissingApiToken { .. }));
    }
}
