//! OpenAI-compatible chat-completion client.

use super::ChatCompletion;
use crate::conversation::Turn;
use crate::error::DialogueError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl ChatCompletion for OpenAiClient {
    async fn complete(&self, turns: &[Turn]) -> Result<String, DialogueError> {
        let request = ChatRequest {
            model: &self.model,
            messages: turns,
        };

        let resp = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DialogueError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: ChatResponse = resp.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(DialogueError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

    /// Serve one canned response on `/v1/chat/completions` and record requests.
    async fn mock_chat_server(status: u16, reply: Value) -> (String, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();

        let server = HttpServer::new(move || {
            let recorder = recorder.clone();
            let reply = reply.clone();
            App::new().route(
                "/v1/chat/completions",
                web::post().to(move |req: HttpRequest, body: web::Json<Value>| {
                    let recorder = recorder.clone();
                    let reply = reply.clone();
                    async move {
                        let auth = req
                            .headers()
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        recorder.lock().unwrap().push((auth, body.into_inner()));
                        HttpResponse::build(StatusCode::from_u16(status).unwrap()).json(reply)
                    }
                }),
            )
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();

        let addr = server.addrs()[0];
        actix_web::rt::spawn(server.run());
        (format!("http://{}/v1", addr), seen)
    }

    fn turns() -> Vec<Turn> {
        vec![Turn::system("Be brief."), Turn::user("hello")]
    }

    #[actix_web::test]
    async fn test_parses_first_choice_and_sends_history() {
        let (base, seen) = mock_chat_server(
            200,
            json!({
                "id": "chatcmpl-1",
                "object": "chat.completion",
                "choices": [
                    {"index": 0, "message": {"role": "assistant", "content": "Hey there."}, "finish_reason": "stop"}
                ]
            }),
        )
        .await;

        let client = OpenAiClient::new(base, "sk-test", "gpt-4o-mini");
        let reply = client.complete(&turns()).await.unwrap();
        assert_eq!(reply, "Hey there.");

        let seen = seen.lock().unwrap();
        let (auth, body) = &seen[0];
        assert_eq!(auth.as_deref(), Some("Bearer sk-test"));
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0], json!({"role": "system", "content": "Be brief."}));
        assert_eq!(body["messages"][1], json!({"role": "user", "content": "hello"}));
    }

    #[actix_web::test]
    async fn test_non_success_status_is_error() {
        let (base, _) = mock_chat_server(429, json!({"error": {"message": "rate limited"}})).await;

        let err = OpenAiClient::new(base, "sk-test", "gpt-4o-mini")
            .complete(&turns())
            .await
            .unwrap_err();
        match err {
            DialogueError::Status { status, body } => {
                assert_eq!(status, 429);
                assert!(body.contains("rate limited"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[actix_web::test]
    async fn test_empty_choices_is_error() {
        let (base, _) = mock_chat_server(200, json!({"choices": []})).await;

        let err = OpenAiClient::new(base, "sk-test", "gpt-4o-mini")
            .complete(&turns())
            .await
            .unwrap_err();
        assert!(matches!(err, DialogueError::EmptyResponse));
    }

    #[actix_web::test]
    async fn test_malformed_body_is_transport_error() {
        let (base, _) = mock_chat_server(200, json!("not an object")).await;

        let err = OpenAiClient::new(base, "sk-test", "gpt-4o-mini")
            .complete(&turns())
            .await
            .unwrap_err();
        assert!(matches!(err, DialogueError::Transport(_)));
    }

    #[actix_web::test]
    async fn test_unreachable_service_is_transport_error() {
        let err = OpenAiClient::new("http://127.0.0.1:9/v1", "sk-test", "gpt-4o-mini")
            .complete(&turns())
            .await
            .unwrap_err();
        assert!(matches!(err, DialogueError::Transport(_)));
    }

    #[test]
    fn test_completions_url_handles_trailing_slash() {
        let client = OpenAiClient::new("https://api.openai.com/v1/", "k", "m");
        assert_eq!(client.completions_url(), "https://api.openai.com/v1/chat/completions");
    }
}
