//! Azure Speech text-to-speech REST client.
//!
//! The request body is SSML naming the configured neural voice; the
//! response body is the raw audio in the format requested through
//! `X-Microsoft-OutputFormat`.

use super::SpeechSynthesis;
use crate::error::SynthesisError;
use async_trait::async_trait;

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const OUTPUT_FORMAT_HEADER: &str = "X-Microsoft-OutputFormat";
const SSML_CONTENT_TYPE: &str = "application/ssml+xml";
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct AzureSpeechClient {
    client: reqwest::Client,
    key: String,
    endpoint: String,
    voice: String,
    output_format: String,
}

impl AzureSpeechClient {
    pub fn new(
        key: impl Into<String>,
        region: &str,
        voice: impl Into<String>,
        output_format: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            key: key.into(),
            endpoint: region_endpoint(region),
            voice: voice.into(),
            output_format: output_format.into(),
        }
    }

    /// Send requests to `endpoint` instead of the region-derived URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    #[cfg(test)]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }
}

#[async_trait]
impl SpeechSynthesis for AzureSpeechClient {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .header(SUBSCRIPTION_KEY_HEADER, &self.key)
            .header(reqwest::header::CONTENT_TYPE, SSML_CONTENT_TYPE)
            .header(OUTPUT_FORMAT_HEADER, &self.output_format)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .body(ssml(&self.voice, text))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let details = resp.text().await.unwrap_or_default();
            return Err(SynthesisError::Canceled {
                status: status.as_u16(),
                details,
            });
        }

        let audio = resp.bytes().await?;
        if audio.is_empty() {
            return Err(SynthesisError::EmptyAudio);
        }
        Ok(audio.to_vec())
    }
}

fn region_endpoint(region: &str) -> String {
    format!("https://{}.tts.speech.microsoft.com/cognitiveservices/v1", region.trim())
}

/// SSML document speaking `text` with `voice`.
///
/// The document language is taken from the voice name ("en-US-AvaNeural" → "en-US").
pub fn ssml(voice: &str, text: &str) -> String {
    let lang = voice.splitn(3, '-').take(2).collect::<Vec<_>>().join("-");
    format!(
        "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' xml:lang='{}'>\
<voice name='{}'>{}</voice></speak>",
        escape_xml(&lang),
        escape_xml(voice),
        escape_xml(text)
    )
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}
