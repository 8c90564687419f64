//! Language-model collaborators over an OpenAI-compatible chat API.
//!
//! [`LlmEvaluator`] searches arXiv and asks the model to judge each paper;
//! [`LlmSynthesizer`] asks it to answer the research question from the
//! bounded corpus.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use paperscout_search::ArxivClient;
use paperscout_shared::{Document, LlmConfig, PaperScoutError, Result};

use crate::collaborators::{SearchEvaluator, Synthesizer};
use crate::extractor::{self, EvaluationOutput};

/// Path appended to the configured base URL.
const CHAT_COMPLETIONS_PATH: &str = "chat/completions";

/// Model calls can be slow; allow generously.
const CHAT_TIMEOUT_SECS: u64 = 120;

/// Abstracts longer than this are cut before prompting.
const MAX_ABSTRACT_CHARS: usize = 4_000;

const EVALUATION_SYSTEM_PROMPT: &str = "\
You are a research analyst screening papers for a research question. \
Reply with one JSON object and nothing else, with these keys: \
\"id\" (the paper id you were given), \
\"relevance_score\" (integer 0-10, 10 = highly relevant), \
\"is_relevant\" (true if the paper should be included in the final report), \
\"summary\" (a concise summary focused on what the paper says about the question).";

const SYNTHESIS_SYSTEM_PROMPT: &str = "\
You are a research analyst writing a report that answers a research question. \
Use only the paper summaries provided, cite papers by their id, and note \
disagreements between them. If no summaries are provided, say plainly that \
no relevant evidence was found and suggest how the question could be refined.";

// ---------------------------------------------------------------------------
// Chat client
// ---------------------------------------------------------------------------

/// Connection settings for the chat API.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub temperature: f32,
}

impl ChatOptions {
    pub fn from_config(config: &LlmConfig, api_key: impl Into<String>) -> Self {
        Self {
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            api_key: api_key.into(),
            temperature: config.temperature,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Minimal chat-completions client.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: Client,
    endpoint: String,
    options: ChatOptions,
}

impl ChatClient {
    pub fn new(options: ChatOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("PaperScout/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(CHAT_TIMEOUT_SECS))
            .build()
            .map_err(|e| PaperScoutError::Network(format!("failed to build HTTP client: {e}")))?;
        let endpoint = format!(
            "{}/{CHAT_COMPLETIONS_PATH}",
            options.base_url.trim_end_matches('/')
        );
        Ok(Self {
            client,
            endpoint,
            options,
        })
    }

    pub fn model(&self) -> &str {
        &self.options.model
    }

    /// Send one system + user exchange and return the reply text.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.options.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.options.temperature,
        };

        debug!(model = %self.options.model, prompt_chars = user.len(), "sending chat request");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.options.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| PaperScoutError::Network(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PaperScoutError::Network(format!(
                "{}: HTTP {status}: {}",
                self.endpoint,
                body.trim()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| PaperScoutError::parse(format!("invalid chat completion payload: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| PaperScoutError::parse("chat completion has no message content"))
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// arXiv search followed by one model judgement per paper.
#[derive(Debug, Clone)]
pub struct LlmEvaluator {
    search: ArxivClient,
    chat: ChatClient,
}

impl LlmEvaluator {
    pub fn new(search: ArxivClient, chat: ChatClient) -> Self {
        Self { search, chat }
    }

    /// Ask the model about one paper.
    ///
    /// On a usable reply the validated record is attached to
    /// `doc.evaluation` and the raw output is returned for extraction.
    /// `Err` means the request itself failed; an empty or unparseable
    /// reply is logged and yields `Ok(None)`.
    pub async fn judge(
        &self,
        topic: &str,
        doc: &mut Document,
    ) -> Result<Option<EvaluationOutput>> {
        let reply = self
            .chat
            .complete(EVALUATION_SYSTEM_PROMPT, &evaluation_prompt(topic, doc))
            .await?;

        match EvaluationOutput::from_text(&reply) {
            Ok(Some(output)) => {
                let output = with_document_id(output, &doc.id);
                doc.evaluation = extractor::extract(Some(&output)).into_iter().next();
                Ok(Some(output))
            }
            Ok(None) => {
                debug!(id = %doc.id, "empty evaluation reply");
                Ok(None)
            }
            Err(e) => {
                warn!(id = %doc.id, error = %e, "unusable evaluation reply, skipping paper");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl SearchEvaluator for LlmEvaluator {
    #[instrument(skip_all, fields(topic = %topic, model = %self.chat.model()))]
    async fn evaluate(&self, topic: &str) -> Result<Vec<EvaluationOutput>> {
        let mut documents = self
            .search
            .search(topic)
            .await
            .map_err(|e| PaperScoutError::Collaborator(format!("paper search failed: {e}")))?;

        let total = documents.len();
        let mut outputs = Vec::with_capacity(total);
        let mut failed = 0usize;

        for (i, doc) in documents.iter_mut().enumerate() {
            match self.judge(topic, doc).await {
                Ok(Some(output)) => {
                    debug!(
                        id = %doc.id,
                        score = doc.evaluation.as_ref().map(|r| r.relevance_score),
                        current = i + 1,
                        total,
                        "paper evaluated"
                    );
                    outputs.push(output);
                }
                Ok(None) => {}
                Err(e) => {
                    failed += 1;
                    warn!(id = %doc.id, error = %e, "evaluation request failed, skipping paper");
                }
            }
        }

        if !documents.is_empty() && failed == documents.len() {
            return Err(PaperScoutError::Collaborator(format!(
                "all {failed} evaluation requests failed"
            )));
        }

        info!(
            documents = documents.len(),
            outputs = outputs.len(),
            failed,
            "evaluation complete"
        );
        Ok(outputs)
    }
}

fn evaluation_prompt(topic: &str, doc: &Document) -> String {
    let abstract_text: String = doc.content.chars().take(MAX_ABSTRACT_CHARS).collect();
    format!(
        "Research question: {topic}\n\n\
         Paper id: {}\nTitle: {}\nURL: {}\n\nAbstract:\n{abstract_text}",
        doc.id, doc.title, doc.url
    )
}

/// Models often leave out the id they were given; fill it in.
fn with_document_id(output: EvaluationOutput, id: &str) -> EvaluationOutput {
    match output {
        EvaluationOutput::UntypedMapping(mut map) => {
            let blank = match map.get("id") {
                Some(Value::String(s)) => s.trim().is_empty(),
                Some(Value::Null) | None => true,
                Some(_) => false,
            };
            if blank {
                map.insert("id".into(), Value::String(id.to_string()));
            }
            EvaluationOutput::UntypedMapping(map)
        }
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Synthesizer
// ---------------------------------------------------------------------------

/// Answers the research question from the bounded corpus.
#[derive(Debug, Clone)]
pub struct LlmSynthesizer {
    chat: ChatClient,
}

impl LlmSynthesizer {
    pub fn new(chat: ChatClient) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl Synthesizer for LlmSynthesizer {
    #[instrument(skip_all, fields(topic = %topic, corpus_chars = corpus.chars().count()))]
    async fn synthesize(&self, topic: &str, corpus: &str) -> Result<String> {
        let answer = self
            .chat
            .complete(SYNTHESIS_SYSTEM_PROMPT, &synthesis_prompt(topic, corpus))
            .await
            .map_err(|e| PaperScoutError::Collaborator(format!("synthesis request failed: {e}")))?;

        let answer = answer.trim();
        if answer.is_empty() {
            return Err(PaperScoutError::Collaborator(
                "synthesizer returned an empty answer".into(),
            ));
        }
        Ok(answer.to_string())
    }
}

fn synthesis_prompt(topic: &str, corpus: &str) -> String {
    let corpus = if corpus.trim().is_empty() {
        "(no relevant papers were found)"
    } else {
        corpus
    };
    format!("Research question: {topic}\n\nRelevant papers:\n{corpus}")
}
