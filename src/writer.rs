//! Writer and central orchestration.
//!
//! Every operation runs the same sequence: gate the request, render the prompt,
//! resolve the provider, call it under a deadline, post-process. Failures before
//! the provider answers fail the request; failures after it degrade.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::WriterSettings;
use crate::error::WriterError;
use crate::models::{
    Audience, AuthUser, ChatMessage, ChatRole, GenerationMetadata, GenerationResult, NewPost, OptimizationType,
    ResearchDepth, TokenUsage, Tone, WriterConfig,
};
use crate::postprocess::{self, ContentIdea, ResearchBrief};
use crate::prompt::{self, Catalog, OptimizePromptInput};
use crate::providers::manager::ProviderStatus;
use crate::providers::{ExecuteRequest, ExecuteResponse, ProviderManager, Task, elapsed_ms, with_deadline};
use crate::security::{self, RequestBody};
use crate::store::ContentStore;

const META_DESCRIPTION_PREFIX: &str = "Meta-Beschreibung:";

// Requests

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateArticleRequest {
    #[serde(flatten)]
    pub config: WriterConfig,
    #[serde(default)]
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub configs: Vec<WriterConfig>,
    #[serde(default)]
    pub provider: Option<String>,
    /// Pause between items; clamped to the configured maximum.
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeRequest {
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
    pub optimization_type: OptimizationType,
    #[serde(default)]
    pub target_keywords: Vec<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub tone: Option<Tone>,
    #[serde(default)]
    pub target_length: Option<u32>,
    #[serde(default)]
    pub provider: Option<String>,
}

fn default_language() -> String {
    "de".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdeasRequest {
    pub category: String,
    #[serde(default = "default_idea_count")]
    pub count: u32,
    #[serde(default)]
    pub audience: Option<Audience>,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub provider: Option<String>,
}

fn default_idea_count() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchRequest {
    pub topic: String,
    #[serde(default)]
    pub depth: ResearchDepth,
    #[serde(default)]
    pub audience: Option<Audience>,
    #[serde(default)]
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareRequest {
    pub prompt: String,
    pub providers: Vec<String>,
    #[serde(default)]
    pub consensus: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub message: String,
}

// Responses

/// Failure of one item or one provider slot.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Failure {
    pub code: &'static str,
    pub message: String,
}

impl From<&WriterError> for Failure {
    fn from(e: &WriterError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleResponse {
    pub success: bool,
    pub content: GenerationResult,
    /// Set only when auto-publish stored the post.
    pub post_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistence_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub index: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<GenerationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

impl Summary {
    fn count<T>(items: &[T], success: impl Fn(&T) -> bool) -> Self {
        let successful = items.iter().filter(|i| success(i)).count();
        Self {
            total: items.len(),
            successful,
            failed: items.len() - successful,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResponse {
    pub success: bool,
    pub results: Vec<BatchItem>,
    pub summary: Summary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeResponse {
    pub success: bool,
    pub optimization_type: OptimizationType,
    pub title: String,
    pub content: String,
    pub content_html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_description: Option<String>,
    pub word_count: usize,
    pub provider: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdeasResponse {
    pub success: bool,
    pub ideas: Vec<ContentIdea>,
    /// True when the model output was not a JSON array and ideas were split from lines.
    pub fallback: bool,
    pub provider: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchResponse {
    pub success: bool,
    pub research: ResearchBrief,
    pub fallback: bool,
    pub provider: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResult {
    pub provider: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Consensus {
    pub provider: String,
    pub content: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompareResponse {
    pub success: bool,
    pub results: Vec<ProviderResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consensus: Option<Consensus>,
    pub summary: Summary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Limits {
    pub min_length: u32,
    pub max_length: u32,
    pub max_batch_size: usize,
    pub max_user_context_chars: usize,
    pub max_content_chars: usize,
    pub max_compare_providers: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriterStatus {
    pub default_provider: String,
    pub providers: BTreeMap<String, ProviderStatus>,
    pub limits: Limits,
}

pub struct Writer {
    manager: Arc<ProviderManager>,
    store: Arc<dyn ContentStore>,
    settings: WriterSettings,
}

impl Writer {
    pub fn new(manager: Arc<ProviderManager>, store: Arc<dyn ContentStore>, settings: WriterSettings) -> Self {
        Self {
            manager,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &WriterSettings {
        &self.settings
    }

    fn provider_or_default<'a>(&'a self, provider: &'a Option<String>) -> &'a str {
        provider
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(self.settings.default_provider.as_str())
    }

    fn gate(&self, body: RequestBody<'_>, user: &AuthUser) -> Result<(), WriterError> {
        security::check(body, user, &self.settings).map_err(|rejection| {
            warn!(user = %user.name, reason = %rejection, "request rejected");
            WriterError::Rejected(rejection)
        })
    }

    /// Resolve, quota-check, call under the deadline and account usage.
    ///
    /// Failed calls count as a request with zero tokens. Nothing is retried.
    async fn call_provider(
        &self,
        provider: &str,
        task: Task,
        prompt: String,
        user: &AuthUser,
    ) -> Result<ExecuteResponse, WriterError> {
        let adapter = self.manager.get_provider(provider)?;

        if let Some(limit) = self.manager.daily_token_limit(provider) {
            match self.store.usage_today(provider, &user.name).await {
                Ok(used) if used >= limit => {
                    warn!(provider = %provider, user = %user.name, used, limit, "daily token limit reached");
                    return Err(WriterError::QuotaExceeded(provider.to_string()));
                }
                Ok(_) => {}
                Err(e) => warn!(provider = %provider, error = %e, "usage lookup failed, allowing call"),
            }
        }

        let request = ExecuteRequest {
            task,
            prompt,
            user_id: user.name.clone(),
            metadata: json!({ "task": task.as_str() }),
        };

        let started = Instant::now();
        let outcome = with_deadline(self.settings.request_timeout(), adapter.execute(request)).await;
        let latency_ms = elapsed_ms(started);

        let tokens = outcome.as_ref().map_or(0, |r| r.usage.total_tokens);
        self.manager.record_call(provider, latency_ms, tokens);
        if let Err(e) = self.store.record_usage(provider, &user.name, tokens).await {
            warn!(provider = %provider, error = %e, "failed to record usage");
        }

        match outcome {
            Ok(response) => {
                info!(
                    provider = %provider,
                    task = task.as_str(),
                    latency_ms,
                    tokens,
                    "provider call succeeded"
                );
                Ok(response)
            }
            Err(e) => {
                warn!(
                    provider = %provider,
                    task = task.as_str(),
                    latency_ms,
                    error = %e,
                    "provider call failed"
                );
                Err(WriterError::Provider {
                    provider: provider.to_string(),
                    source: e,
                })
            }
        }
    }

    pub async fn generate_article(
        &self,
        request: GenerateArticleRequest,
        user: &AuthUser,
    ) -> Result<ArticleResponse, WriterError> {
        self.gate(RequestBody::Article(&request.config), user)?;
        let provider = self.provider_or_default(&request.provider).to_string();
        self.run_article(&request.config, &provider, user).await
    }

    /// Everything after the gate, shared by single and batch generation.
    async fn run_article(
        &self,
        config: &WriterConfig,
        provider: &str,
        user: &AuthUser,
    ) -> Result<ArticleResponse, WriterError> {
        let prompt = prompt::build_writer_prompt(config);
        let response = self.call_provider(provider, Task::Article, prompt.clone(), user).await?;
        let result = self.process_generated_content(config, &prompt, &response, user).await;

        let mut post_id = None;
        let mut persistence_error = None;
        if config.options.auto_publish {
            let post = NewPost {
                title: result.title.clone(),
                slug: result.slug.clone(),
                excerpt: result.excerpt.clone(),
                content_markdown: result.content.clone(),
                content_html: result.content_html.clone(),
                category: result.category.clone(),
                tags: result.suggested_tags.clone(),
                author: user.name.clone(),
                provider: response.metadata.provider.clone(),
            };
            match self.store.create_post(&post).await {
                Ok(id) => {
                    info!(post_id = %id, slug = %post.slug, "article published");
                    post_id = Some(id);
                }
                Err(e) => {
                    error!(error = %e, title = %post.title, "failed to persist generated article");
                    persistence_error = Some(format!("article generated but not saved: {e}"));
                }
            }
        }

        Ok(ArticleResponse {
            success: true,
            content: result,
            post_id,
            persistence_error,
        })
    }

    /// Turn raw model output into a [`GenerationResult`].
    ///
    /// Never fails: a broken tag sub-call falls back to the category's tag table.
    pub async fn process_generated_content(
        &self,
        config: &WriterConfig,
        prompt: &str,
        response: &ExecuteResponse,
        user: &AuthUser,
    ) -> GenerationResult {
        let fallback_title = config
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}: Neuer Artikel", config.category));

        let parsed = postprocess::parse_article(&response.content, &fallback_title);
        let content_html = postprocess::markdown_to_html(&parsed.body);
        let excerpt = postprocess::excerpt(&parsed.body);
        let word_count = postprocess::word_count(&parsed.body);

        let mut tags_fallback = false;
        let suggested_tags = if !config.options.generate_tags {
            Vec::new()
        } else if !parsed.frontmatter_tags.is_empty() {
            parsed.frontmatter_tags.clone()
        } else {
            let tag_prompt = prompt::build_tag_prompt(&parsed.title, &excerpt, &config.category);
            let tags = match self
                .call_provider(&response.metadata.provider, Task::Tags, tag_prompt, user)
                .await
            {
                Ok(tag_response) => postprocess::parse_tag_list(&tag_response.content),
                Err(e) => {
                    warn!(error = %e, "tag generation failed");
                    None
                }
            };
            tags.unwrap_or_else(|| {
                warn!(category = %config.category, "using fallback tags");
                tags_fallback = true;
                postprocess::fallback_tags(&config.category, &parsed.title)
            })
        };

        GenerationResult {
            raw_content: response.content.clone(),
            slug: postprocess::slug_from_title(&parsed.title),
            title: parsed.title,
            content: parsed.body,
            content_html,
            excerpt,
            word_count,
            reading_time_minutes: postprocess::reading_time_minutes(word_count),
            category: config.category.clone(),
            suggested_tags,
            suggested_categories: postprocess::suggested_categories(&config.category),
            metadata: GenerationMetadata {
                generated_at: Utc::now(),
                provider: response.metadata.provider.clone(),
                model: response.metadata.model.clone(),
                usage: response.usage,
                latency_ms: response.metadata.latency_ms,
                prompt_hash: prompt_hash(prompt),
                tags_fallback,
                config: config.clone(),
            },
        }
    }

    /// Generate articles one after another. Item failures never abort the batch.
    pub async fn batch_generate(&self, request: BatchRequest, user: &AuthUser) -> Result<BatchResponse, WriterError> {
        self.gate(RequestBody::Batch(&request.configs), user)?;
        let provider = self.provider_or_default(&request.provider).to_string();
        let delay = request
            .delay_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.settings.batch_delay())
            .min(self.settings.max_batch_delay());

        info!(items = request.configs.len(), provider = %provider, delay_ms = delay.as_millis() as u64, "batch started");

        let mut results = Vec::with_capacity(request.configs.len());
        for (index, config) in request.configs.iter().enumerate() {
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let item = match self.run_article(config, &provider, user).await {
                Ok(article) => BatchItem {
                    index,
                    success: true,
                    post_id: article.post_id,
                    content: Some(article.content),
                    error: None,
                },
                Err(e) => {
                    warn!(index, error = %e, "batch item failed");
                    BatchItem {
                        index,
                        success: false,
                        content: None,
                        post_id: None,
                        error: Some(Failure::from(&e)),
                    }
                }
            };
            results.push(item);
        }

        let summary = Summary::count(&results, |i| i.success);
        info!(successful = summary.successful, failed = summary.failed, "batch finished");
        Ok(BatchResponse {
            success: true,
            results,
            summary,
        })
    }

    pub async fn optimize_content(
        &self,
        request: OptimizeRequest,
        user: &AuthUser,
    ) -> Result<OptimizeResponse, WriterError> {
        self.gate(
            RequestBody::Optimize {
                title: request.title.as_deref(),
                content: &request.content,
                target_keywords: &request.target_keywords,
                target_length: request.target_length,
            },
            user,
        )?;

        let content = if postprocess::looks_like_html(&request.content) {
            postprocess::html_to_text(&request.content)
        } else {
            request.content.clone()
        };
        let original = postprocess::parse_article(&content, request.title.as_deref().unwrap_or("Ohne Titel"));
        let title = request.title.clone().unwrap_or_else(|| original.title.clone());

        let prompt = prompt::build_optimize_prompt(OptimizePromptInput {
            optimization: request.optimization_type,
            title: &title,
            content: &original.body,
            target_keywords: &request.target_keywords,
            language: &request.language,
            tone: request.tone,
            target_length: request.target_length,
        });

        let provider = self.provider_or_default(&request.provider).to_string();
        let response = self.call_provider(&provider, Task::Optimize, prompt, user).await?;

        let parsed = postprocess::parse_article(&response.content, &title);
        let (body, meta_description) = split_meta_description(&parsed.body);
        let word_count = postprocess::word_count(&body);

        Ok(OptimizeResponse {
            success: true,
            optimization_type: request.optimization_type,
            title: parsed.title,
            content_html: postprocess::markdown_to_html(&body),
            content: body,
            meta_description,
            word_count,
            provider,
            usage: response.usage,
        })
    }

    pub async fn content_ideas(&self, request: IdeasRequest, user: &AuthUser) -> Result<IdeasResponse, WriterError> {
        self.gate(
            RequestBody::Ideas {
                category: &request.category,
                count: request.count,
                context: &request.context,
            },
            user,
        )?;

        let prompt = prompt::build_ideas_prompt(&request.category, request.count, request.audience, &request.context);
        let provider = self.provider_or_default(&request.provider).to_string();
        let response = self.call_provider(&provider, Task::Ideas, prompt, user).await?;

        let (ideas, fallback) = postprocess::parse_ideas(&response.content, request.count as usize);
        if fallback {
            warn!(provider = %provider, "idea list was not JSON, split by lines");
        }
        Ok(IdeasResponse {
            success: true,
            ideas,
            fallback,
            provider,
        })
    }

    pub async fn topic_research(
        &self,
        request: ResearchRequest,
        user: &AuthUser,
    ) -> Result<ResearchResponse, WriterError> {
        self.gate(RequestBody::Research { topic: &request.topic }, user)?;

        let prompt = prompt::build_research_prompt(&request.topic, request.depth, request.audience);
        let provider = self.provider_or_default(&request.provider).to_string();
        let response = self.call_provider(&provider, Task::Research, prompt, user).await?;

        let (research, fallback) = postprocess::parse_research(&response.content);
        if fallback {
            warn!(provider = %provider, "research brief was not JSON, returning raw summary");
        }
        Ok(ResearchResponse {
            success: true,
            research,
            fallback,
            provider,
        })
    }

    /// Send one prompt to several providers at once.
    ///
    /// Results keep request order. `success` is true when at least one provider answered.
    pub async fn compare(&self, request: CompareRequest, user: &AuthUser) -> Result<CompareResponse, WriterError> {
        self.gate(
            RequestBody::Compare {
                prompt: &request.prompt,
                providers: &request.providers,
            },
            user,
        )?;

        let calls = request.providers.iter().map(|name| {
            let prompt = request.prompt.clone();
            async move {
                let started = Instant::now();
                let outcome = self.call_provider(name, Task::Compare, prompt, user).await;
                (name.clone(), outcome, elapsed_ms(started))
            }
        });

        let results: Vec<ProviderResult> = futures::future::join_all(calls)
            .await
            .into_iter()
            .map(|(provider, outcome, latency_ms)| match outcome {
                Ok(response) => ProviderResult {
                    provider,
                    success: true,
                    content: Some(response.content),
                    model: Some(response.metadata.model),
                    usage: Some(response.usage),
                    latency_ms,
                    error: None,
                },
                Err(e) => ProviderResult {
                    provider,
                    success: false,
                    content: None,
                    model: None,
                    usage: None,
                    latency_ms,
                    error: Some(Failure::from(&e)),
                },
            })
            .collect();

        let summary = Summary::count(&results, |r| r.success);
        info!(
            providers = summary.total,
            successful = summary.successful,
            "compare finished"
        );

        let consensus = if request.consensus && consensus_allowed(&summary) {
            self.consensus(&request.prompt, &results, user).await
        } else {
            None
        };

        Ok(CompareResponse {
            success: summary.successful > 0,
            results,
            consensus,
            summary,
        })
    }

    async fn consensus(&self, prompt: &str, results: &[ProviderResult], user: &AuthUser) -> Option<Consensus> {
        let answers: Vec<(&str, &str)> = results
            .iter()
            .filter_map(|r| Some((r.provider.as_str(), r.content.as_deref()?)))
            .collect();

        let provider = self
            .settings
            .consensus_provider
            .clone()
            .or_else(|| answers.first().map(|(p, _)| p.to_string()))?;

        let consensus_prompt = prompt::build_consensus_prompt(prompt, &answers);
        match self
            .call_provider(&provider, Task::Consensus, consensus_prompt, user)
            .await
        {
            Ok(response) => Some(Consensus {
                provider,
                content: response.content,
                usage: response.usage,
            }),
            Err(e) => {
                warn!(provider = %provider, error = %e, "consensus pass failed, omitting");
                None
            }
        }
    }

    pub async fn chat(&self, request: ChatRequest, user: &AuthUser) -> Result<ChatMessage, WriterError> {
        self.gate(
            RequestBody::Chat {
                message: &request.message,
                history: &request.messages,
            },
            user,
        )?;

        let prompt = prompt::build_chat_prompt(&request.messages, &request.message);
        let provider = self.provider_or_default(&request.provider).to_string();
        let response = self.call_provider(&provider, Task::Chat, prompt, user).await?;

        Ok(ChatMessage {
            id: Uuid::new_v4().to_string(),
            role: ChatRole::Assistant,
            content: response.content.trim().to_string(),
            provider: Some(provider),
            timestamp: Utc::now(),
            metadata: Some(json!({
                "model": response.metadata.model,
                "usage": response.usage,
                "latencyMs": response.metadata.latency_ms,
            })),
        })
    }

    pub fn status(&self, user: &AuthUser) -> Result<WriterStatus, WriterError> {
        self.gate(RequestBody::Read, user)?;
        Ok(WriterStatus {
            default_provider: self.settings.default_provider.clone(),
            providers: self.manager.providers_status(),
            limits: Limits {
                min_length: security::MIN_LENGTH,
                max_length: security::MAX_LENGTH,
                max_batch_size: self.settings.max_batch_size,
                max_user_context_chars: self.settings.max_user_context_chars,
                max_content_chars: self.settings.max_content_chars,
                max_compare_providers: self.settings.max_compare_providers,
            },
        })
    }

    pub fn templates(&self, user: &AuthUser) -> Result<Catalog, WriterError> {
        self.gate(RequestBody::Read, user)?;
        Ok(prompt::catalog())
    }
}

/// At least two answers, and answers are a strict majority of the providers asked.
fn consensus_allowed(summary: &Summary) -> bool {
    summary.successful >= 2 && summary.successful * 2 > summary.total
}

fn prompt_hash(prompt: &str) -> String {
    format!("{:x}", Sha256::digest(prompt.as_bytes()))
}

/// Remove a trailing `Meta-Beschreibung:` line and return it separately.
fn split_meta_description(body: &str) -> (String, Option<String>) {
    let mut meta = None;
    let kept: Vec<&str> = body
        .lines()
        .filter(|line| {
            if meta.is_none()
                && let Some(rest) = line.trim().strip_prefix(META_DESCRIPTION_PREFIX)
            {
                meta = Some(rest.trim().to_string());
                return false;
            }
            true
        })
        .collect();
    (kept.join("\n").trim().to_string(), meta.filter(|m| !m.is_empty()))
}
