//! Request gate run before any prompt is built or provider is called.
//!
//! Pure and synchronous: it sees the decoded body and the caller, nothing else.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::config::{BATCH_CEILING, WriterSettings};
use crate::models::{AuthUser, ChatMessage, WriterConfig};
use crate::prompt::find_category;

pub const MIN_LENGTH: u32 = 300;
pub const MAX_LENGTH: u32 = 5000;
pub const MAX_TIME_HORIZON: u32 = 100;
pub const MAX_IDEAS: u32 = 20;
pub const MAX_CHAT_HISTORY: usize = 50;
const MAX_TITLE_CHARS: usize = 300;
const MAX_PROMPT_CHARS: usize = 20_000;
const MAX_KEYWORDS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectCode {
    Forbidden,
    FieldTooLong,
    OutOfRange,
    UnknownCategory,
    EmptyField,
    TooManyItems,
    TooFewItems,
    DuplicateProvider,
}

/// Why a request was refused. Carries the offending field where there is one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub code: RejectCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl Rejection {
    fn new(code: RejectCode, field: &str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    pub fn is_forbidden(&self) -> bool {
        self.code == RejectCode::Forbidden
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{field}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Outcome in the `{valid, reason?}` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The request shapes the gate knows how to check.
#[derive(Debug, Clone, Copy)]
pub enum RequestBody<'a> {
    Article(&'a WriterConfig),
    Batch(&'a [WriterConfig]),
    Optimize {
        title: Option<&'a str>,
        content: &'a str,
        target_keywords: &'a [String],
        target_length: Option<u32>,
    },
    Ideas {
        category: &'a str,
        count: u32,
        context: &'a str,
    },
    Research {
        topic: &'a str,
    },
    Compare {
        prompt: &'a str,
        providers: &'a [String],
    },
    Chat {
        message: &'a str,
        history: &'a [ChatMessage],
    },
    /// Status, templates and queue reads: role check only.
    Read,
}

pub fn validate_request(body: RequestBody<'_>, user: &AuthUser, limits: &WriterSettings) -> Validation {
    match check(body, user, limits) {
        Ok(()) => Validation {
            valid: true,
            reason: None,
        },
        Err(rejection) => Validation {
            valid: false,
            reason: Some(rejection.to_string()),
        },
    }
}

/// Same as [`validate_request`] but keeps the typed rejection.
pub fn check(body: RequestBody<'_>, user: &AuthUser, limits: &WriterSettings) -> Result<(), Rejection> {
    if !user.role.is_staff() {
        return Err(Rejection {
            code: RejectCode::Forbidden,
            message: format!("role {} may not use the AI writer", user.role.as_str()),
            field: None,
        });
    }

    match body {
        RequestBody::Article(config) => check_writer_config(config, limits, "config"),
        RequestBody::Batch(configs) => {
            let max = limits.max_batch_size.min(BATCH_CEILING);
            if configs.is_empty() {
                return Err(Rejection::new(RejectCode::TooFewItems, "configs", "batch is empty"));
            }
            if configs.len() > max {
                return Err(Rejection::new(
                    RejectCode::TooManyItems,
                    "configs",
                    format!("batch holds {} items, at most {max} allowed", configs.len()),
                ));
            }
            for (i, config) in configs.iter().enumerate() {
                check_writer_config(config, limits, &format!("configs[{i}]"))?;
            }
            Ok(())
        }
        RequestBody::Optimize {
            title,
            content,
            target_keywords,
            target_length,
        } => {
            non_empty("content", content)?;
            max_chars("content", content, limits.max_content_chars)?;
            if let Some(title) = title {
                max_chars("title", title, MAX_TITLE_CHARS)?;
            }
            if target_keywords.len() > MAX_KEYWORDS {
                return Err(Rejection::new(
                    RejectCode::TooManyItems,
                    "targetKeywords",
                    format!("at most {MAX_KEYWORDS} keywords allowed"),
                ));
            }
            if let Some(length) = target_length {
                in_range("targetLength", length, MIN_LENGTH, MAX_LENGTH)?;
            }
            Ok(())
        }
        RequestBody::Ideas {
            category,
            count,
            context,
        } => {
            known_category("category", category)?;
            in_range("count", count, 1, MAX_IDEAS)?;
            max_chars("context", context, limits.max_user_context_chars)
        }
        RequestBody::Research { topic } => {
            non_empty("topic", topic)?;
            max_chars("topic", topic, MAX_TITLE_CHARS)
        }
        RequestBody::Compare { prompt, providers } => {
            non_empty("prompt", prompt)?;
            max_chars("prompt", prompt, MAX_PROMPT_CHARS)?;
            if providers.len() < 2 {
                return Err(Rejection::new(
                    RejectCode::TooFewItems,
                    "providers",
                    "compare needs at least two providers",
                ));
            }
            if providers.len() > limits.max_compare_providers {
                return Err(Rejection::new(
                    RejectCode::TooManyItems,
                    "providers",
                    format!("at most {} providers allowed", limits.max_compare_providers),
                ));
            }
            let mut seen = HashSet::new();
            for name in providers {
                if !seen.insert(name.as_str()) {
                    return Err(Rejection::new(
                        RejectCode::DuplicateProvider,
                        "providers",
                        format!("provider '{name}' listed twice"),
                    ));
                }
            }
            Ok(())
        }
        RequestBody::Chat { message, history } => {
            non_empty("message", message)?;
            max_chars("message", message, MAX_PROMPT_CHARS)?;
            if history.len() > MAX_CHAT_HISTORY {
                return Err(Rejection::new(
                    RejectCode::TooManyItems,
                    "messages",
                    format!("at most {MAX_CHAT_HISTORY} history messages allowed"),
                ));
            }
            let history_chars: usize = history.iter().map(|m| m.content.chars().count()).sum();
            if history_chars > limits.max_content_chars {
                return Err(Rejection::new(
                    RejectCode::FieldTooLong,
                    "messages",
                    format!("history exceeds {} characters", limits.max_content_chars),
                ));
            }
            Ok(())
        }
        RequestBody::Read => Ok(()),
    }
}

fn check_writer_config(config: &WriterConfig, limits: &WriterSettings, prefix: &str) -> Result<(), Rejection> {
    known_category(&format!("{prefix}.category"), &config.category)?;
    in_range(&format!("{prefix}.length"), config.length, MIN_LENGTH, MAX_LENGTH)?;
    in_range(&format!("{prefix}.timeHorizon"), config.time_horizon, 0, MAX_TIME_HORIZON)?;
    max_chars(
        &format!("{prefix}.userContext"),
        &config.user_context,
        limits.max_user_context_chars,
    )?;
    if let Some(ref title) = config.title {
        max_chars(&format!("{prefix}.title"), title, MAX_TITLE_CHARS)?;
    }
    Ok(())
}

fn known_category(field: &str, category: &str) -> Result<(), Rejection> {
    match find_category(category) {
        Some(_) => Ok(()),
        None => Err(Rejection::new(
            RejectCode::UnknownCategory,
            field,
            format!("unknown category '{category}'"),
        )),
    }
}

fn in_range(field: &str, value: u32, min: u32, max: u32) -> Result<(), Rejection> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(Rejection::new(
            RejectCode::OutOfRange,
            field,
            format!("{value} is outside {min}..={max}"),
        ))
    }
}

fn max_chars(field: &str, value: &str, max: usize) -> Result<(), Rejection> {
    let len = value.chars().count();
    if len > max {
        return Err(Rejection::new(
            RejectCode::FieldTooLong,
            field,
            format!("{len} characters, at most {max} allowed"),
        ));
    }
    Ok(())
}

fn non_empty(field: &str, value: &str) -> Result<(), Rejection> {
    if value.trim().is_empty() {
        return Err(Rejection::new(RejectCode::EmptyField, field, "must not be empty"));
    }
    Ok(())
}
