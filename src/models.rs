use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Caller role as resolved by the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    Editor,
    User,
}

impl Role {
    /// Writer, central and newsletter endpoints are limited to staff roles.
    pub fn is_staff(self) -> bool {
        matches!(self, Role::Admin | Role::Editor)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Editor => "EDITOR",
            Role::User => "USER",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub name: String,
    pub role: Role,
}

/// Implements `as_str` plus a `ALL` table for a closed wire vocabulary.
///
/// Extra attributes pass through, so `#[derive(Default)]` on the enum and
/// `#[default]` on a variant work as usual.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)? }
    ) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        $(#[$meta])*
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $wire)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum!(Tone {
    AnalytischKuehl => "analytisch-kühl",
    VisionaerInspirierend => "visionär-inspirierend",
    KritischHinterfragend => "kritisch-hinterfragend",
    OptimistischZukunftsgewandt => "optimistisch-zukunftsgewandt",
    PhilosophischNachdenklich => "philosophisch-nachdenklich",
    ProvokantZugespitzt => "provokant-zugespitzt",
});

wire_enum!(
    #[derive(Default)]
    Thinker {
        #[default]
        Auto => "Auto",
        Kurzweil => "Kurzweil",
        Harari => "Harari",
        Bostrom => "Bostrom",
        Tegmark => "Tegmark",
        Lanier => "Lanier",
        Zuboff => "Zuboff",
    }
);

wire_enum!(
    #[derive(Default)]
    HookStyle {
        #[default]
        Question => "question",
        Scenario => "scenario",
        Statistic => "statistic",
        Anecdote => "anecdote",
        Provocation => "provocation",
    }
);

wire_enum!(
    #[derive(Default)]
    Style {
        #[default]
        Essay => "essay",
        Reportage => "reportage",
        Analysis => "analysis",
        Interview => "interview",
        Guide => "guide",
    }
);

wire_enum!(
    #[derive(Default)]
    Audience {
        #[default]
        General => "general",
        Experts => "experts",
        DecisionMakers => "decision-makers",
        Students => "students",
        Creatives => "creatives",
    }
);

wire_enum!(
    #[derive(Default)]
    Structure {
        #[default]
        Classic => "classic",
        Listicle => "listicle",
        ProblemSolution => "problem-solution",
        Timeline => "timeline",
        Dialogue => "dialogue",
        Scenarios => "scenarios",
    }
);

wire_enum!(
    #[derive(Default)]
    SourcesPolicy {
        Omit => "none",
        #[default]
        Cited => "cited",
        Inline => "inline",
    }
);

wire_enum!(
    #[derive(Default)]
    FactLevel {
        Speculative => "speculative",
        #[default]
        Balanced => "balanced",
        Strict => "strict",
    }
);

wire_enum!(OptimizationType {
    Seo => "seo",
    Tone => "tone",
    Length => "length",
    Readability => "readability",
});

wire_enum!(
    #[derive(Default)]
    ResearchDepth {
        #[default]
        Overview => "overview",
        Deep => "deep",
    }
);

/// Output switches of a generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputOptions {
    #[serde(default)]
    pub auto_publish: bool,
    #[serde(default)]
    pub seo_optimize: bool,
    #[serde(default)]
    pub generate_tags: bool,
}

/// One generation request. Built from validated input, never mutated afterwards,
/// rendered exactly once by the prompt builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriterConfig {
    pub category: String,
    /// Target length in words.
    pub length: u32,
    pub tone: Tone,
    #[serde(default)]
    pub thinker: Thinker,
    #[serde(default)]
    pub hook: HookStyle,
    /// Years into the future the article should look.
    #[serde(default = "default_time_horizon")]
    pub time_horizon: u32,
    #[serde(default)]
    pub style: Style,
    #[serde(default)]
    pub audience: Audience,
    #[serde(default)]
    pub structure: Structure,
    #[serde(default)]
    pub sources: SourcesPolicy,
    #[serde(default)]
    pub fact_level: FactLevel,
    #[serde(default)]
    pub user_context: String,
    /// Optional working title; used when the generated text carries no heading.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(flatten)]
    pub options: OutputOptions,
}

fn default_time_horizon() -> u32 {
    10
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMetadata {
    pub generated_at: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub usage: TokenUsage,
    pub latency_ms: u64,
    /// SHA-256 of the rendered prompt, for correlating identical requests.
    pub prompt_hash: String,
    /// True when tags came from the category table instead of the model.
    pub tags_fallback: bool,
    pub config: WriterConfig,
}

/// Post-processed article, ready to be returned or persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub raw_content: String,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub content_html: String,
    pub excerpt: String,
    pub word_count: usize,
    pub reading_time_minutes: usize,
    pub category: String,
    pub suggested_tags: Vec<String>,
    pub suggested_categories: Vec<String>,
    pub metadata: GenerationMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// Chat turn as exchanged with the UI. Never persisted server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    #[serde(default)]
    pub provider: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
    #[serde(other)]
    Unknown,
}

/// Read projection of a job owned by the external newsletter queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobState,
    #[serde(default)]
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A post ready to be stored. Built by the orchestrator on auto-publish.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub slug: String,
    pub excerpt: String,
    pub content_markdown: String,
    pub content_html: String,
    pub category: String,
    pub tags: Vec<String>,
    pub author: String,
    pub provider: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct PostRow {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub excerpt: String,
    pub content_markdown: String,
    pub content_html: String,
    pub category: String,
    pub status: String,
    pub author: String,
    pub provider: String,
    pub published_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_config_parses_scenario_payload_with_defaults() {
        let config: WriterConfig = serde_json::from_value(serde_json::json!({
            "category": "KI & Tech",
            "tone": "analytisch-kühl",
            "thinker": "Auto",
            "length": 1200,
            "generateTags": true
        }))
        .unwrap();

        assert_eq!(config.tone, Tone::AnalytischKuehl);
        assert_eq!(config.thinker, Thinker::Auto);
        assert_eq!(config.time_horizon, 10);
        assert_eq!(config.structure, Structure::Classic);
        assert!(config.options.generate_tags);
        assert!(!config.options.auto_publish);
    }

    #[test]
    fn vocabulary_defaults() {
        assert_eq!(Thinker::default(), Thinker::Auto);
        assert_eq!(HookStyle::default(), HookStyle::Question);
        assert_eq!(Style::default(), Style::Essay);
        assert_eq!(Audience::default(), Audience::General);
        assert_eq!(Structure::default(), Structure::Classic);
        assert_eq!(SourcesPolicy::default(), SourcesPolicy::Cited);
        assert_eq!(FactLevel::default(), FactLevel::Balanced);
        assert_eq!(ResearchDepth::default(), ResearchDepth::Overview);
    }

    #[test]
    fn writer_config_rejects_unknown_tone() {
        let result: Result<WriterConfig, _> = serde_json::from_value(serde_json::json!({
            "category": "KI & Tech",
            "tone": "fröhlich",
            "length": 800
        }));
        assert!(result.is_err());
    }

    #[test]
    fn wire_names_round_trip_through_display() {
        assert_eq!(Tone::VisionaerInspirierend.to_string(), "visionär-inspirierend");
        assert_eq!(Audience::DecisionMakers.as_str(), "decision-makers");
        assert_eq!(Thinker::ALL.len(), 7);
    }

    #[test]
    fn unknown_job_state_is_tolerated() {
        let job: JobStatus = serde_json::from_value(serde_json::json!({
            "id": "42",
            "type": "newsletter.send",
            "status": "stuck",
            "createdAt": "2026-10-01T08:00:00Z"
        }))
        .unwrap();
        assert_eq!(job.status, JobState::Unknown);
        assert_eq!(job.progress, 0.0);
    }

    #[test]
    fn staff_roles() {
        assert!(Role::Admin.is_staff());
        assert!(Role::Editor.is_staff());
        assert!(!Role::User.is_staff());
    }
}
