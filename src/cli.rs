use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value, json};

use crate::models::WriterConfig;

#[derive(Parser)]
#[command(name = "fluxao", about = "FluxAO AI writer: provider orchestration, prompts and queue monitoring")]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, global = true, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the configuration file
    Validate,

    /// Run one health check round and print provider status
    Providers,

    /// Generate one article through the configured providers
    Generate {
        #[command(flatten)]
        writer: WriterArgs,

        /// Provider name (defaults to [writer].default_provider)
        #[arg(long)]
        provider: Option<String>,

        /// Store the article as a post
        #[arg(long)]
        publish: bool,

        /// Write the generated markdown to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show a stored post with its tags
    Post {
        /// Post id as printed by `generate --publish`
        id: String,
    },

    /// Print the rendered writer prompt without calling a provider
    Prompt {
        #[command(flatten)]
        writer: WriterArgs,
    },

    /// Show the newsletter queue snapshot, optionally after an action
    Jobs {
        /// Retry the failed job with this id
        #[arg(long, conflicts_with = "reset_circuit")]
        retry: Option<String>,

        /// Reset the queue's circuit breaker
        #[arg(long)]
        reset_circuit: bool,
    },
}

/// Writer options as accepted by the HTTP API, using the same wire names.
#[derive(Args, Debug, Clone)]
pub struct WriterArgs {
    /// Category, e.g. "KI & Tech"
    #[arg(long)]
    pub category: String,

    /// Tone, e.g. "analytisch-kühl"
    #[arg(long)]
    pub tone: String,

    /// Persona, e.g. "Harari" or "Auto"
    #[arg(long)]
    pub thinker: Option<String>,

    /// Target length in words
    #[arg(long, default_value_t = 1200)]
    pub length: u32,

    #[arg(long)]
    pub hook: Option<String>,

    #[arg(long)]
    pub style: Option<String>,

    #[arg(long)]
    pub audience: Option<String>,

    #[arg(long)]
    pub structure: Option<String>,

    /// Sources policy: none, cited or inline
    #[arg(long)]
    pub sources: Option<String>,

    #[arg(long)]
    pub fact_level: Option<String>,

    /// Years into the future
    #[arg(long)]
    pub time_horizon: Option<u32>,

    /// Free-text editorial context
    #[arg(long)]
    pub context: Option<String>,

    /// Working title
    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub generate_tags: bool,

    #[arg(long)]
    pub seo: bool,
}

impl WriterArgs {
    /// Build a [`WriterConfig`] through the same deserializer the API uses.
    pub fn to_writer_config(&self, auto_publish: bool) -> Result<WriterConfig> {
        let mut fields = Map::new();
        fields.insert("category".into(), json!(self.category));
        fields.insert("tone".into(), json!(self.tone));
        fields.insert("length".into(), json!(self.length));
        fields.insert("generateTags".into(), json!(self.generate_tags));
        fields.insert("seoOptimize".into(), json!(self.seo));
        fields.insert("autoPublish".into(), json!(auto_publish));

        for (key, value) in [
            ("thinker", &self.thinker),
            ("hook", &self.hook),
            ("style", &self.style),
            ("audience", &self.audience),
            ("structure", &self.structure),
            ("sources", &self.sources),
            ("factLevel", &self.fact_level),
            ("userContext", &self.context),
            ("title", &self.title),
        ] {
            if let Some(v) = value {
                fields.insert(key.into(), json!(v));
            }
        }
        if let Some(years) = self.time_horizon {
            fields.insert("timeHorizon".into(), json!(years));
        }

        serde_json::from_value(Value::Object(fields)).context("invalid writer options")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SourcesPolicy, Thinker, Tone};

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn generate_flags_become_writer_config() {
        let cli = parse(&[
            "fluxao",
            "generate",
            "--category",
            "KI & Tech",
            "--tone",
            "analytisch-kühl",
            "--thinker",
            "Harari",
            "--sources",
            "none",
            "--time-horizon",
            "25",
            "--generate-tags",
        ]);
        let Some(Commands::Generate { writer, publish, .. }) = cli.command else {
            panic!("expected generate");
        };
        let config = writer.to_writer_config(publish).unwrap();
        assert_eq!(config.tone, Tone::AnalytischKuehl);
        assert_eq!(config.thinker, Thinker::Harari);
        assert_eq!(config.sources, SourcesPolicy::Omit);
        assert_eq!(config.time_horizon, 25);
        assert_eq!(config.length, 1200);
        assert!(config.options.generate_tags);
        assert!(!config.options.auto_publish);
    }

    #[test]
    fn unknown_tone_is_an_error() {
        let cli = parse(&["fluxao", "prompt", "--category", "KI & Tech", "--tone", "laut"]);
        let Some(Commands::Prompt { writer }) = cli.command else {
            panic!("expected prompt");
        };
        assert!(writer.to_writer_config(false).is_err());
    }

    #[test]
    fn post_takes_an_id() {
        let cli = parse(&["fluxao", "post", "3f2a"]);
        assert!(matches!(cli.command, Some(Commands::Post { ref id }) if id == "3f2a"));
    }

    #[test]
    fn retry_and_reset_conflict() {
        assert!(Cli::try_parse_from(["fluxao", "jobs", "--retry", "1", "--reset-circuit"]).is_err());
    }
}
