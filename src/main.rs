mod cleanup;
mod cli;
mod config;
mod daemon;
mod db;
mod error;
mod jobs;
mod models;
mod postprocess;
mod prompt;
mod providers;
mod security;
mod server;
mod store;
mod writer;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use crate::cli::{Cli, Commands};
use crate::config::{Config, load_config, validate_config};
use crate::models::{AuthUser, Role};
use crate::providers::ProviderManager;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).with_context(|| format!("loading config from {}", cli.config.display()))?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.fluxao.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(config_path = %cli.config.display(), "config loaded");

    validate_config(&config).context("config validation failed")?;
    info!("config validated successfully");

    match cli.command {
        Some(Commands::Validate) => {
            println!("Configuration is valid.");
        }
        Some(Commands::Providers) => {
            let manager = ProviderManager::from_config(&config).context("building provider registry")?;
            manager.refresh_health(config.writer.request_timeout()).await;
            let mut statuses = manager.providers_status();
            for name in manager.names() {
                let Some(status) = statuses.remove(&name) else {
                    continue;
                };
                let state = if status.available { "available" } else { "unavailable" };
                let latency = status.latency_ms.map(|ms| format!("{ms} ms")).unwrap_or_else(|| "-".to_string());
                match status.last_error {
                    Some(err) => println!("{name:<12} {:<28} {state:<12} {latency:>8}  {err}", status.model),
                    None => println!("{name:<12} {:<28} {state:<12} {latency:>8}", status.model),
                }
            }
        }
        Some(Commands::Post { id }) => {
            let pool = db::create_pool(&config).await.context("creating database")?;
            let post = store::get_post(&pool, &id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("no post with id {id}"))?;
            let tags = store::get_post_tags(&pool, &id).await?;
            println!("{}", post.title);
            println!("  slug:      {}", post.slug);
            println!("  category:  {}", post.category);
            println!("  status:    {}", post.status);
            println!("  author:    {} (via {})", post.author, post.provider);
            println!("  published: {}", post.published_at.to_rfc3339());
            if !tags.is_empty() {
                println!("  tags:      {}", tags.join(", "));
            }
            println!("\n{}", post.excerpt);
            pool.close().await;
        }
        Some(Commands::Prompt { writer }) => {
            let writer_config = writer.to_writer_config(false)?;
            let validation = security::validate_request(
                security::RequestBody::Article(&writer_config),
                &cli_user(),
                &config.writer,
            );
            if let Some(reason) = validation.reason {
                anyhow::bail!("writer options rejected: {reason}");
            }
            println!("{}", prompt::build_writer_prompt(&writer_config));
        }
        Some(Commands::Generate {
            writer,
            provider,
            publish,
            output,
        }) => {
            let writer_config = writer.to_writer_config(publish)?;
            let orchestrator = build_writer(&config).await?;
            let user = cli_user();

            let request = writer::GenerateArticleRequest {
                config: writer_config,
                provider,
            };
            let response = orchestrator.generate_article(request, &user).await?;
            let article = &response.content;

            if let Some(output_path) = output {
                let markdown = format!("# {}\n\n{}\n", article.title, article.content);
                std::fs::write(&output_path, markdown)
                    .with_context(|| format!("writing output to {}", output_path.display()))?;
                info!(path = %output_path.display(), "wrote markdown output");
                println!("Article written to: {}", output_path.display());
            } else {
                println!("Article generated: {}", article.title);
            }
            if !article.suggested_tags.is_empty() {
                println!("Tags: {}", article.suggested_tags.join(", "));
            }
            match (response.post_id, response.persistence_error) {
                (Some(id), _) => println!("Published as post {id}"),
                (None, Some(err)) => eprintln!("Warning: {err}"),
                (None, None) => {}
            }
        }
        Some(Commands::Jobs { retry, reset_circuit }) => {
            let queue = jobs::QueueClient::from_config(&config.queue)?
                .ok_or_else(|| anyhow::anyhow!("[queue].base_url is not configured"))?;

            let snapshot = if let Some(job_id) = retry {
                queue.retry_job(&job_id).await?
            } else if reset_circuit {
                queue.reset_circuit().await?
            } else {
                queue.get_metrics().await?
            };
            print_snapshot(&snapshot);
        }
        None => {
            daemon::run(config).await?;
        }
    }

    Ok(())
}

/// One-shot commands act with full rights.
fn cli_user() -> AuthUser {
    AuthUser {
        name: "cli".to_string(),
        role: Role::Admin,
    }
}

async fn build_writer(config: &Config) -> Result<writer::Writer> {
    let pool = db::create_pool(config).await.context("creating database")?;
    info!(db_path = %config.db_path().display(), "database ready");

    let manager = Arc::new(ProviderManager::from_config(config).context("building provider registry")?);
    let store = Arc::new(store::SqliteStore::new(pool));
    Ok(writer::Writer::new(manager, store, config.writer.clone()))
}

fn print_snapshot(snapshot: &jobs::QueueSnapshot) {
    let m = &snapshot.metrics;
    println!(
        "Queue: waiting {} | active {} | completed {} | failed {} | delayed {} | dead-letter {}",
        m.queue.waiting, m.queue.active, m.queue.completed, m.queue.failed, m.queue.delayed, m.dead_letter
    );
    println!(
        "Circuit breaker: {:?} ({} failures)",
        m.circuit_breaker.state, m.circuit_breaker.failures
    );
    println!(
        "Backpressure: {}/{} active, {} queued{}",
        m.backpressure.active,
        m.backpressure.limit,
        m.backpressure.queued,
        if m.backpressure.throttled { ", throttled" } else { "" }
    );
    for job in &m.jobs {
        let error = job.error.as_deref().unwrap_or("");
        println!(
            "  {:<24} {:<20} {:?} {:>5.1}% {error}",
            job.id, job.job_type, job.status, job.progress
        );
    }
}
