use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tokio::sync::Semaphore;

use travel_rag::config::AppConfig;
use travel_rag::embedding::Embedder;
use travel_rag::generation::Generator;
use travel_rag::rag::{RagPipeline, NO_DOCS_CONTEXT};
use travel_rag::vector_store::QdrantStore;

const NOT_IN_POLICY: &str = "not in policy";

#[derive(Parser, Debug)]
#[command(name = "eval")]
#[command(about = "Run a travel policy question set through the answer pipeline")]
struct Cli {
    #[arg(long, default_value = "eval/questions.jsonl")]
    file: String,
    #[arg(long, default_value_t = false)]
    verbose: bool,
}

#[derive(Debug, Deserialize)]
struct EvalQuestion {
    id: String,
    question: String,
    #[serde(default)]
    expect_contains: Vec<String>,
    #[serde(default)]
    expect_not_in_policy: Option<bool>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::from_env();

    let embedder = Embedder::load(&config.embedding_model, config.model_cache_dir()).await?;
    let store = QdrantStore::new(
        config.qdrant_base_url.clone(),
        config.qdrant_collection.clone(),
    );
    let generator = Generator::from_config(&config.generation)?;
    let rag = RagPipeline::new(
        embedder,
        store,
        generator,
        config.top_k,
        Arc::new(Semaphore::new(1)),
    );

    let questions = load_questions(&cli.file)?;
    if questions.is_empty() {
        anyhow::bail!("no questions found in {}", cli.file);
    }

    let mut total = 0usize;
    let mut passed = 0usize;
    let mut not_in_policy_count = 0usize;
    let mut no_docs_count = 0usize;

    for question in questions {
        total += 1;

        let (answer, retrieved) = rag
            .query_with_sources(&question.question)
            .await
            .with_context(|| format!("failed eval question {}", question.id))?;
        if retrieved.is_empty() {
            no_docs_count += 1;
        }

        let answer_lower = answer.to_ascii_lowercase();
        let is_not_in_policy = answer_lower.contains(NOT_IN_POLICY);
        if is_not_in_policy {
            not_in_policy_count += 1;
        }

        let mut pass = question
            .expect_contains
            .iter()
            .all(|needle| answer_lower.contains(&needle.to_ascii_lowercase()));

        if let Some(expected) = question.expect_not_in_policy {
            if expected != is_not_in_policy {
                pass = false;
            }
        }

        if pass {
            passed += 1;
        }

        if cli.verbose {
            println!("--- {} ---", question.id);
            println!("Q: {}", question.question);
            println!("A: {}", answer.replace('\n', " "));
            println!(
                "Sources: {}",
                if retrieved.is_empty() {
                    NO_DOCS_CONTEXT.to_string()
                } else {
                    retrieved
                        .iter()
                        .map(|doc| doc.source.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                }
            );
            println!();
        }
    }

    println!("Backend: {}", rag.backend().as_str());
    println!("Eval questions: {}", total);
    println!("Expectation accuracy: {:.1}%", ratio(passed, total) * 100.0);
    println!(
        "Not-in-policy rate: {:.1}%",
        ratio(not_in_policy_count, total) * 100.0
    );
    println!("No-docs rate: {:.1}%", ratio(no_docs_count, total) * 100.0);

    Ok(())
}

fn load_questions(path: &str) -> Result<Vec<EvalQuestion>> {
    let file = File::open(path).with_context(|| format!("failed opening {}", path))?;
    let reader = BufReader::new(file);
    let mut questions = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let parsed: EvalQuestion = serde_json::from_str(trimmed)
            .with_context(|| format!("invalid JSON at {} line {}", path, idx + 1))?;
        questions.push(parsed);
    }

    Ok(questions)
}

fn ratio(n: usize, d: usize) -> f32 {
    if d == 0 {
        return 0.0;
    }
    n as f32 / d as f32
}
