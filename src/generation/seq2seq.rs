use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use rust_bert::pipelines::common::ModelResource;
use rust_bert::pipelines::generation_utils::{GenerateConfig, LanguageGenerator};
use rust_bert::resources::RemoteResource;
use rust_bert::t5::T5Generator;

const MAX_OUTPUT_LENGTH: i64 = 256;

/// Local T5-family text-to-text model. Weights are fetched from the Hugging
/// Face hub on first use and stay loaded for the life of the process.
#[derive(Clone)]
pub struct Seq2SeqGenerator {
    model_name: String,
    model: Arc<Mutex<Option<T5Generator>>>,
}

impl Seq2SeqGenerator {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            model: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn generate(&self, prompt: String) -> Result<String> {
        let model = Arc::clone(&self.model);
        let model_name = self.model_name.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|_| anyhow::anyhow!("seq2seq model lock poisoned"))?;

            if guard.is_none() {
                tracing::info!(model = %model_name, "loading local seq2seq model");
                *guard = Some(load_generator(&model_name)?);
            }
            let generator = guard
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("seq2seq model failed to load"))?;

            let output = generator
                .generate(Some(&[prompt.as_str()]), None)
                .context("seq2seq generation failed")?;

            Ok(output
                .into_iter()
                .next()
                .map(|generated| generated.text.trim().to_string())
                .unwrap_or_default())
        })
        .await
        .context("seq2seq generation task panicked")?
    }
}

fn hub_resource(model_name: &str, file: &str) -> RemoteResource {
    RemoteResource::new(
        &format!("https://huggingface.co/{model_name}/resolve/main/{file}"),
        &format!("{model_name}/{file}"),
    )
}

fn load_generator(model_name: &str) -> Result<T5Generator> {
    let config = GenerateConfig {
        model_resource: ModelResource::Torch(Box::new(hub_resource(
            model_name,
            "rust_model.ot",
        ))),
        config_resource: Box::new(hub_resource(model_name, "config.json")),
        vocab_resource: Box::new(hub_resource(model_name, "spiece.model")),
        merges_resource: None,
        max_length: Some(MAX_OUTPUT_LENGTH),
        do_sample: false,
        num_beams: 1,
        ..Default::default()
    };

    T5Generator::new(config).with_context(|| format!("failed to load seq2seq model {model_name}"))
}
