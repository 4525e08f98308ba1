pub mod openai;
#[cfg(feature = "local-seq2seq")]
pub mod seq2seq;

use anyhow::Result;

use crate::config::GenerationConfig;
use openai::OpenAiClient;

/// Words kept from the context by the extractive backend.
pub const EXTRACTIVE_WORD_LIMIT: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Seq2Seq,
    OpenAi,
    Extractive,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Seq2Seq => "seq2seq",
            BackendKind::OpenAi => "openai",
            BackendKind::Extractive => "extractive",
        }
    }
}

/// Picks the answer backend. The local model wins over the hosted API, and
/// the extractive fallback is used when neither is enabled. A local model
/// request in a build without the runtime falls through to the next choice.
pub fn select_backend(config: &GenerationConfig) -> BackendKind {
    if config.use_hf_local {
        if cfg!(feature = "local-seq2seq") {
            return BackendKind::Seq2Seq;
        }
        tracing::warn!(
            model = %config.hf_local_model,
            "USE_HF_LOCAL is set but this build lacks the local-seq2seq feature; falling back"
        );
    }

    if config.use_openai {
        BackendKind::OpenAi
    } else {
        BackendKind::Extractive
    }
}

#[derive(Clone)]
pub enum Generator {
    #[cfg(feature = "local-seq2seq")]
    Seq2Seq(seq2seq::Seq2SeqGenerator),
    OpenAi(OpenAiClient),
    Extractive,
}

impl Generator {
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let generator = match select_backend(config) {
            #[cfg(feature = "local-seq2seq")]
            BackendKind::Seq2Seq => {
                Self::Seq2Seq(seq2seq::Seq2SeqGenerator::new(config.hf_local_model.clone()))
            }
            BackendKind::OpenAi => Self::OpenAi(OpenAiClient::new(
                config.openai_base_url.clone(),
                config.openai_api_key.clone(),
                config.openai_model.clone(),
            )?),
            _ => Self::Extractive,
        };

        tracing::info!(backend = generator.kind().as_str(), "answer backend selected");
        Ok(generator)
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            #[cfg(feature = "local-seq2seq")]
            Self::Seq2Seq(_) => BackendKind::Seq2Seq,
            Self::OpenAi(_) => BackendKind::OpenAi,
            Self::Extractive => BackendKind::Extractive,
        }
    }

    pub async fn generate(&self, question: &str, context: &str) -> Result<String> {
        match self {
            #[cfg(feature = "local-seq2seq")]
            Self::Seq2Seq(model) => model.generate(build_policy_prompt(question, context)).await,
            Self::OpenAi(client) => client.answer(question, context).await,
            Self::Extractive => Ok(grounded_extractive_answer(question, context)),
        }
    }
}

pub fn build_policy_prompt(question: &str, context: &str) -> String {
    format!(
        "You are a bus/travel assistant. Answer using ONLY the context. If unknown, say 'Not in policy'.\n\
         Context:\n{context}\n\nQuestion: {question}\nReturn a concise answer."
    )
}

pub fn grounded_extractive_answer(question: &str, context: &str) -> String {
    format!(
        "Answer (grounded):\nQuestion: {question}\nContext:\n{context}\nResponse:\n- {}\n",
        leading_words(context, EXTRACTIVE_WORD_LIMIT)
    )
}

fn leading_words(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generation_config(use_hf_local: bool, use_openai: bool) -> GenerationConfig {
        GenerationConfig {
            use_hf_local,
            hf_local_model: "google/flan-t5-small".to_string(),
            use_openai,
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    #[test]
    fn policy_prompt_embeds_context_and_question() {
        let prompt = build_policy_prompt("Can I bring a bike?", "Bikes ride free.");
        assert_eq!(
            prompt,
            "You are a bus/travel assistant. Answer using ONLY the context. If unknown, say 'Not in policy'.\n\
             Context:\nBikes ride free.\n\nQuestion: Can I bring a bike?\nReturn a concise answer."
        );
    }

    #[test]
    fn extractive_answer_uses_grounded_template() {
        let answer = grounded_extractive_answer("Refunds?", "  Refunds are\n issued   within 7 days. ");
        assert_eq!(
            answer,
            "Answer (grounded):\nQuestion: Refunds?\nContext:\n  Refunds are\n issued   within 7 days. \nResponse:\n- Refunds are issued within 7 days.\n"
        );
    }

    #[test]
    fn extractive_answer_caps_word_count() {
        let context = (1..=200)
            .map(|n| format!("w{n}"))
            .collect::<Vec<_>>()
            .join(" ");
        let answer = grounded_extractive_answer("q", &context);
        let response = answer
            .split("Response:\n- ")
            .nth(1)
            .unwrap()
            .trim_end();

        assert_eq!(response.split(' ').count(), EXTRACTIVE_WORD_LIMIT);
        assert!(response.starts_with("w1 w2"));
        assert!(response.ends_with("w80"));
    }

    #[test]
    fn openai_selected_only_when_local_disabled() {
        assert_eq!(
            select_backend(&generation_config(false, true)),
            BackendKind::OpenAi
        );
        assert_eq!(
            select_backend(&generation_config(false, false)),
            BackendKind::Extractive
        );
    }

    #[cfg(feature = "local-seq2seq")]
    #[test]
    fn local_model_takes_precedence() {
        assert_eq!(
            select_backend(&generation_config(true, true)),
            BackendKind::Seq2Seq
        );
    }

    #[cfg(not(feature = "local-seq2seq"))]
    #[test]
    fn local_request_falls_through_without_runtime() {
        assert_eq!(
            select_backend(&generation_config(true, true)),
            BackendKind::OpenAi
        );
        assert_eq!(
            select_backend(&generation_config(true, false)),
            BackendKind::Extractive
        );
    }

    #[tokio::test]
    async fn extractive_generator_needs_no_services() {
        let generator = Generator::from_config(&generation_config(false, false)).unwrap();
        assert_eq!(generator.kind(), BackendKind::Extractive);

        let answer = generator.generate("Pets?", "No pets on board.").await.unwrap();
        assert!(answer.ends_with("- No pets on board.\n"));
    }
}
