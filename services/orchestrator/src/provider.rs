use std::collections::BTreeMap;

use agents::domain::DOMAINS;
use agents::{CapabilityAnswer, ClassificationCapability, ClassificationContext};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub base_url: String,
    pub model: String,
}

#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
    async fn ping(&self) -> anyhow::Result<()>;
    fn info(&self) -> ProviderInfo;
}

/// Domain classification backed by a chat-completion model.
pub struct LlmDomainCapability<P> {
    provider: P,
}

impl<P: LLMProvider> LlmDomainCapability<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}

pub fn build_prompt(ctx: &ClassificationContext) -> anyhow::Result<String> {
    let payload = serde_json::to_string_pretty(ctx).context("serialize classification context")?;
    Ok(format!(
        "You are a business data analyst. Classify the dataset described below into exactly one \
         business domain from this list: {domains}.\n\
         Answer with a single JSON object and nothing else:\n\
         {{\"primary_domain\": \"<domain>\", \"confidence\": <0..1>, \"domain_scores\": {{\"<domain>\": <0..1>}}}}\n\n\
         Dataset:\n{payload}",
        domains = DOMAINS.join(", "),
    ))
}

#[derive(Debug, Deserialize)]
struct LlmAnswer {
    #[serde(alias = "domain")]
    primary_domain: String,
    confidence: f64,
    #[serde(default)]
    domain_scores: BTreeMap<String, f64>,
}

/// Pull the JSON object out of a completion, tolerating prose or code fences
/// around it.
pub fn parse_answer(text: &str) -> anyhow::Result<CapabilityAnswer> {
    let start = text.find('{').ok_or_else(|| anyhow!("no JSON object in completion"))?;
    let end = text.rfind('}').ok_or_else(|| anyhow!("no JSON object in completion"))?;
    if end < start {
        return Err(anyhow!("malformed JSON object in completion"));
    }
    let answer: LlmAnswer =
        serde_json::from_str(&text[start..=end]).context("malformed classification answer")?;
    Ok(CapabilityAnswer {
        domain: answer.primary_domain,
        confidence: answer.confidence,
        secondary: answer.domain_scores.into_iter().collect(),
    })
}

#[async_trait]
impl<P: LLMProvider> ClassificationCapability for LlmDomainCapability<P> {
    fn name(&self) -> &str {
        "llm"
    }

    async fn classify(&self, ctx: &ClassificationContext) -> anyhow::Result<CapabilityAnswer> {
        let prompt = build_prompt(ctx)?;
        let completion = self.provider.complete(&prompt).await?;
        parse_answer(&completion)
    }
}
