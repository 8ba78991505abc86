use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use hermes_core::config::HTTP_TIMEOUT_SECS;
use hermes_core::types::{PendingReplaceWord, PendingSpecialWord, ReviewStatus};
use hermes_core::{HermesError, Result};
use hermes_store::Store;

use crate::reconciliation::{reconcile, ReplaceProposal, SpecialProposal};

#[derive(Debug, Clone, Deserialize)]
pub struct ProposedReplaceWord {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProposedSpecialWord {
    pub word: String,
    #[serde(rename = "type")]
    pub word_type: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub examples: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WordProposalResponse {
    #[serde(default)]
    pub proposed_replace: Vec<ProposedReplaceWord>,
    #[serde(default)]
    pub proposed_special: Vec<ProposedSpecialWord>,
}

#[derive(Debug, Serialize)]
struct WordProposalRequest<'a> {
    messages: &'a [String],
    protected_vocabulary: &'a [String],
}

/// The AI word-proposal endpoint (spec §6.4), an external collaborator. A
/// network failure propagates as a job failure; an empty response is a
/// completed job with zero staged records.
#[async_trait]
pub trait WordProposalClient: Send + Sync {
    async fn propose(&self, messages: &[String], protected_vocabulary: &[String]) -> Result<WordProposalResponse>;
}

pub struct HttpWordProposalClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpWordProposalClient {
    pub fn new(endpoint: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| HermesError::Http(e.to_string()))?;
        Ok(Self { http, endpoint })
    }
}

#[async_trait]
impl WordProposalClient for HttpWordProposalClient {
    async fn propose(&self, messages: &[String], protected_vocabulary: &[String]) -> Result<WordProposalResponse> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&WordProposalRequest { messages, protected_vocabulary })
            .send()
            .await
            .map_err(|e| HermesError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(HermesError::Http(format!("word proposal endpoint returned {}", response.status())));
        }

        response.json().await.map_err(|e| HermesError::Http(e.to_string()))
    }
}

/// Stand-in used when no AI endpoint is configured (spec §6.1 is silent on
/// one). Always returns the documented "empty response" case so the job
/// still completes and logs zero records rather than the scheduler having
/// to special-case "discovery is unconfigured".
pub struct NullWordProposalClient;

#[async_trait]
impl WordProposalClient for NullWordProposalClient {
    async fn propose(&self, _messages: &[String], _protected_vocabulary: &[String]) -> Result<WordProposalResponse> {
        Ok(WordProposalResponse::default())
    }
}

#[derive(Debug, Default)]
pub struct DiscoveryOutcome {
    pub records_processed: usize,
    pub staged_replace: usize,
    pub staged_special: usize,
}

/// Run `discover_new_words` (spec §4.5.2): gather recently processed
/// messages, call the AI collaborator for proposals, reconcile against the
/// active dictionaries, and stage whatever survives into the pending
/// tables. Below `min_count` messages, the AI call is skipped entirely.
pub async fn run_discovery(
    store: &Store,
    client: &dyn WordProposalClient,
    window: chrono::Duration,
    min_count: usize,
) -> Result<DiscoveryOutcome> {
    let messages = store.list_recent_messages_for_discovery(window, min_count)?;
    if messages.len() < min_count {
        return Ok(DiscoveryOutcome::default());
    }

    let recent_texts: Vec<String> = messages.iter().filter_map(|m| m.processed_text.clone()).collect();

    let (existing_replace_vec, existing_special, _existing_meaningless) = store.get_active_dictionaries()?;
    let existing_replace_map: HashMap<String, String> = existing_replace_vec.into_iter().collect();
    let protected: Vec<String> = existing_replace_map
        .values()
        .cloned()
        .chain(existing_special.iter().cloned())
        .collect();

    let response = client.propose(&recent_texts, &protected).await?;

    let replace_proposals: Vec<ReplaceProposal> = response
        .proposed_replace
        .into_iter()
        .map(|p| ReplaceProposal {
            source: p.source,
            target: p.target,
            confidence: p.confidence,
            occurrence_count: 0,
            examples: p.examples,
        })
        .collect();
    let special_proposals: Vec<SpecialProposal> = response
        .proposed_special
        .into_iter()
        .map(|p| SpecialProposal {
            word: p.word,
            word_type: p.word_type,
            confidence: p.confidence,
            occurrence_count: 0,
            examples: p.examples,
        })
        .collect();

    let result = reconcile(replace_proposals, special_proposals, &existing_replace_map, &existing_special);
    let now = chrono::Utc::now();

    for item in &result.replace {
        store.stage_pending_replace(&PendingReplaceWord {
            id: None,
            source_word: item.source.clone(),
            target_word: item.target.clone(),
            status: ReviewStatus::Pending,
            confidence_score: item.confidence,
            occurrence_count: item.occurrence_count,
            example_messages: item.examples.clone(),
            transformation: item.transformation.clone(),
            auto_added: false,
            discovered_at: now,
        })?;
    }

    for item in &result.special {
        store.stage_pending_special(&PendingSpecialWord {
            id: None,
            word: item.word.clone(),
            word_type: item.word_type.clone(),
            status: ReviewStatus::Pending,
            confidence_score: item.confidence,
            occurrence_count: item.occurrence_count,
            example_messages: item.examples.clone(),
            auto_added: item.auto_added,
            discovered_at: now,
        })?;
    }

    Ok(DiscoveryOutcome {
        records_processed: messages.len(),
        staged_replace: result.replace.len(),
        staged_special: result.special.len(),
    })
}
