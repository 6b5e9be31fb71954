use anyhow::{Context, Result};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::TicketingConfig;
use crate::services::escalation::{TicketProvider, TicketRecord};
use crate::utils::error::RelayError;

/// Board cards reject descriptions longer than this.
const MAX_DESCRIPTION_CHARS: usize = 16_384;

/// Card fields travel in the body; long transcripts would overflow a URL.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateCard<'a> {
    id_list: &'a str,
    name: &'a str,
    desc: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CardResponse {
    id: String,
    #[serde(default)]
    short_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// Client for a Trello-compatible task board; each escalation becomes a card.
#[derive(Clone)]
pub struct TicketService {
    client: Client,
    config: TicketingConfig,
}

impl TicketService {
    pub fn new(config: TicketingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create ticketing HTTP client")?;
        Ok(Self { client, config })
    }

    fn cards_url(&self) -> Result<Url, RelayError> {
        let base = format!("{}/1/cards", self.config.base_url.trim_end_matches('/'));
        Url::parse_with_params(
            &base,
            &[
                ("key", self.config.api_key.as_str()),
                ("token", self.config.token.as_str()),
            ],
        )
        .map_err(|e| RelayError::ExportFailed(format!("Invalid ticketing URL: {}", e)))
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[async_trait::async_trait]
impl TicketProvider for TicketService {
    async fn create_record(&self, title: &str, body: &str) -> Result<TicketRecord, RelayError> {
        let card = CreateCard {
            id_list: &self.config.list_id,
            name: title,
            desc: truncate_chars(body, MAX_DESCRIPTION_CHARS),
        };

        let response = self
            .client
            .post(self.cards_url()?)
            .json(&card)
            .send()
            .await
            .map_err(|e| RelayError::ExportFailed(format!("Failed to call ticketing API: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::ExportFailed(format!(
                "Ticketing API error: {} - {}",
                status, body
            )));
        }

        let card: CardResponse = response
            .json()
            .await
            .map_err(|e| RelayError::ExportFailed(format!("Failed to parse ticketing response: {}", e)))?;

        let url = card.short_url.or(card.url).unwrap_or_default();
        debug!("Created card {} ({})", card.id, url);
        Ok(TicketRecord { id: card.id, url })
    }
}
