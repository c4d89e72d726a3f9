use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::{BufRead, Write};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use crate::data::types::MarketRef;
use crate::execution::types::{Decision, Proposal};

/// Asks a human (or a stand-in) what to do with a triggered market
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, market: &MarketRef, proposal: &Proposal) -> Result<Decision>;
}

/// Always answers the same way
pub struct FixedConfirmer {
    decision: Decision,
}

impl FixedConfirmer {
    pub fn new(decision: Decision) -> Self {
        Self { decision }
    }
}

#[async_trait]
impl Confirmer for FixedConfirmer {
    async fn confirm(&self, market: &MarketRef, _proposal: &Proposal) -> Result<Decision> {
        debug!("Fixed decision for {}: {}", market.id, self.decision);
        Ok(self.decision)
    }
}

/// Prompts on stdin
pub struct ConsoleConfirmer;

fn prompt(proposal: &Proposal) -> Result<Decision> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "\n{}\n", proposal)?;
    loop {
        write!(out, "[r]esolve, [c]ancel or [s]kip? ")?;
        out.flush()?;

        let mut line = String::new();
        let read = std::io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Ok(Decision::Skip);
        }
        match line.parse() {
            Ok(decision) => return Ok(decision),
            Err(e) => writeln!(out, "{}", e)?,
        }
    }
}

#[async_trait]
impl Confirmer for ConsoleConfirmer {
    async fn confirm(&self, _market: &MarketRef, proposal: &Proposal) -> Result<Decision> {
        let proposal = proposal.clone();
        tokio::task::spawn_blocking(move || prompt(&proposal))
            .await
            .context("Console prompt task failed")?
    }
}

/// Sends the proposal to a Telegram chat with one button per decision and
/// waits for a press
pub struct TelegramConfirmer {
    client: Client,
    api_key: String,
    chat_id: String,
    poll_interval: Duration,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    message: Option<SentMessage>,
}

fn keyboard() -> Value {
    json!({
        "inline_keyboard": [[
            { "text": "Resolve", "callback_data": "resolve" },
            { "text": "Cancel", "callback_data": "cancel" },
            { "text": "Skip", "callback_data": "skip" },
        ]]
    })
}

/// First button press on `message_id` among the updates, with the callback
/// id to acknowledge
fn find_answer(updates: &[Update], message_id: i64) -> Option<(String, Decision)> {
    updates.iter().find_map(|update| {
        let query = update.callback_query.as_ref()?;
        if query.message.as_ref()?.message_id != message_id {
            return None;
        }
        let decision = query.data.as_deref()?.parse().ok()?;
        Some((query.id.clone(), decision))
    })
}

impl TelegramConfirmer {
    pub fn new(api_key: String, chat_id: String, poll_secs: u64, timeout_secs: u64) -> Self {
        Self {
            client: Client::new(),
            api_key,
            chat_id,
            poll_interval: Duration::from_secs(poll_secs),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    async fn call<T: for<'de> Deserialize<'de>>(&self, method: &str, body: Value) -> Result<T> {
        let url = format!("https://api.telegram.org/bot{}/{}", self.api_key, method);
        let response: TelegramResponse<T> = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to call Telegram {}", method))?
            .json()
            .await
            .with_context(|| format!("Failed to parse Telegram {} response", method))?;

        if !response.ok {
            anyhow::bail!(
                "Telegram {} failed: {}",
                method,
                response.description.unwrap_or_default()
            );
        }
        response
            .result
            .with_context(|| format!("Telegram {} returned no result", method))
    }
}

#[async_trait]
impl Confirmer for TelegramConfirmer {
    async fn confirm(&self, market: &MarketRef, proposal: &Proposal) -> Result<Decision> {
        let sent: SentMessage = self
            .call(
                "sendMessage",
                json!({
                    "chat_id": self.chat_id,
                    "text": proposal.to_string(),
                    "reply_markup": keyboard(),
                }),
            )
            .await?;
        info!("Asked Telegram about {} (message {})", market.id, sent.message_id);

        let deadline = Instant::now() + self.timeout;
        let mut offset = 0i64;
        while Instant::now() < deadline {
            let updates: Vec<Update> = self
                .call(
                    "getUpdates",
                    json!({ "offset": offset, "allowed_updates": ["callback_query"] }),
                )
                .await?;
            if let Some(last) = updates.last() {
                offset = last.update_id + 1;
            }

            if let Some((query_id, decision)) = find_answer(&updates, sent.message_id) {
                let ack: Result<bool> = self
                    .call(
                        "answerCallbackQuery",
                        json!({ "callback_query_id": query_id, "text": decision.to_string() }),
                    )
                    .await;
                if let Err(e) = ack {
                    warn!("Failed to acknowledge Telegram answer: {:#}", e);
                }
                return Ok(decision);
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        warn!("No Telegram answer for {} within {:?}; skipping", market.id, self.timeout);
        Ok(Decision::Skip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::OutcomeValue;
    use crate::testing::binary_market;

    #[tokio::test]
    async fn test_fixed_confirmer() {
        let market = binary_market();
        let proposal = Proposal {
            market_id: market.id.clone(),
            question: market.question.clone(),
            url: market.url.clone(),
            value: OutcomeValue::Probability(100.0),
            explanation: String::new(),
        };
        let confirmer = FixedConfirmer::new(Decision::Cancel);
        assert_eq!(confirmer.confirm(&market, &proposal).await.unwrap(), Decision::Cancel);
    }

    #[test]
    fn test_find_answer_matches_message() {
        let updates: Vec<Update> = serde_json::from_value(json!([
            { "update_id": 1, "message": { "message_id": 3, "text": "hello" } },
            { "update_id": 2, "callback_query": {
                "id": "q1", "data": "resolve", "message": { "message_id": 9 } } },
            { "update_id": 3, "callback_query": {
                "id": "q2", "data": "cancel", "message": { "message_id": 7 } } },
        ]))
        .unwrap();

        assert_eq!(find_answer(&updates, 7), Some(("q2".to_string(), Decision::Cancel)));
        assert_eq!(find_answer(&updates, 9), Some(("q1".to_string(), Decision::Resolve)));
        assert_eq!(find_answer(&updates, 4), None);
    }

    #[test]
    fn test_error_response_without_result() {
        let response: TelegramResponse<SentMessage> = serde_json::from_value(json!({
            "ok": false, "error_code": 400, "description": "Bad Request: chat not found"
        }))
        .unwrap();
        assert!(!response.ok);
        assert!(response.result.is_none());
        assert_eq!(response.description.as_deref(), Some("Bad Request: chat not found"));

        let sent: TelegramResponse<SentMessage> =
            serde_json::from_value(json!({ "ok": true, "result": { "message_id": 5 } })).unwrap();
        assert_eq!(sent.result.map(|m| m.message_id), Some(5));
    }

    #[test]
    fn test_keyboard_buttons() {
        let buttons = keyboard()["inline_keyboard"][0].as_array().unwrap().len();
        assert_eq!(buttons, 3);
    }
}
