use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs::OpenOptions;
use std::io::Write;
use crate::execution::types::{Decision, Proposal};

/// Append-only CSV record of every decision taken on a triggered market
pub struct ResolutionLog {
    log_path: String,
}

fn field(text: &str) -> String {
    if text.contains(',') || text.contains('"') || text.contains('\n') {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

impl ResolutionLog {
    pub fn new(log_path: String) -> Result<Self> {
        // Create CSV file with headers if it doesn't exist
        if !std::path::Path::new(&log_path).exists() {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .open(&log_path)
                .with_context(|| format!("Failed to create resolution log: {}", log_path))?;

            writeln!(file, "timestamp,market_id,question,value,decision,applied")?;
        }

        Ok(Self { log_path })
    }

    pub fn log_decision(
        &self,
        at: DateTime<Utc>,
        proposal: &Proposal,
        decision: Decision,
        applied: bool,
    ) -> Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.log_path)?;

        writeln!(
            file,
            "{},{},{},{},{},{}",
            at.to_rfc3339(),
            field(&proposal.market_id),
            field(&proposal.question),
            field(&proposal.value.to_string()),
            decision,
            applied
        )?;

        Ok(())
    }

    /// Free-form line, e.g. a market that failed its check
    pub fn log_event(&self, market_id: &str, event: &str) -> Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.log_path)?;

        writeln!(
            file,
            "{},{},{},,,",
            Utc::now().to_rfc3339(),
            field(market_id),
            field(&format!("EVENT: {}", event))
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::OutcomeValue;

    #[test]
    fn test_writes_header_once_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resolutions.csv").to_str().unwrap().to_string();

        let log = ResolutionLog::new(path.clone()).unwrap();
        let proposal = Proposal {
            market_id: "abc".to_string(),
            question: "Will it rain, or not?".to_string(),
            url: "https://manifold.markets/u/rain".to_string(),
            value: OutcomeValue::Probability(100.0),
            explanation: String::new(),
        };
        log.log_decision(Utc::now(), &proposal, Decision::Resolve, true).unwrap();
        ResolutionLog::new(path.clone()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "timestamp,market_id,question,value,decision,applied");
        assert!(lines[1].ends_with(",abc,\"Will it rain, or not?\",100.0%,resolve,true"));
    }
}
