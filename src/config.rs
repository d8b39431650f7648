//! Crawler settings loaded from an optional CONL file

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::fetch::Politeness;
use crate::types::MarketLabel;

pub const DEFAULT_CONFIG_FILE: &str = "crawler.conl";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrawlConfig {
    pub base_url: String,
    pub output: PathBuf,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub delay_min_ms: u64,
    pub delay_max_ms: u64,
    pub lookback_days: u32,
    pub refresh_days: u32,
    pub backfill_floor: NaiveDate,
    pub code_prefix: String,
    /// Used when the landing page lists no markets (id = name)
    pub fallback_markets: BTreeMap<String, String>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.tapmc.com.tw/Pages/Trans/Price1".to_string(),
            output: PathBuf::from("data/vegetables_fv.csv"),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string(),
            timeout_secs: 30,
            delay_min_ms: 500,
            delay_max_ms: 1500,
            lookback_days: 7,
            refresh_days: 3,
            backfill_floor: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or(NaiveDate::MIN),
            code_prefix: "FV".to_string(),
            fallback_markets: BTreeMap::from([
                ("1".to_string(), "第一市場".to_string()),
                ("2".to_string(), "第二市場".to_string()),
            ]),
        }
    }
}

impl CrawlConfig {
    /// Load from `path`, or the defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: CrawlConfig = serde_conl::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.delay_min_ms > self.delay_max_ms {
            bail!(
                "delay_min_ms ({}) must not exceed delay_max_ms ({})",
                self.delay_min_ms,
                self.delay_max_ms
            );
        }
        if self.refresh_days > self.lookback_days {
            bail!(
                "refresh_days ({}) must not exceed lookback_days ({})",
                self.refresh_days,
                self.lookback_days
            );
        }
        if self.fallback_markets.is_empty() {
            bail!("fallback_markets must list at least one market");
        }
        if self.code_prefix.is_empty() {
            bail!("code_prefix must not be empty");
        }
        Ok(())
    }

    pub fn fallback_markets(&self) -> Vec<MarketLabel> {
        self.fallback_markets
            .iter()
            .map(|(id, name)| MarketLabel::new(id.as_str(), name.as_str()))
            .collect()
    }

    pub fn politeness(&self) -> Politeness {
        Politeness {
            min_ms: self.delay_min_ms,
            max_ms: self.delay_max_ms,
        }
    }
}
