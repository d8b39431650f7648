//! Record extraction from the query result table

use anyhow::{anyhow, Result};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::types::{DateKey, MarketLabel, Record};
use crate::utils::{clean_text, parse_number};

/// Code, Name, Variety, High, Mid, Low, Avg, Volume
pub const EXPECTED_COLUMNS: usize = 8;

pub struct RecordExtractor {
    styled_table: Selector,
    table: Selector,
    row: Selector,
    code_prefix: String,
}

fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid CSS selector '{}': {}", css, e))
}

impl RecordExtractor {
    /// `code_prefix` selects the product category, e.g. "FV" for vegetables
    pub fn new(code_prefix: &str) -> Result<Self> {
        Ok(Self {
            styled_table: parse_selector("table.table_style1")?,
            table: parse_selector("table")?,
            row: parse_selector("tr")?,
            code_prefix: code_prefix.to_string(),
        })
    }

    /// The styled result table, else the second table on the page, else the first
    fn data_table<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>> {
        if let Some(table) = document.select(&self.styled_table).next() {
            return Some(table);
        }
        let mut tables = document.select(&self.table);
        let first = tables.next();
        tables.next().or(first)
    }

    /// Map qualifying rows to records. Headers, totals and short rows are
    /// skipped without complaint.
    pub fn extract(&self, markup: &str, date: DateKey, market: &MarketLabel) -> Vec<Record> {
        let document = Html::parse_document(markup);
        let Some(table) = self.data_table(&document) else {
            return Vec::new();
        };

        let mut records = Vec::new();
        for row in table.select(&self.row) {
            let cells: Vec<String> = row
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|cell| cell.value().name() == "td")
                .map(|cell| clean_text(cell.text()))
                .collect();
            if cells.is_empty() {
                continue;
            }
            if cells.len() < EXPECTED_COLUMNS || !cells[0].starts_with(&self.code_prefix) {
                debug!(date = %date, market = %market.name, cells = ?cells, "Dropped row");
                continue;
            }

            records.push(Record {
                date,
                market: market.name.clone(),
                code: cells[0].clone(),
                name: cells[1].clone(),
                variety: cells[2].clone(),
                high: parse_number(&cells[3]),
                mid: parse_number(&cells[4]),
                low: parse_number(&cells[5]),
                avg: parse_number(&cells[6]),
                volume: parse_number(&cells[7]),
            });
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> DateKey {
        DateKey::parse_minguo(s).unwrap()
    }

    fn market() -> MarketLabel {
        MarketLabel::new("1", "第一市場")
    }

    fn row_html(cells: &[&str]) -> String {
        let tds: String = cells.iter().map(|c| format!("<td>{}</td>", c)).collect();
        format!("<tr>{}</tr>", tds)
    }

    fn page(table_attrs: &str, rows: &[&[&str]]) -> String {
        let body: String = rows.iter().map(|r| row_html(r)).collect();
        format!(
            r#"<html><body>
            <table id="layout"><tr><td>查詢條件</td></tr></table>
            <table {}>
              <tr><th>代號</th><th>品名</th><th>品種</th><th>上價</th><th>中價</th><th>下價</th><th>平均價</th><th>交易量</th></tr>
              {}
            </table></body></html>"#,
            table_attrs, body
        )
    }

    #[test]
    fn test_extract_known_row() {
        let markup = page(
            r#"class="table_style1""#,
            &[&["FV001", "蔥", "粉蔥", "100", "90", "80", "88", "1,234"]],
        );
        let extractor = RecordExtractor::new("FV").unwrap();
        let records = extractor.extract(&markup, key("113/11/29"), &market());
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.date.to_minguo(), "113/11/29");
        assert_eq!(rec.market, "第一市場");
        assert_eq!(rec.code, "FV001");
        assert_eq!(rec.name, "蔥");
        assert_eq!(rec.variety, "粉蔥");
        assert_eq!(rec.high, 100.0);
        assert_eq!(rec.avg, 88.0);
        assert_eq!(rec.volume, 1234.0);
    }

    #[test]
    fn test_extract_filters_prefix_and_short_rows() {
        let markup = page(
            r#"class="table_style1""#,
            &[
                &["FA1", "甘藍", "初秋", "30", "25", "20", "24", "52,000"],
                &["FV002", "蔥", "日蔥", "-", "", "x", "45.5", "980"],
                &["FV003", "短列"],
                &["合計", "", "", "", "", "", "", "53,000"],
                &["fv004", "lower", "case", "1", "1", "1", "1", "1"],
            ],
        );
        let records = RecordExtractor::new("FV")
            .unwrap()
            .extract(&markup, key("113/11/29"), &market());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].code, "FV002");
        assert_eq!(records[0].high, 0.0);
        assert_eq!(records[0].mid, 0.0);
        assert_eq!(records[0].low, 0.0);
        assert_eq!(records[0].avg, 45.5);
        assert!(records.iter().all(|r| r.code.starts_with("FV")));
    }

    #[test]
    fn test_extract_falls_back_to_second_table() {
        let markup = page(
            r#"id="ctl00_ContentPlaceHolder1_GridView1""#,
            &[&["FV001", "蔥", "粉蔥", "100", "90", "80", "88", "1,234"]],
        );
        let records = RecordExtractor::new("FV")
            .unwrap()
            .extract(&markup, key("113/11/29"), &market());
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_extract_without_table_is_empty() {
        let records = RecordExtractor::new("FV")
            .unwrap()
            .extract("<html><body><p>查無資料</p></body></html>", key("113/11/29"), &market());
        assert!(records.is_empty());
    }
}
