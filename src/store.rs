//! Date-keyed in-memory dataset with idempotent merge

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::types::{DateKey, Record};
use crate::utils::{format_number, parse_number};

pub const HEADER: [&str; 10] = [
    "Date", "Market", "Code", "Name", "Variety", "High", "Mid", "Low", "Avg", "Volume",
];

pub const UTF8_BOM: char = '\u{feff}';

/// Every stored date, each with its records in absorption order.
///
/// A date present here is complete: it will not be planned again outside
/// an incremental refresh span. A present-but-empty bucket is a market day
/// the source answered with no trades.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeStore {
    buckets: BTreeMap<DateKey, Vec<Record>>,
}

impl MergeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from serialized rows (header optional).
    ///
    /// The first field is the date key. Rows without a separator or with an
    /// unreadable date are skipped; missing trailing fields read as empty/0.
    pub fn load<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = Vec<String>>,
    {
        let mut store = Self::new();
        for row in rows {
            if row.len() < 2 {
                continue;
            }
            let first = row[0].trim_start_matches(UTF8_BOM);
            if first == HEADER[0] {
                continue;
            }
            let Some(date) = DateKey::parse_minguo(first) else {
                debug!(row = ?row, "Skipping stored row with unreadable date");
                continue;
            };

            let field = |i: usize| row.get(i).cloned().unwrap_or_default();
            let number = |i: usize| row.get(i).map_or(0.0, |s| parse_number(s));
            let record = Record {
                date,
                market: field(1),
                code: field(2),
                name: field(3),
                variety: field(4),
                high: number(5),
                mid: number(6),
                low: number(7),
                avg: number(8),
                volume: number(9),
            };
            store.buckets.entry(date).or_default().push(record);
        }
        store
    }

    /// Read the persisted dataset and its no-trade ledger.
    /// A missing file is an empty store.
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read dataset: {}", path.display()))?;
        let content = content.trim_start_matches(UTF8_BOM);

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(content.as_bytes());
        let mut rows: Vec<Vec<String>> = Vec::new();
        for result in reader.records() {
            let record =
                result.with_context(|| format!("Failed to parse dataset: {}", path.display()))?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        let mut store = Self::load(rows);

        let ledger = empty_ledger_path(path);
        if ledger.exists() {
            let content = fs::read_to_string(&ledger)
                .with_context(|| format!("Failed to read no-trade ledger: {}", ledger.display()))?;
            store.restore_empty_dates(content.lines().filter_map(DateKey::parse_minguo));
        }

        Ok(store)
    }

    /// Merge one date's results and mark the date complete.
    ///
    /// An empty `records` is a final answer too. Records whose
    /// (market, code, variety) is already in the bucket replace it in
    /// place; the rest are appended in order.
    pub fn absorb(&mut self, date: DateKey, records: Vec<Record>) {
        let bucket = self.buckets.entry(date).or_default();
        for record in records {
            match bucket.iter_mut().find(|existing| existing.key() == record.key()) {
                Some(existing) => *existing = record,
                None => bucket.push(record),
            }
        }
    }

    pub fn is_complete(&self, date: DateKey) -> bool {
        self.buckets.contains_key(&date)
    }

    pub fn complete_dates_in(&self, range: RangeInclusive<DateKey>) -> BTreeSet<DateKey> {
        self.buckets.range(range).map(|(date, _)| *date).collect()
    }

    /// Complete dates that hold no records, newest first
    pub fn empty_dates(&self) -> Vec<DateKey> {
        self.buckets
            .iter()
            .rev()
            .filter(|(_, records)| records.is_empty())
            .map(|(date, _)| *date)
            .collect()
    }

    pub fn restore_empty_dates(&mut self, dates: impl IntoIterator<Item = DateKey>) {
        for date in dates {
            self.buckets.entry(date).or_default();
        }
    }

    pub fn records(&self, date: DateKey) -> &[Record] {
        self.buckets.get(&date).map(Vec::as_slice).unwrap_or_default()
    }

    /// All records, newest date first
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.buckets.values().rev().flatten()
    }

    pub fn date_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn record_count(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn newest(&self) -> Option<DateKey> {
        self.buckets.keys().next_back().copied()
    }

    pub fn oldest(&self) -> Option<DateKey> {
        self.buckets.keys().next().copied()
    }

    /// Header row, then every record: dates descending, absorption order within a date
    pub fn serialize(&self) -> Vec<Vec<String>> {
        let mut rows = Vec::with_capacity(self.record_count() + 1);
        rows.push(HEADER.iter().map(|h| h.to_string()).collect());
        rows.extend(self.iter().map(record_row));
        rows
    }
}

fn record_row(record: &Record) -> Vec<String> {
    vec![
        record.date.to_minguo(),
        record.market.clone(),
        record.code.clone(),
        record.name.clone(),
        record.variety.clone(),
        format_number(record.high),
        format_number(record.mid),
        format_number(record.low),
        format_number(record.avg),
        format_number(record.volume),
    ]
}

/// Sidecar listing no-trade dates: `vegetables_fv.csv` -> `vegetables_fv.csv.empty`
pub fn empty_ledger_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".empty");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> DateKey {
        DateKey::parse_minguo(s).unwrap()
    }

    fn record(date: &str, market: &str, code: &str, variety: &str, avg: f64) -> Record {
        Record {
            date: key(date),
            market: market.to_string(),
            code: code.to_string(),
            name: "甘藍".to_string(),
            variety: variety.to_string(),
            high: 30.5,
            mid: 25.0,
            low: 20.0,
            avg,
            volume: 12345.0,
        }
    }

    fn row(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|s| s.to_string()).collect()
    }

    fn sample_store() -> MergeStore {
        let mut store = MergeStore::new();
        store.absorb(
            key("113/11/28"),
            vec![
                record("113/11/28", "第一市場", "FA1", "初秋", 24.0),
                record("113/11/28", "第二市場", "FA1", "初秋", 23.0),
            ],
        );
        store.absorb(key("113/11/29"), vec![record("113/11/29", "第一市場", "FV001", "粉蔥", 88.0)]);
        store.absorb(key("99/12/31"), vec![record("99/12/31", "第一市場", "FA1", "初秋", 12.0)]);
        store
    }

    #[test]
    fn test_serialize_orders_dates_descending() {
        let rows = sample_store().serialize();
        assert_eq!(rows[0], HEADER.iter().map(|h| h.to_string()).collect::<Vec<_>>());
        let dates: Vec<&str> = rows[1..].iter().map(|r| r[0].as_str()).collect();
        assert_eq!(dates, vec!["113/11/29", "113/11/28", "113/11/28", "99/12/31"]);
        // Absorption order within a date is kept
        assert_eq!(rows[2][1], "第一市場");
        assert_eq!(rows[3][1], "第二市場");
        assert_eq!(rows[1][5..], row(&["30.5", "25", "20", "88", "12345"])[..]);
    }

    #[test]
    fn test_load_serialize_round_trip() {
        let store = sample_store();
        let once = store.serialize();
        let reloaded = MergeStore::load(once.clone());
        assert_eq!(reloaded.serialize(), once);
        assert_eq!(reloaded, store);
    }

    #[test]
    fn test_load_skips_malformed_rows() {
        let store = MergeStore::load(vec![
            row(&["\u{feff}Date", "Market", "Code"]),
            row(&["garbage line without separator"]),
            row(&["not-a-date", "第一市場", "FV001"]),
            row(&["113/11/29", "第一市場", "FV001", "蔥", "粉蔥", "100", "90", "80", "88", "1,234"]),
            row(&["113/11/30", "第二市場", "FV002"]),
        ]);
        assert_eq!(store.date_count(), 2);
        let rec = &store.records(key("113/11/29"))[0];
        assert_eq!(rec.volume, 1234.0);
        assert_eq!(rec.avg, 88.0);
        let short = &store.records(key("113/11/30"))[0];
        assert_eq!(short.name, "");
        assert_eq!(short.volume, 0.0);
    }

    #[test]
    fn test_absorb_replaces_same_key_and_appends_new() {
        let mut store = sample_store();
        store.absorb(
            key("113/11/28"),
            vec![
                record("113/11/28", "第二市場", "FA1", "初秋", 26.0),
                record("113/11/28", "第二市場", "FA2", "改良種", 30.0),
            ],
        );
        let bucket = store.records(key("113/11/28"));
        assert_eq!(bucket.len(), 3);
        assert_eq!(bucket[1].avg, 26.0);
        assert_eq!(bucket[2].code, "FA2");

        let mut keys: Vec<_> = bucket.iter().map(Record::key).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), bucket.len());
    }

    #[test]
    fn test_empty_absorb_marks_complete() {
        let mut store = MergeStore::new();
        store.absorb(key("113/10/10"), Vec::new());
        assert!(store.is_complete(key("113/10/10")));
        assert_eq!(store.empty_dates(), vec![key("113/10/10")]);
        // Only the header is serialized
        assert_eq!(store.serialize().len(), 1);
    }

    #[test]
    fn test_complete_dates_in_range() {
        let store = sample_store();
        let got = store.complete_dates_in(key("113/01/01")..=key("113/11/28"));
        assert_eq!(got.into_iter().collect::<Vec<_>>(), vec![key("113/11/28")]);
        assert_eq!(store.newest(), Some(key("113/11/29")));
        assert_eq!(store.oldest(), Some(key("99/12/31")));
    }

    #[test]
    fn test_empty_ledger_path() {
        assert_eq!(
            empty_ledger_path(Path::new("data/vegetables_fv.csv")),
            PathBuf::from("data/vegetables_fv.csv.empty")
        );
    }

    #[test]
    fn test_read_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MergeStore::read(&dir.path().join("nope.csv")).unwrap();
        assert_eq!(store.date_count(), 0);
    }

    #[test]
    fn test_read_legacy_file_with_bom_and_grouped_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vegetables_fv.csv");
        fs::write(
            &path,
            "\u{feff}Date,Market,Code,Name,Variety,High,Mid,Low,Avg,Volume\n\
             113/11/29,第一市場,FV001,蔥,粉蔥,100,90,80,88,\"1,234\"\n",
        )
        .unwrap();
        fs::write(empty_ledger_path(&path), "113/11/30\nbogus\n").unwrap();

        let store = MergeStore::read(&path).unwrap();
        assert_eq!(store.record_count(), 1);
        assert_eq!(store.records(key("113/11/29"))[0].volume, 1234.0);
        assert!(store.is_complete(key("113/11/30")));
        assert_eq!(store.empty_dates(), vec![key("113/11/30")]);
    }
}
