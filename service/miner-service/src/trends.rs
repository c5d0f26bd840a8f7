//! Publication-trend analytics over document summaries.
//!
//! Documents are deduplicated through `document_summaries` (one row per
//! doc), bucketed by publish date, and the resulting count series is
//! fitted with ordinary least squares over bucket ordinals.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use corpus_store::{DocumentSummary, SqliteStore};
use serde::Serialize;
use tracing::debug;

use crate::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Year,
    Quarter,
    Month,
}

impl FromStr for Granularity {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "year" | "yearly" => Ok(Self::Year),
            "quarter" | "quarterly" => Ok(Self::Quarter),
            "month" | "monthly" => Ok(Self::Month),
            other => Err(ServiceError::InvalidQuery(format!("unknown granularity '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrendQuery {
    /// Restrict to documents carrying this tag (case-insensitive).
    /// `None` and `"all"` both mean no filter.
    pub tag: Option<String>,
    /// Inclusive lower date bound; defaults to the earliest observed date.
    pub from: Option<String>,
    /// Inclusive upper date bound; defaults to the latest observed date.
    pub to: Option<String>,
    pub granularity: Granularity,
}

impl Default for Granularity {
    fn default() -> Self {
        Self::Year
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    /// Bucket label: `2021`, `2021-Q3`, or `2021-03`.
    pub period: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendReport {
    pub granularity: Granularity,
    /// Continuous series over the requested range; empty buckets hold 0.
    pub points: Vec<TrendPoint>,
    /// Documents matching the tag filter, dated or not.
    pub total_documents: u64,
    /// Matching documents without a usable publish date.
    pub undated_documents: u64,
    /// OLS slope per bucket; None when fewer than 3 buckets have data.
    pub slope: Option<f64>,
    pub r_squared: Option<f64>,
    pub p_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CooccurrencePair {
    pub tag_a: String,
    pub tag_b: String,
    /// Documents carrying both tags.
    pub count: u64,
    /// Pearson correlation of the tags' monthly presence; None when it
    /// is undefined (under 2 months observed, or a constant series).
    pub correlation: Option<f64>,
}

pub struct TrendAnalyzer<'a> {
    store: &'a SqliteStore,
}

impl<'a> TrendAnalyzer<'a> {
    pub fn new(store: &'a SqliteStore) -> Self {
        Self { store }
    }

    pub fn compute_trends(&self, query: &TrendQuery) -> Result<TrendReport, ServiceError> {
        let summaries = self.store.document_summaries()?;
        let matched: Vec<&DocumentSummary> = summaries
            .iter()
            .filter(|s| match &query.tag {
                // "all" is the unfiltered facet, not a literal tag.
                Some(tag) if !tag.eq_ignore_ascii_case("all") => {
                    s.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
                }
                _ => true,
            })
            .collect();

        let total_documents = matched.len() as u64;
        let dates: Vec<NaiveDate> = matched
            .iter()
            .filter_map(|s| s.publish_date.as_deref().and_then(parse_date_flexible))
            .collect();
        let undated_documents = total_documents - dates.len() as u64;

        let from = match &query.from {
            Some(s) => Some(parse_bound(s)?),
            None => dates.iter().min().copied(),
        };
        let to = match &query.to {
            Some(s) => Some(parse_bound(s)?),
            None => dates.iter().max().copied(),
        };
        let (Some(from), Some(to)) = (from, to) else {
            // No dated documents and no explicit range: nothing to plot.
            return Ok(TrendReport {
                granularity: query.granularity,
                points: Vec::new(),
                total_documents,
                undated_documents,
                slope: None,
                r_squared: None,
                p_value: None,
            });
        };

        let g = query.granularity;
        let mut counts: BTreeMap<Bucket, u64> = BTreeMap::new();
        let start = Bucket::containing(from, g);
        let end = Bucket::containing(to, g);
        let mut cursor = start;
        while cursor <= end {
            counts.insert(cursor, 0);
            cursor = cursor.next(g);
        }
        for date in &dates {
            if *date < from || *date > to {
                continue;
            }
            if let Some(c) = counts.get_mut(&Bucket::containing(*date, g)) {
                *c += 1;
            }
        }

        let points: Vec<TrendPoint> = counts
            .iter()
            .map(|(b, c)| TrendPoint { period: b.label(g), count: *c })
            .collect();

        let non_zero = points.iter().filter(|p| p.count > 0).count();
        let (slope, r_squared, p_value) = if non_zero >= 3 {
            let ys: Vec<f64> = points.iter().map(|p| p.count as f64).collect();
            match linear_regression(&ys) {
                Some(fit) => (Some(fit.slope), Some(fit.r_squared), Some(fit.p_value)),
                None => (None, None, None),
            }
        } else {
            (None, None, None)
        };

        debug!(
            buckets = points.len(),
            non_zero = non_zero,
            total = total_documents,
            "trend series computed"
        );
        Ok(TrendReport {
            granularity: g,
            points,
            total_documents,
            undated_documents,
            slope,
            r_squared,
            p_value,
        })
    }

    /// Count tag pairs across documents and correlate their monthly
    /// presence. Pairs are ordered lexically so (a, b) and (b, a) merge.
    pub fn compute_cooccurrence(
        &self,
        min_count: u64,
    ) -> Result<Vec<CooccurrencePair>, ServiceError> {
        let summaries = self.store.document_summaries()?;

        let mut pair_counts: HashMap<(String, String), u64> = HashMap::new();
        for s in &summaries {
            let tags = dedup_tags(&s.tags);
            for i in 0..tags.len() {
                for j in (i + 1)..tags.len() {
                    let (a, b) = if tags[i] <= tags[j] {
                        (tags[i].clone(), tags[j].clone())
                    } else {
                        (tags[j].clone(), tags[i].clone())
                    };
                    *pair_counts.entry((a, b)).or_insert(0) += 1;
                }
            }
        }

        let monthly = monthly_presence(&summaries);
        let mut out: Vec<CooccurrencePair> = pair_counts
            .into_iter()
            .filter(|(_, count)| *count >= min_count.max(1))
            .map(|((tag_a, tag_b), count)| {
                let correlation = match (monthly.get(&tag_a), monthly.get(&tag_b)) {
                    (Some(a), Some(b)) => pearson(a, b),
                    _ => None,
                };
                CooccurrencePair { tag_a, tag_b, count, correlation }
            })
            .collect();

        out.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.tag_a.cmp(&b.tag_a))
                .then_with(|| a.tag_b.cmp(&b.tag_b))
        });
        Ok(out)
    }
}

/// Calendar bucket; `sub` is 0 for yearly, 1..=4 for quarters, 1..=12
/// for months.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct Bucket {
    year: i32,
    sub: u32,
}

impl Bucket {
    fn containing(date: NaiveDate, g: Granularity) -> Self {
        match g {
            Granularity::Year => Self { year: date.year(), sub: 0 },
            Granularity::Quarter => Self { year: date.year(), sub: (date.month() - 1) / 3 + 1 },
            Granularity::Month => Self { year: date.year(), sub: date.month() },
        }
    }

    fn next(self, g: Granularity) -> Self {
        match g {
            Granularity::Year => Self { year: self.year + 1, sub: 0 },
            Granularity::Quarter => {
                if self.sub == 4 {
                    Self { year: self.year + 1, sub: 1 }
                } else {
                    Self { year: self.year, sub: self.sub + 1 }
                }
            }
            Granularity::Month => {
                if self.sub == 12 {
                    Self { year: self.year + 1, sub: 1 }
                } else {
                    Self { year: self.year, sub: self.sub + 1 }
                }
            }
        }
    }

    fn label(self, g: Granularity) -> String {
        match g {
            Granularity::Year => format!("{}", self.year),
            Granularity::Quarter => format!("{}-Q{}", self.year, self.sub),
            Granularity::Month => format!("{}-{:02}", self.year, self.sub),
        }
    }
}

fn parse_bound(s: &str) -> Result<NaiveDate, ServiceError> {
    parse_date_flexible(s)
        .ok_or_else(|| ServiceError::InvalidQuery(format!("unparseable date bound '{s}'")))
}

/// Accepts `YYYY-MM-DD`, `YYYY/MM/DD`, `YYYY-MM`, `YYYY`, and ISO
/// datetime strings (date part taken).
pub(crate) fn parse_date_flexible(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y/%m/%d") {
        return Some(d);
    }
    if s.len() == 7 {
        if let Ok(d) = NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d") {
            return Some(d);
        }
    }
    if s.len() == 4 {
        if let Ok(year) = s.parse::<i32>() {
            return NaiveDate::from_ymd_opt(year, 1, 1);
        }
    }
    if let Some(prefix) = s.get(..10) {
        if let Ok(d) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return Some(d);
        }
    }
    None
}

fn dedup_tags(tags: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for t in tags {
        let t = t.trim();
        if t.is_empty() {
            continue;
        }
        if seen.insert(t.to_string()) {
            out.push(t.to_string());
        }
    }
    out
}

/// Per-tag monthly presence indicators over the observed month range of
/// all dated documents.
fn monthly_presence(summaries: &[DocumentSummary]) -> HashMap<String, Vec<f64>> {
    let mut dated: Vec<(NaiveDate, &DocumentSummary)> = Vec::new();
    for s in summaries {
        if let Some(d) = s.publish_date.as_deref().and_then(parse_date_flexible) {
            dated.push((d, s));
        }
    }
    let Some(min) = dated.iter().map(|(d, _)| *d).min() else {
        return HashMap::new();
    };
    let max = dated.iter().map(|(d, _)| *d).max().unwrap_or(min);

    // Ordinal position of every month bucket in the observed range.
    let mut index_of: HashMap<Bucket, usize> = HashMap::new();
    let start = Bucket::containing(min, Granularity::Month);
    let end = Bucket::containing(max, Granularity::Month);
    let mut cursor = start;
    let mut idx = 0usize;
    while cursor <= end {
        index_of.insert(cursor, idx);
        idx += 1;
        cursor = cursor.next(Granularity::Month);
    }

    let mut presence: HashMap<String, Vec<f64>> = HashMap::new();
    for (date, s) in &dated {
        let bucket = Bucket::containing(*date, Granularity::Month);
        let Some(&pos) = index_of.get(&bucket) else { continue };
        for tag in dedup_tags(&s.tags) {
            let series = presence.entry(tag).or_insert_with(|| vec![0.0; idx]);
            series[pos] = 1.0;
        }
    }
    presence
}

struct OlsFit {
    slope: f64,
    r_squared: f64,
    p_value: f64,
}

/// Least-squares fit of `ys` against x = 0, 1, 2, ...
fn linear_regression(ys: &[f64]) -> Option<OlsFit> {
    let n = ys.len();
    if n < 3 {
        return None;
    }
    let nf = n as f64;
    let mean_x = (nf - 1.0) / 2.0;
    let mean_y = ys.iter().sum::<f64>() / nf;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (i, y) in ys.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxx += dx * dx;
        sxy += dx * (y - mean_y);
    }
    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (i, y) in ys.iter().enumerate() {
        let pred = intercept + slope * i as f64;
        ss_res += (y - pred) * (y - pred);
        ss_tot += (y - mean_y) * (y - mean_y);
    }
    let r_squared = if ss_tot <= f64::EPSILON { 1.0 } else { 1.0 - ss_res / ss_tot };

    let df = (n - 2) as f64;
    let mse = ss_res / df;
    let se = (mse / sxx).sqrt();
    let p_value = if se <= f64::EPSILON {
        0.0
    } else {
        let t = (slope / se).abs();
        2.0 * (1.0 - t_cdf(t, df))
    };

    Some(OlsFit { slope, r_squared, p_value })
}

/// Smooth approximation of the Student-t CDF, good enough to flag
/// clearly significant trends without a stats dependency.
fn t_cdf(t: f64, df: f64) -> f64 {
    if df > 30.0 {
        0.5 + 0.5 * (t / 2.0).tanh()
    } else {
        0.5 + 0.5 * (t / (2.0 + df / 10.0)).tanh()
    }
}

fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a <= f64::EPSILON || var_b <= f64::EPSILON {
        return None;
    }
    Some(cov / (var_a.sqrt() * var_b.sqrt()))
}
