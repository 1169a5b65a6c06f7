//! Parsing and formatting of multi-part GGUF split filenames:
//! `<prefix>-NNNNN-of-MMMMM.gguf`.
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitInfo {
    pub prefix: String,
    /// 0-based split index (file "00001" becomes 0).
    pub split_no: u32,
    pub split_count: u32,
}

fn split_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<prefix>.+)-(?P<no>\d{5})-of-(?P<count>\d{5})\.gguf$").unwrap())
}

/// Parses a bare filename (no directory components) as a split part.
pub fn parse_split_filename(filename: &str) -> Option<SplitInfo> {
    let caps = split_re().captures(filename)?;
    let split_no: u32 = caps["no"].parse().ok()?;
    let split_count: u32 = caps["count"].parse().ok()?;
    Some(SplitInfo {
        prefix: caps["prefix"].to_string(),
        split_no: split_no.saturating_sub(1),
        split_count,
    })
}

/// Builds the canonical filename for part `split_no` (0-based) of `split_count`.
pub fn split_filename(prefix: &str, split_no: u32, split_count: u32) -> String {
    format!("{prefix}-{:05}-of-{:05}.gguf", split_no + 1, split_count)
}
