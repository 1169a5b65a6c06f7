//! Quantization catalog: detecting quant names from a repo's file tree and
//! ranking them by preference.
use regex::Regex;
use std::sync::OnceLock;

use crate::filetree::TreeEntry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quantization {
    pub name: String,
    pub tag: String,
    pub file: String,
    pub size: u64,
}

fn quant_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)[._-]((UD-)?(Q\d+[^.]+|IQ\d+[^.]*|TQ\d+[^.]*|FP16|FP32|F16|F32|BF16|I\d+))\.gguf$")
            .unwrap()
    })
}

fn dir_quant_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(UD-)?(Q\d+[^.]+|IQ\d+[^.]*|TQ\d+[^.]*|FP16|FP32|F16|F32|BF16|I\d+)$")
            .unwrap()
    })
}

/// Preference-ranked list of well-known quant display names, highest priority first.
const PREFERENCE_ORDER: &[&str] = &[
    "UD-Q4_K_XL",
    "Q4_K_M",
    "UD-Q5_K_XL",
    "Q4_K_S",
    "Q5_K_M",
    "Q5_K_S",
    "Q6_K",
    "Q8_0",
    "UD-Q6_K_XL",
    "UD-Q8_K_XL",
    "F16",
    "BF16",
    "F32",
];

/// Builds the ordered quant catalog from a repo's flat file tree listing.
pub fn detect_quantizations(entries: &[TreeEntry]) -> Vec<Quantization> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    let mut any_gguf = false;

    for entry in entries {
        if entry.is_dir() {
            let dirname = entry
                .path
                .rsplit('/')
                .next()
                .unwrap_or(entry.path.as_str());
            if let Some(caps) = dir_quant_re().captures(dirname) {
                let name = caps[0].to_uppercase();
                if seen.insert(name.clone()) {
                    out.push(Quantization {
                        name,
                        tag: dirname.to_string(),
                        file: String::new(),
                        size: 0,
                    });
                }
            }
            continue;
        }
        if !entry.path.to_ascii_lowercase().ends_with(".gguf") {
            continue;
        }
        any_gguf = true;
        let filename = entry.path.rsplit('/').next().unwrap_or(entry.path.as_str());
        if let Some(caps) = quant_re().captures(filename) {
            let tag = caps[1].to_string();
            let name = tag.to_uppercase();
            if seen.insert(name.clone()) {
                out.push(Quantization {
                    name,
                    tag,
                    file: entry.path.clone(),
                    size: entry.size,
                });
            }
        }
    }

    if out.is_empty() && any_gguf {
        if let Some(entry) = entries
            .iter()
            .find(|e| !e.is_dir() && e.path.to_ascii_lowercase().ends_with(".gguf"))
        {
            out.push(Quantization {
                name: "default".to_string(),
                tag: "latest".to_string(),
                file: entry.path.clone(),
                size: entry.size,
            });
        }
    }

    out
}

fn preference_priority(name: &str) -> usize {
    let upper = name.to_uppercase();
    PREFERENCE_ORDER
        .iter()
        .position(|p| *p == upper)
        .unwrap_or(PREFERENCE_ORDER.len())
}

/// Returns the display name of the highest-priority quant present, or the
/// first catalog entry if none match the known preference list.
pub fn best_quantization(list: &[Quantization]) -> Option<&Quantization> {
    if list.is_empty() {
        return None;
    }
    list.iter()
        .min_by_key(|q| preference_priority(&q.name))
        .or_else(|| list.first())
}

/// Case-insensitive lookup by `name` or `tag`.
pub fn find_quantization<'a>(list: &'a [Quantization], q: &str) -> Option<&'a Quantization> {
    list.iter()
        .find(|e| e.name.eq_ignore_ascii_case(q) || e.tag.eq_ignore_ascii_case(q))
}

/// Orders a catalog by display name for presentation.
pub fn sort_quantizations(list: &mut [Quantization]) {
    list.sort_by(|a, b| a.name.cmp(&b.name));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, size: u64) -> TreeEntry {
        TreeEntry {
            path: path.to_string(),
            entry_type: crate::filetree::EntryType::File,
            size,
            lfs: None,
        }
    }

    #[test]
    fn detects_suffix_quants_from_filenames() {
        let entries = vec![
            file("model-Q4_K_M.gguf", 100),
            file("model-Q8_0.gguf", 200),
            file("README.md", 1),
        ];
        let catalog = detect_quantizations(&entries);
        assert_eq!(catalog.len(), 2);
        assert!(find_quantization(&catalog, "q4_k_m").is_some());
    }

    #[test]
    fn falls_back_to_default_when_no_suffix_matches() {
        let entries = vec![file("model.gguf", 42)];
        let catalog = detect_quantizations(&entries);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].name, "default");
        assert_eq!(catalog[0].tag, "latest");
    }

    #[test]
    fn priority_is_case_insensitive() {
        assert_eq!(preference_priority("q4_k_m"), preference_priority("Q4_K_M"));
    }

    #[test]
    fn best_quant_prefers_known_order() {
        let mut catalog = vec![
            Quantization { name: "Q8_0".into(), tag: "Q8_0".into(), file: "a".into(), size: 1 },
            Quantization { name: "Q4_K_M".into(), tag: "Q4_K_M".into(), file: "b".into(), size: 1 },
        ];
        sort_quantizations(&mut catalog);
        let best = best_quantization(&catalog).unwrap();
        assert_eq!(best.name, "Q4_K_M");
    }
}
