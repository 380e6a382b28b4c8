// Classification du texte de résultat par mots-clés, pour la mise en évidence côté client.
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Absent,
    Minimal,
    Moderate,
    Critical,
}

// L'ordre compte : les motifs les plus graves passent en premier lorsqu'ils se chevauchent.
static PATTERNS: LazyLock<Vec<(Severity, Regex)>> = LazyLock::new(|| {
    [
        (Severity::Critical, r"(?i)критическ(?:ая|ий)|противопоказано"),
        (Severity::Moderate, r"(?i)умеренн(?:ая|ый)|с осторожностью"),
        (Severity::Minimal, r"(?i)минимальн(?:ая|ый)"),
        (Severity::Absent, r"(?i)отсутствует"),
    ]
    .into_iter()
    .filter_map(|(severity, pattern)| match Regex::new(pattern) {
        Ok(re) => Some((severity, re)),
        Err(e) => {
            error!("Severity pattern {:?} rejected: {}", severity, e);
            None
        }
    })
    .collect()
});

/// Morceau du texte de résultat, marqué lorsqu'il correspond à un mot-clé.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

struct Hit {
    start: usize,
    end: usize,
    severity: Severity,
}

fn hits(text: &str) -> Vec<Hit> {
    let mut found: Vec<Hit> = Vec::new();
    for (severity, re) in PATTERNS.iter() {
        for m in re.find_iter(text) {
            let overlaps = found
                .iter()
                .any(|h| m.start() < h.end && h.start < m.end());
            if !overlaps {
                found.push(Hit {
                    start: m.start(),
                    end: m.end(),
                    severity: *severity,
                });
            }
        }
    }
    found.sort_by_key(|h| h.start);
    found
}

// Niveau le plus grave mentionné dans le texte, s'il y en a un.
pub fn classify(text: &str) -> Option<Severity> {
    hits(text).into_iter().map(|h| h.severity).max()
}

pub fn segments(text: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut cursor = 0;

    for hit in hits(text) {
        if hit.start > cursor {
            out.push(Segment {
                text: text[cursor..hit.start].to_string(),
                severity: None,
            });
        }
        out.push(Segment {
            text: text[hit.start..hit.end].to_string(),
            severity: Some(hit.severity),
        });
        cursor = hit.end;
    }

    if cursor < text.len() {
        out.push(Segment {
            text: text[cursor..].to_string(),
            severity: None,
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_keyword_pattern_compiles() {
        let levels: Vec<_> = PATTERNS.iter().map(|(severity, _)| *severity).collect();
        assert_eq!(
            levels,
            vec![
                Severity::Critical,
                Severity::Moderate,
                Severity::Minimal,
                Severity::Absent
            ]
        );
    }

    #[test]
    fn classify_picks_the_most_severe_keyword() {
        assert_eq!(classify("Умеренная"), Some(Severity::Moderate));
        assert_eq!(
            classify("Минимальная, но при почечной недостаточности противопоказано"),
            Some(Severity::Critical)
        );
        assert_eq!(classify("Взаимодействие отсутствует"), Some(Severity::Absent));
        assert_eq!(classify("Нет данных"), None);
    }

    #[test]
    fn classify_is_case_insensitive_for_cyrillic() {
        assert_eq!(classify("ПРОТИВОПОКАЗАНО"), Some(Severity::Critical));
        assert_eq!(classify("применять С ОСТОРОЖНОСТЬЮ"), Some(Severity::Moderate));
    }

    #[test]
    fn segments_cover_the_whole_text() {
        let text = "Риск: Умеренная. Совместно с осторожностью.";
        let parts = segments(text);

        let rebuilt: String = parts.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(rebuilt, text);

        let marked: Vec<_> = parts
            .iter()
            .filter_map(|s| s.severity.map(|sev| (s.text.as_str(), sev)))
            .collect();
        assert_eq!(
            marked,
            vec![
                ("Умеренная", Severity::Moderate),
                ("с осторожностью", Severity::Moderate)
            ]
        );
    }

    #[test]
    fn segments_without_keywords_is_a_single_plain_part() {
        let parts = segments("Нет данных");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].severity, None);
    }

    #[test]
    fn segments_of_empty_text_is_empty() {
        assert!(segments("").is_empty());
    }
}
