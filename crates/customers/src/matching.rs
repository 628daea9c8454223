//! Fuzzy matching of free-text company names (e.g. an invoice's vendor) to customers.
//!
//! Names are normalized first (umlauts, punctuation, legal forms), then scored with the
//! better of a Levenshtein similarity and a token-set similarity. An exact IBAN or VAT id
//! hit short-circuits to a perfect score.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use kontor_core::normalize_iban;

use crate::customer::{CustomerId, CustomerStatus};

pub const DEFAULT_THRESHOLD: f64 = 0.8;

const LEGAL_FORMS: &[&str] = &[
    "gmbh",
    "mbh",
    "ag",
    "kg",
    "ug",
    "ohg",
    "gbr",
    "ek",
    "ltd",
    "inc",
    "llc",
    "co",
    "se",
    "haftungsbeschraenkt",
];

/// What we know about the party we are trying to identify.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchQuery {
    pub name: Option<String>,
    pub iban: Option<String>,
    pub vat_id: Option<String>,
}

/// Searchable projection of a customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub customer_id: CustomerId,
    pub name: String,
    pub iban: Option<String>,
    pub vat_id: Option<String>,
    pub status: CustomerStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerMatch {
    pub customer_id: CustomerId,
    pub name: String,
    pub score: f64,
}

/// Lowercase, transliterate umlauts, drop punctuation and legal-form tokens.
pub fn normalize_company_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.to_lowercase().chars() {
        match c {
            'ä' => out.push_str("ae"),
            'ö' => out.push_str("oe"),
            'ü' => out.push_str("ue"),
            'ß' => out.push_str("ss"),
            // "e.k." must collapse to "ek" before tokenizing.
            '.' => {}
            c if c.is_alphanumeric() => out.push(c),
            _ => out.push(' '),
        }
    }

    out.split_whitespace()
        .filter(|t| !LEGAL_FORMS.contains(t))
        .collect::<Vec<_>>()
        .join(" ")
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 0.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

/// Compares sorted intersection/remainder strings so word order and extra words matter less.
fn token_set_similarity(a: &str, b: &str) -> f64 {
    let ta: BTreeSet<&str> = a.split_whitespace().collect();
    let tb: BTreeSet<&str> = b.split_whitespace().collect();
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }

    let join = |set: BTreeSet<&str>| set.into_iter().collect::<Vec<_>>().join(" ");
    let common = join(ta.intersection(&tb).copied().collect());
    if common.is_empty() {
        return 0.0;
    }
    let with_rest = |rest: BTreeSet<&str>| {
        let rest = join(rest);
        if rest.is_empty() {
            common.clone()
        } else {
            format!("{common} {rest}")
        }
    };
    let full_a = with_rest(ta.difference(&tb).copied().collect());
    let full_b = with_rest(tb.difference(&ta).copied().collect());

    levenshtein_similarity(&common, &full_a)
        .max(levenshtein_similarity(&common, &full_b))
        .max(levenshtein_similarity(&full_a, &full_b))
}

/// Similarity of two raw company names in `0.0..=1.0`.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_company_name(a);
    let b = normalize_company_name(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    levenshtein_similarity(&a, &b).max(token_set_similarity(&a, &b))
}

fn normalize_vat(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn score(query: &MatchQuery, candidate: &MatchCandidate) -> f64 {
    let same = |q: &Option<String>, c: &Option<String>, norm: fn(&str) -> String| match (q, c) {
        (Some(q), Some(c)) => {
            let q = norm(q);
            !q.is_empty() && q == norm(c)
        }
        _ => false,
    };
    if same(&query.iban, &candidate.iban, normalize_iban)
        || same(&query.vat_id, &candidate.vat_id, normalize_vat)
    {
        return 1.0;
    }

    query
        .name
        .as_deref()
        .map(|name| name_similarity(name, &candidate.name))
        .unwrap_or(0.0)
}

/// Candidates scoring at least `threshold`, best first. Archived customers never match.
pub fn find_matches(query: &MatchQuery, candidates: &[MatchCandidate], threshold: f64) -> Vec<CustomerMatch> {
    let mut matches: Vec<CustomerMatch> = candidates
        .iter()
        .filter(|c| c.status == CustomerStatus::Active)
        .filter_map(|c| {
            let score = score(query, c);
            (score >= threshold).then(|| CustomerMatch {
                customer_id: c.customer_id,
                name: c.name.clone(),
                score: (score * 100.0).round() / 100.0,
            })
        })
        .collect();

    matches.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.name.cmp(&b.name))
    });
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn candidate(name: &str) -> MatchCandidate {
        MatchCandidate {
            customer_id: CustomerId::generate(),
            name: name.to_string(),
            iban: None,
            vat_id: None,
            status: CustomerStatus::Active,
        }
    }

    #[test]
    fn normalization_strips_legal_forms_and_umlauts() {
        assert_eq!(normalize_company_name("Müller & Söhne GmbH"), "mueller soehne");
        assert_eq!(normalize_company_name("Bäckerei Groß e.K."), "baeckerei gross");
        assert_eq!(normalize_company_name("ACME Ltd."), "acme");
        assert_eq!(
            normalize_company_name("Schmidt UG (haftungsbeschränkt)"),
            "schmidt"
        );
    }

    #[test]
    fn legal_form_differences_still_match_exactly() {
        assert_eq!(name_similarity("Acme GmbH", "ACME AG"), 1.0);
    }

    #[test]
    fn word_order_is_forgiven_by_token_set() {
        let s = name_similarity("Hans Meier Consulting", "Consulting Hans Meier GmbH");
        assert!(s >= 0.99, "{s}");
    }

    #[test]
    fn typos_score_high_but_unrelated_names_low() {
        assert!(name_similarity("Mustermann Bau", "Musterman Bau") > 0.9);
        assert!(name_similarity("Mustermann Bau", "Elektro Schulze") < 0.5);
    }

    #[test]
    fn iban_hit_scores_one_and_archived_are_excluded() {
        let mut a = candidate("Completely Different");
        a.iban = Some("DE02120300000000202051".into());
        let mut archived = candidate("Acme");
        archived.status = CustomerStatus::Archived;

        let query = MatchQuery {
            name: Some("Acme".into()),
            iban: Some("de02 1203 0000 0000 2020 51".into()),
            vat_id: None,
        };
        let hits = find_matches(&query, &[a.clone(), archived], DEFAULT_THRESHOLD);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].customer_id, a.customer_id);
        assert_eq!(hits[0].score, 1.0);
    }

    #[test]
    fn results_are_sorted_best_first_and_thresholded() {
        let cs = vec![candidate("Acme Trading"), candidate("Acme"), candidate("Globex")];
        let query = MatchQuery {
            name: Some("ACME GmbH".into()),
            ..MatchQuery::default()
        };
        let hits = find_matches(&query, &cs, DEFAULT_THRESHOLD);
        assert_eq!(hits[0].name, "Acme");
        assert!(hits.iter().all(|h| h.score >= DEFAULT_THRESHOLD));
        assert!(hits.iter().all(|h| h.name != "Globex"));
    }

    proptest! {
        #[test]
        fn similarity_is_bounded_and_symmetric(a in "[a-zA-Z ]{0,20}", b in "[a-zA-Z ]{0,20}") {
            let ab = name_similarity(&a, &b);
            let ba = name_similarity(&b, &a);
            prop_assert!((0.0..=1.0).contains(&ab));
            prop_assert!((ab - ba).abs() < 1e-9);
        }
    }
}
