//! Funder mentions and grant numbers in acknowledgement text.
//!
//! Grant numbers are tried family by family, most specific first:
//!
//! 1. `RSG-03-098-08-EFS` (long form with program suffix)
//! 2. `RSG-03-098-08 (EFS)` (suffix in parentheses)
//! 3. `RSG-03-098-08` (short form)
//! 4. `American Cancer Society (IRG-58-012)`, the parenthesised funder mention
//!
//! The first family with a hit wins and its leftmost hit is returned. Parenthesised
//! mentions are the exception: every one holding a digit is kept, joined with `&`.

use regex::Regex;
use std::sync::LazyLock;

use crate::utils::replace_unprintable;

static GRANT_LONG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Z]{2,5}[- ][0-9]{2}-[0-9]{3}-[0-9]{2}-[A-Z]{2,5}").unwrap()
});

static GRANT_PAREN_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Z]{2,5}[- ][0-9]{2}-[0-9]{3}-[0-9]{2}\s?\([A-Z]{2,5}\)").unwrap()
});

static GRANT_SHORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Z]{2,5}[- ][0-9]{2}-[0-9]{3}-[0-9]{2}").unwrap());

static FUNDER_PARENTHESISED: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"American Cancer Society \(([^)]*)\)").unwrap(),
        Regex::new(r"American Cancer Society grant \(([^)]*)\)").unwrap(),
        Regex::new(r"ACS grant \(([^)]*)\)").unwrap(),
    ]
});

const FUNDER_NAMES: [&str; 3] = [
    "American Cancer Society",
    "American cancer society",
    "american cancer society",
];

const FUNDER_ABBREVIATION: &str = " ACS ";

/// How a text refers to the funder, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunderMention {
    FullName,
    Abbreviation,
    Absent,
}

impl FunderMention {
    pub fn is_present(self) -> bool {
        self != FunderMention::Absent
    }
}

/// Checks whether `text` names the funder. The full name takes precedence.
pub fn funder_mention(text: &str) -> FunderMention {
    if FUNDER_NAMES.iter().any(|name| text.contains(name)) {
        FunderMention::FullName
    } else if text.contains(FUNDER_ABBREVIATION) {
        FunderMention::Abbreviation
    } else {
        FunderMention::Absent
    }
}

/// Finds the grant number in acknowledgement or abstract text.
pub fn extract_grant_number(text: &str) -> Option<String> {
    let found = [&*GRANT_LONG, &*GRANT_PAREN_SUFFIX, &*GRANT_SHORT]
        .into_iter()
        .find_map(|pattern| pattern.find(text).map(|m| m.as_str().to_string()))
        .or_else(|| parenthesised_grant(text))?;

    Some(replace_unprintable(&found, "-"))
}

/// Parenthesised funder mentions holding a digit, joined with `&`.
///
/// Later mention forms are only tried when the earlier form does not occur at all.
fn parenthesised_grant(text: &str) -> Option<String> {
    let pattern = FUNDER_PARENTHESISED
        .iter()
        .find(|pattern| pattern.is_match(text))?;

    let numbers: Vec<_> = pattern
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|inner| inner.as_str())
        .filter(|inner| inner.chars().any(|c| c.is_ascii_digit()))
        .collect();
    (!numbers.is_empty()).then(|| numbers.join("&"))
}
