//! Invoice number schemes.
//!
//! A scheme is a pattern such as `RE-{YYYY}-{NUMBER:4}`, a counter and a reset period.
//! Allocation is pure here; the stores in `kontor-infra` serialize it per tenant.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use kontor_core::DomainError;

pub const DEFAULT_PATTERN: &str = "RE-{YYYY}-{NUMBER:4}";
const DEFAULT_WIDTH: usize = 4;
const MAX_WIDTH: usize = 12;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NumberingError {
    #[error("invalid number pattern: {0}")]
    InvalidPattern(String),

    /// Issuing into a period before the last issued number would reuse numbers.
    #[error("cannot allocate a number for {requested}: numbers were already issued for {current}")]
    Backdated { requested: PeriodKey, current: PeriodKey },

    #[error("start value must be at least 1")]
    InvalidStart,

    #[error("number counter overflow")]
    Overflow,
}

impl From<NumberingError> for DomainError {
    fn from(value: NumberingError) -> Self {
        match value {
            NumberingError::Backdated { .. } => DomainError::conflict(value.to_string()),
            NumberingError::Overflow => DomainError::invariant(value.to_string()),
            NumberingError::InvalidPattern(_) | NumberingError::InvalidStart => {
                DomainError::validation(value.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResetPeriod {
    Never,
    #[default]
    Yearly,
    Monthly,
}

impl ResetPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetPeriod::Never => "never",
            ResetPeriod::Yearly => "yearly",
            ResetPeriod::Monthly => "monthly",
        }
    }

    /// Period `date` falls into; `None` when the counter never resets.
    pub fn key_for(&self, date: NaiveDate) -> Option<PeriodKey> {
        match self {
            ResetPeriod::Never => None,
            ResetPeriod::Yearly => Some(PeriodKey {
                year: date.year(),
                month: None,
            }),
            ResetPeriod::Monthly => Some(PeriodKey {
                year: date.year(),
                month: Some(date.month()),
            }),
        }
    }
}

impl FromStr for ResetPeriod {
    type Err = NumberingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "never" => Ok(ResetPeriod::Never),
            "yearly" => Ok(ResetPeriod::Yearly),
            "monthly" => Ok(ResetPeriod::Monthly),
            other => Err(NumberingError::InvalidPattern(format!("unknown reset period '{other}'"))),
        }
    }
}

/// Counter period: `2024` (yearly) or `2024-03` (monthly).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeriodKey {
    pub year: i32,
    pub month: Option<u32>,
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.month {
            Some(m) => write!(f, "{:04}-{:02}", self.year, m),
            None => write!(f, "{:04}", self.year),
        }
    }
}

impl FromStr for PeriodKey {
    type Err = NumberingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || NumberingError::InvalidPattern(format!("invalid period key '{s}'"));
        let (year, month) = match s.split_once('-') {
            Some((y, m)) => {
                let m: u32 = m.parse().map_err(|_| invalid())?;
                if !(1..=12).contains(&m) {
                    return Err(invalid());
                }
                (y, Some(m))
            }
            None => (s, None),
        };
        Ok(PeriodKey {
            year: year.parse().map_err(|_| invalid())?,
            month,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Year4,
    Year2,
    Month,
    Day,
    Number { width: usize },
}

/// Parsed number pattern. Serializes as its source string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NumberPattern {
    raw: String,
    tokens: Vec<Token>,
}

impl NumberPattern {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn format(&self, date: NaiveDate, number: u64) -> String {
        let mut out = String::with_capacity(self.raw.len() + 8);
        for token in &self.tokens {
            match token {
                Token::Literal(s) => out.push_str(s),
                Token::Year4 => out.push_str(&format!("{:04}", date.year())),
                Token::Year2 => out.push_str(&format!("{:02}", date.year().rem_euclid(100))),
                Token::Month => out.push_str(&format!("{:02}", date.month())),
                Token::Day => out.push_str(&format!("{:02}", date.day())),
                Token::Number { width } => out.push_str(&format!("{number:0width$}")),
            }
        }
        out
    }
}

impl Default for NumberPattern {
    fn default() -> Self {
        Self {
            raw: DEFAULT_PATTERN.to_string(),
            tokens: vec![
                Token::Literal("RE-".into()),
                Token::Year4,
                Token::Literal("-".into()),
                Token::Number { width: DEFAULT_WIDTH },
            ],
        }
    }
}

fn parse_token(name: &str) -> Result<Token, NumberingError> {
    let invalid = |msg: String| NumberingError::InvalidPattern(msg);
    match name {
        "YYYY" => Ok(Token::Year4),
        "YY" => Ok(Token::Year2),
        "MM" => Ok(Token::Month),
        "DD" => Ok(Token::Day),
        "NUMBER" => Ok(Token::Number { width: DEFAULT_WIDTH }),
        other => {
            let Some(width) = other.strip_prefix("NUMBER:") else {
                return Err(invalid(format!("unknown token '{{{other}}}'")));
            };
            let width: usize = width
                .parse()
                .map_err(|_| invalid(format!("invalid number width '{width}'")))?;
            if !(1..=MAX_WIDTH).contains(&width) {
                return Err(invalid(format!("number width must be 1..={MAX_WIDTH}")));
            }
            Ok(Token::Number { width })
        }
    }
}

impl FromStr for NumberPattern {
    type Err = NumberingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(NumberingError::InvalidPattern("pattern cannot be empty".into()));
        }

        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut rest = raw;
        while let Some(open) = rest.find('{') {
            literal.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after
                .find('}')
                .ok_or_else(|| NumberingError::InvalidPattern("unterminated '{'".into()))?;
            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
            tokens.push(parse_token(&after[..close])?);
            rest = &after[close + 1..];
        }
        if rest.contains('}') {
            return Err(NumberingError::InvalidPattern("unmatched '}'".into()));
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        let numbers = tokens.iter().filter(|t| matches!(t, Token::Number { .. })).count();
        if numbers != 1 {
            return Err(NumberingError::InvalidPattern(
                "pattern needs exactly one {NUMBER} token".into(),
            ));
        }

        Ok(Self {
            raw: raw.to_string(),
            tokens,
        })
    }
}

impl TryFrom<String> for NumberPattern {
    type Error = NumberingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NumberPattern> for String {
    fn from(value: NumberPattern) -> Self {
        value.raw
    }
}

/// Requested change to a tenant's scheme.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchemeUpdate {
    pub pattern: Option<NumberPattern>,
    pub reset_period: Option<ResetPeriod>,
    pub reset_counter: bool,
    /// Next number to issue.
    pub start_at: Option<u64>,
}

/// One tenant's invoice number scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NumberScheme {
    pub pattern: NumberPattern,
    pub reset_period: ResetPeriod,
    /// Last issued number in the current period.
    pub counter: u64,
    /// Period of the last issued number.
    pub period_key: Option<PeriodKey>,
}

impl NumberScheme {
    pub fn new(pattern: NumberPattern, reset_period: ResetPeriod) -> Self {
        Self {
            pattern,
            reset_period,
            counter: 0,
            period_key: None,
        }
    }

    /// Counter value `allocate(date)` would issue, plus the period it belongs to.
    fn next_for(&self, date: NaiveDate) -> Result<(u64, Option<PeriodKey>), NumberingError> {
        let key = self.reset_period.key_for(date);
        let base = match (key, self.period_key) {
            (Some(requested), Some(current)) if requested < current => {
                return Err(NumberingError::Backdated { requested, current });
            }
            (Some(requested), Some(current)) if requested > current => 0,
            _ => self.counter,
        };
        let next = base.checked_add(1).ok_or(NumberingError::Overflow)?;
        Ok((next, key))
    }

    pub fn preview(&self, date: NaiveDate) -> Result<String, NumberingError> {
        let (next, _) = self.next_for(date)?;
        Ok(self.pattern.format(date, next))
    }

    pub fn allocate(&mut self, date: NaiveDate) -> Result<String, NumberingError> {
        let (next, key) = self.next_for(date)?;
        self.counter = next;
        if key.is_some() {
            self.period_key = key;
        }
        Ok(self.pattern.format(date, next))
    }

    pub fn configure(&mut self, update: SchemeUpdate) -> Result<(), NumberingError> {
        if update.start_at == Some(0) {
            return Err(NumberingError::InvalidStart);
        }
        if let Some(pattern) = update.pattern {
            self.pattern = pattern;
        }
        if let Some(reset) = update.reset_period {
            if reset != self.reset_period {
                // A stored key from another granularity is meaningless.
                self.period_key = None;
            }
            self.reset_period = reset;
        }
        if update.reset_counter {
            self.counter = 0;
        }
        if let Some(start) = update.start_at {
            self.counter = start - 1;
        }
        Ok(())
    }
}
