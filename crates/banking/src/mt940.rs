//! MT940 (SWIFT customer statement) parser, including the German `:86:` structure.
//!
//! A file holds one or more statements. Fields start with `:TAG:` at the beginning of
//! a line; any other line continues the previous field. A line consisting of `-`
//! closes a statement, and so does a new `:20:`.

use std::borrow::Cow;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use kontor_core::Currency;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Mt940Error {
    #[error("no statements found")]
    NoStatements,

    #[error("line {line}: invalid :{tag}: field: {reason}")]
    InvalidField { tag: String, line: usize, reason: String },

    #[error("statement {statement} has no :{tag}: field")]
    MissingField { tag: &'static str, statement: usize },
}

/// Opening, closing or available balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub date: NaiveDate,
    pub currency: Currency,
    /// Signed cents.
    pub amount: i64,
}

/// Debit/credit mark of a statement line. Reversals flip the direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryMark {
    Credit,
    Debit,
    ReversalCredit,
    ReversalDebit,
}

impl EntryMark {
    pub fn sign(&self) -> i64 {
        match self {
            EntryMark::Credit | EntryMark::ReversalDebit => 1,
            EntryMark::Debit | EntryMark::ReversalCredit => -1,
        }
    }
}

/// Content of a `:86:` field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDetails {
    /// Business transaction code (GVC), structured form only.
    pub code: Option<String>,
    pub booking_text: Option<String>,
    pub purpose: Option<String>,
    pub counterparty_bic: Option<String>,
    /// IBAN or legacy account number.
    pub counterparty_account: Option<String>,
    pub counterparty_name: Option<String>,
}

/// One `:61:` line with its `:86:` details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementLine {
    pub value_date: NaiveDate,
    pub entry_date: Option<NaiveDate>,
    pub mark: EntryMark,
    pub funds_code: Option<char>,
    /// Signed cents.
    pub amount: i64,
    pub transaction_type: String,
    pub customer_reference: Option<String>,
    pub bank_reference: Option<String>,
    pub supplementary: Option<String>,
    pub details: TransactionDetails,
}

impl StatementLine {
    /// Entry date if the bank sent one, else the value date.
    pub fn booking_date(&self) -> NaiveDate {
        self.entry_date.unwrap_or(self.value_date)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub reference: String,
    pub account_id: String,
    pub statement_number: Option<String>,
    pub opening: Option<Balance>,
    pub closing: Option<Balance>,
    pub available: Option<Balance>,
    pub lines: Vec<StatementLine>,
}

impl Statement {
    pub fn currency(&self) -> Option<Currency> {
        self.opening.or(self.closing).map(|b| b.currency)
    }

    /// `closing - (opening + Σ lines)` when both balances exist and disagree.
    ///
    /// Summed in i128; a difference beyond the i64 range saturates.
    pub fn balance_mismatch(&self) -> Option<i64> {
        let (opening, closing) = (self.opening?, self.closing?);
        let movement: i128 = self.lines.iter().map(|l| i128::from(l.amount)).sum();
        let diff = i128::from(closing.amount) - (i128::from(opening.amount) + movement);
        if diff == 0 {
            return None;
        }
        Some(i64::try_from(diff).unwrap_or(if diff > 0 { i64::MAX } else { i64::MIN }))
    }

    fn is_empty(&self) -> bool {
        self.reference.is_empty() && self.account_id.is_empty() && self.lines.is_empty() && self.opening.is_none()
    }
}

/// UTF-8 if valid, otherwise ISO-8859-1 (every byte is a code point).
pub fn decode(bytes: &[u8]) -> Cow<'_, str> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => Cow::Borrowed(s),
        Err(_) => Cow::Owned(bytes.iter().map(|&b| char::from(b)).collect()),
    }
}

pub fn parse_bytes(bytes: &[u8]) -> Result<Vec<Statement>, Mt940Error> {
    parse(&decode(bytes))
}

struct Field<'a> {
    tag: &'a str,
    value: String,
    line: usize,
}

/// `:20:` → `("20", rest)`; tags are two digits plus an optional letter.
fn split_tag(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix(':')?;
    let end = rest.find(':')?;
    let tag = &rest[..end];
    let valid = (2..=3).contains(&tag.len())
        && tag.bytes().take(2).all(|b| b.is_ascii_digit())
        && tag.bytes().skip(2).all(|b| b.is_ascii_uppercase());
    valid.then(|| (tag, &rest[end + 1..]))
}

enum Token<'a> {
    Field(Field<'a>),
    End,
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut current: Option<Field<'_>> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        let trimmed = line.trim();
        if trimmed == "-" || trimmed.starts_with("-}") {
            if let Some(f) = current.take() {
                tokens.push(Token::Field(f));
            }
            tokens.push(Token::End);
        } else if let Some((tag, value)) = split_tag(line) {
            if let Some(f) = current.take() {
                tokens.push(Token::Field(f));
            }
            current = Some(Field {
                tag,
                value: value.to_string(),
                line: idx + 1,
            });
        } else if let Some(f) = current.as_mut() {
            f.value.push('\n');
            f.value.push_str(line);
        }
        // Anything before the first tag (SWIFT header blocks, blank lines) is skipped.
    }
    if let Some(f) = current {
        tokens.push(Token::Field(f));
    }
    tokens
}

fn finish(current: &mut Statement, statements: &mut Vec<Statement>) -> Result<(), Mt940Error> {
    let stmt = std::mem::take(current);
    if stmt.is_empty() {
        return Ok(());
    }
    if stmt.account_id.is_empty() {
        return Err(Mt940Error::MissingField {
            tag: "25",
            statement: statements.len() + 1,
        });
    }
    statements.push(stmt);
    Ok(())
}

pub fn parse(text: &str) -> Result<Vec<Statement>, Mt940Error> {
    let mut statements = Vec::new();
    let mut current = Statement::default();

    for token in tokenize(text) {
        let field = match token {
            Token::End => {
                finish(&mut current, &mut statements)?;
                continue;
            }
            Token::Field(f) => f,
        };
        let invalid = |reason: &str| Mt940Error::InvalidField {
            tag: field.tag.to_string(),
            line: field.line,
            reason: reason.to_string(),
        };
        let single = field.value.trim();

        match field.tag {
            "20" => {
                finish(&mut current, &mut statements)?;
                current.reference = single.to_string();
            }
            "25" => current.account_id = single.to_string(),
            "28C" | "28" => current.statement_number = Some(single.to_string()),
            "60F" | "60M" => current.opening = Some(parse_balance(single).map_err(invalid)?),
            "62F" | "62M" => current.closing = Some(parse_balance(single).map_err(invalid)?),
            "64" => current.available = Some(parse_balance(single).map_err(invalid)?),
            "61" => {
                let line = parse_statement_line(&field.value).map_err(invalid)?;
                current.lines.push(line);
            }
            "86" => {
                // Statement-level information without a preceding :61: is dropped.
                if let Some(line) = current.lines.last_mut() {
                    line.details = parse_details(&field.value);
                }
            }
            _ => {}
        }
    }
    finish(&mut current, &mut statements)?;

    if statements.is_empty() {
        return Err(Mt940Error::NoStatements);
    }
    Ok(statements)
}

fn parse_yymmdd(s: &str) -> Option<NaiveDate> {
    if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let yy: i32 = s[0..2].parse().ok()?;
    let year = if yy < 80 { 2000 + yy } else { 1900 + yy };
    NaiveDate::from_ymd_opt(year, s[2..4].parse().ok()?, s[4..6].parse().ok()?)
}

/// `MMDD` placed in the year closest to `value_date`.
fn infer_entry_date(value_date: NaiveDate, mmdd: &str) -> Option<NaiveDate> {
    let month: u32 = mmdd.get(0..2)?.parse().ok()?;
    let day: u32 = mmdd.get(2..4)?.parse().ok()?;
    [value_date.year() - 1, value_date.year(), value_date.year() + 1]
        .into_iter()
        .filter_map(|y| NaiveDate::from_ymd_opt(y, month, day))
        .min_by_key(|d| (*d - value_date).num_days().abs())
}

/// Decimal comma amount (`1234,56`, `1234,`, `0,5`) in cents.
fn parse_amount(s: &str) -> Option<i64> {
    let (whole, frac) = s.split_once(',').unwrap_or((s, ""));
    if whole.is_empty() || frac.len() > 2 || !whole.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    let frac = format!("{frac:0<2}");
    whole.parse::<i64>().ok()?.checked_mul(100)?.checked_add(frac.parse().ok()?)
}

fn parse_balance(s: &str) -> Result<Balance, &'static str> {
    let sign = match s.get(0..1) {
        Some("C") => 1,
        Some("D") => -1,
        _ => return Err("balance must start with C or D"),
    };
    let date = s.get(1..7).and_then(parse_yymmdd).ok_or("invalid balance date")?;
    let currency: Currency = s
        .get(7..10)
        .ok_or("missing currency")?
        .parse()
        .map_err(|_| "invalid currency")?;
    let amount = s.get(10..).and_then(|a| parse_amount(a.trim())).ok_or("invalid amount")?;
    Ok(Balance {
        date,
        currency,
        amount: sign * amount,
    })
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn parse_statement_line(value: &str) -> Result<StatementLine, &'static str> {
    let mut lines = value.lines();
    let s = lines.next().unwrap_or_default().trim();
    let supplementary = non_empty(&lines.map(str::trim).collect::<Vec<_>>().join(" "));

    let value_date = s.get(0..6).and_then(parse_yymmdd).ok_or("invalid value date")?;
    let mut pos = 6;

    let mut entry_date = None;
    if s.get(pos..pos + 1).is_some_and(|c| c.bytes().all(|b| b.is_ascii_digit())) {
        let mmdd = s.get(pos..pos + 4).ok_or("truncated entry date")?;
        entry_date = Some(infer_entry_date(value_date, mmdd).ok_or("invalid entry date")?);
        pos += 4;
    }

    let rest = s.get(pos..).ok_or("truncated line")?;
    let (mark, len) = if rest.starts_with("RC") {
        (EntryMark::ReversalCredit, 2)
    } else if rest.starts_with("RD") {
        (EntryMark::ReversalDebit, 2)
    } else if rest.starts_with('C') {
        (EntryMark::Credit, 1)
    } else if rest.starts_with('D') {
        (EntryMark::Debit, 1)
    } else {
        return Err("missing debit/credit mark");
    };
    pos += len;

    let mut funds_code = None;
    if let Some(c) = s[pos..].chars().next().filter(|c| c.is_ascii_alphabetic()) {
        funds_code = Some(c);
        pos += 1;
    }

    let amount_len = s[pos..]
        .bytes()
        .take_while(|b| b.is_ascii_digit() || *b == b',')
        .count();
    let amount = parse_amount(&s[pos..pos + amount_len]).ok_or("invalid amount")?;
    pos += amount_len;

    let transaction_type = s.get(pos..pos + 4).ok_or("missing transaction type")?;
    if !transaction_type.starts_with(['N', 'F', 'S']) {
        return Err("transaction type must start with N, F or S");
    }
    pos += 4;

    let refs = &s[pos..];
    let (customer_reference, bank_reference) = match refs.split_once("//") {
        Some((c, b)) => (non_empty(c), non_empty(b)),
        None => (non_empty(refs), None),
    };

    Ok(StatementLine {
        value_date,
        entry_date,
        mark,
        funds_code,
        amount: mark.sign() * amount,
        transaction_type: transaction_type.to_string(),
        customer_reference,
        bank_reference,
        supplementary,
        details: TransactionDetails::default(),
    })
}

/// Parse a `:86:` value, structured (`166?00GUTSCHRIFT?20...`) or free text.
pub fn parse_details(raw: &str) -> TransactionDetails {
    // Structured fields wrap at fixed widths, so continuation lines are glued back together.
    let text: String = raw.lines().map(|l| l.trim_end_matches('\r')).collect();
    let text = text.trim();

    let structured = text.len() > 4
        && text.as_bytes()[..3].iter().all(|b| b.is_ascii_digit())
        && text.as_bytes()[3].is_ascii_punctuation();
    if !structured {
        let purpose = raw.lines().map(str::trim).filter(|l| !l.is_empty()).collect::<Vec<_>>().join(" ");
        return TransactionDetails {
            purpose: non_empty(&purpose),
            ..TransactionDetails::default()
        };
    }

    let sep = char::from(text.as_bytes()[3]);
    let mut details = TransactionDetails {
        code: Some(text[..3].to_string()),
        ..TransactionDetails::default()
    };
    let mut purpose: Vec<&str> = Vec::new();
    let mut name = String::new();

    for part in text[4..].split(sep) {
        let Some(key) = part.get(0..2).and_then(|k| k.parse::<u8>().ok()) else {
            continue;
        };
        let value = &part[2..];
        match key {
            0 => details.booking_text = non_empty(value),
            20..=29 | 60..=63 => purpose.push(value.trim()),
            30 => details.counterparty_bic = non_empty(value),
            31 => details.counterparty_account = non_empty(value),
            32 | 33 => name.push_str(value),
            _ => {}
        }
    }

    let purpose = purpose
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    details.purpose = non_empty(&purpose);
    details.counterparty_name = non_empty(&name);
    details
}
