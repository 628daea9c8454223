//! Money value object: integer cents + ISO currency code.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::value_object::ValueObject;

/// ISO 4217 currency code (three uppercase ASCII letters).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency([u8; 3]);

impl Currency {
    pub const EUR: Currency = Currency(*b"EUR");

    pub fn as_str(&self) -> &str {
        // Constructed only from validated ASCII.
        core::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::EUR
    }
}

impl FromStr for Currency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bytes = s.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_alphabetic()) {
            return Err(DomainError::validation(format!("invalid currency code '{s}'")));
        }
        let mut code = [0u8; 3];
        for (dst, src) in code.iter_mut().zip(bytes) {
            *dst = src.to_ascii_uppercase();
        }
        Ok(Self(code))
    }
}

impl TryFrom<String> for Currency {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signed amount in the smallest currency unit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    pub cents: i64,
    pub currency: Currency,
}

impl ValueObject for Money {}

impl Money {
    pub fn new(cents: i64, currency: Currency) -> Self {
        Self { cents, currency }
    }

    pub fn eur(cents: i64) -> Self {
        Self::new(cents, Currency::EUR)
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(0, currency)
    }

    pub fn is_negative(&self) -> bool {
        self.cents < 0
    }

    pub fn checked_add(self, other: Money) -> Result<Money, DomainError> {
        self.ensure_same_currency(other)?;
        let cents = self
            .cents
            .checked_add(other.cents)
            .ok_or_else(|| DomainError::invariant("money overflow"))?;
        Ok(Money::new(cents, self.currency))
    }

    pub fn checked_sub(self, other: Money) -> Result<Money, DomainError> {
        self.ensure_same_currency(other)?;
        let cents = self
            .cents
            .checked_sub(other.cents)
            .ok_or_else(|| DomainError::invariant("money overflow"))?;
        Ok(Money::new(cents, self.currency))
    }

    fn ensure_same_currency(&self, other: Money) -> Result<(), DomainError> {
        if self.currency != other.currency {
            return Err(DomainError::validation(format!(
                "currency mismatch ({} vs {})",
                self.currency, other.currency
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.unsigned_abs();
        write!(f, "{sign}{}.{:02} {}", abs / 100, abs % 100, self.currency)
    }
}

/// Quantity in thousandths of a unit (`1.5` hours is `1500`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(i64);

impl ValueObject for Quantity {}

impl Quantity {
    pub const ONE: Quantity = Quantity(1_000);

    pub fn from_milli(milli: i64) -> Self {
        Self(milli)
    }

    pub fn units(units: i64) -> Self {
        Self(units.saturating_mul(1_000))
    }

    pub fn milli(&self) -> i64 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// `unit_cents × quantity`, rounded half away from zero to whole cents.
    pub fn times_cents(&self, unit_cents: i64) -> Option<i64> {
        let product = (unit_cents as i128).checked_mul(self.0 as i128)?;
        let rounded = if product >= 0 {
            (product + 500) / 1_000
        } else {
            (product - 500) / 1_000
        };
        i64::try_from(rounded).ok()
    }
}

impl FromStr for Quantity {
    type Err = DomainError;

    /// Accepts `2`, `1.5`, `0,25` (at most three decimals).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::validation(format!("invalid quantity '{s}'"));
        let t = s.trim().replace(',', ".");
        let (neg, t) = match t.strip_prefix('-') {
            Some(rest) => (true, rest.to_string()),
            None => (false, t),
        };
        let (whole, frac) = t.split_once('.').unwrap_or((t.as_str(), ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if frac.len() > 3
            || !whole.chars().all(|c| c.is_ascii_digit())
            || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }
        let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| invalid())? };
        let frac_milli: i64 = if frac.is_empty() {
            0
        } else {
            format!("{frac:0<3}").parse().map_err(|_| invalid())?
        };
        let milli = whole
            .checked_mul(1_000)
            .and_then(|w| w.checked_add(frac_milli))
            .ok_or_else(invalid)?;
        Ok(Self(if neg { -milli } else { milli }))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let frac = abs % 1_000;
        if frac == 0 {
            write!(f, "{sign}{}", abs / 1_000)
        } else {
            let frac = format!("{frac:03}");
            write!(f, "{sign}{}.{}", abs / 1_000, frac.trim_end_matches('0'))
        }
    }
}

/// Share of `amount` at `rate_bp` basis points (1900 = 19 %), rounded half away from zero.
pub fn basis_points_of(amount: i64, rate_bp: u32) -> Option<i64> {
    let product = (amount as i128).checked_mul(rate_bp as i128)?;
    let half = 5_000i128;
    let rounded = if product >= 0 {
        (product + half) / 10_000
    } else {
        (product - half) / 10_000
    };
    i64::try_from(rounded).ok()
}

/// Parse a human-written decimal amount into cents.
///
/// Accepts `1234.56`, `1234,56`, `1.234,56`, `1,234.56`, `-12`, `12,5` and a trailing or
/// leading currency symbol/code. The last `.` or `,` followed by one or two digits is the
/// decimal separator; every other separator is a thousands grouping.
pub fn parse_amount_cents(input: &str) -> Option<i64> {
    let cleaned: String = input
        .trim()
        .trim_matches(|c: char| c.is_alphabetic() || c == '€' || c == '$' || c.is_whitespace())
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\'')
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let (negative, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.strip_prefix('+').unwrap_or(&cleaned)),
    };

    let decimal_pos = digits.rfind(['.', ',']).filter(|&pos| {
        let frac = &digits[pos + 1..];
        (1..=2).contains(&frac.len()) && frac.chars().all(|c| c.is_ascii_digit())
    });

    let (int_part, frac_part) = match decimal_pos {
        Some(pos) => (&digits[..pos], &digits[pos + 1..]),
        None => (digits, ""),
    };

    let int_digits: String = int_part.chars().filter(|c| *c != '.' && *c != ',').collect();
    if int_digits.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let whole: i64 = if int_digits.is_empty() { 0 } else { int_digits.parse().ok()? };
    let frac: i64 = match frac_part.len() {
        0 => 0,
        1 => frac_part.parse::<i64>().ok()? * 10,
        _ => frac_part.parse().ok()?,
    };

    let cents = whole.checked_mul(100)?.checked_add(frac)?;
    Some(if negative { -cents } else { cents })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn display_formats_sign_and_cents() {
        assert_eq!(Money::eur(123456).to_string(), "1234.56 EUR");
        assert_eq!(Money::eur(-5).to_string(), "-0.05 EUR");
    }

    #[test]
    fn currency_mismatch_is_rejected() {
        let usd: Currency = "usd".parse().unwrap();
        assert_eq!(usd.as_str(), "USD");
        assert!(Money::eur(1).checked_add(Money::new(1, usd)).is_err());
    }

    #[test]
    fn basis_points_round_half_away_from_zero() {
        assert_eq!(basis_points_of(1000, 1900), Some(190));
        assert_eq!(basis_points_of(1, 5000), Some(1));
        assert_eq!(basis_points_of(-1, 5000), Some(-1));
        assert_eq!(basis_points_of(333, 700), Some(23));
    }

    #[test]
    fn parses_common_amount_spellings() {
        assert_eq!(parse_amount_cents("1234.56"), Some(123456));
        assert_eq!(parse_amount_cents("1234,56"), Some(123456));
        assert_eq!(parse_amount_cents("1.234,56"), Some(123456));
        assert_eq!(parse_amount_cents("1,234.56"), Some(123456));
        assert_eq!(parse_amount_cents("12,5"), Some(1250));
        assert_eq!(parse_amount_cents("-12"), Some(-1200));
        assert_eq!(parse_amount_cents("1.000"), Some(100000));
        assert_eq!(parse_amount_cents("99,00 €"), Some(9900));
        assert_eq!(parse_amount_cents("EUR 7.10"), Some(710));
        assert_eq!(parse_amount_cents("abc"), None);
        assert_eq!(parse_amount_cents(""), None);
    }

    #[test]
    fn quantities_parse_and_multiply() {
        let q: Quantity = "1,5".parse().unwrap();
        assert_eq!(q.milli(), 1_500);
        assert_eq!(q.to_string(), "1.5");
        assert_eq!(Quantity::units(3).to_string(), "3");
        assert_eq!("0.125".parse::<Quantity>().unwrap().times_cents(999), Some(125));
        assert_eq!(q.times_cents(333), Some(500));
        assert!("1.2345".parse::<Quantity>().is_err());
        assert!("x".parse::<Quantity>().is_err());
    }

    proptest! {
        #[test]
        fn german_spelling_parses_back(cents in 0i64..10_000_000_000) {
            let s = format!("{},{:02}", cents / 100, cents % 100);
            prop_assert_eq!(parse_amount_cents(&s), Some(cents));
        }

        #[test]
        fn add_then_sub_is_identity(a in -1_000_000_000i64..1_000_000_000, b in -1_000_000_000i64..1_000_000_000) {
            let sum = Money::eur(a).checked_add(Money::eur(b)).unwrap();
            prop_assert_eq!(sum.checked_sub(Money::eur(b)).unwrap(), Money::eur(a));
        }
    }
}
