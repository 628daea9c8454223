//! IBAN value object (ISO 13616, mod-97 checked).

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::value_object::ValueObject;

/// Validated IBAN in electronic form (uppercase, no spaces).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Iban(String);

impl ValueObject for Iban {}

impl Iban {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn country(&self) -> &str {
        &self.0[..2]
    }

    /// Groups of four for display (`DE02 1203 0000 ...`).
    pub fn formatted(&self) -> String {
        self.0
            .as_bytes()
            .chunks(4)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Strip whitespace and uppercase, without validating.
pub fn normalize_iban(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn mod97(iban: &str) -> Option<u32> {
    // Move country + check digits to the end, letters become 10..=35.
    let rearranged = iban[4..].chars().chain(iban[..4].chars());
    let mut rem: u32 = 0;
    for c in rearranged {
        let v = c.to_digit(36)?;
        rem = if v < 10 {
            (rem * 10 + v) % 97
        } else {
            (rem * 100 + v) % 97
        };
    }
    Some(rem)
}

impl FromStr for Iban {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let iban = normalize_iban(s);
        let shape_ok = (15..=34).contains(&iban.len())
            && iban.chars().all(|c| c.is_ascii_alphanumeric())
            && iban[..2].chars().all(|c| c.is_ascii_uppercase())
            && iban[2..4].chars().all(|c| c.is_ascii_digit());
        if !shape_ok {
            return Err(DomainError::validation(format!("malformed IBAN '{s}'")));
        }
        if iban.starts_with("DE") && iban.len() != 22 {
            return Err(DomainError::validation("German IBANs have 22 characters"));
        }
        if mod97(&iban) != Some(1) {
            return Err(DomainError::validation(format!("IBAN checksum failed for '{s}'")));
        }
        Ok(Self(iban))
    }
}

impl TryFrom<String> for Iban {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Iban> for String {
    fn from(value: Iban) -> Self {
        value.0
    }
}

impl fmt::Display for Iban {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_ibans_with_spaces() {
        let iban: Iban = "de02 1203 0000 0000 2020 51".parse().unwrap();
        assert_eq!(iban.as_str(), "DE02120300000000202051");
        assert_eq!(iban.country(), "DE");
        assert_eq!(iban.formatted(), "DE02 1203 0000 0000 2020 51");

        assert!("GB82WEST12345698765432".parse::<Iban>().is_ok());
    }

    #[test]
    fn rejects_bad_checksum_and_shape() {
        assert!("DE03120300000000202051".parse::<Iban>().is_err());
        assert!("DE0212030000000020205".parse::<Iban>().is_err());
        assert!("12345".parse::<Iban>().is_err());
        assert!("".parse::<Iban>().is_err());
    }
}
