use async_graphql::SimpleObject;

use kontor_core::Money as DomainMoney;

/// An amount in minor units.
#[derive(Debug, Clone, SimpleObject)]
pub struct Money {
    /// Signed amount in cents.
    pub cents: i64,
    /// ISO 4217 code.
    pub currency: String,
    /// Plain rendering, e.g. `1234.56 EUR`.
    pub formatted: String,
}

impl From<DomainMoney> for Money {
    fn from(money: DomainMoney) -> Self {
        Self {
            cents: money.cents,
            currency: money.currency.as_str().to_string(),
            formatted: money.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_negative_amounts() {
        let money = Money::from(DomainMoney::eur(-123_456));
        assert_eq!(money.cents, -123_456);
        assert_eq!(money.currency, "EUR");
        assert_eq!(money.formatted, "-1234.56 EUR");
    }
}
