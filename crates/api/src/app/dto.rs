//! JSON mapping helpers for REST responses. GraphQL has its own types.

use serde_json::{Value as JsonValue, json};

use kontor_banking::BankAccount;
use kontor_core::{AggregateRoot, Money};
use kontor_invoicing::ImportedInvoice;

use crate::app::services::StatementImport;

pub fn money_to_json(money: Money) -> JsonValue {
    json!({
        "cents": money.cents,
        "currency": money.currency.as_str(),
        "formatted": money.to_string(),
    })
}

pub fn imported_invoice_to_json(record: &ImportedInvoice) -> JsonValue {
    let file = record.file();
    json!({
        "id": record.id().to_string(),
        "filename": file.map(|f| f.filename.as_str()),
        "kind": file.map(|f| f.kind),
        "content_hash": file.map(|f| f.content_hash.as_str()),
        "size_bytes": file.map(|f| f.size_bytes),
        "status": record.status().as_str(),
        "attempts": record.attempts(),
        "source": record.source(),
        "extracted": record.extracted(),
        "failure_reason": record.failure_reason(),
        "suggested_customer": record.suggested_customer(),
        "confirmed": record.confirmed(),
        "uploaded_at": record.uploaded_at(),
    })
}

pub fn bank_account_to_json(account: &BankAccount) -> JsonValue {
    let details = account.details();
    json!({
        "id": account.id().to_string(),
        "name": details.map(|d| d.name.as_str()),
        "iban": details.map(|d| d.iban.as_str()),
        "balance": money_to_json(account.balance()),
        "balance_date": account.balance_date(),
    })
}

pub fn statement_import_to_json(result: &StatementImport) -> JsonValue {
    json!({
        "summary": result.summary,
        "patterns": result.patterns,
        "account": bank_account_to_json(&result.account),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_renders_cents_and_plain_format() {
        let json = money_to_json(Money::eur(123_456));
        assert_eq!(json["cents"], 123_456);
        assert_eq!(json["currency"], "EUR");
        assert_eq!(json["formatted"], "1234.56 EUR");
    }
}
