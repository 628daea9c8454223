//! Reading ZUGFeRD / Factur-X invoices (UN/CEFACT Cross Industry Invoice XML).
//!
//! Only the header fields we import are read. Element names are matched with any
//! namespace prefix (`rsm:`, `ram:`, `udt:` or none).

use regex::Regex;

use kontor_core::parse_amount_cents;

use crate::extraction::{ExtractionError, InvoiceData, parse_date};

const ROOT: &str = "CrossIndustryInvoice";

/// Whether `xml` has a CII root element.
pub fn is_cii(xml: &str) -> bool {
    let head = xml.trim_start_matches('\u{feff}').trim_start();
    let mut rest = head;
    // Skip the prolog, comments and processing instructions.
    while let Some(tag) = rest.strip_prefix('<') {
        if tag.starts_with('?') || tag.starts_with('!') {
            match tag.find('>') {
                Some(end) => rest = tag[end + 1..].trim_start(),
                None => return false,
            }
            continue;
        }
        let name: String = tag
            .chars()
            .take_while(|c| !c.is_whitespace() && *c != '>' && *c != '/')
            .collect();
        let local = name.rsplit(':').next().unwrap_or(&name);
        return local == ROOT;
    }
    false
}

/// An uncompressed CII document embedded in a PDF (ZUGFeRD attachment), if any.
pub fn find_embedded_xml(pdf: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(pdf);
    let root_start = text
        .match_indices('<')
        .map(|(i, _)| i)
        .find(|&i| {
            let tag = &text[i + 1..];
            let name_end = tag
                .find(|c: char| c.is_whitespace() || c == '>')
                .unwrap_or(tag.len());
            tag[..name_end].rsplit(':').next() == Some(ROOT)
        })?;
    let start = text[..root_start].rfind("<?xml").unwrap_or(root_start);
    let close = text[root_start..]
        .match_indices("</")
        .map(|(i, _)| root_start + i)
        .filter(|&i| {
            let tag = &text[i + 2..];
            let end = tag.find('>').unwrap_or(tag.len());
            tag[..end].rsplit(':').next() == Some(ROOT)
        })
        .last()?;
    let end = close + text[close..].find('>')? + 1;
    Some(text[start..end].to_string())
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

/// Compiled element patterns. Build once and reuse.
pub struct CiiReader {
    invoice_number: Regex,
    issue_date: Regex,
    due_date: Regex,
    seller: Regex,
    name: Regex,
    vat_id: Regex,
    iban: Regex,
    currency: Regex,
    net: Regex,
    tax: Regex,
    gross: Regex,
}

/// `<prefix:Name attr...>` with an optional prefix.
fn el(name: &str) -> String {
    format!(r"<(?:[\w.-]+:)?{name}(?:\s[^>]*)?>")
}

fn close(name: &str) -> String {
    format!(r"</(?:[\w.-]+:)?{name}>")
}

impl CiiReader {
    pub fn new() -> Result<Self, regex::Error> {
        let value = |name: &str| Regex::new(&format!(r"(?s){}([^<]*){}", el(name), close(name)));
        let date_in = |outer: &str| {
            Regex::new(&format!(
                r"(?s){}\s*{}\s*([0-9]{{8}})\s*{}",
                el(outer),
                el("DateTimeString"),
                close("DateTimeString")
            ))
        };
        Ok(Self {
            invoice_number: Regex::new(&format!(
                r"(?s){}.*?{}([^<]*){}",
                el("ExchangedDocument"),
                el("ID"),
                close("ID")
            ))?,
            issue_date: date_in("IssueDateTime")?,
            due_date: date_in("DueDateDateTime")?,
            seller: Regex::new(&format!(r"(?s){}(.*?){}", el("SellerTradeParty"), close("SellerTradeParty")))?,
            name: value("Name")?,
            vat_id: Regex::new(&format!(
                r#"(?s){}\s*<(?:[\w.-]+:)?ID\s+schemeID="VA"\s*>([^<]*){}"#,
                el("SpecifiedTaxRegistration"),
                close("ID")
            ))?,
            iban: value("IBANID")?,
            currency: value("InvoiceCurrencyCode")?,
            net: value("TaxBasisTotalAmount")?,
            tax: value("TaxTotalAmount")?,
            gross: value("GrandTotalAmount")?,
        })
    }

    fn first(re: &Regex, haystack: &str) -> Option<String> {
        re.captures(haystack)
            .and_then(|c| c.get(1))
            .map(|m| unescape(m.as_str()))
            .filter(|s| !s.is_empty())
    }

    pub fn read(&self, xml: &str) -> Result<InvoiceData, ExtractionError> {
        if !is_cii(xml) {
            return Err(ExtractionError::NotCii);
        }
        let seller = Self::first(&self.seller, xml);
        let in_seller = |re: &Regex| seller.as_deref().and_then(|s| Self::first(re, s));
        let amount = |re: &Regex| Self::first(re, xml).and_then(|s| parse_amount_cents(&s));

        let data = InvoiceData {
            invoice_number: Self::first(&self.invoice_number, xml),
            invoice_date: Self::first(&self.issue_date, xml).as_deref().and_then(parse_date),
            due_date: Self::first(&self.due_date, xml).as_deref().and_then(parse_date),
            vendor_name: in_seller(&self.name),
            vendor_vat_id: in_seller(&self.vat_id),
            vendor_iban: Self::first(&self.iban, xml).map(|i| kontor_core::normalize_iban(&i)),
            currency: Self::first(&self.currency, xml).map(|c| c.to_ascii_uppercase()),
            net_amount: amount(&self.net),
            tax_amount: amount(&self.tax),
            gross_amount: amount(&self.gross),
        };
        if data.is_empty() {
            return Err(ExtractionError::Empty);
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rsm:CrossIndustryInvoice xmlns:rsm="urn:un:unece:uncefact:data:standard:CrossIndustryInvoice:100"
    xmlns:ram="urn:un:unece:uncefact:data:standard:ReusableAggregateBusinessInformationEntity:100"
    xmlns:udt="urn:un:unece:uncefact:data:standard:UnqualifiedDataType:100">
  <rsm:ExchangedDocumentContext><ram:GuidelineSpecifiedDocumentContextParameter><ram:ID>urn:cen.eu:en16931:2017</ram:ID></ram:GuidelineSpecifiedDocumentContextParameter></rsm:ExchangedDocumentContext>
  <rsm:ExchangedDocument>
    <ram:ID>RE-2024-0815</ram:ID>
    <ram:TypeCode>380</ram:TypeCode>
    <ram:IssueDateTime><udt:DateTimeString format="102">20240305</udt:DateTimeString></ram:IssueDateTime>
  </rsm:ExchangedDocument>
  <rsm:SupplyChainTradeTransaction>
    <ram:ApplicableHeaderTradeAgreement>
      <ram:BuyerTradeParty><ram:Name>Kunde AG</ram:Name></ram:BuyerTradeParty>
      <ram:SellerTradeParty>
        <ram:Name>Lieferant &amp; Söhne GmbH</ram:Name>
        <ram:SpecifiedTaxRegistration><ram:ID schemeID="VA">DE123456789</ram:ID></ram:SpecifiedTaxRegistration>
      </ram:SellerTradeParty>
    </ram:ApplicableHeaderTradeAgreement>
    <ram:ApplicableHeaderTradeSettlement>
      <ram:InvoiceCurrencyCode>EUR</ram:InvoiceCurrencyCode>
      <ram:SpecifiedTradeSettlementPaymentMeans>
        <ram:PayeePartyCreditorFinancialAccount><ram:IBANID>DE02 1203 0000 0000 2020 51</ram:IBANID></ram:PayeePartyCreditorFinancialAccount>
      </ram:SpecifiedTradeSettlementPaymentMeans>
      <ram:SpecifiedTradePaymentTerms><ram:DueDateDateTime><udt:DateTimeString format="102">20240319</udt:DateTimeString></ram:DueDateDateTime></ram:SpecifiedTradePaymentTerms>
      <ram:SpecifiedTradeSettlementHeaderMonetarySummation>
        <ram:TaxBasisTotalAmount>1000.00</ram:TaxBasisTotalAmount>
        <ram:TaxTotalAmount currencyID="EUR">190.00</ram:TaxTotalAmount>
        <ram:GrandTotalAmount>1190.00</ram:GrandTotalAmount>
      </ram:SpecifiedTradeSettlementHeaderMonetarySummation>
    </ram:ApplicableHeaderTradeSettlement>
  </rsm:SupplyChainTradeTransaction>
</rsm:CrossIndustryInvoice>"#;

    #[test]
    fn reads_header_fields() {
        let data = CiiReader::new().unwrap().read(SAMPLE).unwrap();
        assert_eq!(data.invoice_number.as_deref(), Some("RE-2024-0815"));
        assert_eq!(data.invoice_date, NaiveDate::from_ymd_opt(2024, 3, 5));
        assert_eq!(data.due_date, NaiveDate::from_ymd_opt(2024, 3, 19));
        assert_eq!(data.vendor_name.as_deref(), Some("Lieferant & Söhne GmbH"));
        assert_eq!(data.vendor_vat_id.as_deref(), Some("DE123456789"));
        assert_eq!(data.vendor_iban.as_deref(), Some("DE02120300000000202051"));
        assert_eq!(data.currency.as_deref(), Some("EUR"));
        assert_eq!(data.net_amount, Some(100_000));
        assert_eq!(data.tax_amount, Some(19_000));
        assert_eq!(data.gross_amount, Some(119_000));
    }

    #[test]
    fn detects_root_element() {
        assert!(is_cii(SAMPLE));
        assert!(is_cii("<!-- c --><CrossIndustryInvoice/>"));
        assert!(!is_cii("<Invoice xmlns=\"urn:oasis:names:specification:ubl\"/>"));
        assert!(matches!(CiiReader::new().unwrap().read("<Invoice/>"), Err(ExtractionError::NotCii)));
    }

    #[test]
    fn finds_xml_inside_pdf_bytes() {
        let mut pdf = b"%PDF-1.7\n1 0 obj\n<< /Type /EmbeddedFile >>\nstream\n".to_vec();
        pdf.extend_from_slice(SAMPLE.as_bytes());
        pdf.extend_from_slice(b"\nendstream\nendobj\n%%EOF");
        let xml = find_embedded_xml(&pdf).unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.ends_with("</rsm:CrossIndustryInvoice>"));
        assert!(find_embedded_xml(b"%PDF-1.4 no attachment").is_none());
    }
}
