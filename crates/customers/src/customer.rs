use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use kontor_core::{Aggregate, AggregateRoot, Auditable, DomainError, Iban, TenantId, typed_aggregate_id};
use kontor_events::Event;

typed_aggregate_id!(
    /// Customer identifier (tenant-scoped via `tenant_id` in commands/events).
    CustomerId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CustomerStatus {
    #[default]
    Active,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Address {
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    /// ISO 3166 alpha-2.
    pub country: Option<String>,
}

/// Editable customer fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub customer_number: Option<String>,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Address,
    pub vat_id: Option<String>,
    pub iban: Option<Iban>,
}

impl CustomerDetails {
    /// Trim strings, turn blanks into `None`, uppercase VAT id and country.
    fn normalized(&self) -> Result<Self, DomainError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("customer name cannot be empty"));
        }

        let email = clean(&self.email).map(|e| e.to_lowercase());
        if let Some(email) = &email {
            if !email.contains('@') {
                return Err(DomainError::validation("invalid email format"));
            }
        }

        let vat_id = clean(&self.vat_id).map(|v| v.replace(' ', "").to_uppercase());
        if let Some(vat) = &vat_id {
            let valid = vat.len() > 4
                && vat.chars().all(|c| c.is_ascii_alphanumeric())
                && vat[..2].chars().all(|c| c.is_ascii_uppercase());
            if !valid {
                return Err(DomainError::validation(format!("invalid VAT id '{vat}'")));
            }
        }

        let country = clean(&self.address.country).map(|c| c.to_uppercase());
        if country.as_ref().is_some_and(|c| c.len() != 2) {
            return Err(DomainError::validation("country must be an ISO 3166 alpha-2 code"));
        }

        Ok(Self {
            customer_number: clean(&self.customer_number),
            name: name.to_string(),
            email,
            phone: clean(&self.phone),
            address: Address {
                street: clean(&self.address.street),
                postal_code: clean(&self.address.postal_code),
                city: clean(&self.address.city),
                country,
            },
            vat_id,
            iban: self.iban.clone(),
        })
    }
}

fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Aggregate root: Customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    id: CustomerId,
    tenant_id: Option<TenantId>,
    details: CustomerDetails,
    status: CustomerStatus,
    version: u64,
    created: bool,
}

impl Customer {
    pub fn empty(id: CustomerId) -> Self {
        Self {
            id,
            tenant_id: None,
            details: CustomerDetails::default(),
            status: CustomerStatus::Active,
            version: 0,
            created: false,
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn details(&self) -> &CustomerDetails {
        &self.details
    }

    pub fn status(&self) -> CustomerStatus {
        self.status
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// What the fuzzy matcher searches; `None` before registration.
    pub fn match_candidate(&self) -> Option<crate::matching::MatchCandidate> {
        self.created.then(|| crate::matching::MatchCandidate {
            customer_id: self.id,
            name: self.details.name.clone(),
            iban: self.details.iban.as_ref().map(|i| i.as_str().to_string()),
            vat_id: self.details.vat_id.clone(),
            status: self.status,
        })
    }

    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::TenantMismatch);
        }
        Ok(())
    }
}

impl AggregateRoot for Customer {
    type Id = CustomerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomerCommand {
    Register {
        tenant_id: TenantId,
        customer_id: CustomerId,
        details: CustomerDetails,
        occurred_at: DateTime<Utc>,
    },
    Update {
        tenant_id: TenantId,
        details: CustomerDetails,
        occurred_at: DateTime<Utc>,
    },
    Archive {
        tenant_id: TenantId,
        occurred_at: DateTime<Utc>,
    },
    Restore {
        tenant_id: TenantId,
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomerEvent {
    Registered {
        tenant_id: TenantId,
        customer_id: CustomerId,
        details: CustomerDetails,
        occurred_at: DateTime<Utc>,
    },
    Updated {
        details: CustomerDetails,
        occurred_at: DateTime<Utc>,
    },
    Archived {
        occurred_at: DateTime<Utc>,
    },
    Restored {
        occurred_at: DateTime<Utc>,
    },
}

impl Event for CustomerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CustomerEvent::Registered { .. } => "customers.customer.registered",
            CustomerEvent::Updated { .. } => "customers.customer.updated",
            CustomerEvent::Archived { .. } => "customers.customer.archived",
            CustomerEvent::Restored { .. } => "customers.customer.restored",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CustomerEvent::Registered { occurred_at, .. }
            | CustomerEvent::Updated { occurred_at, .. }
            | CustomerEvent::Archived { occurred_at }
            | CustomerEvent::Restored { occurred_at } => *occurred_at,
        }
    }
}

impl Aggregate for Customer {
    type Command = CustomerCommand;
    type Event = CustomerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CustomerEvent::Registered {
                tenant_id,
                customer_id,
                details,
                ..
            } => {
                self.id = *customer_id;
                self.tenant_id = Some(*tenant_id);
                self.details = details.clone();
                self.status = CustomerStatus::Active;
                self.created = true;
            }
            CustomerEvent::Updated { details, .. } => self.details = details.clone(),
            CustomerEvent::Archived { .. } => self.status = CustomerStatus::Archived,
            CustomerEvent::Restored { .. } => self.status = CustomerStatus::Active,
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CustomerCommand::Register {
                tenant_id,
                customer_id,
                details,
                occurred_at,
            } => {
                if self.created {
                    return Err(DomainError::conflict("customer already exists"));
                }
                Ok(vec![CustomerEvent::Registered {
                    tenant_id: *tenant_id,
                    customer_id: *customer_id,
                    details: details.normalized()?,
                    occurred_at: *occurred_at,
                }])
            }
            CustomerCommand::Update {
                tenant_id,
                details,
                occurred_at,
            } => {
                self.ensure_tenant(*tenant_id)?;
                if self.status == CustomerStatus::Archived {
                    return Err(DomainError::invariant("archived customers cannot be edited"));
                }
                let details = details.normalized()?;
                if details == self.details {
                    return Ok(vec![]);
                }
                Ok(vec![CustomerEvent::Updated {
                    details,
                    occurred_at: *occurred_at,
                }])
            }
            CustomerCommand::Archive {
                tenant_id,
                occurred_at,
            } => {
                self.ensure_tenant(*tenant_id)?;
                if self.status == CustomerStatus::Archived {
                    return Err(DomainError::conflict("customer is already archived"));
                }
                Ok(vec![CustomerEvent::Archived {
                    occurred_at: *occurred_at,
                }])
            }
            CustomerCommand::Restore {
                tenant_id,
                occurred_at,
            } => {
                self.ensure_tenant(*tenant_id)?;
                if self.status == CustomerStatus::Active {
                    return Err(DomainError::conflict("customer is not archived"));
                }
                Ok(vec![CustomerEvent::Restored {
                    occurred_at: *occurred_at,
                }])
            }
        }
    }
}

impl Auditable for Customer {
    const ENTITY_TYPE: &'static str = "customer";

    fn audit_snapshot(&self) -> Option<JsonValue> {
        self.created.then(|| {
            json!({
                "customer_number": self.details.customer_number,
                "name": self.details.name,
                "email": self.details.email,
                "phone": self.details.phone,
                "address": self.details.address,
                "vat_id": self.details.vat_id,
                "iban": self.details.iban,
                "status": self.status,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(name: &str) -> CustomerDetails {
        CustomerDetails {
            name: name.to_string(),
            email: Some(" Billing@Acme.DE ".to_string()),
            vat_id: Some("de 123456789".to_string()),
            address: Address {
                city: Some("Berlin".into()),
                country: Some("de".into()),
                ..Address::default()
            },
            ..CustomerDetails::default()
        }
    }

    fn registered(tenant_id: TenantId) -> Customer {
        let id = CustomerId::generate();
        let mut c = Customer::empty(id);
        for e in c
            .handle(&CustomerCommand::Register {
                tenant_id,
                customer_id: id,
                details: details("Acme GmbH"),
                occurred_at: Utc::now(),
            })
            .unwrap()
        {
            c.apply(&e);
        }
        c
    }

    #[test]
    fn register_normalizes_details() {
        let c = registered(TenantId::new());
        assert_eq!(c.details().email.as_deref(), Some("billing@acme.de"));
        assert_eq!(c.details().vat_id.as_deref(), Some("DE123456789"));
        assert_eq!(c.details().address.country.as_deref(), Some("DE"));
        assert_eq!(c.version(), 1);
    }

    #[test]
    fn unchanged_update_emits_nothing() {
        let tenant_id = TenantId::new();
        let c = registered(tenant_id);
        let events = c
            .handle(&CustomerCommand::Update {
                tenant_id,
                details: details("Acme GmbH"),
                occurred_at: Utc::now(),
            })
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn archived_customers_cannot_be_edited_until_restored() {
        let tenant_id = TenantId::new();
        let mut c = registered(tenant_id);
        for e in c
            .handle(&CustomerCommand::Archive { tenant_id, occurred_at: Utc::now() })
            .unwrap()
        {
            c.apply(&e);
        }
        assert_eq!(c.status(), CustomerStatus::Archived);

        let update = CustomerCommand::Update {
            tenant_id,
            details: details("Acme AG"),
            occurred_at: Utc::now(),
        };
        assert!(matches!(c.handle(&update), Err(DomainError::InvariantViolation(_))));

        for e in c
            .handle(&CustomerCommand::Restore { tenant_id, occurred_at: Utc::now() })
            .unwrap()
        {
            c.apply(&e);
        }
        assert_eq!(c.handle(&update).unwrap().len(), 1);
    }

    #[test]
    fn empty_name_and_bad_vat_are_rejected() {
        let c = Customer::empty(CustomerId::generate());
        let mut d = details("  ");
        let cmd = |d: CustomerDetails| CustomerCommand::Register {
            tenant_id: TenantId::new(),
            customer_id: CustomerId::generate(),
            details: d,
            occurred_at: Utc::now(),
        };
        assert!(matches!(c.handle(&cmd(d.clone())), Err(DomainError::Validation(_))));

        d.name = "Acme".into();
        d.vat_id = Some("12".into());
        assert!(matches!(c.handle(&cmd(d)), Err(DomainError::Validation(_))));
    }

    #[test]
    fn audit_snapshot_reflects_state() {
        let c = registered(TenantId::new());
        let snap = c.audit_snapshot().unwrap();
        assert_eq!(snap["name"], "Acme GmbH");
        assert_eq!(snap["address"]["city"], "Berlin");
        assert!(Customer::empty(CustomerId::generate()).audit_snapshot().is_none());
    }
}
