use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use kontor_core::{
    Aggregate, AggregateRoot, Auditable, DomainError, Money, TenantId, typed_aggregate_id,
};
use kontor_events::Event;

typed_aggregate_id!(
    /// Product identifier (tenant-scoped via `tenant_id` fields in events/commands).
    ProductId
);

/// Product status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    #[default]
    Active,
    Archived,
}

/// Whether a product is billed once or every billing period of a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BillingType {
    OneTime,
    #[default]
    Recurring,
}

/// Highest accepted tax rate in basis points (100 %).
pub const MAX_TAX_RATE_BP: u32 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDetails {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    /// Unit of measure shown on invoices (e.g. "h", "Stk", "month").
    pub unit: String,
    pub net_price: Money,
    /// Basis points, 1900 = 19 %.
    pub tax_rate_bp: u32,
    pub billing_type: BillingType,
}

impl ProductDetails {
    fn validated(&self) -> Result<Self, DomainError> {
        let sku = self.sku.trim().to_uppercase();
        if sku.is_empty() || sku.len() > 64 {
            return Err(DomainError::validation("sku must be 1..=64 characters"));
        }
        if sku.chars().any(char::is_whitespace) {
            return Err(DomainError::validation("sku cannot contain whitespace"));
        }
        let name = self.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if self.net_price.is_negative() {
            return Err(DomainError::validation("net price cannot be negative"));
        }
        if self.tax_rate_bp > MAX_TAX_RATE_BP {
            return Err(DomainError::validation("tax rate cannot exceed 100 %"));
        }
        let unit = match self.unit.trim() {
            "" => "unit".to_string(),
            u => u.to_string(),
        };

        Ok(Self {
            sku,
            name: name.to_string(),
            description: self
                .description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
            unit,
            net_price: self.net_price,
            tax_rate_bp: self.tax_rate_bp,
            billing_type: self.billing_type,
        })
    }
}

/// Aggregate root: Product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    tenant_id: Option<TenantId>,
    details: Option<ProductDetails>,
    status: ProductStatus,
    version: u64,
}

impl Product {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            tenant_id: None,
            details: None,
            status: ProductStatus::Active,
            version: 0,
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn details(&self) -> Option<&ProductDetails> {
        self.details.as_ref()
    }

    pub fn status(&self) -> ProductStatus {
        self.status
    }

    /// Archived products cannot be put on new contracts or invoices.
    pub fn is_billable(&self) -> bool {
        self.details.is_some() && self.status == ProductStatus::Active
    }

    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<&ProductDetails, DomainError> {
        let details = self.details.as_ref().ok_or_else(DomainError::not_found)?;
        DomainError::check_tenant(self.tenant_id, tenant_id)?;
        Ok(details)
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    Create {
        tenant_id: TenantId,
        product_id: ProductId,
        details: ProductDetails,
        occurred_at: DateTime<Utc>,
    },
    Update {
        tenant_id: TenantId,
        details: ProductDetails,
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
pub enum ProductEvent {
    Created {
        tenant_id: TenantId,
        product_id: ProductId,
        details: ProductDetails,
        occurred_at: DateTime<Utc>,
    },
    Updated {
        details: ProductDetails,
        occurred_at: DateTime<Utc>,
    },
    Archived {
        occurred_at: DateTime<Utc>,
    },
    Restored {
        occurred_at: DateTime<Utc>,
    },
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::Created { .. } => "products.product.created",
            ProductEvent::Updated { .. } => "products.product.updated",
            ProductEvent::Archived { .. } => "products.product.archived",
            ProductEvent::Restored { .. } => "products.product.restored",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::Created { occurred_at, .. }
            | ProductEvent::Updated { occurred_at, .. }
            | ProductEvent::Archived { occurred_at }
            | ProductEvent::Restored { occurred_at } => *occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::Created {
                tenant_id,
                product_id,
                details,
                ..
            } => {
                self.id = *product_id;
                self.tenant_id = Some(*tenant_id);
                self.details = Some(details.clone());
                self.status = ProductStatus::Active;
            }
            ProductEvent::Updated { details, .. } => self.details = Some(details.clone()),
            ProductEvent::Archived { .. } => self.status = ProductStatus::Archived,
            ProductEvent::Restored { .. } => self.status = ProductStatus::Active,
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::Create {
                tenant_id,
                product_id,
                details,
                occurred_at,
            } => {
                if self.details.is_some() {
                    return Err(DomainError::conflict("product already exists"));
                }
                Ok(vec![ProductEvent::Created {
                    tenant_id: *tenant_id,
                    product_id: *product_id,
                    details: details.validated()?,
                    occurred_at: *occurred_at,
                }])
            }
            ProductCommand::Update {
                tenant_id,
                details,
                occurred_at,
            } => {
                let current = self.ensure_tenant(*tenant_id)?;
                let details = details.validated()?;
                if &details == current {
                    return Ok(vec![]);
                }
                Ok(vec![ProductEvent::Updated {
                    details,
                    occurred_at: *occurred_at,
                }])
            }
            ProductCommand::Archive {
                tenant_id,
                occurred_at,
            } => {
                self.ensure_tenant(*tenant_id)?;
                if self.status == ProductStatus::Archived {
                    return Err(DomainError::conflict("product is already archived"));
                }
                Ok(vec![ProductEvent::Archived {
                    occurred_at: *occurred_at,
                }])
            }
            ProductCommand::Restore {
                tenant_id,
                occurred_at,
            } => {
                self.ensure_tenant(*tenant_id)?;
                if self.status == ProductStatus::Active {
                    return Err(DomainError::conflict("product is not archived"));
                }
                Ok(vec![ProductEvent::Restored {
                    occurred_at: *occurred_at,
                }])
            }
        }
    }
}

impl Auditable for Product {
    const ENTITY_TYPE: &'static str = "product";

    fn audit_snapshot(&self) -> Option<JsonValue> {
        let d = self.details.as_ref()?;
        Some(json!({
            "sku": d.sku,
            "name": d.name,
            "description": d.description,
            "unit": d.unit,
            "net_price": d.net_price,
            "tax_rate_bp": d.tax_rate_bp,
            "billing_type": d.billing_type,
            "status": self.status,
        }))
    }
}
