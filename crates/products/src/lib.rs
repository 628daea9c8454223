//! Products domain module (event-sourced).
//!
//! Business rules for the product catalog as deterministic domain logic
//! (no IO, no HTTP, no storage). SKU uniqueness per tenant is a store concern.

pub mod product;

pub use product::{
    BillingType, Product, ProductCommand, ProductDetails, ProductEvent, ProductId, ProductStatus,
};
