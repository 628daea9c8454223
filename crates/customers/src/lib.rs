//! `kontor-customers`: customer records and fuzzy matching of free-text names to them.

pub mod customer;
pub mod matching;

pub use customer::{
    Address, Customer, CustomerCommand, CustomerDetails, CustomerEvent, CustomerId, CustomerStatus,
};
pub use matching::{CustomerMatch, DEFAULT_THRESHOLD, MatchCandidate, MatchQuery, find_matches, normalize_company_name};
