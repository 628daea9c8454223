use chrono::{NaiveDate, Utc};

use kontor_auth::permissions::names;
use kontor_contracts::{Contract, ContractCommand, ContractId, ContractStatus, ContractTerms, add_months};
use kontor_infra::projections::aggregate_types;

use super::AppServices;
use crate::app::errors::ApiError;
use crate::context::Session;

impl AppServices {
    pub fn contracts(&self, session: &Session, status: Option<ContractStatus>) -> Result<Vec<Contract>, ApiError> {
        self.authorize(session, &names::CONTRACTS_READ)?;
        let mut contracts = self.projections.contracts.list_where(session.tenant_id(), |c| {
            c.terms().is_some() && status.is_none_or(|s| c.status() == s)
        });
        contracts.sort_by_key(|c| c.terms().map(|t| t.start_date));
        Ok(contracts)
    }

    pub fn contract(&self, session: &Session, contract_id: ContractId) -> Result<Contract, ApiError> {
        self.authorize(session, &names::CONTRACTS_READ)?;
        self.contract_record(session, contract_id)
    }

    pub(super) fn contract_record(&self, session: &Session, contract_id: ContractId) -> Result<Contract, ApiError> {
        self.projections
            .contracts
            .get(session.tenant_id(), contract_id.aggregate_id())
            .filter(|c| c.terms().is_some())
            .ok_or_else(|| ApiError::not_found("contract"))
    }

    /// Customer and products must exist in the tenant; archived products cannot be put on
    /// a contract.
    fn check_references(&self, session: &Session, terms: &ContractTerms) -> Result<(), ApiError> {
        self.customer_record(session, terms.customer_id)?;
        for product_id in terms.items.iter().filter_map(|i| i.product_id) {
            let product = self.product_record(session, product_id)?;
            if !product.is_billable() {
                return Err(ApiError::validation(format!("product {product_id} is archived")));
            }
        }
        Ok(())
    }

    pub fn create_contract(&self, session: &Session, terms: ContractTerms) -> Result<Contract, ApiError> {
        self.authorize(session, &names::CONTRACTS_WRITE)?;
        self.check_references(session, &terms)?;
        let tenant_id = session.tenant_id();
        let contract_id = ContractId::generate();
        self.execute(
            tenant_id,
            Some(session.user_id()),
            contract_id.aggregate_id(),
            aggregate_types::CONTRACT,
            ContractCommand::Create {
                tenant_id,
                contract_id,
                terms,
                occurred_at: Utc::now(),
            },
            |_, id| Contract::empty(ContractId::new(id)),
        )
    }

    pub fn revise_contract(&self, session: &Session, contract_id: ContractId, terms: ContractTerms) -> Result<Contract, ApiError> {
        self.authorize(session, &names::CONTRACTS_WRITE)?;
        self.check_references(session, &terms)?;
        let command = ContractCommand::Revise {
            tenant_id: session.tenant_id(),
            terms,
            occurred_at: Utc::now(),
        };
        self.contract_command(session, contract_id, command)
    }

    pub fn activate_contract(&self, session: &Session, contract_id: ContractId) -> Result<Contract, ApiError> {
        self.authorize(session, &names::CONTRACTS_WRITE)?;
        let command = ContractCommand::Activate {
            tenant_id: session.tenant_id(),
            occurred_at: Utc::now(),
        };
        self.contract_command(session, contract_id, command)
    }

    pub fn pause_contract(&self, session: &Session, contract_id: ContractId) -> Result<Contract, ApiError> {
        self.authorize(session, &names::CONTRACTS_WRITE)?;
        let command = ContractCommand::Pause {
            tenant_id: session.tenant_id(),
            occurred_at: Utc::now(),
        };
        self.contract_command(session, contract_id, command)
    }

    pub fn resume_contract(&self, session: &Session, contract_id: ContractId) -> Result<Contract, ApiError> {
        self.authorize(session, &names::CONTRACTS_WRITE)?;
        let command = ContractCommand::Resume {
            tenant_id: session.tenant_id(),
            occurred_at: Utc::now(),
        };
        self.contract_command(session, contract_id, command)
    }

    /// Without an explicit end the contract runs out at the earliest date the notice
    /// period allows.
    pub fn cancel_contract(
        &self,
        session: &Session,
        contract_id: ContractId,
        notice_date: Option<NaiveDate>,
        effective_end: Option<NaiveDate>,
    ) -> Result<Contract, ApiError> {
        self.authorize(session, &names::CONTRACTS_WRITE)?;
        let contract = self.contract_record(session, contract_id)?;
        let notice_date = notice_date.unwrap_or_else(|| Utc::now().date_naive());
        let effective_end = effective_end.unwrap_or_else(|| match contract.terms() {
            Some(t) => add_months(notice_date, t.notice_period_months).max(t.start_date),
            None => notice_date,
        });

        let command = ContractCommand::Cancel {
            tenant_id: session.tenant_id(),
            notice_date,
            effective_end,
            occurred_at: Utc::now(),
        };
        self.contract_command(session, contract_id, command)
    }

    pub fn end_contract(&self, session: &Session, contract_id: ContractId, on: Option<NaiveDate>) -> Result<Contract, ApiError> {
        self.authorize(session, &names::CONTRACTS_WRITE)?;
        let command = ContractCommand::End {
            tenant_id: session.tenant_id(),
            on: on.unwrap_or_else(|| Utc::now().date_naive()),
            occurred_at: Utc::now(),
        };
        self.contract_command(session, contract_id, command)
    }

    pub(super) fn contract_command(
        &self,
        session: &Session,
        contract_id: ContractId,
        command: ContractCommand,
    ) -> Result<Contract, ApiError> {
        self.contract_record(session, contract_id)?;
        self.execute(
            session.tenant_id(),
            Some(session.user_id()),
            contract_id.aggregate_id(),
            aggregate_types::CONTRACT,
            command,
            |_, id| Contract::empty(ContractId::new(id)),
        )
    }
}
