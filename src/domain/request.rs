use super::ledger::ClientId;
use super::money::Amount;
use serde::Deserialize;

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Deposit,
    Withdrawal,
}

/// A deposit or withdrawal submitted by an intake adapter.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct Request {
    pub r#type: RequestType,
    pub client: ClientId,
    pub amount: Amount,
}

impl Request {
    pub fn deposit(client: ClientId, amount: Amount) -> Self {
        Self {
            r#type: RequestType::Deposit,
            client,
            amount,
        }
    }

    pub fn withdrawal(client: ClientId, amount: Amount) -> Self {
        Self {
            r#type: RequestType::Withdrawal,
            client,
            amount,
        }
    }
}
