//! Request bodies shared by the HTTP and stdio transports.

use serde::Deserialize;

use crate::ledger::InstallmentRef;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolScope {
    #[serde(default)]
    pub school_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayRequest {
    #[serde(default)]
    pub school_id: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayMultipleRequest {
    #[serde(default)]
    pub school_id: Option<String>,
    #[serde(default)]
    pub installment_indices: Option<Vec<i64>>,
    #[serde(default)]
    pub installment_ids: Option<Vec<String>>,
    #[serde(default)]
    pub payment_method: Option<String>,
}

impl PayMultipleRequest {
    /// Positions first, then ids, each in the order given.
    pub fn selectors(&self) -> Vec<InstallmentRef> {
        let positions = self
            .installment_indices
            .iter()
            .flatten()
            .map(|p| InstallmentRef::Position(*p));
        let ids = self
            .installment_ids
            .iter()
            .flatten()
            .map(|id| InstallmentRef::Id(id.trim().to_string()));
        positions.chain(ids).collect()
    }
}
