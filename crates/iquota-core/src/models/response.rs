//! Response envelope returned by adapters and the resolver.

use super::record::QuotaRecord;
use serde::{Deserialize, Deserializer, Serialize};

/// A set of quota records, an optional continuation token, and the
/// default-quota record for the path when one is known.
///
/// Decoding is strict: `quotas` is required and unknown fields are rejected,
/// so values written by other tools never pass for an empty response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuotaResponse {
    pub quotas: Vec<QuotaRecord>,
    /// Continuation token for the next page. Empty tokens read as `None`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "non_empty_token"
    )]
    pub resume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<QuotaRecord>,
}

fn non_empty_token<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let token: Option<String> = Option::deserialize(deserializer)?;
    Ok(token.filter(|t| !t.is_empty()))
}

impl QuotaResponse {
    pub fn new(quotas: Vec<QuotaRecord>) -> Self {
        Self {
            quotas,
            resume: None,
            default: None,
        }
    }

    /// Single page with a continuation token. An empty token ends the listing.
    pub fn page(quotas: Vec<QuotaRecord>, resume: impl Into<String>) -> Self {
        let resume = resume.into();
        Self {
            quotas,
            resume: if resume.is_empty() { None } else { Some(resume) },
            default: None,
        }
    }

    pub fn with_default(mut self, default: Option<QuotaRecord>) -> Self {
        self.default = default;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.quotas.is_empty()
    }
}

/// Anything a positive cache entry may hold.
///
/// Directory refreshes store bare records, principal lookups store whole
/// responses. Anything else, the negative marker `{}` included, fails to
/// decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CachedValue {
    Record(Box<QuotaRecord>),
    Response(QuotaResponse),
}

impl CachedValue {
    /// Flatten into the records this entry contributes.
    pub fn into_records(self) -> Vec<QuotaRecord> {
        match self {
            CachedValue::Record(record) => vec![*record],
            CachedValue::Response(response) => response.quotas,
        }
    }
}
