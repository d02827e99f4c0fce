//! Normalized quota record shared by every backend.

use crate::error::{IquotaError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of quota governing a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuotaType {
    Directory,
    User,
    Group,
    DefaultUser,
    DefaultGroup,
}

impl QuotaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaType::Directory => "directory",
            QuotaType::User => "user",
            QuotaType::Group => "group",
            QuotaType::DefaultUser => "default-user",
            QuotaType::DefaultGroup => "default-group",
        }
    }

    /// Whether records of this type carry a principal.
    pub fn has_principal(&self) -> bool {
        matches!(self, QuotaType::User | QuotaType::Group)
    }
}

impl fmt::Display for QuotaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuotaType {
    type Err = IquotaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "directory" => Ok(QuotaType::Directory),
            "user" => Ok(QuotaType::User),
            "group" => Ok(QuotaType::Group),
            "default-user" => Ok(QuotaType::DefaultUser),
            "default-group" => Ok(QuotaType::DefaultGroup),
            other => Err(IquotaError::Validation {
                field: "type".to_string(),
                message: format!("unknown quota type '{}'", other),
            }),
        }
    }
}

/// Which kind of principal a lookup is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrincipalKind {
    User,
    Group,
}

impl PrincipalKind {
    /// Label used in cache keys (`USER` / `GROUP`).
    pub fn key_label(&self) -> &'static str {
        match self {
            PrincipalKind::User => "USER",
            PrincipalKind::Group => "GROUP",
        }
    }

    pub fn quota_type(&self) -> QuotaType {
        match self {
            PrincipalKind::User => QuotaType::User,
            PrincipalKind::Group => QuotaType::Group,
        }
    }

    /// Default-quota type attached to responses for this kind.
    pub fn default_type(&self) -> QuotaType {
        match self {
            PrincipalKind::User => QuotaType::DefaultUser,
            PrincipalKind::Group => QuotaType::DefaultGroup,
        }
    }
}

impl fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrincipalKind::User => f.write_str("user"),
            PrincipalKind::Group => f.write_str("group"),
        }
    }
}

/// Identity a user or group quota applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    /// Numeric uid or gid when the backend resolved one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
}

impl Principal {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
        }
    }
}

/// One governed path's quota state.
///
/// Limits of `0` mean "no limit set". Usage is logical (apparent) usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaRecord {
    pub path: String,
    pub quota_type: QuotaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    #[serde(default)]
    pub used_bytes: u64,
    #[serde(default)]
    pub used_inodes: u64,
    #[serde(default)]
    pub soft_limit_bytes: u64,
    #[serde(default)]
    pub hard_limit_bytes: u64,
    #[serde(default)]
    pub soft_limit_inodes: u64,
    #[serde(default)]
    pub hard_limit_inodes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period: Option<String>,
    #[serde(default)]
    pub soft_exceeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_last_exceeded_at: Option<DateTime<Utc>>,
}

impl QuotaRecord {
    fn empty(path: impl Into<String>, quota_type: QuotaType, principal: Option<Principal>) -> Self {
        Self {
            path: path.into(),
            quota_type,
            principal,
            used_bytes: 0,
            used_inodes: 0,
            soft_limit_bytes: 0,
            hard_limit_bytes: 0,
            soft_limit_inodes: 0,
            hard_limit_inodes: 0,
            grace_period: None,
            soft_exceeded: false,
            soft_last_exceeded_at: None,
        }
    }

    /// Directory quota for a path.
    pub fn directory(path: impl Into<String>) -> Self {
        Self::empty(path, QuotaType::Directory, None)
    }

    /// User or group quota for a principal on a path.
    pub fn for_principal(path: impl Into<String>, kind: PrincipalKind, principal: Principal) -> Self {
        Self::empty(path, kind.quota_type(), Some(principal))
    }

    /// Default-user or default-group quota for a path.
    pub fn default_for(path: impl Into<String>, kind: PrincipalKind) -> Self {
        Self::empty(path, kind.default_type(), None)
    }

    pub fn with_usage(mut self, bytes: u64, inodes: u64) -> Self {
        self.used_bytes = bytes;
        self.used_inodes = inodes;
        self
    }

    pub fn with_byte_limits(mut self, soft: u64, hard: u64) -> Self {
        self.soft_limit_bytes = soft;
        self.hard_limit_bytes = hard;
        self
    }

    pub fn with_inode_limits(mut self, soft: u64, hard: u64) -> Self {
        self.soft_limit_inodes = soft;
        self.hard_limit_inodes = hard;
        self
    }

    pub fn with_grace_period(mut self, grace: impl Into<String>) -> Self {
        self.grace_period = Some(grace.into());
        self
    }

    /// Mark the soft limit as exceeded, optionally since `at`.
    pub fn with_soft_exceeded(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.soft_exceeded = true;
        self.soft_last_exceeded_at = at;
        self
    }

    /// Principal name, if any.
    pub fn principal_name(&self) -> Option<&str> {
        self.principal.as_ref().map(|p| p.name.as_str())
    }

    /// Soft limit passed, or usage reached a set hard limit.
    pub fn is_over_quota(&self) -> bool {
        self.soft_exceeded || (self.hard_limit_bytes > 0 && self.used_bytes >= self.hard_limit_bytes)
    }

    /// Check the record's structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(IquotaError::Validation {
                field: "path".to_string(),
                message: "path must not be empty".to_string(),
            });
        }

        if self.hard_limit_bytes > 0 && self.soft_limit_bytes > self.hard_limit_bytes {
            return Err(IquotaError::Validation {
                field: "softLimitBytes".to_string(),
                message: format!(
                    "soft limit {} exceeds hard limit {} on {}",
                    self.soft_limit_bytes, self.hard_limit_bytes, self.path
                ),
            });
        }

        if self.quota_type.has_principal() != self.principal.is_some() {
            return Err(IquotaError::Validation {
                field: "principal".to_string(),
                message: format!(
                    "{} quota on {} {} a principal",
                    self.quota_type,
                    self.path,
                    if self.principal.is_some() { "must not carry" } else { "requires" }
                ),
            });
        }

        if !self.soft_exceeded && self.soft_last_exceeded_at.is_some() {
            return Err(IquotaError::Validation {
                field: "softLastExceededAt".to_string(),
                message: "timestamp set while soft limit is not exceeded".to_string(),
            });
        }

        Ok(())
    }
}
