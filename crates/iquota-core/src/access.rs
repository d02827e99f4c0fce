//! Access policy gate.
//!
//! Callers may always see their own quotas. Seeing anyone else's requires
//! membership in the admin set, matched on user name or on any group the
//! caller belongs to.

use crate::error::{IquotaError, Result};
use crate::models::PrincipalKind;
use std::collections::HashSet;

/// Authenticated identity making a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub uid: String,
    pub groups: Vec<String>,
}

impl Caller {
    pub fn new(uid: impl Into<String>, groups: Vec<String>) -> Self {
        Self {
            uid: uid.into(),
            groups,
        }
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }
}

/// Admin membership and the rules built on it.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    admins: HashSet<String>,
}

impl AccessPolicy {
    pub fn new<I, S>(admins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            admins: admins.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_admin(&self, caller: &Caller) -> bool {
        self.admins.contains(&caller.uid) || caller.groups.iter().any(|g| self.admins.contains(g))
    }

    /// Whether `caller` may view `target`'s quota of the given kind.
    ///
    /// For groups, "self" means a group the caller belongs to.
    pub fn can_view(&self, caller: &Caller, target: &str, kind: PrincipalKind) -> Decision {
        let own = match kind {
            PrincipalKind::User => caller.uid == target,
            PrincipalKind::Group => caller.in_group(target),
        };

        if own || self.is_admin(caller) {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }

    /// `can_view` as a `Result`, for use with `?`.
    pub fn authorize(&self, caller: &Caller, target: &str, kind: PrincipalKind) -> Result<()> {
        match self.can_view(caller, target, kind) {
            Decision::Allow => Ok(()),
            Decision::Deny => Err(IquotaError::unauthorized(format!(
                "{} may not view {} quota for {}",
                caller.uid, kind, target
            ))),
        }
    }

    /// Operations that span every principal.
    pub fn require_admin(&self, caller: &Caller, operation: &str) -> Result<()> {
        if self.is_admin(caller) {
            Ok(())
        } else {
            Err(IquotaError::unauthorized(format!(
                "{} requires admin rights",
                operation
            )))
        }
    }
}
