//! Default-quota table.

use crate::models::{PrincipalKind, QuotaRecord, QuotaType};
use std::collections::BTreeMap;

/// Path-level default-user and default-group quotas.
///
/// Immutable once built. The resolver swaps in a whole new table on reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefaultQuotaTable {
    user: BTreeMap<String, QuotaRecord>,
    group: BTreeMap<String, QuotaRecord>,
}

impl DefaultQuotaTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from adapter output. Records of other types are ignored; a later
    /// record for the same path wins.
    pub fn from_records(records: impl IntoIterator<Item = QuotaRecord>) -> Self {
        let mut table = Self::default();
        for record in records {
            match record.quota_type {
                QuotaType::DefaultUser => {
                    table.user.insert(record.path.clone(), record);
                }
                QuotaType::DefaultGroup => {
                    table.group.insert(record.path.clone(), record);
                }
                _ => {}
            }
        }
        table
    }

    pub fn get(&self, path: &str, kind: PrincipalKind) -> Option<&QuotaRecord> {
        match kind {
            PrincipalKind::User => self.user.get(path),
            PrincipalKind::Group => self.group.get(path),
        }
    }

    /// All defaults, user entries first, each ordered by path.
    pub fn records(&self) -> Vec<QuotaRecord> {
        self.user.values().chain(self.group.values()).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.user.len() + self.group.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_records_splits_by_kind() {
        let table = DefaultQuotaTable::from_records(vec![
            QuotaRecord::default_for("/ifs/home", PrincipalKind::User).with_byte_limits(0, 25),
            QuotaRecord::default_for("/ifs/projects", PrincipalKind::Group).with_byte_limits(0, 1000),
            QuotaRecord::directory("/ifs/projects/x"),
        ]);

        assert_eq!(table.len(), 2);
        assert_eq!(table.get("/ifs/home", PrincipalKind::User).unwrap().hard_limit_bytes, 25);
        assert!(table.get("/ifs/home", PrincipalKind::Group).is_none());
        assert!(table.get("/ifs/projects", PrincipalKind::Group).is_some());
    }

    #[test]
    fn test_records_order() {
        let table = DefaultQuotaTable::from_records(vec![
            QuotaRecord::default_for("/b", PrincipalKind::Group),
            QuotaRecord::default_for("/z", PrincipalKind::User),
            QuotaRecord::default_for("/a", PrincipalKind::User),
        ]);
        let paths: Vec<_> = table.records().into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["/a", "/z", "/b"]);
    }

    #[test]
    fn test_empty() {
        assert!(DefaultQuotaTable::empty().is_empty());
    }
}
