//! Represents a logical bucket — a named compartment for stored files.

/// Default retention for objects placed in temporary buckets.
pub const DEFAULT_EXPIRY_DAYS: u32 = 3;

/// A storage bucket.
///
/// Buckets are created lazily the first time something is written into them
/// and are never deleted by this service. A temporary bucket gets an expiry
/// lifecycle rule when it is created, so its objects disappear after the
/// configured number of days.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Bucket {
    /// Bucket name as understood by the backend (date stamp or caller supplied).
    pub name: String,

    /// Whether objects in this bucket expire automatically.
    pub temporary: bool,
}

impl Bucket {
    /// A bucket whose objects are kept forever.
    pub fn permanent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            temporary: false,
        }
    }

    /// A bucket whose objects are removed by the provider after a retention period.
    pub fn temporary(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            temporary: true,
        }
    }
}

/// Whether a lifecycle rule is active.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleStatus {
    Enabled,
    Disabled,
}

/// Provider-neutral description of an object expiration rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LifecycleRule {
    pub id: String,
    /// Objects older than this many days are deleted by the provider.
    pub days: u32,
    pub status: RuleStatus,
}

impl LifecycleRule {
    /// Enabled rule expiring every object in the bucket after `days`.
    pub fn expire_after(days: u32) -> Self {
        Self {
            id: "expire-temporary-objects".into(),
            days,
            status: RuleStatus::Enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_set_temporary_flag() {
        assert!(!Bucket::permanent("20240101").temporary);
        assert!(Bucket::temporary("scratch").temporary);
    }

    #[test]
    fn test_expire_after_is_enabled() {
        let rule = LifecycleRule::expire_after(DEFAULT_EXPIRY_DAYS);
        assert_eq!(rule.days, 3);
        assert_eq!(rule.status, RuleStatus::Enabled);
    }
}
