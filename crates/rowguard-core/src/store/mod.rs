//! The three rule stores combined by the policy engine.

pub mod access;
pub mod field_grant;
pub mod record_rule;

pub use access::{AccessRightsStore, AccessRule};
pub use field_grant::{FieldGrant, FieldGrantStore};
pub use record_rule::{RecordRule, RecordRuleDef, RecordRuleStore};
