//! Claim projection: raw token claims → stable caller identity.
//!
//! Issuers disagree on which claim carries a given fact, so each field is
//! resolved through an ordered list of claim names. The first present,
//! non-empty value wins. The lists are plain data so the precedence can be
//! inspected and tested directly.

use serde::Serialize;
use serde_json::{Map, Value};

pub const ANONYMOUS: &str = "Anonymous";
pub const UNKNOWN_SUBJECT: &str = "Unknown";

/// `ClaimTypes.Name` as emitted by WS-Federation style issuers.
pub const IDENTITY_NAME_CLAIM: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name";
pub const OBJECT_ID_CLAIM: &str = "http://schemas.microsoft.com/identity/claims/objectidentifier";
pub const LEGACY_ROLE_CLAIM: &str = "http://schemas.microsoft.com/ws/2008/06/identity/claims/role";

/// Ordered claim-name lookups used by [`project`].
#[derive(Debug, Clone, Copy)]
pub struct ClaimPolicy {
    pub display_name: &'static [&'static str],
    pub subject_id: &'static [&'static str],
    // Every listed claim contributes; order only affects output order.
    pub roles: &'static [&'static str],
}

pub const DEFAULT_POLICY: ClaimPolicy = ClaimPolicy {
    display_name: &["name", "preferred_username", IDENTITY_NAME_CLAIM, "unique_name"],
    subject_id: &[OBJECT_ID_CLAIM, "oid"],
    roles: &["roles", LEGACY_ROLE_CLAIM],
};

/// Normalized identity of the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub subject_id: String,
    pub display_name: String,
    pub roles: Vec<String>,
}

impl Identity {
    pub fn has_known_subject(&self) -> bool {
        self.subject_id != UNKNOWN_SUBJECT
    }
}

pub fn project(claims: &Map<String, Value>) -> Identity {
    project_with(&DEFAULT_POLICY, claims)
}

pub fn project_with(policy: &ClaimPolicy, claims: &Map<String, Value>) -> Identity {
    let display_name = first_string(claims, policy.display_name).unwrap_or(ANONYMOUS);
    let subject_id = first_string(claims, policy.subject_id).unwrap_or(UNKNOWN_SUBJECT);

    let mut roles: Vec<String> = Vec::new();
    for key in policy.roles {
        for role in strings(claims.get(*key)) {
            if !roles.iter().any(|r| r == role) {
                roles.push(role.to_string());
            }
        }
    }

    Identity {
        subject_id: subject_id.to_string(),
        display_name: display_name.to_string(),
        roles,
    }
}

fn first_string<'a>(claims: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| claims.get(*key))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
}

// A claim may be a single string or an array of strings.
fn strings(value: Option<&Value>) -> Vec<&str> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.as_str()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .collect(),
        _ => Vec::new(),
    }
}
