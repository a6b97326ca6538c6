use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::{Error, Result};

/// Access roles encoded as a bitmask in the identity provider's per-agency
/// custom attribute. The attribute value is the hex sum of the member roles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AccessRole {
    Admin,
    Supervisor,
    Clerk,
    Auditor,
    ReadOnly,
}

impl AccessRole {
    pub const ALL: [AccessRole; 5] = [
        AccessRole::Admin,
        AccessRole::Supervisor,
        AccessRole::Clerk,
        AccessRole::Auditor,
        AccessRole::ReadOnly,
    ];

    pub fn mask(self) -> u32 {
        match self {
            AccessRole::Admin => 0x1,
            AccessRole::Supervisor => 0x2,
            AccessRole::Clerk => 0x4,
            AccessRole::Auditor => 0x8,
            AccessRole::ReadOnly => 0x10,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AccessRole::Admin => "admin",
            AccessRole::Supervisor => "supervisor",
            AccessRole::Clerk => "clerk",
            AccessRole::Auditor => "auditor",
            AccessRole::ReadOnly => "read_only",
        }
    }
}

/// Decode a hex access score into the roles whose bits are all present.
/// An absent or unparseable score decodes to no roles, never an error.
pub fn decode_access(score: Option<&str>) -> Vec<AccessRole> {
    let Some(score) = score else {
        return Vec::new();
    };
    let Ok(value) = u32::from_str_radix(score.trim().trim_start_matches("0x"), 16) else {
        return Vec::new();
    };
    AccessRole::ALL
        .into_iter()
        .filter(|role| value & role.mask() == role.mask())
        .collect()
}

/// Hex access score for a set of roles; the inverse of [`decode_access`].
pub fn access_score(roles: &[AccessRole]) -> String {
    let value = roles.iter().fold(0u32, |acc, role| acc | role.mask());
    format!("{value:x}")
}

/// Identity-provider custom attribute holding `AGENCY:VALUE;AGENCY:VALUE`
/// pairs. Malformed pairs are skipped rather than failing the whole parse.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoleAttribute {
    values: BTreeMap<String, String>,
}

impl RoleAttribute {
    pub fn parse(attribute: Option<&str>) -> Self {
        let mut values = BTreeMap::new();
        if let Some(attribute) = attribute {
            for pair in attribute.split(';') {
                if let Some((agency, value)) = pair.split_once(':') {
                    values.insert(agency.to_string(), value.to_string());
                }
            }
        }
        Self { values }
    }

    pub fn get(&self, agency: &str) -> Option<&str> {
        self.values.get(agency).map(String::as_str)
    }

    pub fn contains(&self, agency: &str) -> bool {
        self.values.contains_key(agency)
    }

    pub fn insert(&mut self, agency: impl Into<String>, value: impl Into<String>) {
        self.values.insert(agency.into(), value.into());
    }

    pub fn remove(&mut self, agency: &str) {
        self.values.remove(agency);
    }

    pub fn reconstruct(&self) -> Option<String> {
        if self.values.is_empty() {
            return None;
        }
        Some(
            self.values
                .iter()
                .map(|(agency, value)| format!("{agency}:{value}"))
                .collect::<Vec<_>>()
                .join(";"),
        )
    }
}

/// Raw attributes returned by the external identity provider.
#[derive(Clone, Debug, Default)]
pub struct UserAttributes {
    pub user_name: String,
    pub given_name: String,
    pub family_name: String,
    pub email: String,
    /// Per-agency role scores, `AGENCY:VALUE;AGENCY:VALUE`.
    pub agency_roles: Option<String>,
    pub super_admin: Option<String>,
}

/// Black-box identity-provider boundary. Implementations resolve a bearer
/// token to user attributes; failures surface as [`Error::Auth`] here and
/// nowhere deeper in the stack.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn user_attributes(&self, bearer_token: &str) -> Result<UserAttributes>;
}

#[derive(Clone, Debug)]
pub struct UserProfile {
    pub user_name: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub roles: Vec<AccessRole>,
    pub super_admin: Option<String>,
}

impl UserProfile {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Pull the token out of an `Authorization` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str> {
    header
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .ok_or_else(|| Error::Auth("missing bearer token".into()))
}

/// Resolve a bearer token into a per-agency profile. Any provider failure is
/// reported as an auth failure; it is never retried.
pub async fn authenticate(
    provider: &dyn IdentityProvider,
    token: &str,
    agency: &str,
) -> Result<UserProfile> {
    let attributes = provider.user_attributes(token).await.map_err(|err| {
        tracing::error!(error = %err, "identity provider rejected token");
        Error::Auth("invalid token".into())
    })?;

    let agency_roles = RoleAttribute::parse(attributes.agency_roles.as_deref());
    let roles = decode_access(agency_roles.get(agency));

    Ok(UserProfile {
        user_name: attributes.user_name,
        first_name: attributes.given_name,
        last_name: attributes.family_name,
        email: attributes.email,
        roles,
        super_admin: attributes.super_admin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_scores_round_trip() {
        let roles = vec![AccessRole::Admin, AccessRole::Clerk];
        let score = access_score(&roles);
        assert_eq!(score, "5");
        assert_eq!(decode_access(Some(score.as_str())), roles);
    }

    #[test]
    fn decode_handles_missing_and_garbage_scores() {
        assert!(decode_access(None).is_empty());
        assert!(decode_access(Some("")).is_empty());
        assert!(decode_access(Some("zz")).is_empty());
    }

    #[test]
    fn decode_requires_all_bits_of_a_role() {
        // 0x3 = admin + supervisor, no clerk bit
        let roles = decode_access(Some("3"));
        assert_eq!(roles, vec![AccessRole::Admin, AccessRole::Supervisor]);
    }

    #[test]
    fn role_attribute_parses_pairs_and_skips_malformed() {
        let attr = RoleAttribute::parse(Some("METRO:5;COUNTY:10;garbage"));
        assert_eq!(attr.get("METRO"), Some("5"));
        assert_eq!(attr.get("COUNTY"), Some("10"));
        assert!(!attr.contains("garbage"));
        assert_eq!(attr.reconstruct().unwrap(), "COUNTY:10;METRO:5");
    }

    #[test]
    fn role_attribute_reconstruct_is_none_when_empty() {
        assert_eq!(RoleAttribute::parse(None).reconstruct(), None);
    }

    #[test]
    fn bearer_token_extraction() {
        assert_eq!(bearer_token(Some("Bearer abc")).unwrap(), "abc");
        assert!(bearer_token(Some("abc")).is_err());
        assert!(bearer_token(Some("Bearer ")).is_err());
        assert!(bearer_token(None).is_err());
    }
}
