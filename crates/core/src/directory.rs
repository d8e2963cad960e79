//! Collaborator data shapes: directory objects and endpoint devices.
//!
//! These are read from their own store collections and never written by the
//! engine. Field names match the persisted camelCase JSON.

use serde::{Deserialize, Serialize};

/// Directory collection name.
pub const DIRECTORY_COLLECTION: &str = "directory";
/// Endpoint-protection collection name.
pub const ENDPOINT_COLLECTION: &str = "endpoints";

/// Tag linking an article to a directory object by GUID.
pub const DIRECTORY_ID_TAG: &str = "ad-guid";
/// Tag linking an article to an endpoint device by hardware key.
pub const ENDPOINT_ID_TAG: &str = "sep-id";

/// A directory (LDAP-style) object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryObject {
    pub object_guid: String,
    pub distinguished_name: String,
    #[serde(default)]
    pub object_sid: Option<String>,
    #[serde(default)]
    pub sam_account_name: Option<String>,
    #[serde(default)]
    pub dns_host_name: Option<String>,
    #[serde(default)]
    pub object_class: Vec<String>,
    #[serde(default)]
    pub member: Vec<String>,
    #[serde(default)]
    pub member_of: Vec<String>,
    #[serde(default)]
    pub primary_group_id: Option<u32>,
}

impl DirectoryObject {
    pub fn is_group(&self) -> bool {
        self.object_class.iter().any(|c| c.eq_ignore_ascii_case("group"))
    }

    /// DN of the containing object, if any.
    pub fn parent_dn(&self) -> Option<&str> {
        parent_dn(&self.distinguished_name)
    }

    /// SID of the group named by `primaryGroupId` in this object's domain.
    pub fn primary_group_sid(&self) -> Option<String> {
        let sid = self.object_sid.as_deref()?;
        let rid = self.primary_group_id?;
        Some(format!("{}-{rid}", domain_sid(sid)?))
    }
}

/// An endpoint-protection managed device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDevice {
    pub hardware_key: String,
    pub computer_name: String,
    #[serde(default)]
    pub dns_name: Option<String>,
    #[serde(default)]
    pub mac_addresses: Vec<String>,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Strip the first RDN from a distinguished name. Escaped commas (`\,`)
/// inside the RDN are not separators.
pub fn parent_dn(dn: &str) -> Option<&str> {
    let bytes = dn.as_bytes();
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            _ if escaped => escaped = false,
            b'\\' => escaped = true,
            b',' => {
                let parent = dn[i + 1..].trim_start();
                return (!parent.is_empty()).then_some(parent);
            }
            _ => {}
        }
    }
    None
}

/// The domain part of a SID (everything before the final RID).
pub fn domain_sid(sid: &str) -> Option<&str> {
    let (domain, rid) = sid.rsplit_once('-')?;
    rid.parse::<u32>().ok()?;
    domain.starts_with("S-").then_some(domain)
}

/// Normalize a MAC address to lowercase colon-separated form.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let hex: String = raw
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect();
    if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let hex = hex.to_ascii_lowercase();
    let pairs: Vec<&str> = (0..6).map(|i| &hex[i * 2..i * 2 + 2]).collect();
    Some(pairs.join(":"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parent_of_dn() {
        assert_eq!(
            parent_dn("CN=Alice,OU=Staff,DC=corp,DC=local"),
            Some("OU=Staff,DC=corp,DC=local")
        );
        assert_eq!(parent_dn(r"CN=Smith\, Bob,DC=corp"), Some("DC=corp"));
        assert_eq!(parent_dn("DC=local"), None);
    }

    #[test]
    fn domain_and_primary_group_sid() {
        assert_eq!(domain_sid("S-1-5-21-1-2-3-1104"), Some("S-1-5-21-1-2-3"));
        assert_eq!(domain_sid("garbage"), None);

        let obj: DirectoryObject = serde_json::from_value(json!({
            "objectGuid": "g1",
            "distinguishedName": "CN=Alice,DC=corp",
            "objectSid": "S-1-5-21-1-2-3-1104",
            "primaryGroupId": 513
        }))
        .unwrap();
        assert_eq!(obj.primary_group_sid().as_deref(), Some("S-1-5-21-1-2-3-513"));
        assert!(!obj.is_group());
    }

    #[test]
    fn mac_normalization() {
        assert_eq!(normalize_mac("AA-BB-CC-00-11-22").as_deref(), Some("aa:bb:cc:00:11:22"));
        assert_eq!(normalize_mac("aabb.cc00.1122").as_deref(), Some("aa:bb:cc:00:11:22"));
        assert_eq!(normalize_mac("xyz"), None);
    }

    #[test]
    fn endpoint_keeps_extra_fields() {
        let device: EndpointDevice = serde_json::from_value(json!({
            "hardwareKey": "HW1",
            "computerName": "ws-01",
            "osVersion": "10.0"
        }))
        .unwrap();
        assert_eq!(device.extra.get("osVersion"), Some(&json!("10.0")));
    }
}
