//! Common types for Pulsecast

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for tenants
pub type TenantId = Uuid;

/// Unique identifier for campaigns
pub type CampaignId = Uuid;

/// Unique identifier for gateway instances
pub type InstanceId = Uuid;

/// Unique identifier for per-recipient messages
pub type MessageId = Uuid;

/// Unique identifier for tracked links
pub type LinkId = Uuid;

/// Campaign lifecycle status
///
/// `Completed` and `Failed` are terminal. A user-initiated stop also ends in
/// `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    Draft,
    Pending,
    Scheduled,
    Processing,
    Paused,
    Completed,
    Failed,
}

impl CampaignStatus {
    /// Stored representation
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "DRAFT",
            CampaignStatus::Pending => "PENDING",
            CampaignStatus::Scheduled => "SCHEDULED",
            CampaignStatus::Processing => "PROCESSING",
            CampaignStatus::Paused => "PAUSED",
            CampaignStatus::Completed => "COMPLETED",
            CampaignStatus::Failed => "FAILED",
        }
    }

    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Failed)
    }

    /// Whether the campaign may still have queue entries or pending work
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Scheduled | CampaignStatus::Processing | CampaignStatus::Paused
        )
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(CampaignStatus::Draft),
            "PENDING" => Ok(CampaignStatus::Pending),
            "SCHEDULED" => Ok(CampaignStatus::Scheduled),
            "PROCESSING" => Ok(CampaignStatus::Processing),
            "PAUSED" => Ok(CampaignStatus::Paused),
            "COMPLETED" => Ok(CampaignStatus::Completed),
            "FAILED" => Ok(CampaignStatus::Failed),
            _ => Err(format!("Invalid campaign status: {}", s)),
        }
    }
}

/// Per-recipient message status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "SENT")]
    Sent,
    #[serde(rename = "FAILED")]
    Failed,
}

impl MessageStatus {
    /// Stored representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Sent => "SENT",
            MessageStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(MessageStatus::Pending),
            "sent" => Ok(MessageStatus::Sent),
            "failed" => Ok(MessageStatus::Failed),
            _ => Err(format!("Invalid message status: {}", s)),
        }
    }
}

/// Connectivity status of a gateway instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Connected,
    Connecting,
    Disconnected,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Connected => "connected",
            InstanceStatus::Connecting => "connecting",
            InstanceStatus::Disconnected => "disconnected",
        }
    }
}

impl std::str::FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connected" | "open" => Ok(InstanceStatus::Connected),
            "connecting" => Ok(InstanceStatus::Connecting),
            "disconnected" | "close" => Ok(InstanceStatus::Disconnected),
            _ => Err(format!("Invalid instance status: {}", s)),
        }
    }
}

/// A resolved recipient with optional named variables for interpolation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Recipient address (phone number)
    pub address: String,

    /// Named variables keyed in lowercase, matched case-insensitively
    /// against `{{key}}`. Of keys differing only by case, the last one wins.
    #[serde(default, deserialize_with = "lowercase_keys")]
    variables: HashMap<String, String>,
}

fn lowercase_keys<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct LowercaseKeys;

    impl<'de> Visitor<'de> for LowercaseKeys {
        type Value = HashMap<String, String>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of variable names to values")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut variables = HashMap::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, value)) = map.next_entry::<String, String>()? {
                variables.insert(key.to_lowercase(), value);
            }
            Ok(variables)
        }
    }

    deserializer.deserialize_map(LowercaseKeys)
}

impl Contact {
    /// Create a contact without variables
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            variables: HashMap::new(),
        }
    }

    /// Attach a variable
    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into().to_lowercase(), value.into());
        self
    }

    /// Look up a variable by case-insensitive key
    pub fn variable(&self, key: &str) -> Option<&str> {
        self.variables.get(&key.to_lowercase()).map(String::as_str)
    }
}

/// Media attachment reference carried alongside message text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    /// `image`, `video` or `document`
    pub media_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_campaign_status_roundtrip() {
        for status in [
            CampaignStatus::Draft,
            CampaignStatus::Scheduled,
            CampaignStatus::Processing,
            CampaignStatus::Paused,
            CampaignStatus::Completed,
            CampaignStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<CampaignStatus>(), Ok(status));
        }
        assert!(CampaignStatus::Failed.is_terminal());
        assert!(!CampaignStatus::Paused.is_terminal());
    }

    #[test]
    fn test_message_status_storage_form() {
        assert_eq!(MessageStatus::Pending.as_str(), "pending");
        assert_eq!(MessageStatus::Sent.as_str(), "SENT");
        assert_eq!("FAILED".parse::<MessageStatus>(), Ok(MessageStatus::Failed));
    }

    #[test]
    fn test_contact_variable_is_case_insensitive() {
        let contact = Contact::new("5511999990000").with_variable("Name", "Ana");
        assert_eq!(contact.variable("name"), Some("Ana"));
        assert_eq!(contact.variable("NAME"), Some("Ana"));
        assert_eq!(contact.variable("city"), None);
    }

    #[test]
    fn test_contact_keys_differing_by_case_resolve_to_the_last() {
        let contact = Contact::new("5511999990000")
            .with_variable("Name", "Ana")
            .with_variable("name", "Bia");
        assert_eq!(contact.variable("NAME"), Some("Bia"));

        let contact: Contact = serde_json::from_str(
            r#"{"address": "5511999990000", "variables": {"name": "Ana", "Name": "Bia", "City": "Recife"}}"#,
        )
        .unwrap();
        assert_eq!(contact.variable("name"), Some("Bia"));
        assert_eq!(contact.variable("city"), Some("Recife"));
    }
}
