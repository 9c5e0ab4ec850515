use std::collections::HashMap;
use std::io;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// The slice of a user profile the booking rules need.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_blocked: bool,
}

impl Profile {
    /// Complete means a first name and a phone number are on file.
    pub fn is_complete(&self) -> bool {
        !self.first_name.trim().is_empty() && !self.phone.trim().is_empty()
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, user_id: &str) -> Option<Profile>;
}

#[derive(Debug, Default)]
pub struct InMemoryProfiles {
    profiles: DashMap<String, Profile>,
}

impl InMemoryProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: impl Into<String>, profile: Profile) {
        self.profiles.insert(user_id.into(), profile);
    }

    pub fn remove(&self, user_id: &str) -> Option<Profile> {
        self.profiles.remove(user_id).map(|(_, p)| p)
    }

    /// Profiles keyed by user id, as a JSON object.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let entries: HashMap<String, Profile> = serde_json::from_str(json)?;
        let store = Self::new();
        for (user_id, profile) in entries {
            store.insert(user_id, profile);
        }
        Ok(store)
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn set_blocked(&self, user_id: &str, blocked: bool) -> bool {
        match self.profiles.get_mut(user_id) {
            Some(mut p) => {
                p.is_blocked = blocked;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfiles {
    async fn get_profile(&self, user_id: &str) -> Option<Profile> {
        self.profiles.get(user_id).map(|p| p.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(first: &str, last: &str, phone: &str) -> Profile {
        Profile {
            first_name: first.into(),
            last_name: last.into(),
            phone: phone.into(),
            ..Profile::default()
        }
    }

    #[test]
    fn completeness_needs_first_name_and_phone() {
        assert!(profile("Ana", "", "+54 11 5555").is_complete());
        assert!(!profile("", "Paz", "+54 11 5555").is_complete());
        assert!(!profile("Ana", "Paz", "  ").is_complete());
    }

    #[test]
    fn display_name_trims() {
        assert_eq!(profile(" Ana ", "Paz", "1").display_name(), "Ana Paz");
        assert_eq!(profile("Ana", "", "1").display_name(), "Ana");
    }

    #[tokio::test]
    async fn in_memory_store_round_trip() {
        let store = InMemoryProfiles::new();
        assert_eq!(store.get_profile("u1").await, None);

        store.insert("u1", profile("Ana", "Paz", "1"));
        assert!(store.set_blocked("u1", true));
        assert!(!store.set_blocked("ghost", true));

        let p = store.get_profile("u1").await.unwrap();
        assert!(p.is_blocked);
        assert_eq!(store.remove("u1").map(|p| p.first_name), Some("Ana".to_string()));
    }

    #[tokio::test]
    async fn loads_profiles_from_json() {
        let json = r#"{
            "u1": { "first_name": "Ana", "last_name": "Paz", "phone": "555-0101" },
            "boss": { "first_name": "Alma", "last_name": "Vera", "phone": "555-0100", "is_admin": true }
        }"#;
        let store = InMemoryProfiles::from_json(json).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.get_profile("u1").await.unwrap().is_complete());
        assert!(!store.get_profile("u1").await.unwrap().is_admin);
        assert!(store.get_profile("boss").await.unwrap().is_admin);

        assert!(InMemoryProfiles::from_json(r#"{"u1": {"first_name": "Ana"}}"#).is_err());

        let path = std::env::temp_dir().join(format!("slotkeeper_profiles_{}.json", std::process::id()));
        std::fs::write(&path, json).unwrap();
        assert_eq!(InMemoryProfiles::load(&path).unwrap().len(), 2);
        std::fs::write(&path, "not json").unwrap();
        let err = InMemoryProfiles::load(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        let _ = std::fs::remove_file(&path);
    }
}
