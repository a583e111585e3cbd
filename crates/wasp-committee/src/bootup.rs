use crate::{CommitteeError, Result};
use serde::{Deserialize, Serialize};
use wasp_common::{Address, Color};

/// Everything a node needs to run one contract's committee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootupData {
    pub address: Address,
    pub owner_address: Address,
    /// Color of the contract token, equal to the origin transaction id.
    pub color: Color,
    /// Peering locations in committee order. Position is the peer index.
    pub committee_nodes: Vec<String>,
    /// Nodes that follow the state without taking part in consensus.
    #[serde(default)]
    pub access_nodes: Vec<String>,
    #[serde(default)]
    pub active: bool,
}

impl BootupData {
    pub fn size(&self) -> u16 {
        self.committee_nodes.len() as u16
    }

    /// Index of `location` in the committee.
    pub fn peer_index(&self, location: &str) -> Option<u16> {
        self.committee_nodes
            .iter()
            .position(|n| n == location)
            .map(|i| i as u16)
    }

    pub fn validate(&self) -> Result<()> {
        if self.committee_nodes.is_empty() {
            return Err(CommitteeError::InvalidBootupData("empty committee".into()));
        }
        let mut sorted = self.committee_nodes.clone();
        sorted.sort();
        sorted.dedup();
        if sorted.len() != self.committee_nodes.len() {
            return Err(CommitteeError::InvalidBootupData(
                "duplicate committee node".into(),
            ));
        }
        if self.color.is_zero() {
            return Err(CommitteeError::InvalidBootupData("missing color".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasp_common::Hash256;

    fn sample() -> BootupData {
        BootupData {
            address: Address::from_key_material(b"sc"),
            owner_address: Address::from_key_material(b"owner"),
            color: Hash256::hash(b"origin"),
            committee_nodes: vec!["a:1".into(), "b:1".into(), "c:1".into()],
            access_nodes: vec![],
            active: true,
        }
    }

    #[test]
    fn test_peer_index() {
        let bd = sample();
        assert_eq!(bd.peer_index("b:1"), Some(1));
        assert_eq!(bd.peer_index("z:1"), None);
        assert_eq!(bd.size(), 3);
    }

    #[test]
    fn test_validate() {
        assert!(sample().validate().is_ok());
        let mut dup = sample();
        dup.committee_nodes.push("a:1".into());
        assert!(dup.validate().is_err());
        let mut no_color = sample();
        no_color.color = Hash256::ZERO;
        assert!(no_color.validate().is_err());
    }

    #[test]
    fn test_json_defaults() {
        let bd = sample();
        let mut json: serde_json::Value = serde_json::to_value(&bd).unwrap();
        json.as_object_mut().unwrap().remove("access_nodes");
        json.as_object_mut().unwrap().remove("active");
        let parsed: BootupData = serde_json::from_value(json).unwrap();
        assert!(!parsed.active);
        assert_eq!(parsed.address, bd.address);
    }
}
