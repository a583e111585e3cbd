use std::collections::BTreeMap;
use wasp_common::{Color, Hash256};

/// Token balances of a contract address, by color.
pub type Balances = BTreeMap<Color, i64>;

/// Order-independent digest of a balance set. Leader and followers compare
/// it before running a batch.
pub fn balances_hash(balances: &Balances) -> Hash256 {
    let mut data = Vec::with_capacity(balances.len() * 40);
    for (color, amount) in balances {
        data.extend_from_slice(color.as_bytes());
        data.extend_from_slice(&amount.to_le_bytes());
    }
    Hash256::hash(&data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_depends_on_amounts() {
        let mut a = Balances::new();
        a.insert(Hash256::ZERO, 10);
        let mut b = a.clone();
        assert_eq!(balances_hash(&a), balances_hash(&b));
        b.insert(Hash256::ZERO, 11);
        assert_ne!(balances_hash(&a), balances_hash(&b));
    }
}
