use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokenwatch_core_types::normalize_address;

/// Addresses whose assessment is currently owned by a fresh-discovery task
/// or a sweep. At most one owner per address.
#[derive(Debug, Clone, Default)]
pub struct InFlightAddresses {
    keys: Arc<Mutex<HashSet<String>>>,
}

/// Held for the duration of one assessment; releases the address on drop.
#[derive(Debug)]
pub struct InFlightClaim {
    keys: Arc<Mutex<HashSet<String>>>,
    address: String,
}

impl InFlightAddresses {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` while another task owns the address.
    pub fn try_claim(&self, address: &str) -> Option<InFlightClaim> {
        let address = normalize_address(address);
        let mut keys = self
            .keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !keys.insert(address.clone()) {
            return None;
        }
        Some(InFlightClaim {
            keys: Arc::clone(&self.keys),
            address,
        })
    }

    pub fn contains(&self, address: &str) -> bool {
        self.keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&normalize_address(address))
    }

    pub fn len(&self) -> usize {
        self.keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_owner_per_address_until_release() {
        let in_flight = InFlightAddresses::new();
        let claim = in_flight
            .try_claim("0xABCDEF0000000000000000000000000000000001")
            .expect("first claim");
        assert!(in_flight
            .try_claim("0xabcdef0000000000000000000000000000000001")
            .is_none());
        assert!(in_flight.contains("0xabcdef0000000000000000000000000000000001"));
        assert!(in_flight
            .try_claim("0xabcdef0000000000000000000000000000000002")
            .is_some());
        assert_eq!(in_flight.len(), 1);

        drop(claim);
        assert!(in_flight.is_empty());
        assert!(in_flight
            .try_claim("0xabcdef0000000000000000000000000000000001")
            .is_some());
    }
}
