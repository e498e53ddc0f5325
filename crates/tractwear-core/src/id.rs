use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a vehicle whose wear state is owned by the engine.
    pub struct VehicleId;
}

/// A wearable vehicle subsystem with its own reliability track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Component {
    Engine,
    Hydraulic,
    Electrical,
}

impl Component {
    /// Every component, in persistence order.
    pub const ALL: [Component; 3] = [Component::Engine, Component::Hydraulic, Component::Electrical];

    /// Stable lowercase key used in logs and persisted field names.
    pub const fn key(self) -> &'static str {
        match self {
            Component::Engine => "engine",
            Component::Hydraulic => "hydraulic",
            Component::Electrical => "electrical",
        }
    }
}

/// Identifies an implement attacher joint reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JointId(pub u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_keys_are_distinct() {
        let keys: std::collections::HashSet<_> = Component::ALL.iter().map(|c| c.key()).collect();
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn vehicle_ids_are_hashable() {
        use slotmap::SlotMap;
        use std::collections::HashMap;

        let mut slots: SlotMap<VehicleId, ()> = SlotMap::with_key();
        let a = slots.insert(());
        let b = slots.insert(());
        let mut map = HashMap::new();
        map.insert(a, "tractor");
        map.insert(b, "harvester");
        assert_eq!(map[&a], "tractor");
        assert_ne!(a, b);
    }
}
