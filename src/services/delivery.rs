use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::entities::carrier;

/// Shipping need of one delivery address in the cart. An address whose lines
/// are all virtual products never receives a carrier.
#[derive(Debug, Clone, Copy)]
pub struct AddressShipping {
    pub address_id: Uuid,
    pub needs_shipping: bool,
}

/// Resolves the carrier for every delivery address in the cart.
///
/// A stored selection pointing at a known active carrier is kept; anything
/// missing or stale is back-filled with the first active carrier in display
/// order. Carts with no usable carrier proceed unshipped.
pub fn resolve_delivery_options(
    addresses: &[AddressShipping],
    selected: &HashMap<Uuid, Uuid>,
    carriers: &[carrier::Model],
) -> HashMap<Uuid, Option<Uuid>> {
    let fallback = carriers.first().map(|c| c.id);
    let mut resolved = HashMap::with_capacity(addresses.len());
    for address in addresses {
        if !address.needs_shipping {
            resolved.insert(address.address_id, None);
            continue;
        }
        let choice = selected
            .get(&address.address_id)
            .copied()
            .filter(|id| carriers.iter().any(|c| c.id == *id))
            .or(fallback);
        if choice != selected.get(&address.address_id).copied() {
            debug!(
                address_id = %address.address_id,
                carrier_id = ?choice,
                "back-filled delivery option"
            );
        }
        resolved.insert(address.address_id, choice);
    }
    resolved
}
