//! Layer-2 tap collaborator contract.

use crate::ethernet::Mac;

/// The virtual Ethernet device a network delivers frames to.
///
/// Implementations wrap an OS tap device (or a test double). The switch
/// calls [`EthernetTap::put`] to inject received frames; the device owner
/// feeds locally originated frames into
/// [`Switch::on_local_ethernet`](crate::switch::Switch::on_local_ethernet).
pub trait EthernetTap: Send + Sync {
    /// The device's own MAC address.
    fn mac(&self) -> Mac;

    /// Inject a frame into the device.
    fn put(&self, from: Mac, to: Mac, ether_type: u16, frame: &[u8]);
}
