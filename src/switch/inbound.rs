//! Remote datagram ingress: runt rejection, fragment/head dispatch, relay.

use std::net::SocketAddr;

use tracing::{debug, trace};

use crate::packet::{
    Fragment, Packet, PacketError, FRAGMENT_INDICATOR, FRAGMENT_INDICATOR_IDX,
    MIN_FRAGMENT_LENGTH, MIN_PACKET_LENGTH, RELAY_MAX_HOPS,
};
use crate::util::now_ms;

use super::decoder::IncomingPacket;
use super::Switch;

impl Switch {
    /// Ingest one datagram from the demarcation layer.
    ///
    /// Malformed datagrams are logged and swallowed here; nothing a remote
    /// sender puts on the wire can propagate a fault past this boundary.
    pub fn on_remote_packet(&self, local_socket: i64, from: SocketAddr, data: &[u8]) {
        self.on_remote_packet_at(local_socket, from, data, now_ms());
    }

    pub(crate) fn on_remote_packet_at(
        &self,
        local_socket: i64,
        from: SocketAddr,
        data: &[u8],
        now: i64,
    ) {
        if data.len() < MIN_FRAGMENT_LENGTH {
            trace!(%from, len = data.len(), "Dropped runt datagram");
            return;
        }
        let result = if data[FRAGMENT_INDICATOR_IDX] == FRAGMENT_INDICATOR {
            self.handle_remote_fragment(local_socket, from, data, now)
        } else if data.len() >= MIN_PACKET_LENGTH {
            self.handle_remote_head(local_socket, from, data, now)
        } else {
            trace!(%from, len = data.len(), "Dropped runt packet");
            Ok(())
        };
        if let Err(e) = result {
            debug!(%from, error = %e, "Dropped malformed datagram");
        }
    }

    /// Handle a packet head: relay, reassemble, or decode.
    fn handle_remote_head(
        &self,
        local_socket: i64,
        from: SocketAddr,
        data: &[u8],
        now: i64,
    ) -> Result<(), PacketError> {
        let packet = Packet::from_bytes(data.to_vec())?;
        let dest = packet.destination();
        if !dest.is_valid() || !packet.source().is_valid() {
            return Err(PacketError::Malformed);
        }

        if dest != self.address() {
            self.relay_head(packet, from, now);
            return Ok(());
        }

        let incoming = IncomingPacket::new(packet, local_socket, from, now);
        if incoming.packet().fragmented() {
            // Head of a fragmented series: file it with the defrag store and
            // decode outside the lock if this completed the set.
            let assembled = self
                .defrag_queue
                .lock()
                .expect("switch defrag lock")
                .insert_head(incoming, now);
            if let Some(assembled) = assembled {
                self.decode_or_park(assembled, now);
            }
        } else {
            self.decode_or_park(incoming, now);
        }
        Ok(())
    }

    /// Relay a head addressed to someone else, encouraging the endpoints to
    /// meet directly.
    fn relay_head(&self, mut packet: Packet, from: SocketAddr, now: i64) {
        if packet.hops() >= RELAY_MAX_HOPS {
            trace!(%from, dest = %packet.destination(), "Dropped relay: max hops exceeded");
            return;
        }
        packet.increment_hops();

        let dest = packet.destination();
        let source = packet.source();
        let sent_direct = self
            .topology
            .peer(dest, true)
            .map(|peer| peer.send(self.demarc.as_ref(), packet.data(), now))
            .unwrap_or(false);
        if sent_direct {
            // Periodically nudge the two ends toward a direct link.
            self.unite_at(source, dest, false, now);
        } else if let Some(root) = self.topology.root() {
            root.send(self.demarc.as_ref(), packet.data(), now);
        }
    }

    /// Handle a fragment: relay raw, or file with the defrag store.
    fn handle_remote_fragment(
        &self,
        _local_socket: i64,
        from: SocketAddr,
        data: &[u8],
        now: i64,
    ) -> Result<(), PacketError> {
        let mut fragment = Fragment::from_bytes(data.to_vec())?;
        let dest = fragment.destination();
        if !dest.is_valid() {
            return Err(PacketError::Malformed);
        }

        if dest != self.address() {
            // Not ours: relay the raw fragment with the same hop discipline
            // as a head (no unite; fragments carry no source).
            if fragment.hops() >= RELAY_MAX_HOPS {
                trace!(%from, %dest, "Dropped relay fragment: max hops exceeded");
                return Ok(());
            }
            fragment.increment_hops();
            let sent_direct = self
                .topology
                .peer(dest, true)
                .map(|peer| peer.send(self.demarc.as_ref(), fragment.data(), now))
                .unwrap_or(false);
            if !sent_direct {
                if let Some(root) = self.topology.root() {
                    root.send(self.demarc.as_ref(), fragment.data(), now);
                }
            }
            return Ok(());
        }

        let assembled = self
            .defrag_queue
            .lock()
            .expect("switch defrag lock")
            .insert_fragment(&fragment, now);
        if let Some(assembled) = assembled {
            self.decode_or_park(assembled, now);
        }
        Ok(())
    }
}
