//! Zone-based interest index.
//!
//! The board is cut into square zones. Every session is filed under each
//! zone its interest square overlaps, so finding the audience of a change
//! means looking at the zones of the change's endpoints instead of testing
//! every session.
//!
//! # Invariant
//!
//! A session whose interest square contains a cell is filed under that
//! cell's zone. The converse does not hold: zone membership is coarse and
//! the fanout applies the exact per-session filter afterwards.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use gridsync_board::ZoneId;
use gridsync_board::geometry::{zone_of, zones_covering};
use gridsync_protocol::{Pool, Pooled, Position};
use parking_lot::RwLock;

use crate::client::{Client, ClientId};
use crate::game::FanoutEvent;

#[derive(Default)]
struct Index {
    zones: HashMap<ZoneId, HashMap<ClientId, Arc<Client>>>,
    /// Zones each registered client is filed under.
    memberships: HashMap<ClientId, Vec<ZoneId>>,
}

/// Maps zones to the sessions interested in them.
pub struct ClientManager {
    index: RwLock<Index>,
    board_size: u16,
    zone_size: u16,
    interest_radius: u16,
    audiences: Pool<Vec<Arc<Client>>>,
}

impl ClientManager {
    pub fn new(board_size: u16, zone_size: u16, interest_radius: u16) -> Self {
        Self {
            index: RwLock::new(Index::default()),
            board_size,
            zone_size: zone_size.max(1),
            interest_radius,
            audiences: Pool::new(64),
        }
    }

    fn zones_around(&self, center: Position) -> Vec<ZoneId> {
        zones_covering(center, self.interest_radius, self.zone_size, self.board_size).collect()
    }

    /// Files `client` under every zone around its current position.
    pub fn register_client(&self, client: &Arc<Client>) {
        let zones = self.zones_around(client.position());
        let mut index = self.index.write();
        for &zone in &zones {
            index
                .zones
                .entry(zone)
                .or_default()
                .insert(client.id(), Arc::clone(client));
        }
        tracing::debug!(client_id = %client.id(), zones = zones.len(), "client registered");
        index.memberships.insert(client.id(), zones);
    }

    /// Moves `client` from the zones around `old` to the zones around
    /// `new`, touching only the zones that differ.
    ///
    /// Does nothing for a client that is not registered, so a position
    /// update racing with [`unregister_client`](Self::unregister_client)
    /// cannot resurrect a closed session.
    pub fn update_client_position(&self, client: &Arc<Client>, new: Position, old: Position) {
        let wanted: HashSet<ZoneId> = self.zones_around(new).into_iter().collect();
        let mut index = self.index.write();
        let Some(current) = index.memberships.get(&client.id()) else {
            return;
        };
        let current: HashSet<ZoneId> = current.iter().copied().collect();
        if current == wanted {
            return;
        }

        for zone in current.difference(&wanted) {
            if let Some(members) = index.zones.get_mut(zone) {
                members.remove(&client.id());
                if members.is_empty() {
                    index.zones.remove(zone);
                }
            }
        }
        for &zone in wanted.difference(&current) {
            index
                .zones
                .entry(zone)
                .or_default()
                .insert(client.id(), Arc::clone(client));
        }
        tracing::trace!(client_id = %client.id(), %old, %new, "interest zones updated");
        index
            .memberships
            .insert(client.id(), wanted.into_iter().collect());
    }

    /// Every session filed under any of `zones`, each exactly once.
    ///
    /// The vector goes back to the pool when the guard is dropped.
    pub fn clients_for_zones(&self, zones: &[ZoneId]) -> Pooled<Vec<Arc<Client>>> {
        let mut audience = self.audiences.get();
        let index = self.index.read();
        let mut seen = HashSet::new();
        for zone in zones {
            let Some(members) = index.zones.get(zone) else {
                continue;
            };
            for (id, client) in members {
                if seen.insert(*id) {
                    audience.push(Arc::clone(client));
                }
            }
        }
        audience
    }

    /// Distinct zones touched by an event: both ends of every moved piece
    /// and the cell of every removed or adopted piece.
    pub fn affected_zones_for(&self, event: &FanoutEvent) -> Vec<ZoneId> {
        let mut zones = Vec::new();
        let mut add = |pos: Position| {
            let zone = zone_of(pos, self.zone_size);
            if !zones.contains(&zone) {
                zones.push(zone);
            }
        };
        match event {
            FanoutEvent::Moves { moved, captured } => {
                for m in moved {
                    add(m.from);
                    add(m.piece.position);
                }
                if let Some(c) = captured {
                    add(c.position);
                }
            }
            FanoutEvent::Adoption { adopted, .. } => {
                for p in adopted {
                    add(p.position);
                }
            }
            FanoutEvent::BulkCapture { captured, .. } => {
                for c in captured {
                    add(c.position);
                }
            }
        }
        zones
    }

    /// Removes `id` from every zone it is filed under.
    pub fn unregister_client(&self, id: ClientId) {
        let mut index = self.index.write();
        let Some(zones) = index.memberships.remove(&id) else {
            return;
        };
        for zone in zones {
            if let Some(members) = index.zones.get_mut(&zone) {
                members.remove(&id);
                if members.is_empty() {
                    index.zones.remove(&zone);
                }
            }
        }
        tracing::debug!(client_id = %id, "client unregistered");
    }

    pub fn client_count(&self) -> usize {
        self.index.read().memberships.len()
    }

    /// Number of zones with at least one session.
    pub fn occupied_zones(&self) -> usize {
        self.index.read().zones.len()
    }
}

impl std::fmt::Debug for ClientManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientManager")
            .field("clients", &self.client_count())
            .field("zone_size", &self.zone_size)
            .field("interest_radius", &self.interest_radius)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::test_client;
    use gridsync_protocol::{CapturedPiece, MovedPiece, PieceData, PieceId, PieceKind, Side};

    // Board 128, zones of 16, interest radius 4.
    fn manager() -> Arc<ClientManager> {
        Arc::new(ClientManager::new(128, 16, 4))
    }

    fn moved(from: Position, to: Position) -> MovedPiece {
        MovedPiece {
            from,
            piece: PieceData {
                id: PieceId(1),
                kind: PieceKind::Rook,
                side: Side::White,
                position: to,
                move_count: 1,
                capture_count: 0,
            },
            seqnum: 1,
        }
    }

    fn ids(audience: &[Arc<Client>]) -> HashSet<ClientId> {
        audience.iter().map(|c| c.id()).collect()
    }

    // =========================================================================
    // register / unregister
    // =========================================================================

    #[tokio::test]
    async fn test_register_client_files_under_overlapping_zones() {
        let manager = manager();
        // (16, 8) with radius 4 spans x 12..=20 → zones x 0 and 1.
        let (client, _channels) = test_client(&manager, 1, Position::new(16, 8));
        manager.register_client(&client);

        assert_eq!(manager.client_count(), 1);
        assert_eq!(manager.occupied_zones(), 2);
        let audience = manager.clients_for_zones(&[ZoneId { x: 1, y: 0 }]);
        assert_eq!(ids(&audience), HashSet::from([client.id()]));
    }

    #[tokio::test]
    async fn test_unregister_client_removes_from_all_zones() {
        let manager = manager();
        let (client, _channels) = test_client(&manager, 1, Position::new(16, 16));
        manager.register_client(&client);
        manager.unregister_client(client.id());

        assert_eq!(manager.client_count(), 0);
        assert_eq!(manager.occupied_zones(), 0);
    }

    #[tokio::test]
    async fn test_unregister_client_unknown_is_noop() {
        let manager = manager();
        manager.unregister_client(ClientId::new(99));
        assert_eq!(manager.client_count(), 0);
    }

    // =========================================================================
    // clients_for_zones
    // =========================================================================

    #[tokio::test]
    async fn test_clients_for_zones_deduplicates() {
        let manager = manager();
        let (a, _ca) = test_client(&manager, 1, Position::new(16, 16));
        let (b, _cb) = test_client(&manager, 2, Position::new(100, 100));
        manager.register_client(&a);
        manager.register_client(&b);

        // `a` sits in all four zones around (16, 16).
        let zones = [
            ZoneId { x: 0, y: 0 },
            ZoneId { x: 1, y: 0 },
            ZoneId { x: 0, y: 1 },
            ZoneId { x: 1, y: 1 },
        ];
        let audience = manager.clients_for_zones(&zones);
        assert_eq!(audience.len(), 1);
        assert_eq!(audience[0].id(), a.id());
    }

    #[tokio::test]
    async fn test_clients_for_zones_returns_vec_to_pool() {
        let manager = manager();
        let (a, _ca) = test_client(&manager, 1, Position::new(0, 0));
        manager.register_client(&a);
        {
            let audience = manager.clients_for_zones(&[ZoneId { x: 0, y: 0 }]);
            assert_eq!(audience.len(), 1);
        }
        let audience = manager.clients_for_zones(&[ZoneId { x: 5, y: 5 }]);
        assert!(audience.is_empty(), "recycled vector must come back empty");
    }

    // =========================================================================
    // update_client_position
    // =========================================================================

    #[tokio::test]
    async fn test_update_client_position_moves_membership() {
        let manager = manager();
        let start = Position::new(8, 8);
        let (client, _channels) = test_client(&manager, 1, start);
        manager.register_client(&client);

        let far = Position::new(100, 100);
        client.set_position(far);
        manager.update_client_position(&client, far, start);

        assert!(manager.clients_for_zones(&[ZoneId { x: 0, y: 0 }]).is_empty());
        let audience = manager.clients_for_zones(&[zone_of(far, 16)]);
        assert_eq!(audience.len(), 1);
        assert_eq!(manager.client_count(), 1);
    }

    #[tokio::test]
    async fn test_update_client_position_unregistered_is_ignored() {
        let manager = manager();
        let (client, _channels) = test_client(&manager, 1, Position::new(8, 8));
        manager.update_client_position(&client, Position::new(50, 50), Position::new(8, 8));
        assert_eq!(manager.client_count(), 0);
        assert_eq!(manager.occupied_zones(), 0);
    }

    // =========================================================================
    // affected_zones_for
    // =========================================================================

    #[test]
    fn test_affected_zones_for_move_covers_both_ends_and_capture() {
        let manager = manager();
        let event = FanoutEvent::Moves {
            moved: vec![moved(Position::new(15, 0), Position::new(17, 0))],
            captured: Some(CapturedPiece {
                piece_id: PieceId(2),
                position: Position::new(40, 40),
                seqnum: 1,
            }),
        };
        let zones = manager.affected_zones_for(&event);
        assert_eq!(
            zones,
            vec![
                ZoneId { x: 0, y: 0 },
                ZoneId { x: 1, y: 0 },
                ZoneId { x: 2, y: 2 }
            ]
        );
    }

    #[test]
    fn test_affected_zones_for_bulk_capture_is_distinct() {
        let manager = manager();
        let captured = (0..5)
            .map(|i| CapturedPiece {
                piece_id: PieceId(i),
                position: Position::new(i as u16, 0),
                seqnum: 3,
            })
            .collect();
        let zones = manager.affected_zones_for(&FanoutEvent::BulkCapture {
            seqnum: 3,
            captured,
        });
        assert_eq!(zones, vec![ZoneId { x: 0, y: 0 }]);
    }

    #[tokio::test]
    async fn test_audience_of_move_includes_every_client_in_radius() {
        let manager = manager();
        // Close to the zone border on the far side from the move.
        let (near, _c1) = test_client(&manager, 1, Position::new(19, 3));
        let (far, _c2) = test_client(&manager, 2, Position::new(60, 60));
        manager.register_client(&near);
        manager.register_client(&far);

        let event = FanoutEvent::Moves {
            moved: vec![moved(Position::new(14, 2), Position::new(15, 2))],
            captured: None,
        };
        let audience = manager.clients_for_zones(&manager.affected_zones_for(&event));
        assert_eq!(ids(&audience), HashSet::from([near.id()]));
    }
}
