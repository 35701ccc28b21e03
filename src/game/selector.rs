//! Placement target selection
//!
//! Picks the lowest living peer so a late joiner starts with the group's
//! straggler instead of skipping ahead of everyone.

use crate::game::snapshot::{ParticipantId, PeerSnapshot, PlacementTarget};

/// Reduce `candidates` to the living, non-excluded peer with the lowest
/// effective height.
///
/// Ties resolve to the first candidate in iteration order, so callers must
/// pass a deterministic ordering. Returns `None` when no peer is eligible.
pub fn select<'a, I>(candidates: I, exclude: ParticipantId) -> Option<PlacementTarget>
where
    I: IntoIterator<Item = &'a PeerSnapshot>,
{
    let mut best: Option<PlacementTarget> = None;

    for peer in candidates {
        if peer.id == exclude || !peer.alive {
            continue;
        }

        let y = peer.effective_y();
        // NaN heights never win
        if !y.is_finite() {
            continue;
        }

        // Strictly lower only: first-encountered wins ties
        match best {
            Some(current) if y >= current.effective_y => {}
            _ => {
                best = Some(PlacementTarget {
                    chosen_peer: peer.id,
                    effective_y: y,
                });
            }
        }
    }

    best
}

/// Sort snapshots by participant id so selection is reproducible
pub fn sort_for_selection(snapshots: &mut [PeerSnapshot]) {
    snapshots.sort_by_key(|s| s.id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::vec3::Vec3;
    use uuid::Uuid;

    fn peer(alive: bool, y: f32) -> PeerSnapshot {
        PeerSnapshot::new(Uuid::new_v4(), alive, None, Vec3::new(0.0, y, 0.0))
    }

    #[test]
    fn test_select_empty() {
        assert_eq!(select(&Vec::<PeerSnapshot>::new(), Uuid::new_v4()), None);
    }

    #[test]
    fn test_select_lowest_alive() {
        let a = peer(true, 10.0);
        let b = peer(true, 4.0);
        let c = peer(false, 1.0);
        let joiner = Uuid::new_v4();

        let target = select(&[a, b.clone(), c], joiner).unwrap();
        assert_eq!(target.chosen_peer, b.id);
        assert_eq!(target.effective_y, 4.0);
    }

    #[test]
    fn test_select_excludes_self() {
        let me = peer(true, 0.0);
        let other = peer(true, 50.0);

        let target = select(&[me.clone(), other.clone()], me.id).unwrap();
        assert_eq!(target.chosen_peer, other.id);
    }

    #[test]
    fn test_select_only_dead_or_self() {
        let me = peer(true, 0.0);
        let dead1 = peer(false, 1.0);
        let dead2 = peer(false, 2.0);

        assert_eq!(select(&[dead1.clone(), dead2.clone()], Uuid::new_v4()), None);
        assert_eq!(select(&[me.clone()], me.id), None);
        assert_eq!(select(&[me.clone(), dead1, dead2], me.id), None);
    }

    #[test]
    fn test_select_tie_first_wins() {
        let first = peer(true, 5.0);
        let second = peer(true, 5.0);
        let higher = peer(true, 9.0);

        let target = select(&[higher.clone(), first.clone(), second.clone()], Uuid::new_v4()).unwrap();
        assert_eq!(target.chosen_peer, first.id);

        let target = select(&[second.clone(), first], Uuid::new_v4()).unwrap();
        assert_eq!(target.chosen_peer, second.id);
    }

    #[test]
    fn test_select_uses_grounded_height() {
        // Jumping peer: free Y high, but last ground contact is the lowest
        let jumper = PeerSnapshot::new(
            Uuid::new_v4(),
            true,
            Some(Vec3::new(0.0, 1.0, 0.0)),
            Vec3::new(0.0, 20.0, 0.0),
        );
        let standing = peer(true, 3.0);

        let target = select(&[standing, jumper.clone()], Uuid::new_v4()).unwrap();
        assert_eq!(target.chosen_peer, jumper.id);
        assert_eq!(target.effective_y, 1.0);
    }

    #[test]
    fn test_select_skips_non_finite_heights() {
        let broken = peer(true, f32::NAN);
        let fine = peer(true, 7.0);

        let target = select(&[broken, fine.clone()], Uuid::new_v4()).unwrap();
        assert_eq!(target.chosen_peer, fine.id);
    }

    #[test]
    fn test_sorted_selection_is_reproducible() {
        let mut peers: Vec<PeerSnapshot> = (0..8).map(|_| peer(true, 2.0)).collect();
        let mut shuffled = peers.clone();
        shuffled.reverse();

        sort_for_selection(&mut peers);
        sort_for_selection(&mut shuffled);

        let exclude = Uuid::new_v4();
        assert_eq!(select(&peers, exclude), select(&shuffled, exclude));
        assert_eq!(select(&peers, exclude).unwrap().chosen_peer, peers[0].id);
    }
}
