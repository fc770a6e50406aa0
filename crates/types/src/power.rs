//! Byzantine fault tolerance thresholds.

/// Smallest voting power that constitutes a Byzantine majority:
/// `floor(2P/3) + 1` of available power `P`.
///
/// A block (or nil) reaching this much precommit power is decided.
pub fn byzantine_majority(available_power: u64) -> u64 {
    (available_power as u128 * 2 / 3) as u64 + 1
}

/// Smallest voting power that is guaranteed to include at least one honest
/// validator: `floor(P/3) + 1` of available power `P`.
///
/// Crossing this threshold on a round or block means the network is really
/// there, so the mirror may advance or fetch on its evidence.
pub fn byzantine_minority(available_power: u64) -> u64 {
    available_power / 3 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_for_equal_committee() {
        // 4 validators with power 10 each.
        assert_eq!(byzantine_majority(40), 27);
        assert_eq!(byzantine_minority(40), 14);
    }

    #[test]
    fn test_thresholds_exact_thirds() {
        assert_eq!(byzantine_majority(3), 3);
        assert_eq!(byzantine_minority(3), 2);
        assert_eq!(byzantine_majority(6), 5);
        assert_eq!(byzantine_minority(6), 3);
    }

    #[test]
    fn test_majority_no_overflow() {
        let p = u64::MAX - 1;
        // Widened arithmetic must not wrap.
        assert!(byzantine_majority(p) > p / 2);
    }

    #[test]
    fn test_majority_exceeds_two_thirds() {
        for p in 1..100u64 {
            let maj = byzantine_majority(p);
            assert!(maj as u128 * 3 > p as u128 * 2, "p={p} maj={maj}");
            assert!((maj - 1) as u128 * 3 <= p as u128 * 2, "p={p} maj={maj}");
        }
    }
}
