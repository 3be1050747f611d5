//! Greedy candidate scorer.
//!
//! The first eligible candidate seeds the choice; a later candidate
//! replaces it only on a clear win. Rating is compared first: more than
//! 20% better takes the offer regardless of distance. Otherwise more than
//! 20% closer wins; on anything less, the incumbent stays. For a fixed
//! snapshot order the result is deterministic.

use crate::registry::DriverEntry;

/// Replacement threshold on distance: candidate must be below 80% of the
/// incumbent's distance.
const CLOSER_FACTOR: f64 = 0.8;
/// Replacement threshold on rating: candidate must exceed 120% of the
/// incumbent's rating.
const RATING_FACTOR: f64 = 1.2;

/// A soft-eligible driver with its pickup distance.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub entry: DriverEntry,
    pub distance_m: f64,
}

/// Pick the single chosen candidate, or `None` when nobody is eligible.
pub fn choose(candidates: impl IntoIterator<Item = Candidate>) -> Option<Candidate> {
    let mut chosen: Option<Candidate> = None;
    for candidate in candidates {
        match &chosen {
            None => chosen = Some(candidate),
            Some(current) => {
                if candidate.entry.rating > current.entry.rating * RATING_FACTOR
                    || candidate.distance_m < current.distance_m * CLOSER_FACTOR
                {
                    chosen = Some(candidate);
                }
            }
        }
    }
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Configuration, DriverState};
    use crate::geo::Coordinate;

    fn candidate(public_id: &str, rating: f64, distance_m: f64) -> Candidate {
        Candidate {
            entry: DriverEntry {
                public_id: public_id.to_string(),
                socket_id: format!("sock-{public_id}"),
                rating,
                p2p_capable: true,
                position: Coordinate::new(0.0, 0.0),
                configuration: Configuration::accept_all(),
                state: DriverState::Searching,
            },
            distance_m,
        }
    }

    #[test]
    fn empty_pool_chooses_nobody() {
        assert!(choose(Vec::new()).is_none());
    }

    #[test]
    fn first_candidate_seeds_the_choice() {
        let chosen = choose(vec![
            candidate("a", 4.0, 900.0),
            // Closer, but within the 20% margin: incumbent stays.
            candidate("b", 4.0, 800.0),
        ])
        .expect("chosen");
        assert_eq!(chosen.entry.public_id, "a");
    }

    #[test]
    fn clearly_closer_candidate_takes_over() {
        let chosen = choose(vec![
            candidate("a", 4.0, 1_000.0),
            candidate("b", 4.0, 500.0),
        ])
        .expect("chosen");
        assert_eq!(chosen.entry.public_id, "b");
    }

    #[test]
    fn much_better_rating_beats_a_shorter_distance() {
        let chosen = choose(vec![
            candidate("a", 3.0, 200.0),
            // Farther away, but rated far above the incumbent.
            candidate("b", 4.8, 1_500.0),
        ])
        .expect("chosen");
        assert_eq!(chosen.entry.public_id, "b");
    }

    #[test]
    fn order_is_deterministic_for_a_fixed_snapshot() {
        let pool = vec![
            candidate("a", 4.0, 700.0),
            candidate("b", 4.1, 650.0),
            candidate("c", 4.0, 690.0),
        ];
        let first = choose(pool.clone()).expect("chosen");
        let second = choose(pool).expect("chosen");
        assert_eq!(first.entry.public_id, second.entry.public_id);
        assert_eq!(first.entry.public_id, "a");
    }
}
