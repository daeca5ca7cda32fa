use xxhash_rust::xxh32::xxh32;

/// 32-bit content hash used for every identity in the catalog.
pub fn hash32(input: &str) -> u32 {
    xxh32(input.as_bytes(), 0)
}

/// Collision-chaining step: rehash the same input seeded by the previous
/// hash. Probing with this until a free (or matching) slot appears keeps
/// the first claimant of a slot stable for the life of the map.
pub fn chain_hash(prev: u32, input: &str) -> u32 {
    xxh32(input.as_bytes(), prev)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash32("Artist/Album/01 - Song.mp3"), hash32("Artist/Album/01 - Song.mp3"));
        assert_ne!(hash32("a"), hash32("b"));
    }

    #[test]
    fn chain_moves_the_hash() {
        let h = hash32("x");
        assert_ne!(h, chain_hash(h, "x"));
    }

    #[test]
    fn chaining_resolves_forced_collisions() {
        use std::collections::HashMap;

        fn settle(slots: &HashMap<u32, String>, input: &str) -> u32 {
            let mut h = hash32(input);
            while let Some(claimed) = slots.get(&h) {
                if claimed == input {
                    break;
                }
                h = chain_hash(h, input);
            }
            h
        }

        let mut slots: HashMap<u32, String> = HashMap::new();
        let first = settle(&slots, "alpha");
        slots.insert(first, "alpha".to_string());

        // Force a collision by pre-claiming beta's natural slot.
        let natural = hash32("beta");
        slots.insert(natural, "other".to_string());
        let settled = settle(&slots, "beta");
        assert_ne!(settled, natural);
        slots.insert(settled, "beta".to_string());

        // Both claimants keep their slots on re-probe.
        assert_eq!(settle(&slots, "alpha"), first);
        assert_eq!(settle(&slots, "beta"), settled);
    }
}
