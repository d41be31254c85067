//! Random nick generation for first-time registration.

use rand::seq::SliceRandom;

const ADJECTIVES: [&str; 16] = [
    "Amber", "Blue", "Bright", "Calm", "Cobalt", "Crimson", "Golden", "Green",
    "Iron", "Misty", "Quick", "Quiet", "Scarlet", "Silent", "Silver", "Swift",
];

const NOUNS: [&str; 16] = [
    "Badger", "Brook", "Falcon", "Fox", "Harbor", "Heron", "Lake", "Lynx",
    "Meadow", "Otter", "Pine", "Raven", "Ridge", "River", "Spark", "Wolf",
];

/// CamelCase adjective+noun pair, e.g. `BlueLake`.
pub fn generate_nick() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).unwrap_or(&ADJECTIVES[0]);
    let noun = NOUNS.choose(&mut rng).unwrap_or(&NOUNS[0]);
    format!("{adjective}{noun}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nick_is_a_known_adjective_noun_pair() {
        for _ in 0..32 {
            let nick = generate_nick();
            assert!(ADJECTIVES
                .iter()
                .any(|adj| nick.starts_with(adj) && NOUNS.contains(&&nick[adj.len()..])));
        }
    }
}
