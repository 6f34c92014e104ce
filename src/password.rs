//! Password value object and strength helpers.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Characters used by [`generate`].
const ALPHABET: &[u8] =
    b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789!@#$%&*?+-=";

/// Value object of a password. Never printed by `Debug`.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Password(String);

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the same string as a string slice `&str`.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Password")
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Levenshtein distance between two passwords, counted in characters.
pub fn distance(a: &str, b: &str) -> usize {
    strsim::levenshtein(a, b)
}

/// zxcvbn score (0 to 4) of `password`. Words in `user_inputs` are
/// penalised.
pub fn score(password: &str, user_inputs: &[&str]) -> u8 {
    zxcvbn::zxcvbn(password, user_inputs)
        .map(|entropy| entropy.score())
        .unwrap_or_default()
}

/// Random password of `length` characters.
pub fn generate(length: usize) -> Password {
    let mut rng = rand::thread_rng();
    let value = (0..length)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect::<String>();
    Password(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance() {
        assert_eq!(distance("", ""), 0);
        assert_eq!(distance("kitten", "sitting"), 3);
        assert_eq!(distance("Password1", "Password2"), 1);
        assert_eq!(distance("abc", ""), 3);
        assert_eq!(distance("", "abc"), 3);
        assert_eq!(distance("été", "ete"), 2);
    }

    #[test]
    fn test_score() {
        assert_eq!(score("", &[]), 0);
        assert!(score("password", &[]) <= 1);
        assert!(score("correct horse battery staple 42!", &[]) >= 3);
        assert!(score("jdoe2024", &["jdoe"]) <= 2);
    }

    #[test]
    fn test_generate() {
        let password = generate(16);
        assert_eq!(password.as_str().chars().count(), 16);
        assert!(password.as_str().bytes().all(|b| ALPHABET.contains(&b)));
        assert_ne!(generate(16), generate(16));
    }

    #[test]
    fn test_password_is_redacted() {
        let password = Password::new("hunter22");
        assert!(!format!("{password:?}").contains("hunter22"));
    }
}
