// ABOUTME: Random fixed-length lowercase tokens for deployment and correlation ids.
// ABOUTME: Retries on collision against a caller-supplied "taken" predicate.

use crate::error::TokenError;
use rand::Rng;

pub const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
pub const DEPLOYMENT_ID_LENGTH: usize = 16;
pub const CORRELATION_ID_LENGTH: usize = 8;

/// Upper bound on collision retries before the token space is considered full.
const MAX_ATTEMPTS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGenerator {
    alphabet: Vec<char>,
    length: usize,
}

impl TokenGenerator {
    /// An empty alphabet falls back to lowercase letters.
    pub fn new(alphabet: &str, length: usize) -> Self {
        let alphabet = if alphabet.is_empty() {
            LOWERCASE
        } else {
            alphabet
        };
        Self {
            alphabet: alphabet.chars().collect(),
            length: length.max(1),
        }
    }

    pub fn deployment_ids() -> Self {
        Self::new(LOWERCASE, DEPLOYMENT_ID_LENGTH)
    }

    pub fn correlation_ids() -> Self {
        Self::new(LOWERCASE, CORRELATION_ID_LENGTH)
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.length)
            .map(|_| self.alphabet[rng.gen_range(0..self.alphabet.len())])
            .collect()
    }

    /// Generate a token for which `taken` returns false.
    pub fn generate_unique(&self, taken: impl Fn(&str) -> bool) -> Result<String, TokenError> {
        for _ in 0..MAX_ATTEMPTS {
            let token = self.generate();
            if !taken(&token) {
                return Ok(token);
            }
        }
        Err(TokenError::Exhausted {
            attempts: MAX_ATTEMPTS,
        })
    }
}
