//! Random account number allocation.

use bankcore_common::{AccountNumber, MAX_ACCOUNT_NUMBER_WIDTH};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

/// Bounds for account number allocation.
#[derive(Debug, Clone)]
pub struct AccountNumberConfig {
    /// Digits in a freshly allocated number.
    pub width: usize,
    /// Widest number the generator may fall back to.
    pub max_width: usize,
    /// Random draws per width before widening.
    pub attempts_per_width: u32,
}

impl Default for AccountNumberConfig {
    fn default() -> Self {
        Self {
            width: 12,
            max_width: MAX_ACCOUNT_NUMBER_WIDTH,
            attempts_per_width: 8,
        }
    }
}

/// Produces candidate account numbers. Uniqueness is decided by the store,
/// which rejects candidates already taken and asks for the next one.
#[derive(Debug, Clone, Default)]
pub struct AccountNumberGenerator {
    config: AccountNumberConfig,
}

impl AccountNumberGenerator {
    pub fn new(config: AccountNumberConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AccountNumberConfig {
        &self.config
    }

    /// Finite sequence of candidates, widening once a width has been tried
    /// `attempts_per_width` times. Ends after `max_width`.
    pub fn candidates(&self) -> Candidates {
        let max_width = self.config.max_width.clamp(1, MAX_ACCOUNT_NUMBER_WIDTH);
        Candidates {
            rng: StdRng::from_entropy(),
            width: self.config.width.clamp(1, max_width),
            max_width,
            attempts_per_width: self.config.attempts_per_width.max(1),
            drawn: 0,
        }
    }
}

/// Iterator returned by [`AccountNumberGenerator::candidates`].
pub struct Candidates {
    rng: StdRng,
    width: usize,
    max_width: usize,
    attempts_per_width: u32,
    drawn: u32,
}

impl Iterator for Candidates {
    type Item = AccountNumber;

    fn next(&mut self) -> Option<AccountNumber> {
        if self.drawn == self.attempts_per_width {
            if self.width >= self.max_width {
                return None;
            }
            self.width += 1;
            self.drawn = 0;
            warn!(width = self.width, "Account number collisions, widening");
        }
        self.drawn += 1;

        let low = 10u64.pow(self.width as u32 - 1);
        let high = low * 10;
        let digits = self.rng.gen_range(low..high);
        Some(AccountNumber::from_digits(digits.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_candidates_are_twelve_digits() {
        let generator = AccountNumberGenerator::default();
        let first = generator.candidates().next().unwrap();

        assert_eq!(first.as_str().len(), 12);
        assert!(!first.as_str().starts_with('0'));
    }

    #[test]
    fn test_candidates_widen_then_end() {
        let generator = AccountNumberGenerator::new(AccountNumberConfig {
            width: 3,
            max_width: 4,
            attempts_per_width: 2,
        });
        let widths: Vec<usize> = generator.candidates().map(|n| n.as_str().len()).collect();

        assert_eq!(widths, vec![3, 3, 4, 4]);
    }

    #[test]
    fn test_widest_width_fits_in_u64() {
        let generator = AccountNumberGenerator::new(AccountNumberConfig {
            width: 18,
            max_width: 18,
            attempts_per_width: 1,
        });
        let numbers: Vec<AccountNumber> = generator.candidates().collect();

        assert_eq!(numbers.len(), 1);
        assert_eq!(numbers[0].as_str().len(), 18);
    }
}
