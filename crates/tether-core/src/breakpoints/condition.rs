//! Hit-count predicates.

use std::fmt;
use std::str::FromStr;

use crate::error::TetherError;

/// Comparison applied to a breakpoint's hit counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HitComparison
{
    /// `== N`
    Equal,
    /// `!= N`
    NotEqual,
    /// `< N`
    Less,
    /// `<= N`
    LessOrEqual,
    /// `> N`
    Greater,
    /// `>= N`
    GreaterOrEqual,
    /// `% N`: every N-th hit.
    Multiple,
}

impl HitComparison
{
    const fn symbol(self) -> &'static str
    {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::Multiple => "%",
        }
    }
}

/// A parsed hit condition such as `>= 3`.
///
/// Accepted forms: an optional `@HIT@` prefix, then one of `==`, `!=`, `<`,
/// `<=`, `>`, `>=`, `%` followed by a count, or a bare count meaning `==`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HitCondition
{
    comparison: HitComparison,
    count: u64,
}

impl HitCondition
{
    /// Create a hit condition.
    #[must_use]
    pub const fn new(comparison: HitComparison, count: u64) -> Self
    {
        Self { comparison, count }
    }

    /// The comparison.
    #[must_use]
    pub const fn comparison(&self) -> HitComparison
    {
        self.comparison
    }

    /// The count compared against.
    #[must_use]
    pub const fn count(&self) -> u64
    {
        self.count
    }

    /// Whether a breakpoint hit for the `hits`-th time should count.
    #[must_use]
    pub const fn is_satisfied(&self, hits: u64) -> bool
    {
        match self.comparison {
            HitComparison::Equal => hits == self.count,
            HitComparison::NotEqual => hits != self.count,
            HitComparison::Less => hits < self.count,
            HitComparison::LessOrEqual => hits <= self.count,
            HitComparison::Greater => hits > self.count,
            HitComparison::GreaterOrEqual => hits >= self.count,
            HitComparison::Multiple => hits % self.count == 0,
        }
    }
}

impl FromStr for HitCondition
{
    type Err = TetherError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        let invalid = || TetherError::InvalidHitCondition(s.to_string());
        let text = s.trim();
        let text = text.strip_prefix("@HIT@").map_or(text, str::trim_start);

        // Two-character operators must be tried before their prefixes.
        let operators = [
            ("==", HitComparison::Equal),
            ("!=", HitComparison::NotEqual),
            ("<=", HitComparison::LessOrEqual),
            (">=", HitComparison::GreaterOrEqual),
            ("<", HitComparison::Less),
            (">", HitComparison::Greater),
            ("%", HitComparison::Multiple),
        ];
        let (comparison, rest) = operators
            .iter()
            .find_map(|(symbol, comparison)| text.strip_prefix(*symbol).map(|rest| (*comparison, rest)))
            .unwrap_or((HitComparison::Equal, text));

        let count: u64 = rest.trim().parse().map_err(|_| invalid())?;
        if comparison == HitComparison::Multiple && count == 0 {
            return Err(invalid());
        }
        Ok(Self { comparison, count })
    }
}

impl fmt::Display for HitCondition
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{} {}", self.comparison.symbol(), self.count)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_parse_forms()
    {
        assert_eq!("5".parse::<HitCondition>().ok(), Some(HitCondition::new(HitComparison::Equal, 5)));
        assert_eq!(">= 3".parse::<HitCondition>().ok(), Some(HitCondition::new(HitComparison::GreaterOrEqual, 3)));
        assert_eq!("@HIT@ % 2".parse::<HitCondition>().ok(), Some(HitCondition::new(HitComparison::Multiple, 2)));
        assert_eq!("<2".parse::<HitCondition>().ok(), Some(HitCondition::new(HitComparison::Less, 2)));
        assert!("".parse::<HitCondition>().is_err());
        assert!("> x".parse::<HitCondition>().is_err());
        assert!("% 0".parse::<HitCondition>().is_err());
    }

    #[test]
    fn test_satisfied()
    {
        let every_third = HitCondition::new(HitComparison::Multiple, 3);
        let hits: Vec<u64> = (1..=9).filter(|h| every_third.is_satisfied(*h)).collect();
        assert_eq!(hits, vec![3, 6, 9]);
        assert!(HitCondition::new(HitComparison::Greater, 2).is_satisfied(3));
        assert!(!HitCondition::new(HitComparison::NotEqual, 2).is_satisfied(2));
    }
}
