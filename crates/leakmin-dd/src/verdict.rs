use serde::{Deserialize, Serialize};

/// Outcome of testing one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    /// Property absent: the candidate may be shrunk further.
    Pass,
    /// Property present: the candidate must be retained.
    Fail,
}

impl Verdict {
    /// Map "the property still holds" onto a verdict.
    pub fn from_property(holds: bool) -> Self {
        if holds {
            Verdict::Fail
        } else {
            Verdict::Pass
        }
    }

    pub fn is_fail(self) -> bool {
        self == Verdict::Fail
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Fail => write!(f, "FAIL"),
        }
    }
}

/// A token paired with the position it had in the original sequence.
///
/// Positions are assigned once by [`index_tokens`] and never renumbered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexedToken<T> {
    pub index: usize,
    pub token: T,
}

/// Ordered, duplicate-preserving projection of the original sequence.
pub type Candidate<T> = Vec<IndexedToken<T>>;

pub fn index_tokens<T>(tokens: impl IntoIterator<Item = T>) -> Candidate<T> {
    tokens
        .into_iter()
        .enumerate()
        .map(|(index, token)| IndexedToken { index, token })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_tokens_assigns_positions_in_order() {
        let indexed = index_tokens("abc".chars());
        let positions: Vec<usize> = indexed.iter().map(|t| t.index).collect();
        assert_eq!(positions, vec![0, 1, 2]);
        assert_eq!(indexed[2].token, 'c');
    }

    #[test]
    fn test_verdict_from_property() {
        assert_eq!(Verdict::from_property(true), Verdict::Fail);
        assert_eq!(Verdict::from_property(false), Verdict::Pass);
        assert!(Verdict::Fail.is_fail());
        assert_eq!(Verdict::Pass.to_string(), "PASS");
    }
}
