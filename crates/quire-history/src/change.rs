//! The opaque change payload and net-change minimization.
//!
//! The history layer never looks inside a change. It only needs to know which
//! logical target a change acts on and how two changes to the same target
//! combine. Everything else (what an axiom is, how a document applies it) is
//! up to the payload type.

use std::fmt::Debug;
use std::hash::Hash;

use indexmap::IndexMap;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Result of combining two changes that share a target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Merged<C> {
    /// A single change with the combined effect.
    Net(C),
    /// The two changes cancel; nothing survives for this target.
    Cancelled,
}

/// A single application-defined change operation.
pub trait Change: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The logical thing a change acts on (an axiom, an annotation, the
    /// document identity). At most one net change per target survives
    /// minimization.
    type Target: Hash + Eq + Clone + Debug;

    /// What changes are applied to.
    type Context;

    fn target(&self) -> Self::Target;

    /// Combine an earlier change with a later one on the same target.
    fn merge(prior: Self, next: Self) -> Merged<Self>;

    fn apply_to(&self, context: &mut Self::Context);
}

/// Collapse a change sequence to its net effect.
///
/// Output keeps the order in which targets were first touched. A target whose
/// changes cancel out is dropped entirely, and a later change to it starts
/// over at the end of the list.
pub fn minimize<C, I>(changes: I) -> Vec<C>
where
    C: Change,
    I: IntoIterator<Item = C>,
{
    let mut net: IndexMap<C::Target, C> = IndexMap::new();
    for change in changes {
        let target = change.target();
        match net.shift_remove_full(&target) {
            None => {
                net.insert(target, change);
            }
            Some((index, _, prior)) => match C::merge(prior, change) {
                Merged::Net(combined) => {
                    net.insert(target, combined);
                    let last = net.len() - 1;
                    net.move_index(last, index);
                }
                Merged::Cancelled => {}
            },
        }
    }
    net.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    /// Counter deltas keyed by name; opposite deltas cancel.
    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    struct Delta(String, i64);

    fn delta(name: &str, amount: i64) -> Delta {
        Delta(name.to_string(), amount)
    }

    impl Change for Delta {
        type Target = String;
        type Context = i64;

        fn target(&self) -> Self::Target {
            self.0.clone()
        }

        fn merge(prior: Self, next: Self) -> Merged<Self> {
            match prior.1 + next.1 {
                0 => Merged::Cancelled,
                sum => Merged::Net(Delta(prior.0, sum)),
            }
        }

        fn apply_to(&self, context: &mut i64) {
            *context += self.1;
        }
    }

    #[test]
    fn test_minimize_keeps_first_seen_order() {
        let out = minimize(vec![delta("a", 1), delta("b", 2), delta("a", 3)]);
        assert_eq!(out, vec![delta("a", 4), delta("b", 2)]);
    }

    #[test]
    fn test_minimize_drops_cancelled_targets() {
        let out = minimize(vec![delta("a", 1), delta("b", 2), delta("a", -1)]);
        assert_eq!(out, vec![delta("b", 2)]);
    }

    #[test]
    fn test_minimize_empty() {
        assert!(minimize(Vec::<Delta>::new()).is_empty());
    }
}
