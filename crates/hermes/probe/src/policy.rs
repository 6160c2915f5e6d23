//! Choosing the next operation.

use std::fmt;

use hermes_types::{FileId, HermesProbeConfig, MAX_FILE_SIZE_BYTES};
use rand::seq::IteratorRandom;
use rand::{Rng, RngCore};

use crate::journal::Journal;

/// The operation a run will perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedOp {
    Create { id: FileId, size: usize },
    Read { id: FileId },
    Delete { id: FileId },
}

impl PlannedOp {
    pub fn id(&self) -> FileId {
        match self {
            PlannedOp::Create { id, .. } | PlannedOp::Read { id } | PlannedOp::Delete { id } => *id,
        }
    }
}

impl fmt::Display for PlannedOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannedOp::Create { id, size } => write!(f, "create {id} ({size} bytes)"),
            PlannedOp::Read { id } => write!(f, "read {id}"),
            PlannedOp::Delete { id } => write!(f, "delete {id}"),
        }
    }
}

/// Picks one operation per run from the current journal.
pub trait SelectionPolicy: Send + Sync + fmt::Debug {
    fn pick(&self, journal: &Journal, rng: &mut dyn RngCore) -> PlannedOp;
}

/// Default policy: fill the persistent set first, then keep the number of
/// churn files within `[min_churn, max_churn]` and otherwise read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandPolicy {
    pub min_churn: usize,
    pub max_churn: usize,
}

impl BandPolicy {
    pub fn new(min_churn: usize, max_churn: usize) -> Self {
        Self {
            min_churn,
            max_churn,
        }
    }

    pub fn from_config(config: &HermesProbeConfig) -> Self {
        Self::new(config.min_churn_files, config.max_churn_files)
    }

    fn random_size(rng: &mut dyn RngCore) -> usize {
        rng.gen_range(1..=MAX_FILE_SIZE_BYTES)
    }
}

impl SelectionPolicy for BandPolicy {
    fn pick(&self, journal: &Journal, mut rng: &mut dyn RngCore) -> PlannedOp {
        if let Some(id) = journal.first_missing_persistent() {
            return PlannedOp::Create {
                id,
                size: Self::random_size(rng),
            };
        }

        let churn = journal.churn_count();
        if churn < self.min_churn {
            if let Some(id) = FileId::churn().filter(|id| !journal.contains(*id)).choose(&mut rng) {
                return PlannedOp::Create {
                    id,
                    size: Self::random_size(rng),
                };
            }
        }
        if churn > self.max_churn {
            if let Some(id) = journal.present_ids().filter(|id| id.is_churn()).choose(&mut rng) {
                return PlannedOp::Delete { id };
            }
        }

        match journal.present_ids().choose(&mut rng) {
            Some(id) => PlannedOp::Read { id },
            // Only reachable with an empty persistent range.
            None => PlannedOp::Create {
                id: FileId::FIRST,
                size: Self::random_size(rng),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermes_types::RandomFile;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn journal_with(ids: impl IntoIterator<Item = i64>) -> Journal {
        let mut journal = Journal::new();
        for id in ids {
            let file = RandomFile::new(id, 8).unwrap();
            journal.filenames.insert(file.id(), file.name());
        }
        journal
    }

    #[test]
    fn test_fills_persistent_set_in_order() {
        let policy = BandPolicy::new(10, 30);
        let mut rng = StdRng::seed_from_u64(1);

        let op = policy.pick(&Journal::new(), &mut rng);
        assert!(matches!(op, PlannedOp::Create { id, size } if id.get() == 1 && (1..=1000).contains(&size)));

        let op = policy.pick(&journal_with([1, 2, 4]), &mut rng);
        assert_eq!(op.id().get(), 3);
    }

    #[test]
    fn test_keeps_churn_within_band() {
        let policy = BandPolicy::new(2, 3);
        let mut rng = StdRng::seed_from_u64(7);

        let op = policy.pick(&journal_with(1..=10), &mut rng);
        assert!(matches!(op, PlannedOp::Create { id, .. } if id.is_churn()));

        let op = policy.pick(&journal_with((1..=10).chain(11..=14)), &mut rng);
        assert!(matches!(op, PlannedOp::Delete { id } if (11..=14).contains(&id.get())));

        for _ in 0..20 {
            let op = policy.pick(&journal_with((1..=10).chain(20..=22)), &mut rng);
            assert!(matches!(op, PlannedOp::Read { .. }));
        }
    }

    #[test]
    fn test_never_deletes_persistent_files() {
        let policy = BandPolicy::new(0, 0);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            let op = policy.pick(&journal_with(1..=10), &mut rng);
            assert!(!matches!(op, PlannedOp::Delete { .. }));
        }
    }
}
