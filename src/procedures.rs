use std::fmt;

use indexmap::{Equivalent, IndexMap};

use crate::{Procedure, ProcedureKind};

/// An insertion ordered collection of procedures, keyed by name and kind.
#[derive(Clone, Default)]
pub struct Procedures(IndexMap<(String, ProcedureKind), Procedure>);

// Borrowed form of the key so lookups don't allocate. Hashes the same as `(String, ProcedureKind)`.
#[derive(Hash)]
struct Key<'a>(&'a str, ProcedureKind);

impl Equivalent<(String, ProcedureKind)> for Key<'_> {
    fn equivalent(&self, key: &(String, ProcedureKind)) -> bool {
        self.0 == key.0 && self.1 == key.1
    }
}

impl Procedures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a procedure. A procedure with the same name and kind as an existing one is skipped.
    ///
    /// Returns `false` if the procedure was skipped.
    pub fn add(&mut self, procedure: Procedure) -> bool {
        if self.exists(procedure.name(), procedure.kind()) {
            tracing::warn!(
                name = procedure.name(),
                kind = %procedure.kind(),
                "skipping duplicate procedure"
            );
            return false;
        }

        self.0
            .insert((procedure.name().to_string(), procedure.kind()), procedure);
        true
    }

    pub fn get(&self, name: &str, kind: ProcedureKind) -> Option<&Procedure> {
        self.0.get(&Key(name, kind))
    }

    pub fn exists(&self, name: &str, kind: ProcedureKind) -> bool {
        self.0.contains_key(&Key(name, kind))
    }

    /// Remove a procedure, keeping the order of the remaining ones.
    pub fn remove(&mut self, name: &str, kind: ProcedureKind) -> Option<Procedure> {
        self.0.shift_remove(&Key(name, kind))
    }

    /// Iterate over the procedures in the order they were added.
    pub fn iter(&self) -> impl Iterator<Item = &Procedure> {
        self.0.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Procedure> {
        self.0.values_mut()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The procedure whose name is closest to `name` by edit distance. Ties go to the earliest added.
    pub fn find_nearest(&self, name: &str) -> Option<&Procedure> {
        self.iter()
            .map(|procedure| (levenshtein(name, procedure.name()), procedure))
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, procedure)| procedure)
    }
}

impl fmt::Debug for Procedures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.keys()).finish()
    }
}

impl<'a> IntoIterator for &'a Procedures {
    type Item = &'a Procedure;
    type IntoIter = indexmap::map::Values<'a, (String, ProcedureKind), Procedure>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.values()
    }
}

impl FromIterator<Procedure> for Procedures {
    fn from_iter<T: IntoIterator<Item = Procedure>>(iter: T) -> Self {
        let mut procedures = Self::new();
        for procedure in iter {
            procedures.add(procedure);
        }
        procedures
    }
}

/// Number of single character insertions, deletions or substitutions to turn `a` into `b`.
fn levenshtein(a: &str, b: &str) -> usize {
    let b = b.chars().collect::<Vec<_>>();
    let mut prev = (0..=b.len()).collect::<Vec<_>>();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != *cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}
