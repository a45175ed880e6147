use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::allowlist::Allowlist;
use crate::error::AnalysisError;
use crate::ir::{ClassId, ClassRecord, MethodRecord, MethodRef};
use crate::trust::TrustPolicy;

/// A supertype name that resolved neither to the module nor to the allowlist.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct UnresolvedParent {
    pub(crate) class: String,
    pub(crate) parent: String,
}

/// Class hierarchy over the analyzed module plus the platform classes it touches.
#[derive(Clone, Debug)]
pub(crate) struct Hierarchy {
    classes: Vec<ClassRecord>,
    index: BTreeMap<String, ClassId>,
    unresolved: BTreeSet<UnresolvedParent>,
}

#[derive(Clone, Copy, Eq, PartialEq)]
enum VisitState {
    Unvisited,
    InProgress,
    Done,
}

impl Hierarchy {
    /// Link analyzed classes with each other and with allowlist stubs, then compute the
    /// transitive ancestor and descendant sets.
    pub(crate) fn assemble(
        records: Vec<ClassRecord>,
        allowlist: &Allowlist,
        trust: &TrustPolicy,
    ) -> Result<Self, AnalysisError> {
        let mut hierarchy = Self {
            classes: Vec::with_capacity(records.len()),
            index: BTreeMap::new(),
            unresolved: BTreeSet::new(),
        };
        for record in records {
            if allowlist.contains(&record.name) {
                debug!(class = %record.name, "module class shadows platform class");
            }
            hierarchy.insert(record)?;
        }
        hierarchy.add_platform_stubs(allowlist);

        let parents = hierarchy.resolve_parents(trust);
        hierarchy.link(&parents)?;
        Ok(hierarchy)
    }

    fn insert(&mut self, record: ClassRecord) -> Result<ClassId, AnalysisError> {
        let id = ClassId(self.classes.len());
        if self.index.insert(record.name.clone(), id).is_some() {
            return Err(AnalysisError::CorruptHierarchy {
                class: record.name,
                detail: "class defined twice".to_string(),
            });
        }
        self.classes.push(record);
        Ok(id)
    }

    /// Add a stub for every allowlisted class referenced from the module, closed over the
    /// stubs' own supertypes.
    fn add_platform_stubs(&mut self, allowlist: &Allowlist) {
        let mut pending: Vec<String> = self
            .classes
            .iter()
            .flat_map(|class| {
                class
                    .parent_names()
                    .map(str::to_string)
                    .chain(class.methods.values().flat_map(|method| {
                        method
                            .call_edges
                            .iter()
                            .map(|edge| edge.target_class.clone())
                    }))
                    .collect::<Vec<_>>()
            })
            .collect();

        while let Some(name) = pending.pop() {
            if self.index.contains_key(&name) {
                continue;
            }
            let Some(stub) = allowlist.to_record(&name) else {
                continue;
            };
            pending.extend(stub.parent_names().map(str::to_string));
            let id = ClassId(self.classes.len());
            self.index.insert(name, id);
            self.classes.push(stub);
        }
    }

    fn resolve_parents(&mut self, trust: &TrustPolicy) -> Vec<Vec<ClassId>> {
        let mut parents = Vec::with_capacity(self.classes.len());
        for class in &self.classes {
            let mut resolved = Vec::new();
            for name in class.parent_names() {
                match self.index.get(name) {
                    Some(id) => resolved.push(*id),
                    None if trust.is_trusted(name) => {
                        debug!(class = %class.name, parent = name, "trusted parent left unlinked");
                    }
                    None => {
                        warn!(class = %class.name, parent = name, "unresolved parent class");
                        self.unresolved.insert(UnresolvedParent {
                            class: class.name.clone(),
                            parent: name.to_string(),
                        });
                    }
                }
            }
            parents.push(resolved);
        }
        parents
    }

    /// Ancestors in topological order (parents first), descendants as their inversion.
    fn link(&mut self, parents: &[Vec<ClassId>]) -> Result<(), AnalysisError> {
        let count = self.classes.len();
        let mut state = vec![VisitState::Unvisited; count];
        let mut ancestors: Vec<BTreeSet<ClassId>> = vec![BTreeSet::new(); count];

        for start in 0..count {
            self.visit(ClassId(start), parents, &mut state, &mut ancestors)?;
        }

        let mut descendants: Vec<BTreeSet<ClassId>> = vec![BTreeSet::new(); count];
        for (child, child_ancestors) in ancestors.iter().enumerate() {
            for ancestor in child_ancestors {
                descendants[ancestor.0].insert(ClassId(child));
            }
        }

        for ((class, ancestors), descendants) in self
            .classes
            .iter_mut()
            .zip(ancestors)
            .zip(descendants)
        {
            class.ancestors = ancestors;
            class.descendants = descendants;
        }
        Ok(())
    }

    fn visit(
        &self,
        id: ClassId,
        parents: &[Vec<ClassId>],
        state: &mut [VisitState],
        ancestors: &mut [BTreeSet<ClassId>],
    ) -> Result<(), AnalysisError> {
        match state[id.0] {
            VisitState::Done => return Ok(()),
            VisitState::InProgress => {
                return Err(AnalysisError::CorruptHierarchy {
                    class: self.classes[id.0].name.clone(),
                    detail: "cyclic inheritance".to_string(),
                });
            }
            VisitState::Unvisited => {}
        }
        state[id.0] = VisitState::InProgress;
        let mut collected = BTreeSet::new();
        for parent in &parents[id.0] {
            self.visit(*parent, parents, state, ancestors)?;
            collected.insert(*parent);
            collected.extend(ancestors[parent.0].iter().copied());
        }
        ancestors[id.0] = collected;
        state[id.0] = VisitState::Done;
        Ok(())
    }

    pub(crate) fn id(&self, name: &str) -> Option<ClassId> {
        self.index.get(name).copied()
    }

    pub(crate) fn class(&self, id: ClassId) -> &ClassRecord {
        &self.classes[id.0]
    }

    pub(crate) fn classes(&self) -> impl Iterator<Item = (ClassId, &ClassRecord)> {
        self.classes
            .iter()
            .enumerate()
            .map(|(index, class)| (ClassId(index), class))
    }

    pub(crate) fn unresolved(&self) -> &BTreeSet<UnresolvedParent> {
        &self.unresolved
    }

    /// Untrusted supertype that never resolved somewhere above `id`, superclass chain first.
    /// A lookup through `id` that finds nothing may have been looking in that gap.
    pub(crate) fn missing_supertype(&self, id: ClassId) -> Option<&str> {
        self.superclass_chain(id)
            .chain(self.class(id).ancestors.iter().copied())
            .find_map(|current| {
                let name = &self.class(current).name;
                self.unresolved
                    .iter()
                    .find(|entry| &entry.class == name)
                    .map(|entry| entry.parent.as_str())
            })
    }

    pub(crate) fn method(&self, method: &MethodRef) -> Option<&MethodRecord> {
        self.classes[method.class.0].methods.get(&method.identifier)
    }

    /// Set the reachable bit; returns whether it was previously clear.
    pub(crate) fn mark_reachable(&mut self, method: &MethodRef) -> bool {
        match self.classes[method.class.0].methods.get_mut(&method.identifier) {
            Some(record) if !record.is_reachable => {
                record.is_reachable = true;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn superclass(&self, id: ClassId) -> Option<ClassId> {
        self.class(id).superclass.as_deref().and_then(|name| self.id(name))
    }

    fn superclass_chain(&self, id: ClassId) -> impl Iterator<Item = ClassId> + '_ {
        std::iter::successors(Some(id), move |current| self.superclass(*current))
    }

    /// Implementation used by `id`: its own declaration or the nearest superclass declaration.
    pub(crate) fn concrete_implementation(&self, id: ClassId, identifier: &str) -> Option<MethodRef> {
        self.superclass_chain(id)
            .find(|current| self.class(*current).methods.contains_key(identifier))
            .map(|class| MethodRef {
                class,
                identifier: identifier.to_string(),
            })
    }

    /// Declaration seen through `id`: the class chain first, then any ancestor interface.
    pub(crate) fn declaration(&self, id: ClassId, identifier: &str) -> Option<MethodRef> {
        if let Some(found) = self.concrete_implementation(id, identifier) {
            return Some(found);
        }
        let mut candidates: Vec<&ClassRecord> = self
            .class(id)
            .ancestors
            .iter()
            .map(|ancestor| self.class(*ancestor))
            .filter(|ancestor| ancestor.is_interface && ancestor.methods.contains_key(identifier))
            .collect();
        candidates.sort_by(|a, b| a.name.cmp(&b.name));
        if candidates.len() > 1 {
            debug!(
                class = %self.class(id).name,
                method = identifier,
                candidates = candidates.len(),
                "several interfaces declare the method; using the first by name"
            );
        }
        let chosen = candidates.first()?;
        Some(MethodRef {
            class: self.id(&chosen.name)?,
            identifier: identifier.to_string(),
        })
    }
}
