use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::debug;

use crate::error::AnalysisError;
use crate::hierarchy::Hierarchy;
use crate::ir::{CallEdge, ClassId, DispatchKind, MethodRef};
use crate::trust::TrustPolicy;

/// Class name to method identifiers that must survive whether or not they are called from
/// inside the module.
pub(crate) type EntryPoints = BTreeMap<String, Vec<String>>;

/// Snapshot of the converged reachable set.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct ReachabilitySummary {
    /// `class.identifier` of every reachable module method, sorted.
    pub(crate) reachable: Vec<String>,
    pub(crate) module_methods: usize,
    pub(crate) edges_visited: usize,
}

impl ReachabilitySummary {
    pub(crate) fn reachable_methods(&self) -> usize {
        self.reachable.len()
    }

    pub(crate) fn unreachable_methods(&self) -> usize {
        self.module_methods - self.reachable.len()
    }
}

/// Worklist fixpoint over the `is_reachable` bits of a hierarchy.
pub(crate) struct Reachability<'h> {
    hierarchy: &'h mut Hierarchy,
    trust: &'h TrustPolicy,
    queue: VecDeque<MethodRef>,
    edges_visited: usize,
}

impl<'h> Reachability<'h> {
    pub(crate) fn new(hierarchy: &'h mut Hierarchy, trust: &'h TrustPolicy) -> Self {
        Self {
            hierarchy,
            trust,
            queue: VecDeque::new(),
            edges_visited: 0,
        }
    }

    /// Seed the entry points and always-reachable methods, then run to the fixpoint.
    pub(crate) fn analyze(
        hierarchy: &'h mut Hierarchy,
        trust: &'h TrustPolicy,
        entry_points: &EntryPoints,
    ) -> Result<ReachabilitySummary, AnalysisError> {
        let mut engine = Self::new(hierarchy, trust);
        engine.seed(entry_points)?;
        engine.run()?;
        Ok(engine.summary())
    }

    pub(crate) fn seed(&mut self, entry_points: &EntryPoints) -> Result<usize, AnalysisError> {
        let mut seeded = 0;
        for (class, identifiers) in entry_points {
            for identifier in identifiers {
                let missing = || AnalysisError::MissingEntryPoint {
                    class: class.clone(),
                    method: identifier.clone(),
                };
                let id = self.hierarchy.id(class).ok_or_else(missing)?;
                let method = self
                    .hierarchy
                    .concrete_implementation(id, identifier)
                    .ok_or_else(|| self.explain_missing(id, class, identifier, missing()))?;
                debug!(class = %class, method = %identifier, "seeding entry point");
                seeded += usize::from(self.mark(method));
            }
        }

        let always: Vec<MethodRef> = self
            .hierarchy
            .classes()
            .filter(|(_, class)| !class.is_system_class)
            .flat_map(|(id, class)| {
                class.always_reachable.iter().map(move |identifier| MethodRef {
                    class: id,
                    identifier: identifier.clone(),
                })
            })
            .collect();
        for method in always {
            seeded += usize::from(self.mark(method));
        }
        Ok(seeded)
    }

    /// Drain the worklist; returns how many methods were newly marked along the way.
    pub(crate) fn run(&mut self) -> Result<usize, AnalysisError> {
        let mut marked = 0;
        while let Some(method) = self.queue.pop_front() {
            let edges: Vec<CallEdge> = self
                .hierarchy
                .method(&method)
                .map(|record| record.call_edges.iter().cloned().collect())
                .unwrap_or_default();
            for edge in edges {
                self.edges_visited += 1;
                marked += self.follow(&method, &edge)?;
            }
        }
        Ok(marked)
    }

    fn follow(&mut self, caller: &MethodRef, edge: &CallEdge) -> Result<usize, AnalysisError> {
        let Some(target) = self.hierarchy.id(&edge.target_class) else {
            if self.trust.is_trusted(&edge.target_class) {
                debug!(target = %edge.target_class, "skipping trusted external class");
                return Ok(0);
            }
            return Err(AnalysisError::UnresolvedClass {
                class: self.hierarchy.class(caller.class).name.clone(),
                method: caller.identifier.clone(),
                target: edge.target_class.clone(),
            });
        };

        let target_class = self.hierarchy.class(target);
        if target_class.is_system_class && !target_class.methods.contains_key(&edge.target_method)
        {
            return Err(AnalysisError::UnsupportedPlatformCall {
                class: self.hierarchy.class(caller.class).name.clone(),
                method: caller.identifier.clone(),
                target: edge.target_class.clone(),
                target_method: edge.target_method.clone(),
            });
        }

        match edge.kind {
            DispatchKind::Super => {
                let implementation = self
                    .hierarchy
                    .concrete_implementation(target, &edge.target_method)
                    .ok_or_else(|| self.unresolved_or_corrupt(caller, target, &edge.target_method))?;
                Ok(usize::from(self.mark(implementation)))
            }
            DispatchKind::Virtual
            | DispatchKind::Interface
            | DispatchKind::Static
            | DispatchKind::Dynamic => self.mark_with_overrides(caller, target, &edge.target_method),
        }
    }

    /// Mark the declaration seen through `target` and, for instance methods, every
    /// implementation a descendant may dispatch to.
    fn mark_with_overrides(
        &mut self,
        caller: &MethodRef,
        target: ClassId,
        identifier: &str,
    ) -> Result<usize, AnalysisError> {
        let declaration = self
            .hierarchy
            .declaration(target, identifier)
            .ok_or_else(|| self.unresolved_or_corrupt(caller, target, identifier))?;
        let is_static = self
            .hierarchy
            .method(&declaration)
            .is_some_and(|method| method.is_static);
        let mut marked = usize::from(self.mark(declaration));
        if is_static {
            return Ok(marked);
        }

        let target_is_interface = self.hierarchy.class(target).is_interface;
        let descendants: Vec<ClassId> = self
            .hierarchy
            .class(target)
            .descendants
            .iter()
            .copied()
            .collect();
        for descendant in descendants {
            let child = self.hierarchy.class(descendant);
            if child.methods.contains_key(identifier) {
                marked += usize::from(self.mark(MethodRef {
                    class: descendant,
                    identifier: identifier.to_string(),
                }));
            } else if target_is_interface && child.is_concrete() {
                let implementation = self
                    .hierarchy
                    .concrete_implementation(descendant, identifier)
                    .ok_or_else(|| self.unresolved_or_corrupt(caller, descendant, identifier))?;
                marked += usize::from(self.mark(implementation));
            }
        }
        Ok(marked)
    }

    fn mark(&mut self, method: MethodRef) -> bool {
        if self.hierarchy.mark_reachable(&method) {
            self.queue.push_back(method);
            true
        } else {
            false
        }
    }

    fn unresolved_or_corrupt(
        &self,
        caller: &MethodRef,
        class: ClassId,
        identifier: &str,
    ) -> AnalysisError {
        let corrupt = AnalysisError::CorruptModule {
            class: self.hierarchy.class(class).name.clone(),
            method: identifier.to_string(),
        };
        self.explain_missing(
            class,
            &self.hierarchy.class(caller.class).name,
            &caller.identifier,
            corrupt,
        )
    }

    /// Blame an unresolved supertype of `class` for a failed lookup, if there is one;
    /// otherwise keep `fallback`.
    fn explain_missing(
        &self,
        class: ClassId,
        origin_class: &str,
        origin_method: &str,
        fallback: AnalysisError,
    ) -> AnalysisError {
        match self.hierarchy.missing_supertype(class) {
            Some(parent) => AnalysisError::UnresolvedClass {
                class: origin_class.to_string(),
                method: origin_method.to_string(),
                target: parent.to_string(),
            },
            None => fallback,
        }
    }

    pub(crate) fn summary(&self) -> ReachabilitySummary {
        summarize(&*self.hierarchy, self.edges_visited)
    }
}

pub(crate) fn summarize(hierarchy: &Hierarchy, edges_visited: usize) -> ReachabilitySummary {
    let mut reachable = BTreeSet::new();
    let mut module_methods = 0;
    for (_, class) in hierarchy.classes().filter(|(_, class)| !class.is_system_class) {
        module_methods += class.methods.len();
        reachable.extend(
            class
                .methods
                .values()
                .filter(|method| method.is_reachable)
                .map(|method| format!("{}.{}", class.name, method.identifier)),
        );
    }
    ReachabilitySummary {
        reachable: reachable.into_iter().collect(),
        module_methods,
        edges_visited,
    }
}
