use std::collections::BTreeMap;

use tracing::info;

use crate::allowlist::Allowlist;
use crate::error::AnalysisError;
use crate::hierarchy::{Hierarchy, UnresolvedParent};
use crate::model::build_class;
use crate::reachability::{EntryPoints, Reachability, ReachabilitySummary};
use crate::rewrite::{RewriteOptions, RewrittenModule, rewrite_module};
use crate::trust::TrustPolicy;

/// Classes of one deployable module, keyed by internal name.
#[derive(Clone, Debug, Default)]
pub(crate) struct ModuleInput {
    pub(crate) entry_class: String,
    pub(crate) classes: BTreeMap<String, Vec<u8>>,
}

/// Result of one successful run.
#[derive(Clone, Debug)]
pub(crate) struct Optimized {
    pub(crate) module: RewrittenModule,
    pub(crate) summary: ReachabilitySummary,
    pub(crate) unresolved_parents: Vec<UnresolvedParent>,
}

/// Decode, link, analyze and rewrite one module. Any failure aborts the whole run.
pub(crate) fn optimize(
    input: &ModuleInput,
    entry_points: &EntryPoints,
    allowlist: &Allowlist,
    trust: &TrustPolicy,
    options: &RewriteOptions,
) -> Result<Optimized, AnalysisError> {
    if !input.classes.contains_key(&input.entry_class) {
        return Err(AnalysisError::MissingEntryClass {
            class: input.entry_class.clone(),
        });
    }

    let records = input
        .classes
        .iter()
        .map(|(name, bytes)| build_class(name, bytes))
        .collect::<Result<Vec<_>, _>>()?;
    let mut hierarchy = Hierarchy::assemble(records, allowlist, trust)?;
    let summary = Reachability::analyze(&mut hierarchy, trust, entry_points)?;
    let module = rewrite_module(&input.entry_class, &input.classes, &hierarchy, *options)?;

    info!(
        classes = input.classes.len(),
        methods = summary.module_methods,
        reachable = summary.reachable_methods(),
        unreachable = summary.unreachable_methods(),
        stripped = module.stripped.len(),
        "optimized module"
    );
    Ok(Optimized {
        module,
        summary,
        unresolved_parents: hierarchy.unresolved().iter().cloned().collect(),
    })
}
