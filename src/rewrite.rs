use std::collections::BTreeMap;

use jclassfile::class_file;
use jclassfile::methods::MethodFlags;
use tracing::debug;

use crate::cfg::compute_sizes;
use crate::classfile::{ClassFormatError, ClassLayout};
use crate::error::AnalysisError;
use crate::hierarchy::Hierarchy;
use crate::ir::method_identifier;
use crate::pool::PoolView;

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct RewriteOptions {
    /// Drop `SourceFile`, `SourceDebugExtension` and the debug tables inside `Code`.
    pub(crate) strip_debug_info: bool,
}

/// A method removed from the output.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct StrippedMethod {
    pub(crate) class: String,
    pub(crate) identifier: String,
}

/// Rewritten class bytes with the entry class held apart for repackaging.
#[derive(Clone, Debug)]
pub(crate) struct RewrittenModule {
    pub(crate) entry_class: (String, Vec<u8>),
    pub(crate) classes: BTreeMap<String, Vec<u8>>,
    pub(crate) stripped: Vec<StrippedMethod>,
}

impl RewrittenModule {
    /// Every class including the entry class, keyed by name.
    #[cfg(test)]
    pub(crate) fn all_classes(&self) -> BTreeMap<String, Vec<u8>> {
        let mut all = self.classes.clone();
        all.insert(self.entry_class.0.clone(), self.entry_class.1.clone());
        all
    }
}

/// Re-encode every module class keeping only the methods the hierarchy marks reachable.
pub(crate) fn rewrite_module(
    entry_class: &str,
    classes: &BTreeMap<String, Vec<u8>>,
    hierarchy: &Hierarchy,
    options: RewriteOptions,
) -> Result<RewrittenModule, AnalysisError> {
    let mut rewritten = BTreeMap::new();
    let mut stripped = Vec::new();
    for (name, bytes) in classes {
        let (output, removed) = rewrite_class(name, bytes, hierarchy, options)?;
        if !removed.is_empty() {
            debug!(class = %name, removed = removed.len(), "stripped methods");
        }
        stripped.extend(removed);
        rewritten.insert(name.clone(), output);
    }

    let entry_bytes = rewritten
        .remove(entry_class)
        .ok_or_else(|| AnalysisError::RewriteFailure {
            class: entry_class.to_string(),
            detail: "entry class is not part of the module".to_string(),
        })?;
    stripped.sort();
    Ok(RewrittenModule {
        entry_class: (entry_class.to_string(), entry_bytes),
        classes: rewritten,
        stripped,
    })
}

/// Name-level facts about one method, in class-file order.
struct MethodShape<'a> {
    identifier: String,
    descriptor: &'a str,
    is_static: bool,
}

fn rewrite_class(
    name: &str,
    bytes: &[u8],
    hierarchy: &Hierarchy,
    options: RewriteOptions,
) -> Result<(Vec<u8>, Vec<StrippedMethod>), AnalysisError> {
    let failure = |detail: String| AnalysisError::RewriteFailure {
        class: name.to_string(),
        detail,
    };
    let record = hierarchy
        .id(name)
        .map(|id| hierarchy.class(id))
        .ok_or_else(|| failure("class missing from the hierarchy".to_string()))?;
    let class = class_file::parse(bytes).map_err(|error| failure(error.to_string()))?;
    let pool = PoolView::of(&class);
    let layout = ClassLayout::parse(bytes).map_err(|error| failure(error.to_string()))?;

    let shapes = class
        .methods()
        .iter()
        .map(|method| -> Result<MethodShape<'_>, ClassFormatError> {
            let descriptor = pool.method_descriptor(method)?;
            Ok(MethodShape {
                identifier: method_identifier(pool.method_name(method)?, descriptor),
                descriptor,
                is_static: method.access_flags().contains(MethodFlags::ACC_STATIC),
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| failure(error.to_string()))?;
    if shapes.len() != layout.methods.len() {
        return Err(failure(format!(
            "{} methods decoded but {} located",
            shapes.len(),
            layout.methods.len()
        )));
    }
    let shape = |index: usize| {
        shapes
            .get(index)
            .ok_or_else(|| ClassFormatError::new(0, format!("no method at position {index}")))
    };

    let mut removed = Vec::new();
    let output = layout
        .encode_with(
            |index| {
                let method = shape(index)?;
                let reachable = record
                    .methods
                    .get(&method.identifier)
                    .is_some_and(|method| method.is_reachable);
                if !reachable {
                    removed.push(StrippedMethod {
                        class: name.to_string(),
                        identifier: method.identifier.clone(),
                    });
                }
                Ok(reachable)
            },
            |index, code| {
                let method = shape(index)?;
                compute_sizes(&pool, method.descriptor, method.is_static, code)
            },
            options.strip_debug_info,
        )
        .map_err(|error| failure(error.to_string()))?;

    ClassLayout::parse(&output).map_err(|error| failure(format!("re-decode: {error}")))?;
    class_file::parse(&output).map_err(|error| failure(format!("re-validate: {error}")))?;
    Ok((output, removed))
}
