use std::collections::BTreeSet;

use jclassfile::attributes::BootstrapMethodRecord;
use jclassfile::class_file::ClassFile;

use crate::classfile::{ClassFormatError, read_u16};
use crate::error::AnalysisError;
use crate::ir::{CallEdge, DispatchKind};
use crate::opcodes::{self, instructions};
use crate::pool::{PoolView, bootstrap_methods};

const LAMBDA_FACTORY: &str = "java/lang/invoke/LambdaMetafactory";
const LAMBDA_FACTORY_METHODS: [&str; 2] = ["metafactory", "altMetafactory"];
const STRING_CONCAT_FACTORY: &str = "java/lang/invoke/StringConcatFactory";
const STRING_CONCAT_METHODS: [&str; 2] = ["makeConcatWithConstants", "makeConcat"];

/// Index of the implementation method handle among the lambda bootstrap arguments.
const LAMBDA_IMPLEMENTATION_ARGUMENT: usize = 1;

/// Extracts call edges from the method bodies of one class.
pub(crate) struct CallExtractor<'c> {
    pool: PoolView<'c>,
    class_name: &'c str,
    bootstrap_methods: &'c [BootstrapMethodRecord],
}

impl<'c> CallExtractor<'c> {
    pub(crate) fn new(class: &'c ClassFile, class_name: &'c str) -> Self {
        Self {
            pool: PoolView::of(class),
            class_name,
            bootstrap_methods: bootstrap_methods(class),
        }
    }

    /// One edge per distinct invocation in `code`; string concatenation sites yield none.
    pub(crate) fn extract(
        &self,
        method: &str,
        code: &[u8],
    ) -> Result<BTreeSet<CallEdge>, AnalysisError> {
        let mut edges = BTreeSet::new();
        let insts = instructions(code).map_err(|error| self.unsupported(method, error))?;
        for inst in insts {
            let kind = match inst.opcode {
                opcodes::INVOKESPECIAL => DispatchKind::Super,
                opcodes::INVOKEVIRTUAL => DispatchKind::Virtual,
                opcodes::INVOKEINTERFACE => DispatchKind::Interface,
                opcodes::INVOKESTATIC => DispatchKind::Static,
                opcodes::INVOKEDYNAMIC => {
                    if let Some(edge) = self.dynamic_edge(method, code, inst.offset)? {
                        edges.insert(edge);
                    }
                    continue;
                }
                _ => continue,
            };
            let index = read_u16(code, inst.offset + 1)
                .map_err(|error| self.unsupported(method, error))?;
            let target = self
                .pool
                .member_ref(index)
                .map_err(|error| self.unsupported(method, error))?;
            edges.insert(CallEdge::new(
                target.class,
                target.name,
                target.descriptor,
                kind,
            ));
        }
        Ok(edges)
    }

    fn dynamic_edge(
        &self,
        method: &str,
        code: &[u8],
        offset: usize,
    ) -> Result<Option<CallEdge>, AnalysisError> {
        let index = read_u16(code, offset + 1).map_err(|error| self.unsupported(method, error))?;
        let (bootstrap_index, site_name, _) = self
            .pool
            .invoke_dynamic(index)
            .map_err(|error| self.unsupported(method, error))?;
        let bootstrap = self
            .bootstrap_methods
            .get(bootstrap_index as usize)
            .ok_or_else(|| {
                self.unsupported_detail(
                    method,
                    format!("call site {site_name} refers to missing bootstrap method {bootstrap_index}"),
                )
            })?;
        let (_, factory) = self
            .pool
            .method_handle(bootstrap.bootstrap_method_ref())
            .map_err(|error| self.unsupported(method, error))?;

        if factory.class == STRING_CONCAT_FACTORY && STRING_CONCAT_METHODS.contains(&factory.name) {
            return Ok(None);
        }
        if factory.class != LAMBDA_FACTORY || !LAMBDA_FACTORY_METHODS.contains(&factory.name) {
            return Err(self.unsupported_detail(
                method,
                format!(
                    "call site {site_name} bootstraps through {}.{}",
                    factory.class, factory.name
                ),
            ));
        }

        let handle = bootstrap
            .bootstrap_arguments()
            .get(LAMBDA_IMPLEMENTATION_ARGUMENT)
            .ok_or_else(|| {
                self.unsupported_detail(
                    method,
                    format!("lambda site {site_name} has no implementation handle"),
                )
            })?;
        let (_, target) = self.pool.method_handle(*handle).map_err(|error| {
            self.unsupported_detail(
                method,
                format!("lambda site {site_name} implementation is not a method handle: {error}"),
            )
        })?;
        Ok(Some(CallEdge::new(
            target.class,
            target.name,
            target.descriptor,
            DispatchKind::Dynamic,
        )))
    }

    fn unsupported(&self, method: &str, error: ClassFormatError) -> AnalysisError {
        self.unsupported_detail(method, error.to_string())
    }

    fn unsupported_detail(&self, method: &str, detail: String) -> AnalysisError {
        AnalysisError::UnsupportedInstruction {
            class: self.class_name.to_string(),
            method: method.to_string(),
            detail,
        }
    }
}
