use jclassfile::class_file::{self, ClassFlags};
use jclassfile::methods::MethodFlags;

use crate::calls::CallExtractor;
use crate::classfile::ClassFormatError;
use crate::error::AnalysisError;
use crate::ir::{ClassRecord, MethodRecord};
use crate::pool::{PoolView, method_code};

/// Decode one class of the module into a `ClassRecord` with call edges for every method body.
pub(crate) fn build_class(name: &str, bytes: &[u8]) -> Result<ClassRecord, AnalysisError> {
    let malformed = |detail: String| AnalysisError::MalformedClass {
        class: name.to_string(),
        detail,
    };
    let invalid = |error: ClassFormatError| malformed(error.to_string());

    let class = class_file::parse(bytes).map_err(|error| malformed(error.to_string()))?;
    let pool = PoolView::of(&class);

    let this_name = pool.this_class_name(&class).map_err(invalid)?;
    if this_name != name {
        return Err(malformed(format!("class file declares {this_name}")));
    }

    let superclass = pool
        .super_class_name(&class)
        .map_err(invalid)?
        .map(str::to_string);
    let mut record = ClassRecord::new(name, superclass);
    record.interfaces = pool
        .interface_names(&class)
        .map_err(invalid)?
        .into_iter()
        .map(str::to_string)
        .collect();
    record.is_interface = class.access_flags().contains(ClassFlags::ACC_INTERFACE);
    record.is_abstract = class.access_flags().contains(ClassFlags::ACC_ABSTRACT);

    let extractor = CallExtractor::new(&class, name);
    for method in class.methods() {
        let method_name = pool.method_name(method).map_err(invalid)?;
        let descriptor = pool.method_descriptor(method).map_err(invalid)?;
        let is_static = method.access_flags().contains(MethodFlags::ACC_STATIC);
        let mut method_record = MethodRecord::new(method_name, descriptor, is_static);
        if record.methods.contains_key(&method_record.identifier) {
            return Err(malformed(format!(
                "method {} declared twice",
                method_record.identifier
            )));
        }
        if let Some(code) = method_code(method) {
            method_record.call_edges = extractor.extract(&method_record.identifier, code)?;
        }
        record.add_method(method_record);
    }

    Ok(record)
}
