use jclassfile::attributes::{Attribute, BootstrapMethodRecord};
use jclassfile::class_file::ClassFile;
use jclassfile::constant_pool::ConstantPool;
use jclassfile::methods::MethodInfo;

use crate::classfile::{ClassFormatError, ClassResult};

/// Field, method or interface method reference resolved to strings.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MemberRef<'a> {
    pub(crate) class: &'a str,
    pub(crate) name: &'a str,
    pub(crate) descriptor: &'a str,
}

/// Typed lookups over the constant pool `jclassfile` decoded.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PoolView<'a> {
    entries: &'a [ConstantPool],
}

impl<'a> PoolView<'a> {
    pub(crate) fn of(class: &'a ClassFile) -> Self {
        Self {
            entries: class.constant_pool(),
        }
    }

    fn entry(&self, index: u16) -> ClassResult<&'a ConstantPool> {
        match self.entries.get(index as usize) {
            Some(ConstantPool::Empty) | None => Err(ClassFormatError::new(
                0,
                format!("invalid constant pool index {index}"),
            )),
            Some(entry) => Ok(entry),
        }
    }

    pub(crate) fn utf8(&self, index: u16) -> ClassResult<&'a str> {
        match self.entry(index)? {
            ConstantPool::Utf8 { value } => Ok(value),
            other => Err(unexpected(index, "Utf8", other)),
        }
    }

    pub(crate) fn class_name(&self, index: u16) -> ClassResult<&'a str> {
        match self.entry(index)? {
            ConstantPool::Class { name_index } => self.utf8(*name_index),
            other => Err(unexpected(index, "Class", other)),
        }
    }

    pub(crate) fn name_and_type(&self, index: u16) -> ClassResult<(&'a str, &'a str)> {
        match self.entry(index)? {
            ConstantPool::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            other => Err(unexpected(index, "NameAndType", other)),
        }
    }

    /// Resolve a `Fieldref`, `Methodref` or `InterfaceMethodref`.
    pub(crate) fn member_ref(&self, index: u16) -> ClassResult<MemberRef<'a>> {
        let (class_index, name_and_type_index) = match self.entry(index)? {
            ConstantPool::Fieldref {
                class_index,
                name_and_type_index,
            }
            | ConstantPool::Methodref {
                class_index,
                name_and_type_index,
            }
            | ConstantPool::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index),
            other => return Err(unexpected(index, "member reference", other)),
        };
        let (name, descriptor) = self.name_and_type(name_and_type_index)?;
        Ok(MemberRef {
            class: self.class_name(class_index)?,
            name,
            descriptor,
        })
    }

    /// Reference kind and target member of a `MethodHandle`.
    pub(crate) fn method_handle(&self, index: u16) -> ClassResult<(u8, MemberRef<'a>)> {
        match self.entry(index)? {
            ConstantPool::MethodHandle {
                reference_kind,
                reference_index,
            } => Ok((*reference_kind, self.member_ref(*reference_index)?)),
            other => Err(unexpected(index, "MethodHandle", other)),
        }
    }

    /// Bootstrap index, name and descriptor of an `InvokeDynamic` entry.
    pub(crate) fn invoke_dynamic(&self, index: u16) -> ClassResult<(u16, &'a str, &'a str)> {
        match self.entry(index)? {
            ConstantPool::InvokeDynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => {
                let (name, descriptor) = self.name_and_type(*name_and_type_index)?;
                Ok((*bootstrap_method_attr_index, name, descriptor))
            }
            other => Err(unexpected(index, "InvokeDynamic", other)),
        }
    }

    pub(crate) fn this_class_name(&self, class: &ClassFile) -> ClassResult<&'a str> {
        self.class_name(class.this_class())
    }

    pub(crate) fn super_class_name(&self, class: &ClassFile) -> ClassResult<Option<&'a str>> {
        match class.super_class() {
            0 => Ok(None),
            index => self.class_name(index).map(Some),
        }
    }

    pub(crate) fn interface_names(&self, class: &ClassFile) -> ClassResult<Vec<&'a str>> {
        class
            .interfaces()
            .iter()
            .map(|index| self.class_name(*index))
            .collect()
    }

    pub(crate) fn method_name(&self, method: &MethodInfo) -> ClassResult<&'a str> {
        self.utf8(method.name_index())
    }

    pub(crate) fn method_descriptor(&self, method: &MethodInfo) -> ClassResult<&'a str> {
        self.utf8(method.descriptor_index())
    }
}

/// Bytecode of the method's `Code` attribute, if it has one.
pub(crate) fn method_code(method: &MethodInfo) -> Option<&[u8]> {
    method.attributes().iter().find_map(|attribute| match attribute {
        Attribute::Code { code, .. } => Some(code.as_slice()),
        _ => None,
    })
}

/// Entries of the class-level `BootstrapMethods` attribute (empty when absent).
pub(crate) fn bootstrap_methods(class: &ClassFile) -> &[BootstrapMethodRecord] {
    class
        .attributes()
        .iter()
        .find_map(|attribute| match attribute {
            Attribute::BootstrapMethods { bootstrap_methods } => Some(bootstrap_methods.as_slice()),
            _ => None,
        })
        .unwrap_or_default()
}

fn unexpected(index: u16, expected: &str, found: &ConstantPool) -> ClassFormatError {
    ClassFormatError::new(
        0,
        format!("constant pool index {index}: expected {expected}, found {found:?}"),
    )
}
