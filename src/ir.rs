use std::collections::{BTreeMap, BTreeSet};

/// Internal name of the root object type.
pub(crate) const OBJECT_CLASS: &str = "java/lang/Object";

/// Methods kept regardless of inbound calls: the static initializer and the object contract.
pub(crate) const ALWAYS_REACHABLE_METHODS: [&str; 4] = [
    "<clinit>()V",
    "equals(Ljava/lang/Object;)Z",
    "hashCode()I",
    "toString()Ljava/lang/String;",
];

/// Index of a class inside a hierarchy arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct ClassId(pub(crate) usize);

/// A method addressed by owning class and `name + descriptor` identifier.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct MethodRef {
    pub(crate) class: ClassId,
    pub(crate) identifier: String,
}

/// Parsed class (analyzed bytecode or allowlisted platform stub).
#[derive(Clone, Debug)]
pub(crate) struct ClassRecord {
    pub(crate) name: String,
    pub(crate) superclass: Option<String>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) is_interface: bool,
    pub(crate) is_abstract: bool,
    pub(crate) is_system_class: bool,
    pub(crate) methods: BTreeMap<String, MethodRecord>,
    pub(crate) always_reachable: BTreeSet<String>,
    pub(crate) ancestors: BTreeSet<ClassId>,
    pub(crate) descendants: BTreeSet<ClassId>,
}

impl ClassRecord {
    pub(crate) fn new(name: impl Into<String>, superclass: Option<String>) -> Self {
        Self {
            name: name.into(),
            superclass,
            interfaces: Vec::new(),
            is_interface: false,
            is_abstract: false,
            is_system_class: false,
            methods: BTreeMap::new(),
            always_reachable: BTreeSet::new(),
            ancestors: BTreeSet::new(),
            descendants: BTreeSet::new(),
        }
    }

    /// Insert a method, updating the always-reachable subset for analyzed classes.
    pub(crate) fn add_method(&mut self, method: MethodRecord) {
        let identifier = method.identifier.clone();
        if !self.is_system_class && ALWAYS_REACHABLE_METHODS.contains(&identifier.as_str()) {
            self.always_reachable.insert(identifier.clone());
        }
        self.methods.insert(identifier, method);
    }

    pub(crate) fn is_concrete(&self) -> bool {
        !self.is_interface && !self.is_abstract
    }

    /// Names of the direct supertypes in declaration order.
    pub(crate) fn parent_names(&self) -> impl Iterator<Item = &str> {
        self.superclass
            .iter()
            .map(String::as_str)
            .chain(self.interfaces.iter().map(String::as_str))
    }
}

/// A method of a class and the calls its body makes.
#[derive(Clone, Debug)]
pub(crate) struct MethodRecord {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) identifier: String,
    pub(crate) is_static: bool,
    pub(crate) is_reachable: bool,
    pub(crate) call_edges: BTreeSet<CallEdge>,
}

impl MethodRecord {
    pub(crate) fn new(name: &str, descriptor: &str, is_static: bool) -> Self {
        Self {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            identifier: method_identifier(name, descriptor),
            is_static,
            is_reachable: false,
            call_edges: BTreeSet::new(),
        }
    }
}

/// Call extracted from a method body.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct CallEdge {
    pub(crate) target_class: String,
    pub(crate) target_method: String,
    pub(crate) kind: DispatchKind,
}

impl CallEdge {
    pub(crate) fn new(target_class: &str, name: &str, descriptor: &str, kind: DispatchKind) -> Self {
        Self {
            target_class: target_class.to_string(),
            target_method: method_identifier(name, descriptor),
            kind,
        }
    }
}

/// Call resolution rule implied by the invoking instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) enum DispatchKind {
    Super,
    Virtual,
    Interface,
    Static,
    Dynamic,
}

pub(crate) fn method_identifier(name: &str, descriptor: &str) -> String {
    format!("{name}{descriptor}")
}

/// Normalize `java.lang.Object` style names to internal `java/lang/Object` form.
pub(crate) fn internal_name(name: &str) -> String {
    name.replace('.', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyzed_class_collects_object_contract_methods() {
        let mut class = ClassRecord::new("com/example/Value", Some(OBJECT_CLASS.to_string()));
        class.add_method(MethodRecord::new("hashCode", "()I", false));
        class.add_method(MethodRecord::new("<clinit>", "()V", true));
        class.add_method(MethodRecord::new("compute", "()I", false));

        let always: Vec<&str> = class.always_reachable.iter().map(String::as_str).collect();
        assert_eq!(always, vec!["<clinit>()V", "hashCode()I"]);
    }

    #[test]
    fn system_class_has_no_always_reachable_methods() {
        let mut class = ClassRecord::new(OBJECT_CLASS, None);
        class.is_system_class = true;
        class.add_method(MethodRecord::new("toString", "()Ljava/lang/String;", false));

        assert!(class.always_reachable.is_empty());
        assert!(class.methods.contains_key("toString()Ljava/lang/String;"));
    }

    #[test]
    fn parent_names_lists_superclass_then_interfaces() {
        let mut class = ClassRecord::new("C", Some("A".to_string()));
        class.interfaces = vec!["I".to_string(), "J".to_string()];

        assert_eq!(class.parent_names().collect::<Vec<_>>(), vec!["A", "I", "J"]);
        assert_eq!(internal_name("java.util.List"), "java/util/List");
    }
}
