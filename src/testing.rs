//! Minimal class-file assembler used by unit tests to produce real bytecode.

use std::collections::HashMap;

use jclassfile::class_file;

use crate::cfg::argument_slots;
use crate::opcodes;
use crate::pool::PoolView;

pub(crate) const ACC_PUBLIC: u16 = 0x0001;
pub(crate) const ACC_PRIVATE: u16 = 0x0002;
pub(crate) const ACC_STATIC: u16 = 0x0008;
pub(crate) const ACC_ABSTRACT: u16 = 0x0400;
pub(crate) const ACC_INTERFACE: u16 = 0x0200;
pub(crate) const ACC_SYNTHETIC: u16 = 0x1000;

const ALOAD_0: u8 = 0x2a;

pub(crate) const REF_INVOKE_STATIC: u8 = 6;
pub(crate) const REF_INVOKE_VIRTUAL: u8 = 5;

const METAFACTORY_DESCRIPTOR: &str = "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodHandle;Ljava/lang/invoke/MethodType;)Ljava/lang/invoke/CallSite;";
const CONCAT_DESCRIPTOR: &str = "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;Ljava/lang/String;[Ljava/lang/Object;)Ljava/lang/invoke/CallSite;";

#[derive(Clone, Debug)]
enum Op {
    Raw(Vec<u8>),
    Invoke {
        opcode: u8,
        owner: String,
        name: String,
        descriptor: String,
    },
    Lambda {
        kind: u8,
        owner: String,
        name: String,
        descriptor: String,
        site_name: String,
        site_descriptor: String,
    },
    StringConcat {
        site_descriptor: String,
    },
    Bootstrap {
        owner: String,
        name: String,
        site_name: String,
        site_descriptor: String,
    },
}

/// Method body expressed as a sequence of instructions.
#[derive(Clone, Debug)]
pub(crate) struct Code {
    ops: Vec<Op>,
    max_stack: u16,
    max_locals: u16,
    handlers: Vec<(u16, u16, u16)>,
    line_numbers: bool,
}

impl Code {
    pub(crate) fn new() -> Self {
        Self {
            ops: Vec::new(),
            max_stack: 8,
            max_locals: 8,
            handlers: Vec::new(),
            line_numbers: false,
        }
    }

    pub(crate) fn maxs(mut self, max_stack: u16, max_locals: u16) -> Self {
        self.max_stack = max_stack;
        self.max_locals = max_locals;
        self
    }

    pub(crate) fn raw(mut self, bytes: &[u8]) -> Self {
        self.ops.push(Op::Raw(bytes.to_vec()));
        self
    }

    pub(crate) fn aload0(self) -> Self {
        self.raw(&[ALOAD_0])
    }

    pub(crate) fn pop(self) -> Self {
        self.raw(&[opcodes::POP])
    }

    pub(crate) fn ret(self) -> Self {
        self.raw(&[opcodes::RETURN])
    }

    fn invoke(mut self, opcode: u8, owner: &str, name: &str, descriptor: &str) -> Self {
        self.ops.push(Op::Invoke {
            opcode,
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        });
        self
    }

    pub(crate) fn invokevirtual(self, owner: &str, name: &str, descriptor: &str) -> Self {
        self.invoke(opcodes::INVOKEVIRTUAL, owner, name, descriptor)
    }

    pub(crate) fn invokespecial(self, owner: &str, name: &str, descriptor: &str) -> Self {
        self.invoke(opcodes::INVOKESPECIAL, owner, name, descriptor)
    }

    pub(crate) fn invokestatic(self, owner: &str, name: &str, descriptor: &str) -> Self {
        self.invoke(opcodes::INVOKESTATIC, owner, name, descriptor)
    }

    pub(crate) fn invokeinterface(self, owner: &str, name: &str, descriptor: &str) -> Self {
        self.invoke(opcodes::INVOKEINTERFACE, owner, name, descriptor)
    }

    /// Closure creation through `LambdaMetafactory.metafactory` bound to the given handle.
    pub(crate) fn lambda(
        mut self,
        kind: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
        site_descriptor: &str,
    ) -> Self {
        self.ops.push(Op::Lambda {
            kind,
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            site_name: "run".to_string(),
            site_descriptor: site_descriptor.to_string(),
        });
        self
    }

    pub(crate) fn string_concat(mut self, site_descriptor: &str) -> Self {
        self.ops.push(Op::StringConcat {
            site_descriptor: site_descriptor.to_string(),
        });
        self
    }

    /// `invokedynamic` through an arbitrary bootstrap method without arguments.
    pub(crate) fn bootstrap(
        mut self,
        owner: &str,
        name: &str,
        site_name: &str,
        site_descriptor: &str,
    ) -> Self {
        self.ops.push(Op::Bootstrap {
            owner: owner.to_string(),
            name: name.to_string(),
            site_name: site_name.to_string(),
            site_descriptor: site_descriptor.to_string(),
        });
        self
    }

    pub(crate) fn handler(mut self, start_pc: u16, end_pc: u16, handler_pc: u16) -> Self {
        self.handlers.push((start_pc, end_pc, handler_pc));
        self
    }

    pub(crate) fn line_numbers(mut self) -> Self {
        self.line_numbers = true;
        self
    }
}

struct MethodSpec {
    name: String,
    descriptor: String,
    access: u16,
    code: Option<Code>,
}

/// Assembles a version 52 class file.
pub(crate) struct ClassBuilder {
    name: String,
    superclass: Option<String>,
    interfaces: Vec<String>,
    access: u16,
    methods: Vec<MethodSpec>,
    source_file: Option<String>,
}

impl ClassBuilder {
    pub(crate) fn new(name: &str, superclass: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            superclass: superclass.map(str::to_string),
            interfaces: Vec::new(),
            access: ACC_PUBLIC | 0x0020,
            methods: Vec::new(),
            source_file: None,
        }
    }

    /// Interface type extending `java/lang/Object`.
    pub(crate) fn new_interface(name: &str) -> Self {
        let mut builder = Self::new(name, Some("java/lang/Object"));
        builder.access = ACC_PUBLIC | ACC_INTERFACE | ACC_ABSTRACT;
        builder
    }

    pub(crate) fn set_abstract(&mut self) -> &mut Self {
        self.access |= ACC_ABSTRACT;
        self
    }

    pub(crate) fn interface(&mut self, name: &str) -> &mut Self {
        self.interfaces.push(name.to_string());
        self
    }

    pub(crate) fn method(
        &mut self,
        name: &str,
        descriptor: &str,
        access: u16,
        code: Option<Code>,
    ) -> &mut Self {
        self.methods.push(MethodSpec {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            access,
            code,
        });
        self
    }

    /// Public no-arg constructor chaining to the superclass.
    pub(crate) fn default_constructor(&mut self) -> &mut Self {
        let superclass = self
            .superclass
            .clone()
            .unwrap_or_else(|| "java/lang/Object".to_string());
        self.method(
            "<init>",
            "()V",
            ACC_PUBLIC,
            Some(
                Code::new()
                    .aload0()
                    .invokespecial(&superclass, "<init>", "()V")
                    .ret()
                    .maxs(1, 1),
            ),
        )
    }

    /// Public instance method whose body only returns.
    pub(crate) fn empty_method(&mut self, name: &str) -> &mut Self {
        self.method(name, "()V", ACC_PUBLIC, Some(Code::new().ret().maxs(0, 1)))
    }

    pub(crate) fn abstract_method(&mut self, name: &str) -> &mut Self {
        self.method(name, "()V", ACC_PUBLIC | ACC_ABSTRACT, None)
    }

    pub(crate) fn source_file(&mut self, file: &str) -> &mut Self {
        self.source_file = Some(file.to_string());
        self
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let mut pool = Pool::default();
        let this_class = pool.class(&self.name);
        let super_class = self
            .superclass
            .as_deref()
            .map(|name| pool.class(name))
            .unwrap_or(0);
        let interfaces: Vec<u16> = self
            .interfaces
            .iter()
            .map(|name| pool.class(name))
            .collect();

        let mut bootstrap_methods: Vec<(u16, Vec<u16>)> = Vec::new();
        let mut methods = Vec::new();
        for method in &self.methods {
            let mut out = Vec::new();
            put_u16(&mut out, method.access);
            put_u16(&mut out, pool.utf8(&method.name));
            put_u16(&mut out, pool.utf8(&method.descriptor));
            match &method.code {
                None => put_u16(&mut out, 0),
                Some(code) => {
                    put_u16(&mut out, 1);
                    let attribute = lower_code(code, &mut pool, &mut bootstrap_methods);
                    out.extend_from_slice(&attribute);
                }
            }
            methods.push(out);
        }

        let mut attributes = Vec::new();
        if let Some(file) = &self.source_file {
            let mut attribute = Vec::new();
            put_u16(&mut attribute, pool.utf8("SourceFile"));
            put_u32(&mut attribute, 2);
            put_u16(&mut attribute, pool.utf8(file));
            attributes.push(attribute);
        }
        if !bootstrap_methods.is_empty() {
            let mut body = Vec::new();
            put_u16(&mut body, bootstrap_methods.len() as u16);
            for (method_ref, arguments) in &bootstrap_methods {
                put_u16(&mut body, *method_ref);
                put_u16(&mut body, arguments.len() as u16);
                for argument in arguments {
                    put_u16(&mut body, *argument);
                }
            }
            let mut attribute = Vec::new();
            put_u16(&mut attribute, pool.utf8("BootstrapMethods"));
            put_u32(&mut attribute, body.len() as u32);
            attribute.extend_from_slice(&body);
            attributes.push(attribute);
        }

        let mut out = Vec::new();
        put_u32(&mut out, 0xCAFE_BABE);
        put_u16(&mut out, 0);
        put_u16(&mut out, 52);
        put_u16(&mut out, pool.count);
        for entry in &pool.entries {
            out.extend_from_slice(entry);
        }
        put_u16(&mut out, self.access);
        put_u16(&mut out, this_class);
        put_u16(&mut out, super_class);
        put_u16(&mut out, interfaces.len() as u16);
        for interface in interfaces {
            put_u16(&mut out, interface);
        }
        put_u16(&mut out, 0);
        put_u16(&mut out, methods.len() as u16);
        for method in methods {
            out.extend_from_slice(&method);
        }
        put_u16(&mut out, attributes.len() as u16);
        for attribute in attributes {
            out.extend_from_slice(&attribute);
        }
        out
    }
}

fn lower_code(
    code: &Code,
    pool: &mut Pool,
    bootstrap_methods: &mut Vec<(u16, Vec<u16>)>,
) -> Vec<u8> {
    let mut bytes = Vec::new();
    for op in &code.ops {
        match op {
            Op::Raw(raw) => bytes.extend_from_slice(raw),
            Op::Invoke {
                opcode,
                owner,
                name,
                descriptor,
            } => {
                let interface = *opcode == opcodes::INVOKEINTERFACE;
                let index = pool.method_ref(owner, name, descriptor, interface);
                bytes.push(*opcode);
                put_u16(&mut bytes, index);
                if interface {
                    let count = argument_slots(descriptor).unwrap_or(0) + 1;
                    bytes.push(count as u8);
                    bytes.push(0);
                }
            }
            Op::Lambda {
                kind,
                owner,
                name,
                descriptor,
                site_name,
                site_descriptor,
            } => {
                let factory = pool.method_ref(
                    "java/lang/invoke/LambdaMetafactory",
                    "metafactory",
                    METAFACTORY_DESCRIPTOR,
                    false,
                );
                let bootstrap = pool.method_handle(REF_INVOKE_STATIC, factory);
                let target_ref = pool.method_ref(owner, name, descriptor, false);
                let target = pool.method_handle(*kind, target_ref);
                let erased = pool.method_type(descriptor);
                let arguments = vec![erased, target, erased];
                let site = push_bootstrap(bootstrap_methods, bootstrap, arguments);
                let index = pool.invoke_dynamic(site, site_name, site_descriptor);
                push_indy(&mut bytes, index);
            }
            Op::StringConcat { site_descriptor } => {
                let factory = pool.method_ref(
                    "java/lang/invoke/StringConcatFactory",
                    "makeConcatWithConstants",
                    CONCAT_DESCRIPTOR,
                    false,
                );
                let bootstrap = pool.method_handle(REF_INVOKE_STATIC, factory);
                let recipe = pool.string("\u{1}!");
                let site = push_bootstrap(bootstrap_methods, bootstrap, vec![recipe]);
                let index = pool.invoke_dynamic(site, "makeConcatWithConstants", site_descriptor);
                push_indy(&mut bytes, index);
            }
            Op::Bootstrap {
                owner,
                name,
                site_name,
                site_descriptor,
            } => {
                let factory = pool.method_ref(
                    owner,
                    name,
                    "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;)Ljava/lang/invoke/CallSite;",
                    false,
                );
                let bootstrap = pool.method_handle(REF_INVOKE_STATIC, factory);
                let site = push_bootstrap(bootstrap_methods, bootstrap, Vec::new());
                let index = pool.invoke_dynamic(site, site_name, site_descriptor);
                push_indy(&mut bytes, index);
            }
        }
    }

    let mut body = Vec::new();
    put_u16(&mut body, code.max_stack);
    put_u16(&mut body, code.max_locals);
    put_u32(&mut body, bytes.len() as u32);
    body.extend_from_slice(&bytes);
    put_u16(&mut body, code.handlers.len() as u16);
    for (start_pc, end_pc, handler_pc) in &code.handlers {
        put_u16(&mut body, *start_pc);
        put_u16(&mut body, *end_pc);
        put_u16(&mut body, *handler_pc);
        put_u16(&mut body, 0);
    }
    if code.line_numbers {
        put_u16(&mut body, 1);
        put_u16(&mut body, pool.utf8("LineNumberTable"));
        put_u32(&mut body, 6);
        put_u16(&mut body, 1);
        put_u16(&mut body, 0);
        put_u16(&mut body, 1);
    } else {
        put_u16(&mut body, 0);
    }

    let mut attribute = Vec::new();
    put_u16(&mut attribute, pool.utf8("Code"));
    put_u32(&mut attribute, body.len() as u32);
    attribute.extend_from_slice(&body);
    attribute
}

fn push_bootstrap(
    bootstrap_methods: &mut Vec<(u16, Vec<u16>)>,
    method_ref: u16,
    arguments: Vec<u16>,
) -> u16 {
    bootstrap_methods.push((method_ref, arguments));
    (bootstrap_methods.len() - 1) as u16
}

fn push_indy(bytes: &mut Vec<u8>, index: u16) {
    bytes.push(opcodes::INVOKEDYNAMIC);
    put_u16(bytes, index);
    bytes.push(0);
    bytes.push(0);
}

/// Deduplicating constant pool writer.
struct Pool {
    entries: Vec<Vec<u8>>,
    index: HashMap<Vec<u8>, u16>,
    count: u16,
}

impl Default for Pool {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            count: 1,
        }
    }
}

impl Pool {
    fn intern(&mut self, entry: Vec<u8>) -> u16 {
        if let Some(index) = self.index.get(&entry) {
            return *index;
        }
        let index = self.count;
        self.count += 1;
        self.index.insert(entry.clone(), index);
        self.entries.push(entry);
        index
    }

    fn utf8(&mut self, value: &str) -> u16 {
        let encoded = modified_utf8(value);
        let mut entry = vec![1];
        put_u16(&mut entry, encoded.len() as u16);
        entry.extend_from_slice(&encoded);
        self.intern(entry)
    }

    fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        let mut entry = vec![7];
        put_u16(&mut entry, name_index);
        self.intern(entry)
    }

    fn string(&mut self, value: &str) -> u16 {
        let value_index = self.utf8(value);
        let mut entry = vec![8];
        put_u16(&mut entry, value_index);
        self.intern(entry)
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let mut entry = vec![12];
        put_u16(&mut entry, name_index);
        put_u16(&mut entry, descriptor_index);
        self.intern(entry)
    }

    fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str, interface: bool) -> u16 {
        let class_index = self.class(owner);
        let name_and_type = self.name_and_type(name, descriptor);
        let mut entry = vec![if interface { 11 } else { 10 }];
        put_u16(&mut entry, class_index);
        put_u16(&mut entry, name_and_type);
        self.intern(entry)
    }

    fn method_handle(&mut self, kind: u8, reference: u16) -> u16 {
        let mut entry = vec![15, kind];
        put_u16(&mut entry, reference);
        self.intern(entry)
    }

    fn method_type(&mut self, descriptor: &str) -> u16 {
        let descriptor_index = self.utf8(descriptor);
        let mut entry = vec![16];
        put_u16(&mut entry, descriptor_index);
        self.intern(entry)
    }

    fn invoke_dynamic(&mut self, bootstrap: u16, name: &str, descriptor: &str) -> u16 {
        let name_and_type = self.name_and_type(name, descriptor);
        let mut entry = vec![18];
        put_u16(&mut entry, bootstrap);
        put_u16(&mut entry, name_and_type);
        self.intern(entry)
    }
}

/// JVM string encoding: NUL as two bytes, supplementary characters as surrogate pairs.
fn modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for ch in value.chars() {
        if ch == '\0' {
            out.extend_from_slice(&[0xc0, 0x80]);
        } else if (ch as u32) < 0x1_0000 {
            let mut buffer = [0; 3];
            out.extend_from_slice(ch.encode_utf8(&mut buffer).as_bytes());
        } else {
            let mut units = [0; 2];
            for unit in ch.encode_utf16(&mut units) {
                let unit = u32::from(*unit);
                out.push(0xe0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
        }
    }
    out
}

/// Internal name a class file declares for itself.
pub(crate) fn declared_name(bytes: &[u8]) -> String {
    let class = class_file::parse(bytes).expect("parse class");
    PoolView::of(&class)
        .this_class_name(&class)
        .expect("class name")
        .to_string()
}

/// Method names of a class file in declaration order.
pub(crate) fn method_names(bytes: &[u8]) -> Vec<String> {
    let class = class_file::parse(bytes).expect("parse class");
    let pool = PoolView::of(&class);
    class
        .methods()
        .iter()
        .map(|method| pool.method_name(method).expect("method name").to_string())
        .collect()
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}
