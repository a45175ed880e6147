use std::ops::Range;

use thiserror::Error;

const MAGIC: u32 = 0xCAFE_BABE;

/// Attributes that only carry debugging information.
const DEBUG_CLASS_ATTRIBUTES: [&str; 2] = ["SourceFile", "SourceDebugExtension"];
const DEBUG_CODE_ATTRIBUTES: [&str; 3] = [
    "LineNumberTable",
    "LocalVariableTable",
    "LocalVariableTypeTable",
];

/// Structural class-file decoding or encoding error.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
#[error("{detail} (offset {offset})")]
pub(crate) struct ClassFormatError {
    pub(crate) offset: usize,
    pub(crate) detail: String,
}

impl ClassFormatError {
    pub(crate) fn new(offset: usize, detail: impl Into<String>) -> Self {
        Self {
            offset,
            detail: detail.into(),
        }
    }
}

pub(crate) type ClassResult<T> = std::result::Result<T, ClassFormatError>;

/// Attribute location inside the class bytes.
#[derive(Clone, Debug)]
pub(crate) struct AttributeSpan {
    pub(crate) name_index: u16,
    /// Whole attribute including its 6-byte header.
    pub(crate) span: Range<usize>,
    /// Attribute payload.
    pub(crate) info: Range<usize>,
}

/// Method location; the first six bytes are access flags, name and descriptor indexes.
#[derive(Clone, Debug)]
pub(crate) struct MethodSpan {
    pub(crate) span: Range<usize>,
    pub(crate) attributes: Vec<AttributeSpan>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ExceptionEntry {
    pub(crate) start_pc: u16,
    pub(crate) end_pc: u16,
    pub(crate) handler_pc: u16,
    pub(crate) catch_type: u16,
}

/// `Code` attribute borrowing its bytecode from the class bytes.
#[derive(Clone, Debug)]
pub(crate) struct CodeAttribute<'a> {
    pub(crate) max_stack: u16,
    pub(crate) max_locals: u16,
    pub(crate) code: &'a [u8],
    pub(crate) exception_table: Vec<ExceptionEntry>,
    pub(crate) attributes: Vec<AttributeSpan>,
}

/// Recomputed frame sizes for one kept method.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct CodeSizes {
    pub(crate) max_stack: u16,
    pub(crate) max_locals: u16,
}

/// Byte layout of one class file: where the methods and attributes sit, so a rewrite can
/// drop methods and patch `Code` headers while copying everything else verbatim.
///
/// Only attribute names are looked at, and only as raw bytes; all other decoding goes
/// through `jclassfile`.
#[derive(Clone, Debug)]
pub(crate) struct ClassLayout<'a> {
    bytes: &'a [u8],
    /// Raw bytes of each `Utf8` constant, indexed by constant pool slot.
    utf8: Vec<Option<&'a [u8]>>,
    pub(crate) methods: Vec<MethodSpan>,
    pub(crate) attributes: Vec<AttributeSpan>,
    methods_offset: usize,
}

impl<'a> ClassLayout<'a> {
    pub(crate) fn parse(bytes: &'a [u8]) -> ClassResult<Self> {
        let mut reader = Reader::new(bytes);
        if reader.u32()? != MAGIC {
            return Err(ClassFormatError::new(0, "bad magic number"));
        }
        reader.skip(4)?;
        let utf8 = skip_constant_pool(&mut reader)?;
        reader.skip(6)?;
        let interface_count = reader.u16()? as usize;
        reader.skip(interface_count * 2)?;

        let field_count = reader.u16()?;
        for _ in 0..field_count {
            reader.skip(6)?;
            parse_attributes(&mut reader)?;
        }

        let methods_offset = reader.pos;
        let method_count = reader.u16()?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            let start = reader.pos;
            reader.skip(6)?;
            let attributes = parse_attributes(&mut reader)?;
            methods.push(MethodSpan {
                span: start..reader.pos,
                attributes,
            });
        }

        let attributes = parse_attributes(&mut reader)?;
        if reader.pos != bytes.len() {
            return Err(ClassFormatError::new(
                reader.pos,
                "trailing bytes after class attributes",
            ));
        }

        Ok(Self {
            bytes,
            utf8,
            methods,
            attributes,
            methods_offset,
        })
    }

    fn attribute_is(&self, attribute: &AttributeSpan, name: &str) -> ClassResult<bool> {
        match self.utf8.get(attribute.name_index as usize) {
            Some(Some(raw)) => Ok(*raw == name.as_bytes()),
            _ => Err(ClassFormatError::new(
                attribute.span.start,
                format!("attribute name index {} is not Utf8", attribute.name_index),
            )),
        }
    }

    fn attribute_in(&self, attribute: &AttributeSpan, names: &[&str]) -> ClassResult<bool> {
        for name in names {
            if self.attribute_is(attribute, name)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Decode the method's `Code` attribute, if it has one.
    pub(crate) fn code(&self, method: &MethodSpan) -> ClassResult<Option<CodeAttribute<'a>>> {
        for attribute in &method.attributes {
            if self.attribute_is(attribute, "Code")? {
                return self.decode_code(attribute).map(Some);
            }
        }
        Ok(None)
    }

    fn decode_code(&self, attribute: &AttributeSpan) -> ClassResult<CodeAttribute<'a>> {
        let mut reader = Reader::at(self.bytes, attribute.info.start, attribute.info.end);
        let max_stack = reader.u16()?;
        let max_locals = reader.u16()?;
        let code_length = reader.u32()? as usize;
        let code = reader.bytes(code_length)?;
        let table_length = reader.u16()?;
        let mut exception_table = Vec::with_capacity(table_length as usize);
        for _ in 0..table_length {
            exception_table.push(ExceptionEntry {
                start_pc: reader.u16()?,
                end_pc: reader.u16()?,
                handler_pc: reader.u16()?,
                catch_type: reader.u16()?,
            });
        }
        let attributes = parse_attributes(&mut reader)?;
        if reader.pos != attribute.info.end {
            return Err(ClassFormatError::new(reader.pos, "Code attribute length mismatch"));
        }
        Ok(CodeAttribute {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }

    /// Re-emit the class keeping only the methods `keep` selects by position. Kept methods
    /// with code get their sizes from `sizes`; debug attributes are dropped when
    /// `strip_debug` is set.
    pub(crate) fn encode_with<K, S>(
        &self,
        mut keep: K,
        mut sizes: S,
        strip_debug: bool,
    ) -> ClassResult<Vec<u8>>
    where
        K: FnMut(usize) -> ClassResult<bool>,
        S: FnMut(usize, &CodeAttribute<'a>) -> ClassResult<CodeSizes>,
    {
        let mut out = Vec::with_capacity(self.bytes.len());
        out.extend_from_slice(&self.bytes[..self.methods_offset]);

        let mut kept = Vec::new();
        for (index, method) in self.methods.iter().enumerate() {
            if keep(index)? {
                kept.push((index, method));
            }
        }
        put_u16(&mut out, kept.len() as u16);
        for (index, method) in kept {
            self.encode_method(method, |code| sizes(index, code), strip_debug, &mut out)?;
        }

        let mut class_attributes = Vec::new();
        for attribute in &self.attributes {
            if strip_debug && self.attribute_in(attribute, &DEBUG_CLASS_ATTRIBUTES)? {
                continue;
            }
            class_attributes.push(attribute);
        }
        put_u16(&mut out, class_attributes.len() as u16);
        for attribute in class_attributes {
            out.extend_from_slice(&self.bytes[attribute.span.clone()]);
        }
        Ok(out)
    }

    fn encode_method<S>(
        &self,
        method: &MethodSpan,
        mut sizes: S,
        strip_debug: bool,
        out: &mut Vec<u8>,
    ) -> ClassResult<()>
    where
        S: FnMut(&CodeAttribute<'a>) -> ClassResult<CodeSizes>,
    {
        out.extend_from_slice(&self.bytes[method.span.start..method.span.start + 6]);
        put_u16(out, method.attributes.len() as u16);
        for attribute in &method.attributes {
            if !self.attribute_is(attribute, "Code")? {
                out.extend_from_slice(&self.bytes[attribute.span.clone()]);
                continue;
            }
            let code = self.decode_code(attribute)?;
            let new_sizes = sizes(&code)?;
            self.encode_code(attribute.name_index, &code, new_sizes, strip_debug, out)?;
        }
        Ok(())
    }

    fn encode_code(
        &self,
        name_index: u16,
        code: &CodeAttribute<'a>,
        sizes: CodeSizes,
        strip_debug: bool,
        out: &mut Vec<u8>,
    ) -> ClassResult<()> {
        let mut body = Vec::with_capacity(code.code.len() + 32);
        put_u16(&mut body, sizes.max_stack);
        put_u16(&mut body, sizes.max_locals);
        put_u32(&mut body, code.code.len() as u32);
        body.extend_from_slice(code.code);
        put_u16(&mut body, code.exception_table.len() as u16);
        for entry in &code.exception_table {
            put_u16(&mut body, entry.start_pc);
            put_u16(&mut body, entry.end_pc);
            put_u16(&mut body, entry.handler_pc);
            put_u16(&mut body, entry.catch_type);
        }
        let mut nested = Vec::new();
        for attribute in &code.attributes {
            if strip_debug && self.attribute_in(attribute, &DEBUG_CODE_ATTRIBUTES)? {
                continue;
            }
            nested.push(attribute);
        }
        put_u16(&mut body, nested.len() as u16);
        for attribute in nested {
            body.extend_from_slice(&self.bytes[attribute.span.clone()]);
        }

        put_u16(out, name_index);
        put_u32(out, body.len() as u32);
        out.extend_from_slice(&body);
        Ok(())
    }
}

/// Walk the constant pool, keeping only the raw bytes of `Utf8` entries.
fn skip_constant_pool<'a>(reader: &mut Reader<'a>) -> ClassResult<Vec<Option<&'a [u8]>>> {
    let count = reader.u16()? as usize;
    let mut utf8 = Vec::with_capacity(count);
    utf8.push(None);
    while utf8.len() < count {
        let offset = reader.pos;
        let tag = reader.u8()?;
        let (width, slots) = match tag {
            1 => {
                let length = reader.u16()? as usize;
                utf8.push(Some(reader.bytes(length)?));
                continue;
            }
            7 | 8 | 16 | 19 | 20 => (2, 1),
            15 => (3, 1),
            3 | 4 | 9 | 10 | 11 | 12 | 17 | 18 => (4, 1),
            5 | 6 => (8, 2),
            _ => {
                return Err(ClassFormatError::new(
                    offset,
                    format!("unknown constant pool tag {tag}"),
                ));
            }
        };
        reader.skip(width)?;
        for _ in 0..slots {
            utf8.push(None);
        }
    }
    if utf8.len() != count {
        return Err(ClassFormatError::new(
            reader.pos,
            "wide constant overflows the constant pool",
        ));
    }
    Ok(utf8)
}

fn parse_attributes(reader: &mut Reader<'_>) -> ClassResult<Vec<AttributeSpan>> {
    let count = reader.u16()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let start = reader.pos;
        let name_index = reader.u16()?;
        let length = reader.u32()? as usize;
        let info_start = reader.pos;
        reader.skip(length)?;
        attributes.push(AttributeSpan {
            name_index,
            span: start..reader.pos,
            info: info_start..reader.pos,
        });
    }
    Ok(attributes)
}

/// Big-endian cursor bounded to `[pos, end)`.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            end: data.len(),
        }
    }

    fn at(data: &'a [u8], pos: usize, end: usize) -> Self {
        Self { data, pos, end }
    }

    fn bytes(&mut self, len: usize) -> ClassResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.end)
            .ok_or_else(|| ClassFormatError::new(self.pos, "unexpected end of data"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> ClassResult<()> {
        self.bytes(len).map(|_| ())
    }

    fn u8(&mut self) -> ClassResult<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> ClassResult<u16> {
        read_u16(self.bytes(2)?, 0)
    }

    fn u32(&mut self) -> ClassResult<u32> {
        read_u32(self.bytes(4)?, 0)
    }
}

pub(crate) fn read_u16(data: &[u8], offset: usize) -> ClassResult<u16> {
    let bytes = data
        .get(offset..offset + 2)
        .ok_or_else(|| ClassFormatError::new(offset, "unexpected end of data"))?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> ClassResult<u32> {
    let bytes = data
        .get(offset..offset + 4)
        .ok_or_else(|| ClassFormatError::new(offset, "unexpected end of data"))?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub(crate) fn read_i16(data: &[u8], offset: usize) -> ClassResult<i16> {
    Ok(read_u16(data, offset)? as i16)
}

pub(crate) fn read_i32(data: &[u8], offset: usize) -> ClassResult<i32> {
    Ok(read_u32(data, offset)? as i32)
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}
