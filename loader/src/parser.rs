//! WASM binary section scanner.
//!
//! Walks the section table of a `.wasm` binary and decodes only what the
//! loader needs up front: function types, imports, the function section,
//! memories, exports and the start section. Code, data and every other
//! section are skipped by size. No code is executed or decoded.
//!
//! Reference: <https://webassembly.github.io/spec/core/binary/index.html>

use crate::module::{
    ExportDecl, ExportKind, FuncSignature, ImportDecl, ImportKind, MemoryLimits, ValueType,
};

/// WASM magic number: `\0asm`
pub const WASM_MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6D];

/// Size of magic + version.
pub const HEADER_LEN: usize = 8;

/// Section IDs in the WASM binary format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SectionId {
    Custom = 0,
    Type = 1,
    Import = 2,
    Function = 3,
    Table = 4,
    Memory = 5,
    Global = 6,
    Export = 7,
    Start = 8,
    Element = 9,
    Code = 10,
    Data = 11,
    DataCount = 12,
}

impl SectionId {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(SectionId::Custom),
            1 => Some(SectionId::Type),
            2 => Some(SectionId::Import),
            3 => Some(SectionId::Function),
            4 => Some(SectionId::Table),
            5 => Some(SectionId::Memory),
            6 => Some(SectionId::Global),
            7 => Some(SectionId::Export),
            8 => Some(SectionId::Start),
            9 => Some(SectionId::Element),
            10 => Some(SectionId::Code),
            11 => Some(SectionId::Data),
            12 => Some(SectionId::DataCount),
            _ => None,
        }
    }
}

/// Parse error with position information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

impl ParseError {
    pub fn new(message: &str, offset: usize) -> Self {
        ParseError {
            message: String::from(message),
            offset,
        }
    }
}

impl core::fmt::Display for ParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "parse error at offset {:#x}: {}", self.offset, self.message)
    }
}

/// Binary reader with position tracking.
///
/// Offsets reported in errors are absolute within the original buffer.
pub struct BinaryReader<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BinaryReader {
            data,
            pos: 0,
            base: 0,
        }
    }

    /// Split off the next `len` bytes as a reader of their own.
    pub fn sub_reader(&mut self, len: usize) -> Result<BinaryReader<'a>, ParseError> {
        let base = self.base + self.pos;
        let data = self.read_bytes(len)?;
        Ok(BinaryReader { data, pos: 0, base })
    }

    /// Absolute position.
    pub fn position(&self) -> usize {
        self.base + self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn read_byte(&mut self) -> Result<u8, ParseError> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| ParseError::new("unexpected end of data", self.position()))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| ParseError::new("unexpected end of data", self.position()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Read a u32 in little-endian.
    pub fn read_u32_le(&mut self) -> Result<u32, ParseError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read an unsigned LEB128-encoded u32.
    pub fn read_leb128_u32(&mut self) -> Result<u32, ParseError> {
        let start = self.position();
        let mut result: u32 = 0;
        let mut shift: u32 = 0;

        loop {
            if shift > 28 {
                return Err(ParseError::new("LEB128 u32 overflow", start));
            }
            let byte = self.read_byte()?;
            result |= ((byte & 0x7F) as u32) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        Ok(result)
    }

    /// Read a UTF-8 name (length-prefixed).
    pub fn read_name(&mut self) -> Result<String, ParseError> {
        let len = self.read_leb128_u32()? as usize;
        let start = self.position();
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ParseError::new("invalid UTF-8 in name", start))
    }
}

/// What the scanner extracted from a binary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannedModule {
    pub version: u32,
    pub imports: Vec<ImportDecl>,
    pub exports: Vec<ExportDecl>,
    /// First memory: an imported one wins over a defined one.
    pub memory: Option<MemoryLimits>,
    pub has_start: bool,
}

/// Raw export entry before function indices are resolved to signatures.
struct RawExport {
    name: String,
    kind: u8,
    index: u32,
    offset: usize,
}

/// Section scanner.
pub struct SectionScanner;

impl SectionScanner {
    /// Scan a binary whose header has already been checked.
    pub fn scan(bytes: &[u8]) -> Result<ScannedModule, ParseError> {
        let mut reader = BinaryReader::new(bytes);
        let magic = reader.read_bytes(4)?;
        if magic != WASM_MAGIC {
            return Err(ParseError::new("invalid magic number", 0));
        }
        let version = reader.read_u32_le()?;

        let mut types: Vec<FuncSignature> = Vec::new();
        let mut imports = Vec::new();
        let mut imported_funcs: Vec<FuncSignature> = Vec::new();
        let mut local_funcs: Vec<u32> = Vec::new();
        let mut defined_memory = None;
        let mut imported_memory = None;
        let mut raw_exports = Vec::new();
        let mut has_start = false;
        let mut last_id = 0u8;

        while !reader.is_empty() {
            let id_offset = reader.position();
            let id_byte = reader.read_byte()?;
            let size = reader.read_leb128_u32()? as usize;
            let mut section = reader.sub_reader(size)?;

            let id = SectionId::from_byte(id_byte)
                .ok_or_else(|| ParseError::new("unknown section id", id_offset))?;

            // Non-custom sections appear at most once, in increasing order.
            // DataCount (12) sits between Element and Code.
            if id != SectionId::Custom {
                let rank = section_rank(id);
                if rank <= last_id {
                    return Err(ParseError::new("section out of order", id_offset));
                }
                last_id = rank;
            }

            match id {
                SectionId::Type => types = Self::parse_type_section(&mut section)?,
                SectionId::Import => {
                    for (import, func) in Self::parse_import_section(&mut section, &types)? {
                        if let Some(sig) = func {
                            imported_funcs.push(sig);
                        }
                        if let ImportKind::Memory(limits) = import.kind {
                            imported_memory.get_or_insert(limits);
                        }
                        imports.push(import);
                    }
                }
                SectionId::Function => {
                    let count = section.read_leb128_u32()?;
                    for _ in 0..count {
                        local_funcs.push(section.read_leb128_u32()?);
                    }
                }
                SectionId::Memory => {
                    let count = section.read_leb128_u32()?;
                    for _ in 0..count {
                        let limits = Self::parse_limits(&mut section)?;
                        defined_memory.get_or_insert(limits);
                    }
                }
                SectionId::Export => raw_exports = Self::parse_export_section(&mut section)?,
                SectionId::Start => {
                    section.read_leb128_u32()?;
                    has_start = true;
                }
                // Skipped by size.
                _ => continue,
            }

            if !section.is_empty() {
                return Err(ParseError::new(
                    "section size mismatch",
                    section.position(),
                ));
            }
        }

        let mut exports = Vec::with_capacity(raw_exports.len());
        for raw in raw_exports {
            let kind = match raw.kind {
                0x00 => {
                    let idx = raw.index as usize;
                    let sig = if idx < imported_funcs.len() {
                        imported_funcs[idx].clone()
                    } else {
                        let type_idx = local_funcs
                            .get(idx - imported_funcs.len())
                            .ok_or_else(|| {
                                ParseError::new("export refers to unknown function", raw.offset)
                            })?;
                        types
                            .get(*type_idx as usize)
                            .cloned()
                            .ok_or_else(|| ParseError::new("type index out of range", raw.offset))?
                    };
                    ExportKind::Function(sig)
                }
                0x01 => ExportKind::Table,
                0x02 => ExportKind::Memory,
                0x03 => ExportKind::Global,
                _ => return Err(ParseError::new("invalid export kind", raw.offset)),
            };
            exports.push(ExportDecl {
                symbol: raw.name,
                kind,
            });
        }

        Ok(ScannedModule {
            version,
            imports,
            exports,
            memory: imported_memory.or(defined_memory),
            has_start,
        })
    }

    // ========================================================================
    // Section Parsers
    // ========================================================================

    /// Type section (1): function signatures.
    fn parse_type_section(reader: &mut BinaryReader) -> Result<Vec<FuncSignature>, ParseError> {
        let count = reader.read_leb128_u32()? as usize;
        let mut types = Vec::with_capacity(count.min(1024));

        for _ in 0..count {
            let form_offset = reader.position();
            if reader.read_byte()? != 0x60 {
                return Err(ParseError::new("expected functype marker 0x60", form_offset));
            }

            let param_count = reader.read_leb128_u32()? as usize;
            let mut params = Vec::with_capacity(param_count.min(64));
            for _ in 0..param_count {
                params.push(Self::parse_value_type(reader)?);
            }

            let result_count = reader.read_leb128_u32()? as usize;
            let mut results = Vec::with_capacity(result_count.min(64));
            for _ in 0..result_count {
                results.push(Self::parse_value_type(reader)?);
            }

            types.push(FuncSignature { params, results });
        }

        Ok(types)
    }

    /// Import section (2). Function imports also return their signature so the
    /// caller can build the function index space.
    fn parse_import_section(
        reader: &mut BinaryReader,
        types: &[FuncSignature],
    ) -> Result<Vec<(ImportDecl, Option<FuncSignature>)>, ParseError> {
        let count = reader.read_leb128_u32()? as usize;
        let mut imports = Vec::with_capacity(count.min(1024));

        for _ in 0..count {
            let namespace = reader.read_name()?;
            let symbol = reader.read_name()?;
            let kind_offset = reader.position();
            let (kind, func) = match reader.read_byte()? {
                0x00 => {
                    let type_idx = reader.read_leb128_u32()? as usize;
                    let sig = types
                        .get(type_idx)
                        .cloned()
                        .ok_or_else(|| ParseError::new("type index out of range", kind_offset))?;
                    (ImportKind::Function(sig.clone()), Some(sig))
                }
                0x01 => {
                    Self::parse_ref_type(reader)?;
                    Self::parse_limits(reader)?;
                    (ImportKind::Table, None)
                }
                0x02 => (ImportKind::Memory(Self::parse_limits(reader)?), None),
                0x03 => {
                    Self::parse_value_type(reader)?;
                    reader.read_byte()?; // mutability
                    (ImportKind::Global, None)
                }
                _ => return Err(ParseError::new("invalid import kind", kind_offset)),
            };

            imports.push((
                ImportDecl {
                    namespace,
                    symbol,
                    kind,
                },
                func,
            ));
        }

        Ok(imports)
    }

    /// Export section (7).
    fn parse_export_section(reader: &mut BinaryReader) -> Result<Vec<RawExport>, ParseError> {
        let count = reader.read_leb128_u32()? as usize;
        let mut exports = Vec::with_capacity(count.min(1024));

        for _ in 0..count {
            let offset = reader.position();
            let name = reader.read_name()?;
            let kind = reader.read_byte()?;
            let index = reader.read_leb128_u32()?;
            exports.push(RawExport {
                name,
                kind,
                index,
                offset,
            });
        }

        Ok(exports)
    }

    fn parse_limits(reader: &mut BinaryReader) -> Result<MemoryLimits, ParseError> {
        let offset = reader.position();
        let flags = reader.read_byte()?;
        if flags > 0x03 {
            return Err(ParseError::new("unsupported limits flags", offset));
        }
        let min_pages = reader.read_leb128_u32()?;
        let max_pages = if flags & 0x01 != 0 {
            Some(reader.read_leb128_u32()?)
        } else {
            None
        };
        Ok(MemoryLimits {
            min_pages,
            max_pages,
        })
    }

    fn parse_value_type(reader: &mut BinaryReader) -> Result<ValueType, ParseError> {
        let offset = reader.position();
        match reader.read_byte()? {
            0x7F => Ok(ValueType::I32),
            0x7E => Ok(ValueType::I64),
            0x7D => Ok(ValueType::F32),
            0x7C => Ok(ValueType::F64),
            0x7B => Ok(ValueType::V128),
            0x70 => Ok(ValueType::FuncRef),
            0x6F => Ok(ValueType::ExternRef),
            _ => Err(ParseError::new("invalid value type", offset)),
        }
    }

    fn parse_ref_type(reader: &mut BinaryReader) -> Result<ValueType, ParseError> {
        let offset = reader.position();
        match reader.read_byte()? {
            0x70 => Ok(ValueType::FuncRef),
            0x6F => Ok(ValueType::ExternRef),
            _ => Err(ParseError::new("invalid reference type", offset)),
        }
    }
}

/// Ordering rank of a non-custom section.
fn section_rank(id: SectionId) -> u8 {
    match id {
        SectionId::DataCount => 10,
        SectionId::Code => 11,
        SectionId::Data => 12,
        other => other as u8,
    }
}
