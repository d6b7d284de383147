//! Binary image format for compiled procedures
//!
//! Layout:
//! - 24-byte header: identifier, format version, total size, body CRC-32,
//!   compiler name and compiler version
//! - one procedure record, children nested inside it
//! - the `END\0` marker
//!
//! Numbers use the byte order named by the identifier: `RITE` for big-endian,
//! `ETIR` for little-endian.

use crate::heap::ObjRef;
use crate::irep::{CatchHandler, DebugInfo, Irep, LineEntry, PoolValue};
use crate::symbol::{Sym, SymbolTable};
use crate::value::RawValue;
use crate::vm::Vm;
use crate::DecodeError;
use std::rc::Rc;

/// Identifier of a big-endian image
pub const IDENT_BIG: [u8; 4] = *b"RITE";
/// Identifier of a little-endian image
pub const IDENT_LITTLE: [u8; 4] = *b"ETIR";
/// Supported format version
pub const FORMAT_VERSION: [u8; 4] = *b"0004";
/// Compiler name written into every image
pub const COMPILER_NAME: [u8; 4] = *b"MRBB";
/// Compiler version written into every image
pub const COMPILER_VERSION: [u8; 4] = *b"0001";
/// Header size in bytes
pub const HEADER_SIZE: usize = 24;
/// Marker closing the body
pub const END_MARKER: [u8; 4] = *b"END\0";

const FLAG_LV: u8 = 0b01;
const FLAG_DEBUG: u8 = 0b10;
const UNNAMED_LOCAL: u16 = 0xFFFF;
const MAX_NESTING: usize = 64;

const POOL_INT: u8 = 0;
const POOL_FLOAT: u8 = 1;
const POOL_STR: u8 = 2;

/// Byte order of the numbers in an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    /// `RITE`
    #[default]
    Big,
    /// `ETIR`
    Little,
}

impl ByteOrder {
    /// Identifier bytes for this order
    pub fn ident(self) -> [u8; 4] {
        match self {
            ByteOrder::Big => IDENT_BIG,
            ByteOrder::Little => IDENT_LITTLE,
        }
    }

    /// Order named by an identifier
    pub fn from_ident(ident: &[u8]) -> Option<Self> {
        match ident {
            b"RITE" => Some(ByteOrder::Big),
            b"ETIR" => Some(ByteOrder::Little),
            _ => None,
        }
    }

    fn u16_from(self, b: [u8; 2]) -> u16 {
        match self {
            ByteOrder::Big => u16::from_be_bytes(b),
            ByteOrder::Little => u16::from_le_bytes(b),
        }
    }

    fn u32_from(self, b: [u8; 4]) -> u32 {
        match self {
            ByteOrder::Big => u32::from_be_bytes(b),
            ByteOrder::Little => u32::from_le_bytes(b),
        }
    }

    fn u64_from(self, b: [u8; 8]) -> u64 {
        match self {
            ByteOrder::Big => u64::from_be_bytes(b),
            ByteOrder::Little => u64::from_le_bytes(b),
        }
    }
}

/// Parsed image header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    /// Byte order
    pub order: ByteOrder,
    /// Declared size of header plus body
    pub total_size: u32,
    /// CRC-32 of the body
    pub crc: u32,
    /// Compiler name
    pub compiler: [u8; 4],
    /// Compiler version
    pub compiler_version: [u8; 4],
}

impl ImageHeader {
    /// Read the fixed header. Only the identifier and format version are
    /// validated here.
    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < HEADER_SIZE {
            return Err(DecodeError::UnexpectedEnd(bytes.len()));
        }
        let order = ByteOrder::from_ident(&bytes[0..4]).ok_or(DecodeError::InvalidHeader)?;
        if bytes[4..8] != FORMAT_VERSION {
            return Err(DecodeError::InvalidHeader);
        }
        let word = |at: usize| order.u32_from([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        Ok(Self {
            order,
            total_size: word(8),
            crc: word(12),
            compiler: [bytes[16], bytes[17], bytes[18], bytes[19]],
            compiler_version: [bytes[20], bytes[21], bytes[22], bytes[23]],
        })
    }
}

// ===== Writing =====

struct ImageWriter {
    buffer: Vec<u8>,
    order: ByteOrder,
}

impl ImageWriter {
    fn new(order: ByteOrder) -> Self {
        Self {
            buffer: Vec::with_capacity(256),
            order,
        }
    }

    fn offset(&self) -> usize {
        self.buffer.len()
    }

    fn emit_u8(&mut self, v: u8) {
        self.buffer.push(v);
    }

    fn emit_u16(&mut self, v: u16) {
        match self.order {
            ByteOrder::Big => self.buffer.extend_from_slice(&v.to_be_bytes()),
            ByteOrder::Little => self.buffer.extend_from_slice(&v.to_le_bytes()),
        }
    }

    fn emit_u32(&mut self, v: u32) {
        match self.order {
            ByteOrder::Big => self.buffer.extend_from_slice(&v.to_be_bytes()),
            ByteOrder::Little => self.buffer.extend_from_slice(&v.to_le_bytes()),
        }
    }

    fn emit_u64(&mut self, v: u64) {
        match self.order {
            ByteOrder::Big => self.buffer.extend_from_slice(&v.to_be_bytes()),
            ByteOrder::Little => self.buffer.extend_from_slice(&v.to_le_bytes()),
        }
    }

    fn emit_name(&mut self, name: &[u8]) {
        self.emit_u16(name.len() as u16);
        self.buffer.extend_from_slice(name);
    }

    fn patch_u32(&mut self, at: usize, v: u32) {
        let bytes = match self.order {
            ByteOrder::Big => v.to_be_bytes(),
            ByteOrder::Little => v.to_le_bytes(),
        };
        self.buffer[at..at + 4].copy_from_slice(&bytes);
    }
}

/// Serialize `irep` and its children into an image
pub fn dump_irep(irep: &Irep, symbols: &SymbolTable, order: ByteOrder, strip: bool) -> Vec<u8> {
    let mut w = ImageWriter::new(order);
    w.buffer.extend_from_slice(&order.ident());
    w.buffer.extend_from_slice(&FORMAT_VERSION);
    w.emit_u32(0);
    w.emit_u32(0);
    w.buffer.extend_from_slice(&COMPILER_NAME);
    w.buffer.extend_from_slice(&COMPILER_VERSION);

    write_record(&mut w, irep, symbols, strip);
    w.buffer.extend_from_slice(&END_MARKER);

    let total = w.offset() as u32;
    let crc = crc32fast::hash(&w.buffer[HEADER_SIZE..]);
    w.patch_u32(8, total);
    w.patch_u32(12, crc);
    w.buffer
}

fn write_record(w: &mut ImageWriter, irep: &Irep, symbols: &SymbolTable, strip: bool) {
    let start = w.offset();
    w.emit_u32(0);
    w.emit_u16(irep.nlocals);
    w.emit_u16(irep.nparams);

    let lv = irep.lv.as_ref().filter(|_| !strip);
    let debug = irep.debug.as_ref().filter(|_| !strip);
    let mut flags = 0;
    if lv.is_some() {
        flags |= FLAG_LV;
    }
    if debug.is_some() {
        flags |= FLAG_DEBUG;
    }
    w.emit_u8(flags);

    w.emit_u32(irep.iseq.len() as u32);
    w.buffer.extend_from_slice(&irep.iseq);

    w.emit_u16(irep.pool.len() as u16);
    for entry in &irep.pool {
        match entry {
            PoolValue::Int(i) => {
                w.emit_u8(POOL_INT);
                w.emit_u64(*i as u64);
            }
            PoolValue::Float(f) => {
                w.emit_u8(POOL_FLOAT);
                w.emit_u64(f.to_bits());
            }
            PoolValue::Str(bytes) => {
                w.emit_u8(POOL_STR);
                w.emit_u32(bytes.len() as u32);
                w.buffer.extend_from_slice(bytes);
            }
        }
    }

    w.emit_u16(irep.syms.len() as u16);
    for sym in &irep.syms {
        w.emit_name(symbols.name(*sym).unwrap_or_default());
    }

    if let Some(lv) = lv {
        for slot in lv {
            match slot.and_then(|s| symbols.name(s)) {
                Some(name) => w.emit_name(name),
                None => w.emit_u16(UNNAMED_LOCAL),
            }
        }
    }

    w.emit_u16(irep.handlers.len() as u16);
    for h in &irep.handlers {
        w.emit_u32(h.begin);
        w.emit_u32(h.end);
        w.emit_u32(h.target);
        w.emit_u16(h.depth);
    }

    if let Some(debug) = debug {
        w.emit_name(debug.filename.as_bytes());
        w.emit_u16(debug.lines.len() as u16);
        for entry in &debug.lines {
            w.emit_u32(entry.pc);
            w.emit_u16(entry.line);
        }
    }

    w.emit_u16(irep.reps.len() as u16);
    for child in &irep.reps {
        write_record(w, child, symbols, strip);
    }

    let len = (w.offset() - start) as u32;
    w.patch_u32(start, len);
}

// ===== Reading =====

struct ImageReader<'a> {
    data: &'a [u8],
    pos: usize,
    order: ByteOrder,
}

impl<'a> ImageReader<'a> {
    fn new(data: &'a [u8], order: ByteOrder) -> Self {
        Self { data, pos: 0, order }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::UnexpectedEnd(HEADER_SIZE + self.pos));
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.read_array()?;
        Ok(self.order.u16_from(b))
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.read_array()?;
        Ok(self.order.u32_from(b))
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let b = self.read_array()?;
        Ok(self.order.u64_from(b))
    }

    fn read_name(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_u16()? as usize;
        self.read_bytes(len)
    }
}

/// Deserialize and verify an image. Symbol names are interned into
/// `symbols`.
pub fn read_irep(bytes: &[u8], symbols: &mut SymbolTable) -> Result<Irep, DecodeError> {
    let header = ImageHeader::parse(bytes)?;
    let total = header.total_size as usize;
    if total < HEADER_SIZE + END_MARKER.len() || total > bytes.len() {
        return Err(DecodeError::SizeMismatch {
            declared: header.total_size,
            actual: bytes.len(),
        });
    }
    let body = &bytes[HEADER_SIZE..total];
    let actual = crc32fast::hash(body);
    if actual != header.crc {
        return Err(DecodeError::ChecksumMismatch {
            expected: header.crc,
            actual,
        });
    }
    if header.compiler != COMPILER_NAME || header.compiler_version != COMPILER_VERSION {
        return Err(DecodeError::UnknownCompiler);
    }

    let mut reader = ImageReader::new(body, header.order);
    let irep = read_record(&mut reader, symbols, 0)?;
    if reader.read_bytes(END_MARKER.len())? != END_MARKER {
        return Err(DecodeError::MissingEndMarker);
    }
    if reader.remaining() != 0 {
        return Err(DecodeError::TrailingBytes(reader.remaining()));
    }
    irep.verify()?;
    tracing::trace!(
        size = total,
        children = irep.reps.len(),
        "image decoded"
    );
    Ok(irep)
}

fn read_record(
    r: &mut ImageReader<'_>,
    symbols: &mut SymbolTable,
    nesting: usize,
) -> Result<Irep, DecodeError> {
    if nesting > MAX_NESTING {
        return Err(DecodeError::Malformed("procedures nested too deeply"));
    }
    let start = r.pos;
    let record_len = r.read_u32()? as usize;
    let nlocals = r.read_u16()?;
    let nparams = r.read_u16()?;
    let flags = r.read_u8()?;
    if flags & !(FLAG_LV | FLAG_DEBUG) != 0 {
        return Err(DecodeError::Malformed("unknown record flags"));
    }

    let iseq_len = r.read_u32()? as usize;
    let iseq = r.read_bytes(iseq_len)?.to_vec();

    let pool_len = r.read_u16()?;
    let mut pool = Vec::with_capacity(pool_len as usize);
    for _ in 0..pool_len {
        let entry = match r.read_u8()? {
            POOL_INT => PoolValue::Int(r.read_u64()? as i64),
            POOL_FLOAT => PoolValue::Float(f64::from_bits(r.read_u64()?)),
            POOL_STR => {
                let len = r.read_u32()? as usize;
                PoolValue::Str(r.read_bytes(len)?.to_vec())
            }
            _ => return Err(DecodeError::Malformed("unknown pool entry")),
        };
        pool.push(entry);
    }

    let syms_len = r.read_u16()?;
    let mut syms = Vec::with_capacity(syms_len as usize);
    for _ in 0..syms_len {
        syms.push(symbols.intern(r.read_name()?));
    }

    let lv = if flags & FLAG_LV != 0 {
        let count = (nlocals as usize).saturating_sub(1);
        let mut names: Vec<Option<Sym>> = Vec::with_capacity(count);
        for _ in 0..count {
            let len = r.read_u16()?;
            if len == UNNAMED_LOCAL {
                names.push(None);
            } else {
                names.push(Some(symbols.intern(r.read_bytes(len as usize)?)));
            }
        }
        Some(names)
    } else {
        None
    };

    let handlers_len = r.read_u16()?;
    let mut handlers = Vec::with_capacity(handlers_len as usize);
    for _ in 0..handlers_len {
        handlers.push(CatchHandler {
            begin: r.read_u32()?,
            end: r.read_u32()?,
            target: r.read_u32()?,
            depth: r.read_u16()?,
        });
    }

    let debug = if flags & FLAG_DEBUG != 0 {
        let filename = String::from_utf8_lossy(r.read_name()?).into_owned();
        let count = r.read_u16()?;
        let mut lines = Vec::with_capacity(count as usize);
        for _ in 0..count {
            lines.push(LineEntry {
                pc: r.read_u32()?,
                line: r.read_u16()?,
            });
        }
        if !lines.windows(2).all(|w| w[0].pc <= w[1].pc) {
            return Err(DecodeError::Malformed("line table out of order"));
        }
        Some(DebugInfo { filename, lines })
    } else {
        None
    };

    let children = r.read_u16()?;
    let mut reps = Vec::with_capacity(children as usize);
    for _ in 0..children {
        reps.push(Rc::new(read_record(r, symbols, nesting + 1)?));
    }

    if r.pos - start != record_len {
        return Err(DecodeError::Malformed("record length mismatch"));
    }

    Ok(Irep {
        nlocals,
        nparams,
        iseq,
        pool,
        syms,
        lv,
        handlers,
        debug,
        reps,
    })
}

// ===== Aligned buffers =====

/// Heap buffer with 8-byte alignment for image bytes
pub struct ImageBuffer {
    words: Box<[u64]>,
    len: usize,
}

impl ImageBuffer {
    /// Zeroed buffer of `len` bytes
    pub fn zeroed(len: usize) -> Self {
        let words = vec![0u64; len.div_ceil(8)].into_boxed_slice();
        Self { words, len }
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Contents
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: `words` owns at least `len` initialized bytes and u8 has no
        // alignment requirement
        unsafe { std::slice::from_raw_parts(self.words.as_ptr().cast::<u8>(), self.len) }
    }

    /// Mutable contents
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `as_bytes`; the exclusive borrow of self covers `words`
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr().cast::<u8>(), self.len) }
    }

    /// Start address, always 8-byte aligned
    pub fn as_ptr(&self) -> *const u8 {
        self.words.as_ptr().cast()
    }
}

impl std::fmt::Debug for ImageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageBuffer").field("len", &self.len).finish()
    }
}

impl Vm {
    /// Copy `bytes` into an aligned buffer owned by the VM's allocator
    pub fn alloc_image(&mut self, bytes: &[u8]) -> ImageBuffer {
        let mut buf = ImageBuffer::zeroed(bytes.len());
        buf.as_bytes_mut().copy_from_slice(bytes);
        buf
    }

    /// Deserialize an image into a proc.
    ///
    /// Raises `ScriptError` when the image is corrupt.
    pub fn read_image(&mut self, bytes: &[u8]) -> RawValue {
        match read_irep(bytes, &mut self.symbols) {
            Ok(irep) => self.proc_new(Rc::new(irep)),
            Err(e) => {
                tracing::debug!(error = %e, "image rejected");
                let msg = format!("invalid image: {}", e);
                self.raise(self.core.script_error, &msg)
            }
        }
    }

    /// Serialize a compiled proc; `None` for host procs and non-procs
    pub fn dump_proc(&self, proc: RawValue, order: ByteOrder, strip: bool) -> Option<Vec<u8>> {
        let irep = self.proc_irep(proc)?;
        Some(dump_irep(&irep, &self.symbols, order, strip))
    }

    /// Class a proc attaches `def`s to
    pub fn proc_target_class(&self, proc: RawValue) -> Option<ObjRef> {
        self.proc_ref(proc)?.target_class
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::compile_scope;
    use crate::parser::parse_program;

    fn compile(symbols: &mut SymbolTable, src: &str) -> Irep {
        let scope = parse_program(src).unwrap();
        compile_scope(symbols, &scope, "t.rb", true).unwrap()
    }

    const SOURCE: &str = "def add(a, b)\n  a + b\nend\nbegin\n  add(1, 2.5)\nrescue => e\n  e\nend\n";

    #[test]
    fn test_header_fields() {
        let mut symbols = SymbolTable::new();
        let irep = compile(&mut symbols, SOURCE);
        let image = dump_irep(&irep, &symbols, ByteOrder::Big, false);
        assert_eq!(&image[0..4], b"RITE");
        assert_eq!(&image[4..8], b"0004");
        let header = ImageHeader::parse(&image).unwrap();
        assert_eq!(header.total_size as usize, image.len());
        assert_eq!(header.compiler, COMPILER_NAME);
        assert_eq!(&image[image.len() - 4..], b"END\0");

        let little = dump_irep(&irep, &symbols, ByteOrder::Little, false);
        assert_eq!(&little[0..4], b"ETIR");
        assert_eq!(little.len(), image.len());
    }

    #[test]
    fn test_both_byte_orders_read_back() {
        let mut symbols = SymbolTable::new();
        let irep = compile(&mut symbols, SOURCE);
        for order in [ByteOrder::Big, ByteOrder::Little] {
            let image = dump_irep(&irep, &symbols, order, false);
            let back = read_irep(&image, &mut symbols).unwrap();
            assert_eq!(back, irep);
        }
    }

    #[test]
    fn test_strip_drops_names_and_lines() {
        let mut symbols = SymbolTable::new();
        let irep = compile(&mut symbols, SOURCE);
        let image = dump_irep(&irep, &symbols, ByteOrder::Big, true);
        let back = read_irep(&image, &mut symbols).unwrap();
        assert!(back.lv.is_none());
        assert!(back.debug.is_none());
        assert!(back.reps.iter().all(|r| r.lv.is_none()));
        assert_eq!(back.iseq, irep.iseq);
    }

    #[test]
    fn test_corruption_is_detected() {
        let mut symbols = SymbolTable::new();
        let irep = compile(&mut symbols, "1 + 2\n");
        let image = dump_irep(&irep, &symbols, ByteOrder::Big, false);

        let mut flipped = image.clone();
        flipped[HEADER_SIZE + 6] ^= 0xFF;
        assert!(matches!(
            read_irep(&flipped, &mut symbols),
            Err(DecodeError::ChecksumMismatch { .. })
        ));

        let mut compiler = image.clone();
        compiler[16] = b'X';
        assert_eq!(read_irep(&compiler, &mut symbols), Err(DecodeError::UnknownCompiler));

        let mut version = image;
        version[7] = b'9';
        assert_eq!(read_irep(&version, &mut symbols), Err(DecodeError::InvalidHeader));
    }

    #[test]
    fn test_image_buffer_alignment() {
        let mut vm = Vm::new(Default::default());
        let buf = vm.alloc_image(&[1, 2, 3, 4, 5]);
        assert_eq!(buf.as_ptr() as usize % 8, 0);
        assert_eq!(buf.as_bytes(), &[1, 2, 3, 4, 5]);
        assert_eq!(buf.len(), 5);
        assert!(ImageBuffer::zeroed(0).is_empty());
    }
}
