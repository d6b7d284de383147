//! Bytecode Loader
//!
//! Images are checked in two stages. The header checks below run before
//! the VM sees a single body byte and report structured errors without
//! touching the exception slot. The body is then copied into an aligned
//! VM buffer and deserialized under a guard, so a corrupt body arrives as
//! `Nil` plus a `ScriptError` in the slot.

use crate::context::Context;
use crate::error::{ShimError, ShimResult};
use crate::trampoline::{protect, run_proc, Raised};
use crate::value::Value;
use mrbridge_vm::dump::{ByteOrder, ImageHeader, FORMAT_VERSION, HEADER_SIZE};

/// Check identifier, version and declared size
pub fn validate_header(bytes: &[u8]) -> ShimResult<ImageHeader> {
    if bytes.len() < HEADER_SIZE {
        return Err(ShimError::ImageTooSmall { size: bytes.len() });
    }
    if ByteOrder::from_ident(&bytes[0..4]).is_none() || bytes[4..8] != FORMAT_VERSION {
        return Err(ShimError::InvalidImageHeader);
    }
    let header = ImageHeader::parse(bytes).map_err(|_| ShimError::InvalidImageHeader)?;
    let declared = header.total_size as usize;
    if declared <= HEADER_SIZE {
        return Err(ShimError::ImageTooSmall { size: declared });
    }
    if declared > bytes.len() {
        return Err(ShimError::ImageTruncated {
            declared,
            available: bytes.len(),
        });
    }
    Ok(header)
}

/// Deserialize an image into a proc.
///
/// Header problems are returned as errors. A corrupt body yields
/// `Ok(Value::Nil)` with the exception slot populated. Bytes past the
/// declared size are ignored.
pub fn read_image(ctx: &mut Context, bytes: &[u8]) -> ShimResult<Value> {
    let header = validate_header(bytes)?;
    let declared = header.total_size as usize;
    tracing::debug!(size = declared, order = ?header.order, "loading image");

    let image = ctx.vm_mut().alloc_image(&bytes[..declared]);
    match protect(ctx, |c| c.vm_mut().read_image(image.as_bytes()))? {
        Ok(raw) => Ok(Value::from_raw(raw)),
        Err(Raised) => Ok(Value::Nil),
    }
}

/// Read an image and run it at top level.
///
/// A runtime failure yields `Ok(Value::Nil)` with the exception slot
/// populated, as with a script load.
pub fn load_image(ctx: &mut Context, bytes: &[u8]) -> ShimResult<Value> {
    match read_image(ctx, bytes)? {
        proc @ Value::Proc(_) => Ok(run_proc(ctx, proc)),
        _ => Ok(Value::Nil),
    }
}

/// Serialize a compiled proc
pub fn dump(ctx: &Context, proc: Value, order: ByteOrder, strip: bool) -> ShimResult<Vec<u8>> {
    if !matches!(proc, Value::Proc(_)) {
        return Err(ShimError::NotAProcedure);
    }
    ctx.vm()
        .dump_proc(proc.into_raw(), order, strip)
        .ok_or(ShimError::NotAProcedure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trampoline::{compile, get_current_exception, CompileContext};
    use crate::value::from_int;

    fn image(ctx: &mut Context, src: &str, order: ByteOrder) -> Vec<u8> {
        let proc = compile(ctx, src.as_bytes(), &CompileContext::default());
        dump(ctx, proc, order, false).unwrap()
    }

    #[test]
    fn test_load_image_runs_body() {
        let mut ctx = Context::open();
        let bytes = image(&mut ctx, "def sq(x)\n  x * x\nend\nsq(9)", ByteOrder::Big);
        assert_eq!(load_image(&mut ctx, &bytes).unwrap(), from_int(81));

        let bytes = image(&mut ctx, "sq(3) + 1", ByteOrder::Little);
        assert_eq!(load_image(&mut ctx, &bytes).unwrap(), from_int(10));
    }

    #[test]
    fn test_header_rejections() {
        let mut ctx = Context::open();
        let good = image(&mut ctx, "1", ByteOrder::Big);

        assert!(matches!(
            read_image(&mut ctx, &good[..10]),
            Err(ShimError::ImageTooSmall { size: 10 })
        ));

        let mut bad_ident = good.clone();
        bad_ident[0..4].copy_from_slice(b"XXXX");
        assert!(matches!(read_image(&mut ctx, &bad_ident), Err(ShimError::InvalidImageHeader)));

        let mut bad_version = good.clone();
        bad_version[4..8].copy_from_slice(b"0003");
        assert!(matches!(read_image(&mut ctx, &bad_version), Err(ShimError::InvalidImageHeader)));

        let mut tiny = good.clone();
        tiny[8..12].copy_from_slice(&24u32.to_be_bytes());
        assert!(matches!(
            read_image(&mut ctx, &tiny),
            Err(ShimError::ImageTooSmall { size: 24 })
        ));

        assert!(matches!(
            read_image(&mut ctx, &good[..good.len() - 1]),
            Err(ShimError::ImageTruncated { .. })
        ));
        assert!(ctx.vm().exception().is_none());
    }

    #[test]
    fn test_corrupt_body_goes_through_slot() {
        let mut ctx = Context::open();
        let mut bytes = image(&mut ctx, "1 + 1", ByteOrder::Big);
        let last = bytes.len() - 6;
        bytes[last] ^= 0xFF;
        assert_eq!(read_image(&mut ctx, &bytes).unwrap(), Value::Nil);
        let rendered = get_current_exception(&mut ctx).unwrap();
        assert!(rendered.contains("(ScriptError)"), "{}", rendered);
    }

    #[test]
    fn test_trailing_bytes_after_declared_size_are_ignored() {
        let mut ctx = Context::open();
        let mut bytes = image(&mut ctx, "5", ByteOrder::Big);
        bytes.extend_from_slice(b"junk");
        assert_eq!(load_image(&mut ctx, &bytes).unwrap(), from_int(5));
    }

    #[test]
    fn test_dump_rejects_non_procs() {
        let ctx = Context::open();
        assert!(matches!(
            dump(&ctx, from_int(1), ByteOrder::Big, false),
            Err(ShimError::NotAProcedure)
        ));
    }
}
