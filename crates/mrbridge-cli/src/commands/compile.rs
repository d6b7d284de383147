//! `mrbridge compile`: write a binary image.

use super::{check_slot, read_file};
use anyhow::Context as _;
use mrbridge::trampoline::{self, CompileContext};
use mrbridge::{loader, ByteOrder, Context};
use std::path::PathBuf;

pub struct CompileArgs {
    pub file: PathBuf,
    pub output: Option<PathBuf>,
    pub little_endian: bool,
    pub strip: bool,
}

pub fn execute(ctx: &mut Context, args: CompileArgs) -> anyhow::Result<()> {
    let source = read_file(&args.file)?;
    let cc = CompileContext::new(args.file.display().to_string());
    let proc = trampoline::compile(ctx, &source, &cc);
    let proc = check_slot(ctx, proc)?;

    let order = if args.little_endian {
        ByteOrder::Little
    } else {
        ByteOrder::Big
    };
    let image = loader::dump(ctx, proc, order, args.strip)?;

    let out = args
        .output
        .unwrap_or_else(|| args.file.with_extension("mrb"));
    std::fs::write(&out, &image).with_context(|| format!("Failed to write {}", out.display()))?;
    tracing::info!(bytes = image.len(), out = %out.display(), "image written");
    Ok(())
}
