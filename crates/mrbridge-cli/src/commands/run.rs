//! `mrbridge run`: execute a source file or image.

use super::{check_slot, is_image, read_file};
use mrbridge::trampoline::{self, CompileContext};
use mrbridge::{loader, Context};
use std::path::Path;

pub fn execute(ctx: &mut Context, path: &Path) -> anyhow::Result<()> {
    let bytes = read_file(path)?;
    let result = if is_image(&bytes) {
        loader::load_image(ctx, &bytes)?
    } else {
        let cc = CompileContext::new(path.display().to_string());
        trampoline::load_script_suppressed(ctx, &bytes, &cc)
    };
    check_slot(ctx, result)?;
    tracing::info!(live = ctx.live_objects(), "run finished");
    Ok(())
}
