//! `mrbridge eval`: evaluate inline code and print its inspection.

use mrbridge::trampoline::{self, CompileContext};
use mrbridge::Context;

pub fn execute(ctx: &mut Context, code: &str) -> anyhow::Result<()> {
    let v = trampoline::eval(ctx, code, &CompileContext::new("-e"))?;
    println!("{}", trampoline::inspect(ctx, v)?);
    Ok(())
}
