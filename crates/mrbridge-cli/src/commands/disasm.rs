//! `mrbridge disasm`: print the procedure tree of a source file or image.

use super::load_proc;
use mrbridge::introspect::Procedure;
use mrbridge::Context;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;

#[derive(Debug, Serialize)]
struct Region {
    begin: u32,
    end: u32,
    target: u32,
}

#[derive(Debug, Serialize)]
struct ProcListing {
    filename: Option<String>,
    nparams: u16,
    locals: Option<Vec<String>>,
    symbols: Vec<String>,
    catch_regions: Vec<Region>,
    instructions: Vec<String>,
    children: Vec<ProcListing>,
}

impl ProcListing {
    fn build(ctx: &Context, p: &Procedure) -> Self {
        let instructions = p
            .instructions()
            .map(|ins| ins.listing().collect())
            .unwrap_or_default();
        Self {
            filename: p.filename().map(str::to_string),
            nparams: p.nparams(),
            locals: p.local_names(ctx).map(|it| it.collect()),
            symbols: p.symbols(ctx).collect(),
            catch_regions: p
                .catch_regions()
                .iter()
                .map(|h| Region {
                    begin: h.begin,
                    end: h.end,
                    target: h.target,
                })
                .collect(),
            instructions,
            children: p.children().map(|c| Self::build(ctx, &c)).collect(),
        }
    }

    fn render(&self, path: &str, out: &mut String) {
        let _ = write!(out, "proc {}", path);
        if let Some(f) = &self.filename {
            let _ = write!(out, " ({})", f);
        }
        let _ = write!(out, " params={}", self.nparams);
        match &self.locals {
            Some(l) => {
                let _ = writeln!(out, " locals=[{}]", l.join(", "));
            }
            None => out.push('\n'),
        }
        if !self.symbols.is_empty() {
            let _ = writeln!(out, "  symbols: {}", self.symbols.join(", "));
        }
        for r in &self.catch_regions {
            let _ = writeln!(out, "  rescue {:04}..{:04} -> {:04}", r.begin, r.end, r.target);
        }
        for line in &self.instructions {
            let _ = writeln!(out, "  {}", line);
        }
        for (i, child) in self.children.iter().enumerate() {
            out.push('\n');
            child.render(&format!("{}.{}", path, i), out);
        }
    }
}

pub fn execute(ctx: &mut Context, path: &Path, json: bool) -> anyhow::Result<()> {
    let proc = load_proc(ctx, path)?;
    let top = Procedure::from_value(ctx, proc)?;
    let listing = ProcListing::build(ctx, &top);

    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else {
        let mut out = String::new();
        listing.render("0", &mut out);
        print!("{}", out);
    }
    Ok(())
}
