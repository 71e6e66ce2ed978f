// SPDX-License-Identifier: LGPL-2.1-or-later
// See Notices.txt for copyright information

//! predicate every function of a text-format IR file and print the linear programs

use anyhow::{bail, Context};
use clap::Parser;
use log::error;
use std::io::Read;
use std::path::PathBuf;
use usc_predication::{predicate_function, PredicationOptions, ReturnGuardPolicy};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// input file; standard input if omitted
    input: Option<PathBuf>,
    /// fail functions needing a deeper unwind than this
    #[arg(long)]
    max_unwind_depth: Option<u32>,
    /// guard the function exit even without an early return
    #[arg(long)]
    always_guard_returns: bool,
    /// skip the bracket balance check
    #[arg(long)]
    no_verify: bool,
}

impl Args {
    fn options(&self) -> PredicationOptions {
        PredicationOptions {
            return_guard: if self.always_guard_returns {
                ReturnGuardPolicy::Always
            } else {
                ReturnGuardPolicy::OnDemand
            },
            max_unwind_depth: self.max_unwind_depth,
            verify: !self.no_verify,
        }
    }
    fn read_input(&self) -> anyhow::Result<String> {
        let mut retval = String::new();
        match &self.input {
            Some(path) => {
                retval = std::fs::read_to_string(path)
                    .with_context(|| format!("can't read {}", path.display()))?
            }
            None => {
                std::io::stdin()
                    .read_to_string(&mut retval)
                    .context("can't read standard input")?;
            }
        }
        Ok(retval)
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let options = args.options();
    let input = args.read_input()?;
    let functions = usc_ir::parse(&input).map_err(|err| {
        let file = args
            .input
            .as_ref()
            .map_or_else(|| "<stdin>".into(), |path| path.display().to_string());
        anyhow::anyhow!("{}:{}", file, err)
    })?;
    let mut failed = 0;
    for function in functions {
        let name = function.name().to_string();
        match predicate_function(function, &options) {
            Ok(program) => print!("{}", program),
            Err(err) => {
                error!("function {}: {}", name, err);
                failed += 1;
            }
        }
    }
    if failed != 0 {
        bail!("{} functions failed to compile", failed);
    }
    Ok(())
}
