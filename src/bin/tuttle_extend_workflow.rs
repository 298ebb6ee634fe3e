//! Standalone helper invoked from a workflow's `#! preprocess` section to
//! render a template into a new workflow fragment under
//! `$TUTTLE_ENV/extensions/`. The engine picks the fragment up on its next
//! parse pass (see [`tuttle::preprocess::expand`]).
//!
//! ```text
//! tuttle-extend-workflow rule.tmpl inputs[]=A B C foo=bar
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use tuttle::extension::{self, parse_arguments, render_template, tuttle_env, write_fragment};

fn run(template_path: &Path, args: &[String]) -> extension::Result<PathBuf> {
    let tuttle_dir = tuttle_env()?;
    let vars = parse_arguments(args)?;
    let fragment = render_template(template_path, &vars)?;
    let base_name = template_path.file_stem().and_then(|s| s.to_str()).unwrap_or("extension");
    write_fragment(&tuttle_dir.join("extensions"), base_name, &fragment)
}

fn main() -> ExitCode {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("usage: tuttle-extend-workflow <template> [KEY=VAL | KEY[]=V0 V1 ...]...");
        return ExitCode::FAILURE;
    }
    let template_path = PathBuf::from(args.remove(0));

    match run(&template_path, &args) {
        Ok(path) => {
            println!("{}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("tuttle-extend-workflow: {e}");
            ExitCode::FAILURE
        }
    }
}
