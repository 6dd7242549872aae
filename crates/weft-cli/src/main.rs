use std::{env, fs, path::Path, process::ExitCode, time::Instant};

use weft::{compile, io, CompileOutcome, Config};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let ast_path = if args.len() > 1 { &args[1] } else { "program.ast.json" };
    let out_dir = if args.len() > 2 { &args[2] } else { "gen" };

    let config = match read_config(ast_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error reading config: {err}");
            return ExitCode::FAILURE;
        }
    };

    let json = match fs::read_to_string(ast_path) {
        Ok(json) => json,
        Err(err) => {
            eprintln!("error reading '{ast_path}': {err}");
            return ExitCode::FAILURE;
        }
    };
    let mut prog = match io::load(&json, config) {
        Ok(prog) => prog,
        Err(err) => {
            eprintln!("error parsing '{ast_path}': {err}");
            return ExitCode::FAILURE;
        }
    };

    let start = Instant::now();
    let outcome = compile(&mut prog);
    let elapsed = start.elapsed();

    for warning in prog.reporter.warnings() {
        eprintln!("warning: {warning}");
    }
    for line in prog.reporter.explanations() {
        eprintln!("{line}");
    }

    match outcome {
        CompileOutcome::Errors(errors) => {
            for error in &errors {
                eprintln!("error: {error}");
            }
            eprintln!("compilation failed with {} error(s) after {elapsed:?}", errors.len());
            ExitCode::FAILURE
        }
        CompileOutcome::Success(files) => {
            if let Err(err) = write_files(out_dir, &files) {
                eprintln!("error writing output: {err}");
                return ExitCode::FAILURE;
            }
            eprintln!("generated {} file(s) in {out_dir}/ after {elapsed:?}", 4 + files.modules.len());
            ExitCode::SUCCESS
        }
    }
}

/// A `<name>.config.json` next to the AST overrides the defaults.
fn read_config(ast_path: &str) -> Result<Config, String> {
    let config_path = format!("{}.config.json", ast_path.trim_end_matches(".ast.json"));
    if !Path::new(&config_path).exists() {
        return Ok(Config::default());
    }
    let text = fs::read_to_string(&config_path).map_err(|e| e.to_string())?;
    serde_json::from_str(&text).map_err(|e| e.to_string())
}

fn write_files(out_dir: &str, files: &weft::GeneratedFiles) -> std::io::Result<()> {
    fs::create_dir_all(out_dir)?;
    let dir = Path::new(out_dir);
    fs::write(dir.join("chpl__header.h"), &files.header)?;
    for (name, text) in &files.modules {
        fs::write(dir.join(name), text)?;
    }
    fs::write(dir.join("_main.c"), &files.main)?;
    fs::write(dir.join("_config.c"), &files.config)?;
    if let Some(type_structure) = &files.type_structure {
        fs::write(dir.join("_type_structure.c"), type_structure)?;
    }
    Ok(())
}
