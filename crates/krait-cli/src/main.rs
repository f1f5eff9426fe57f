use std::{env, fs, process::ExitCode};

use krait::{Code, Object, RunFailure, Runner};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let Some(file_path) = args.get(1) else {
        eprintln!("usage: krait <decoded-code-object.json>");
        return ExitCode::FAILURE;
    };

    let source = match fs::read_to_string(file_path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error reading {file_path}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let code: Code = match serde_json::from_str(&source) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error decoding {file_path}: {err}");
            return ExitCode::FAILURE;
        }
    };

    match Runner::new(code).run() {
        Ok(Object::None) => ExitCode::SUCCESS,
        Ok(value) => {
            println!("{value}");
            ExitCode::SUCCESS
        }
        // The traceback (or fatal diagnostic) was already written to stderr.
        Err(RunFailure::Exception(_) | RunFailure::Fatal(_)) => ExitCode::FAILURE,
    }
}
