//! CLI probe for `modelbind_core`.
//!
//! # Responsibility
//! - Without arguments, print ping/version to verify core linkage.
//! - With a database path, list the models registered in that store.

use modelbind_core::{core_version, ping, ModelRegistry};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let Some(db_path) = args.next() else {
        println!("modelbind_core ping={}", ping());
        println!("modelbind_core version={}", core_version());
        return ExitCode::SUCCESS;
    };

    let registry = match ModelRegistry::open(&db_path) {
        Ok(registry) => registry,
        Err(err) => {
            eprintln!("failed to open `{db_path}`: {err}");
            return ExitCode::FAILURE;
        }
    };

    match registry.registered_models() {
        Ok(models) => {
            for model in models {
                println!(
                    "{} fingerprint={} fields={}",
                    model.name,
                    model.fingerprint,
                    model.schema.fields().len()
                );
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("failed to list models in `{db_path}`: {err}");
            ExitCode::FAILURE
        }
    }
}
