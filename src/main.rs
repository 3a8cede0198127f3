use assetline::AssetlineError;
use std::process;

fn main() {
    if let Err(e) = assetline::cli::run() {
        match &e {
            AssetlineError::Usage(err) => {
                let _ = err.print();
            }
            _ => eprintln!("Error: {}", e),
        }
        process::exit(e.exit_code());
    }
}
