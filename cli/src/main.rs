fn main() {
    if let Err(err) = rdfpack_cli::run() {
        eprintln!("Error: {:#}", err);
        std::process::exit(rdfpack_cli::exit_code(&err));
    }
}
