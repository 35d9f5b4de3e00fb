fn main() {
    if let Err(err) = cisdash::cli::run() {
        cisdash::ui::eprintln_error(&err);
        std::process::exit(cisdash::exit::exit_code(&err));
    }
}
