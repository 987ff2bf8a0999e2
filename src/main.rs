fn main() {
    if let Err(err) = ucof::cli::run() {
        ucof::ui::eprintln_error(&err);
        std::process::exit(ucof::exit::exit_code(&err));
    }
}
