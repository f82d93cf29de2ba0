//! recovery: maintenance-mode entry point.

mod cli_app;

use recovery_control::session::terminal::park_forever;

fn main() {
    let argv: Vec<String> = std::env::args().collect();
    if let Err(e) = cli_app::run(&argv) {
        eprintln!("recovery: {e}");
        std::process::exit(e.exit_code());
    }
    park_forever();
}
