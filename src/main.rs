use std::sync::atomic::{AtomicBool, Ordering};

use stepflow::core;
use stepflow::signals;
use stepflow::status::ExitStatus;

/// Entry point - catches Ctrl+C and calls core::run()
///
/// Returns ExitStatus directly, which implements std::process::Termination.
fn main() -> ExitStatus {
    // The flag lets the interpreter stop between steps and still report
    ctrlc::set_handler(move || {
        signals::set_interrupted();
        eprintln!("\nInterrupted");

        // On second Ctrl+C, force exit
        static SECOND_CTRL_C: AtomicBool = AtomicBool::new(false);
        if SECOND_CTRL_C.swap(true, Ordering::SeqCst) {
            std::process::exit(ExitStatus::Interrupted as i32);
        }
    })
    .ok();

    let status = core::run(std::env::args().collect());

    if signals::was_interrupted() {
        return ExitStatus::Interrupted;
    }

    status
}
