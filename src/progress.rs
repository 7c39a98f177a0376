//! Console progress for convergence waits.

use crate::ui;
use cloudkit::ResourceHandle;
use cloudkit::wait::WaitObserver;
use indicatif::{ProgressBar, ProgressStyle};
use std::cell::RefCell;
use std::time::Duration;

/// Create a spinner with the given message.
pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Narrates waits on the terminal.
///
/// A spinner is shown while a batch converges and cleared once it is done.
/// Readiness of each member is printed above the spinner.
#[derive(Default)]
pub struct ConsoleObserver {
    bar: RefCell<Option<ProgressBar>>,
}

impl ConsoleObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Some(pb) = self.bar.borrow().as_ref() {
            f(pb);
        }
    }
}

impl WaitObserver for ConsoleObserver {
    fn on_round(&self, round: u32, pending: usize) {
        let msg = format!("Checking status (round {round}, {pending} pending)");
        let mut bar = self.bar.borrow_mut();
        match bar.as_ref() {
            Some(pb) => pb.set_message(msg),
            None => *bar = Some(spinner(&msg)),
        }
    }

    fn on_building(&self, handle: &ResourceHandle) {
        log::info!("{} {} is still building ({})", handle.kind, handle.name, handle.status);
    }

    fn on_ready(&self, handle: &ResourceHandle) {
        let msg = format!("{} is ready", handle.name);
        self.with_bar(|pb| pb.suspend(|| ui::success(&msg)));
    }

    fn on_complete(&self, rounds: u32) {
        if let Some(pb) = self.bar.borrow_mut().take() {
            pb.finish_and_clear();
        }
        log::debug!("Batch converged after {} rounds", rounds);
    }
}

impl Drop for ConsoleObserver {
    fn drop(&mut self) {
        if let Some(pb) = self.bar.get_mut().take() {
            pb.abandon();
        }
    }
}
