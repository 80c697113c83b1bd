//! Global shutdown of the daemon.
//!
//! Signal handlers call [`request_exit`]; long running tasks either select on [`exit_requested`]
//! or hold a child of [`exit_token`] that gets cancelled along with it.

use once_cell::sync::Lazy;
use tokio_util::sync::CancellationToken;

static APPLICATION_EXIT: Lazy<CancellationToken> = Lazy::new(CancellationToken::new);

/// Ask every task of the daemon to finish. Calling this more than once has no further effect.
pub fn request_exit() {
    if !APPLICATION_EXIT.is_cancelled() {
        log::info!("Shutting down notificationd...");
    }
    APPLICATION_EXIT.cancel();
}

/// A token cancelled on application exit.
pub fn exit_token() -> CancellationToken {
    APPLICATION_EXIT.child_token()
}

/// Resolves once exit was requested, immediately if that already happened.
pub async fn exit_requested() {
    APPLICATION_EXIT.cancelled().await
}

/// Select in a loop, breaking once application exit is requested (see `crate::application_lifecycle`).
#[macro_export]
macro_rules! loop_select_exiting {
    ($($content:tt)*) => {
        loop {
            tokio::select! {
                _ = $crate::application_lifecycle::exit_requested() => {
                    break;
                }
                $($content)*
            }
        }
    };
}
