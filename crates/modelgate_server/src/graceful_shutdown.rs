/* Copyright 2023- The Binedge, Lda team. All rights reserved.
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *     http://www.apache.org/licenses/LICENSE-2.0
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Mechanisms for shutting the proxy down without cutting streams short.

use std::time::Duration;

use tokio::signal;
use tracing::{error, warn};

/// How long in-flight requests get to finish after a shutdown signal
/// before the process terminates unconditionally.
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Resolves when the process receives `CTRL+C` or, on Unix, `SIGTERM`.
///
/// Once the signal arrives a watchdog is armed: if draining takes longer
/// than [`SHUTDOWN_GRACE_PERIOD`], the process exits abnormally rather
/// than hang on a stream that never ends.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            error!("failed to install the CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install the SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    warn!(
        "shutdown signal received; draining connections for at most {}s",
        SHUTDOWN_GRACE_PERIOD.as_secs()
    );

    tokio::spawn(async {
        tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
        error!("shutdown grace period has ended; exiting abnormally");
        std::process::exit(1);
    });
}
