//! Logging setup for the CLI and the epoch logger used by the training driver

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Level filter for the `--verbose` switch
pub fn max_level(verbose: bool) -> Level {
    if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    }
}

/// Install the global compact subscriber; verbose output adds targets and thread ids
pub fn init_logging(verbose: bool) -> Result<(), String> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(max_level(verbose))
        .with_target(verbose)
        .with_thread_ids(verbose)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to initialize logging: {}", e))
}

/// Per-epoch timing and summary logger
pub struct EpochLogger {
    epoch: usize,
    total_epochs: usize,
    epoch_start: std::time::Instant,
    training_start: std::time::Instant,
}

impl EpochLogger {
    pub fn new(total_epochs: usize) -> Self {
        Self {
            epoch: 0,
            total_epochs,
            epoch_start: std::time::Instant::now(),
            training_start: std::time::Instant::now(),
        }
    }

    /// Log start of an epoch
    pub fn start_epoch(&mut self, epoch: usize, learning_rate: f64) {
        self.epoch = epoch;
        self.epoch_start = std::time::Instant::now();

        tracing::info!(
            "Epoch {}/{} started (lr = {:.2e})",
            epoch + 1,
            self.total_epochs,
            learning_rate
        );
    }

    /// Log end of an epoch with its aggregated metrics
    pub fn end_epoch(&self, train_loss: f64, train_acc: f64, val_loss: Option<f64>, val_acc: Option<f64>) {
        let epoch_time = self.epoch_start.elapsed();
        let total_time = self.training_start.elapsed();

        let epochs_remaining = self.total_epochs.saturating_sub(self.epoch + 1);
        let avg_epoch_time = total_time.as_secs_f64() / (self.epoch + 1) as f64;
        let eta_secs = epochs_remaining as f64 * avg_epoch_time;

        match (val_loss, val_acc) {
            (Some(val_loss), Some(val_acc)) => tracing::info!(
                "Epoch {}/{} done in {:.1}s | train loss {:.4} acc {:.2}% | val loss {:.4} acc {:.2}% | ETA {:.0}s",
                self.epoch + 1,
                self.total_epochs,
                epoch_time.as_secs_f64(),
                train_loss,
                train_acc * 100.0,
                val_loss,
                val_acc * 100.0,
                eta_secs
            ),
            _ => tracing::info!(
                "Epoch {}/{} done in {:.1}s | train loss {:.4} acc {:.2}% | no validation | ETA {:.0}s",
                self.epoch + 1,
                self.total_epochs,
                epoch_time.as_secs_f64(),
                train_loss,
                train_acc * 100.0,
                eta_secs
            ),
        }
    }

    /// Log training completion
    pub fn log_complete(&self) {
        tracing::info!(
            "Training complete: {} epochs in {}",
            self.total_epochs,
            super::format_duration(self.training_start.elapsed().as_secs_f64())
        );
    }
}
