pub mod actuators;
pub mod batch;
pub mod bus;
pub mod commands;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod keyboard;
pub mod protocol;
pub mod runtime;
pub mod sequencer;
pub mod settle;
pub mod sim;
pub mod transport;

use time::macros::format_description;
use time::UtcOffset;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::prelude::*;

const LOG_DIRECTORY: &str = "logs";
const LOG_FILE_PREFIX: &str = "servo-sync.log";

fn log_timer() -> OffsetTime<&'static [time::format_description::BorrowedFormatItem<'static>]> {
    OffsetTime::new(
        UtcOffset::UTC,
        format_description!("[hour]:[minute]:[second].[subsecond digits:3]"),
    )
}

pub fn initialize_logging() {
    tracing_subscriber::fmt()
        .with_timer(log_timer())
        .with_max_level(LevelFilter::INFO)
        .init();
}

/// Logs to the console and to a daily file under `logs/`. Keep the returned
/// guard alive until exit or buffered lines are lost.
pub fn initialize_file_and_console_logging() -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(LOG_DIRECTORY, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(log_timer())
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(LevelFilter::DEBUG),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(log_timer())
                .with_filter(LevelFilter::INFO),
        )
        .init();

    guard
}
