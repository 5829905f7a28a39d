/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use slog::{Drain, slog_o};
use slog_scope::GlobalLoggerGuard;

use crate::opts::ProcArgs;

mod stdio;

const PROCESS_LOG_THREAD_NAME: &str = "log-process";
const PROCESS_LOG_CHANNEL_SIZE: usize = 1024;

pub const ACCESS_LOG_TYPE: &str = "access";

pub fn setup(args: &ProcArgs) -> Result<GlobalLoggerGuard, log::SetLoggerError> {
    let drain = stdio::new_async_drain(
        PROCESS_LOG_THREAD_NAME,
        PROCESS_LOG_CHANNEL_SIZE,
        args.log_to_stdout,
        args.log_timestamp,
        args.verbose_level > 1,
    );
    let logger = slog::Logger::root(drain.fuse(), slog_o!());

    let scope_guard = slog_scope::set_global_logger(logger);

    let log_level = match args.verbose_level {
        0 => log::Level::Warn,
        1 => log::Level::Info,
        2 => log::Level::Debug,
        _ => log::Level::Trace,
    };

    slog_stdlog::init_with_level(log_level)?;
    Ok(scope_guard)
}

/// Logger for http access lines, which bypass the verbose level.
pub fn access_logger() -> slog::Logger {
    slog_scope::logger().new(slog_o!("log_type" => ACCESS_LOG_TYPE))
}
