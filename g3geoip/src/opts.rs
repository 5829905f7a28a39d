/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::anyhow;
use clap::builder::{BoolishValueParser, FalseyValueParser};
use clap::{Arg, ArgAction, ArgMatches, Command, ValueHint, value_parser};

const ARGS_VERSION: &str = "version";
const ARGS_VERBOSE: &str = "verbose";
const ARGS_CONFIG_FILE: &str = "config-file";
const ARGS_DB: &str = "db";
const ARGS_CACHE_FILE: &str = "cache-file";
const ARGS_LISTEN: &str = "listen";
const ARGS_HOST: &str = "host";
const ARGS_PORT: &str = "port";
const ARGS_READ_TIMEOUT: &str = "read-timeout";
const ARGS_WRITE_TIMEOUT: &str = "write-timeout";
const ARGS_UPDATE_INTERVAL: &str = "update-interval";
const ARGS_RETRY_INTERVAL: &str = "retry-interval";
const ARGS_USE_X_FORWARDED_FOR: &str = "use-x-forwarded-for";
const ARGS_SILENT: &str = "silent";
const ARGS_LOG_TO_STDOUT: &str = "log-to-stdout";
const ARGS_LOG_TIMESTAMP: &str = "log-timestamp";

pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug)]
pub struct ProcArgs {
    pub verbose_level: u8,
    pub log_to_stdout: bool,
    pub log_timestamp: bool,
    pub config_file: Option<PathBuf>,
    pub db: Option<String>,
    pub cache_file: Option<PathBuf>,
    pub listen: Option<SocketAddr>,
    pub host: Option<IpAddr>,
    pub port: Option<u16>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub update_interval: Option<Duration>,
    pub retry_interval: Option<Duration>,
    pub use_x_forwarded_for: bool,
    pub silent: bool,
}

impl Default for ProcArgs {
    fn default() -> Self {
        ProcArgs {
            verbose_level: 0,
            log_to_stdout: false,
            log_timestamp: true,
            config_file: None,
            db: None,
            cache_file: None,
            listen: None,
            host: None,
            port: None,
            read_timeout: None,
            write_timeout: None,
            update_interval: None,
            retry_interval: None,
            use_x_forwarded_for: false,
            silent: false,
        }
    }
}

fn build_cli_args() -> Command {
    Command::new(PKG_NAME)
        .disable_version_flag(true)
        .arg(
            Arg::new(ARGS_VERBOSE)
                .help("Show verbose output")
                .num_args(0)
                .action(ArgAction::Count)
                .short('v')
                .long("verbose"),
        )
        .arg(
            Arg::new(ARGS_VERSION)
                .help("Show version")
                .action(ArgAction::SetTrue)
                .short('V')
                .long("version"),
        )
        .arg(
            Arg::new(ARGS_CONFIG_FILE)
                .help("Config file path")
                .num_args(1)
                .value_name("CONFIG FILE")
                .value_hint(ValueHint::FilePath)
                .value_parser(value_parser!(PathBuf))
                .short('c')
                .long("config-file"),
        )
        .arg(
            Arg::new(ARGS_DB)
                .help("IP database file or URL")
                .num_args(1)
                .value_name("PATH OR URL")
                .env("DB")
                .long("db"),
        )
        .arg(
            Arg::new(ARGS_CACHE_FILE)
                .help("Local cache file for a remote database")
                .num_args(1)
                .value_name("CACHE FILE")
                .value_hint(ValueHint::FilePath)
                .value_parser(value_parser!(PathBuf))
                .long("cache-file"),
        )
        .arg(
            Arg::new(ARGS_LISTEN)
                .help("Address of the http server")
                .num_args(1)
                .value_name("ADDR")
                .value_parser(value_parser!(SocketAddr))
                .long("listen"),
        )
        .arg(
            Arg::new(ARGS_HOST)
                .help("Address of the http server, ignored if listen is set")
                .num_args(1)
                .value_name("IP")
                .value_parser(value_parser!(IpAddr))
                .env("HOST")
                .long("host"),
        )
        .arg(
            Arg::new(ARGS_PORT)
                .help("Port of the http server, ignored if listen is set")
                .num_args(1)
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .env("PORT")
                .long("port"),
        )
        .arg(
            Arg::new(ARGS_READ_TIMEOUT)
                .help("Timeout for reading a http request")
                .num_args(1)
                .value_name("DURATION")
                .value_parser(parse_duration)
                .env("READ_TIMEOUT")
                .long("read-timeout"),
        )
        .arg(
            Arg::new(ARGS_WRITE_TIMEOUT)
                .help("Timeout for writing a http response")
                .num_args(1)
                .value_name("DURATION")
                .value_parser(parse_duration)
                .env("WRITE_TIMEOUT")
                .long("write-timeout"),
        )
        .arg(
            Arg::new(ARGS_UPDATE_INTERVAL)
                .help("Interval between two checks of a remote database")
                .num_args(1)
                .value_name("DURATION")
                .value_parser(parse_duration)
                .long("update-interval"),
        )
        .arg(
            Arg::new(ARGS_RETRY_INTERVAL)
                .help("Interval before retrying a failed update")
                .num_args(1)
                .value_name("DURATION")
                .value_parser(parse_duration)
                .long("retry-interval"),
        )
        .arg(
            Arg::new(ARGS_USE_X_FORWARDED_FOR)
                .help("Use the X-Forwarded-For header when available")
                .action(ArgAction::SetTrue)
                .value_parser(FalseyValueParser::new())
                .env("USE_X_FORWARDED_FOR")
                .long("use-x-forwarded-for"),
        )
        .arg(
            Arg::new(ARGS_SILENT)
                .help("Disable http access log")
                .action(ArgAction::SetTrue)
                .value_parser(FalseyValueParser::new())
                .env("SILENT")
                .long("silent"),
        )
        .arg(
            Arg::new(ARGS_LOG_TO_STDOUT)
                .help("Log to stdout instead of stderr")
                .action(ArgAction::SetTrue)
                .value_parser(FalseyValueParser::new())
                .env("LOGTOSTDOUT")
                .long("log-to-stdout"),
        )
        .arg(
            Arg::new(ARGS_LOG_TIMESTAMP)
                .help("Prefix log lines with timestamp")
                .num_args(1)
                .value_name("BOOL")
                .value_parser(BoolishValueParser::new())
                .default_value("true")
                .env("LOGTIMESTAMP")
                .long("log-timestamp"),
        )
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    match humanize_rs::duration::parse(s) {
        Ok(d) => Ok(d),
        Err(_) => u64::from_str(s)
            .map(Duration::from_secs)
            .map_err(|_| format!("invalid duration {s}")),
    }
}

fn parse_matches(args: &ArgMatches) -> anyhow::Result<ProcArgs> {
    let mut proc_args = ProcArgs::default();

    if let Some(verbose_level) = args.get_one::<u8>(ARGS_VERBOSE) {
        proc_args.verbose_level = *verbose_level;
    }
    proc_args.log_to_stdout = args.get_flag(ARGS_LOG_TO_STDOUT);
    if let Some(log_timestamp) = args.get_one::<bool>(ARGS_LOG_TIMESTAMP) {
        proc_args.log_timestamp = *log_timestamp;
    }
    proc_args.use_x_forwarded_for = args.get_flag(ARGS_USE_X_FORWARDED_FOR);
    proc_args.silent = args.get_flag(ARGS_SILENT);

    if let Some(config_file) = args.get_one::<PathBuf>(ARGS_CONFIG_FILE) {
        if !config_file.is_file() {
            return Err(anyhow!(
                "config file {} is not a regular file",
                config_file.display()
            ));
        }
        proc_args.config_file = Some(config_file.clone());
    }
    if let Some(db) = args.get_one::<String>(ARGS_DB) {
        if db.is_empty() {
            return Err(anyhow!("empty db value"));
        }
        proc_args.db = Some(db.clone());
    }
    proc_args.cache_file = args.get_one::<PathBuf>(ARGS_CACHE_FILE).cloned();
    proc_args.listen = args.get_one::<SocketAddr>(ARGS_LISTEN).copied();
    proc_args.host = args.get_one::<IpAddr>(ARGS_HOST).copied();
    proc_args.port = args.get_one::<u16>(ARGS_PORT).copied();
    proc_args.read_timeout = args.get_one::<Duration>(ARGS_READ_TIMEOUT).copied();
    proc_args.write_timeout = args.get_one::<Duration>(ARGS_WRITE_TIMEOUT).copied();
    proc_args.update_interval = args.get_one::<Duration>(ARGS_UPDATE_INTERVAL).copied();
    proc_args.retry_interval = args.get_one::<Duration>(ARGS_RETRY_INTERVAL).copied();

    Ok(proc_args)
}

pub fn parse_clap() -> anyhow::Result<Option<ProcArgs>> {
    let args = build_cli_args().get_matches();
    if args.get_flag(ARGS_VERSION) {
        println!("{PKG_NAME} {PKG_VERSION}");
        return Ok(None);
    }
    parse_matches(&args).map(Some)
}
