/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::fmt::{self, Write as _};
use std::io::{self, Write};

use chrono::Local;
use flume::{Receiver, Sender};
use slog::{Drain, KV, Level, OwnedKVList, Record, Serializer};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

pub(super) struct StdioValue {
    level: Level,
    message: String,
    kv_pairs: Vec<(String, String)>,
    location: Option<String>,
}

/// Formats records in the caller thread and hands them to the io thread.
///
/// Records are dropped if the channel is full.
pub(super) struct AsyncStdioDrain {
    sender: Sender<StdioValue>,
    append_code_position: bool,
}

pub(super) fn new_async_drain(
    thread_name: &str,
    channel_capacity: usize,
    use_stdout: bool,
    with_timestamp: bool,
    append_code_position: bool,
) -> AsyncStdioDrain {
    let (sender, receiver) = flume::bounded::<StdioValue>(channel_capacity);

    let io_thread = AsyncIoThread {
        receiver,
        with_timestamp,
    };
    let _detached_thread = std::thread::Builder::new()
        .name(thread_name.to_string())
        .spawn(move || {
            if use_stdout {
                io_thread.run(io::stdout())
            } else {
                io_thread.run(io::stderr())
            }
        });

    AsyncStdioDrain {
        sender,
        append_code_position,
    }
}

impl Drain for AsyncStdioDrain {
    type Ok = ();
    type Err = slog::Error;

    fn log(&self, record: &Record, logger_values: &OwnedKVList) -> Result<(), slog::Error> {
        let mut kv_pairs = Vec::new();
        let mut kv_formatter = FormatterKv(&mut kv_pairs);
        logger_values.serialize(record, &mut kv_formatter)?;
        record.kv().serialize(record, &mut kv_formatter)?;

        let location = if self.append_code_position {
            let location = match record.file().rsplit_once('/').map(|x| x.1) {
                Some(filename) => format!("{}({filename}:{})", record.module(), record.line()),
                None => record.module().to_string(),
            };
            Some(location)
        } else {
            None
        };

        let v = StdioValue {
            level: record.level(),
            message: record.msg().to_string(),
            kv_pairs,
            location,
        };
        let _ = self.sender.try_send(v);
        Ok(())
    }
}

struct FormatterKv<'a>(&'a mut Vec<(String, String)>);

impl Serializer for FormatterKv<'_> {
    fn emit_arguments(&mut self, key: slog::Key, value: &fmt::Arguments) -> slog::Result {
        let mut v = String::new();
        match value.as_str() {
            Some(s) => v.push_str(s),
            None => v.write_fmt(*value)?,
        }
        self.0.push((key.to_string(), v));
        Ok(())
    }
}

struct AsyncIoThread {
    receiver: Receiver<StdioValue>,
    with_timestamp: bool,
}

impl AsyncIoThread {
    fn run<IO: Write>(&self, mut io: IO) {
        let mut buf: Vec<u8> = Vec::with_capacity(1024);
        while let Ok(v) = self.receiver.recv() {
            buf.clear();
            let _ = write_plain(&mut buf, v, self.with_timestamp);

            while let Ok(v) = self.receiver.try_recv() {
                let _ = write_plain(&mut buf, v, self.with_timestamp);
            }

            let _ = io.write_all(&buf);
            let _ = io.flush();
        }
    }
}

fn write_plain<IO: Write>(io: &mut IO, v: StdioValue, with_timestamp: bool) -> io::Result<()> {
    if with_timestamp {
        write!(io, "{} ", Local::now().format(TIME_FORMAT))?;
    }
    write!(io, "{}", v.level.as_short_str())?;
    for (k, v) in &v.kv_pairs {
        write!(io, " {k}: {v},")?;
    }
    if v.message.is_empty() {
        write!(io, " ()")?;
    } else {
        write!(io, " {}", v.message)?;
    }
    if let Some(location) = v.location {
        write!(io, " <{location}>")?;
    }
    writeln!(io)
}
