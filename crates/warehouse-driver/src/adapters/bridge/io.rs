use std::io::{BufRead, BufReader, BufWriter, Stdin, Stdout, Write};

use crate::error::{AppResult, ErrorKind};

/// Newline-delimited JSON over a reader/writer pair.
pub struct NdjsonIo<R, W: Write> {
    reader: R,
    writer: BufWriter<W>,
}

impl NdjsonIo<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(std::io::stdin()), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> NdjsonIo<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer: BufWriter::new(writer),
        }
    }

    /// `None` at end of input; blank lines come back as empty strings.
    pub fn read_line(&mut self) -> AppResult<Option<String>> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line)?;
        if n == 0 {
            return Ok(None);
        }
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        if line.trim().is_empty() {
            return Ok(Some(String::new()));
        }
        Ok(Some(line.to_string()))
    }

    pub fn write_json_line<T: serde::Serialize>(&mut self, v: &T) -> AppResult<()> {
        serde_json::to_writer(&mut self.writer, v)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Reply to a line that could not be parsed as a request.
    pub fn protocol_error(&mut self, id: String, v: u32, msg: String) -> AppResult<()> {
        #[derive(serde::Serialize)]
        struct ErrResp<'a> {
            v: u32,
            id: &'a str,
            status: &'static str,
            error: String,
            code: &'static str,
        }
        let r = ErrResp {
            v,
            id: &id,
            status: "error",
            error: msg,
            code: ErrorKind::InvalidRequest.code(),
        };
        self.write_json_line(&r)
    }

    #[cfg(test)]
    pub fn into_writer(self) -> AppResult<W> {
        self.writer
            .into_inner()
            .map_err(|e| crate::error::AppError::Io(e.into_error()))
    }
}
