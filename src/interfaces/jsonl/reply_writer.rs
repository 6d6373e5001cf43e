use crate::interfaces::rpc::status::RpcStatus;
use serde::Serialize;
use std::io::{self, Write};

/// The transport-level answer to one input line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcStatus>,
}

/// Writes replies as JSON lines.
pub struct ReplyWriter<W: Write> {
    writer: W,
}

impl<W: Write> ReplyWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_reply(&mut self, reply: &Reply) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, reply)?;
        self.writer.write_all(b"\n")
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
