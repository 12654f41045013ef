use crate::blob::Headers;
use crate::error::Result;
use std::io::{Read, Write};

/// Serializes blob headers to and from their on-disk form.
pub trait HeaderCodec: Send + Sync {
    fn write(&self, headers: &Headers, output: &mut dyn Write) -> Result<()>;

    fn read(&self, input: &mut dyn Read) -> Result<Headers>;

    fn to_bytes(&self, headers: &Headers) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.write(headers, &mut buffer)?;
        Ok(buffer)
    }
}

/// Headers as a flat UTF-8 JSON object of string values.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonHeaderCodec;

impl HeaderCodec for JsonHeaderCodec {
    fn write(&self, headers: &Headers, output: &mut dyn Write) -> Result<()> {
        serde_json::to_writer(&mut *output, headers)?;
        output.flush()?;
        Ok(())
    }

    fn read(&self, input: &mut dyn Read) -> Result<Headers> {
        Ok(serde_json::from_reader(input)?)
    }
}
