use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct ResponseRow<'a> {
    owner: u64,
    key: &'a str,
    status: u16,
    body: String,
}

/// Writes one `owner,key,status,body` row per processed request; the body
/// column holds compact JSON.
pub struct ResponseWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ResponseWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write(&mut self, owner: u64, key: &str, status: u16, body: &serde_json::Value) -> Result<()> {
        self.writer.serialize(ResponseRow {
            owner,
            key,
            status,
            body: body.to_string(),
        })?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rows_quote_json_bodies() {
        let mut buffer = Vec::new();
        {
            let mut writer = ResponseWriter::new(&mut buffer);
            writer.write(1, "k1", 201, &json!({"id": 1, "name": "Acme"})).unwrap();
            writer.flush().unwrap();
        }

        let output = String::from_utf8(buffer).unwrap();
        let mut lines = output.lines();
        assert_eq!(lines.next(), Some("owner,key,status,body"));
        assert_eq!(
            lines.next(),
            Some(r#"1,k1,201,"{""id"":1,""name"":""Acme""}""#)
        );
    }
}
