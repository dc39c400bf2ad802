//! XML serializer — `<smart_meter_export>` root with one `<reading>` per row.

use crate::types::Reading;
use crate::Result;

/// XML output with per-field child elements and text escaping
pub struct XmlSerializer;

const ROOT_ELEMENT: &str = "smart_meter_export";
const ROW_ELEMENT: &str = "reading";

/// Escape text content for XML element bodies
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

impl XmlSerializer {
    /// Create an XML serializer
    pub fn new() -> Self {
        Self
    }
}

impl Default for XmlSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl super::RowSerializer for XmlSerializer {
    fn begin(&mut self) -> Result<Vec<u8>> {
        Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<{ROOT_ELEMENT}>\n").into_bytes())
    }

    fn write_row(&mut self, reading: &Reading) -> Result<Vec<u8>> {
        let mut chunk = format!("  <{ROW_ELEMENT}>\n");
        for (column, value) in Reading::COLUMNS.iter().zip(reading.field_strings()) {
            chunk.push_str(&format!(
                "    <{column}>{}</{column}>\n",
                escape(&value)
            ));
        }
        chunk.push_str(&format!("  </{ROW_ELEMENT}>\n"));
        Ok(chunk.into_bytes())
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        Ok(format!("</{ROOT_ELEMENT}>\n").into_bytes())
    }
}
