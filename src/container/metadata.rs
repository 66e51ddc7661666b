//! Script-data (AMF0) metadata parsing.
//!
//! A script tag carries a method name and an associative array of
//! properties. Only `onMetaData` matters to playback; the fields pulled
//! out here drive the frame-rate override and the metadata event.

use super::tag::ContainerError;
use tracing::debug;

const MARKER_NUMBER: u8 = 0;
const MARKER_BOOL: u8 = 1;
const MARKER_STRING: u8 = 2;
const MARKER_OBJECT: u8 = 3;
const MARKER_NULL: u8 = 5;
const MARKER_UNDEFINED: u8 = 6;
const MARKER_ECMA_ARRAY: u8 = 8;
const MARKER_OBJECT_END: u8 = 9;
const MARKER_STRICT_ARRAY: u8 = 10;
const MARKER_DATE: u8 = 11;
const MARKER_LONG_STRING: u8 = 12;

/// Container-declared stream properties.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamMetadata {
    pub frame_rate: Option<f64>,
    pub duration: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl StreamMetadata {
    fn apply(&mut self, key: &str, value: f64) {
        match key {
            "framerate" => self.frame_rate = Some(value),
            "duration" => self.duration = Some(value),
            "width" if value >= 0.0 => self.width = Some(value as u32),
            "height" if value >= 0.0 => self.height = Some(value as u32),
            _ => {}
        }
    }
}

/// Parse a script-data tag payload. Returns `None` for script tags
/// other than `onMetaData`.
pub fn parse_script_data(data: &[u8]) -> Result<Option<StreamMetadata>, ContainerError> {
    let mut cursor = Cursor { data, pos: 0 };
    if cursor.read_u8()? != MARKER_STRING {
        return Err(ContainerError::InvalidContainer("script tag method name"));
    }
    let method = cursor.read_short_string()?;
    if method != "onMetaData" {
        debug!(method = %method, "ignoring script tag");
        return Ok(None);
    }

    let mut metadata = StreamMetadata::default();
    match cursor.read_u8()? {
        // An associative array: declared length is advisory; the real
        // terminator is the empty-name object-end marker.
        MARKER_ECMA_ARRAY => {
            cursor.read_u32()?;
            cursor.read_pairs(&mut metadata)?;
        }
        MARKER_OBJECT => cursor.read_pairs(&mut metadata)?,
        _ => return Err(ContainerError::InvalidContainer("script tag value type")),
    }
    Ok(Some(metadata))
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8], ContainerError> {
        let end = self.pos.checked_add(n).ok_or(ContainerError::UnexpectedEof)?;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or(ContainerError::UnexpectedEof)?;
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, ContainerError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, ContainerError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, ContainerError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_f64(&mut self) -> Result<f64, ContainerError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(f64::from_be_bytes(raw))
    }

    fn read_short_string(&mut self) -> Result<String, ContainerError> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Read name/value pairs up to the object-end marker, collecting
    /// the numeric properties playback cares about.
    fn read_pairs(&mut self, metadata: &mut StreamMetadata) -> Result<(), ContainerError> {
        loop {
            let name = self.read_short_string()?;
            let marker = self.read_u8()?;
            if name.is_empty() && marker == MARKER_OBJECT_END {
                return Ok(());
            }
            match marker {
                MARKER_NUMBER => {
                    let value = self.read_f64()?;
                    metadata.apply(&name, value);
                }
                _ => self.skip_value(marker)?,
            }
        }
    }

    fn skip_value(&mut self, marker: u8) -> Result<(), ContainerError> {
        match marker {
            MARKER_NUMBER => {
                self.read_f64()?;
            }
            MARKER_BOOL => {
                self.read_u8()?;
            }
            MARKER_STRING => {
                self.read_short_string()?;
            }
            MARKER_OBJECT => {
                let mut ignored = StreamMetadata::default();
                self.read_pairs(&mut ignored)?;
            }
            MARKER_NULL | MARKER_UNDEFINED => {}
            MARKER_ECMA_ARRAY => {
                self.read_u32()?;
                let mut ignored = StreamMetadata::default();
                self.read_pairs(&mut ignored)?;
            }
            MARKER_STRICT_ARRAY => {
                let count = self.read_u32()?;
                for _ in 0..count {
                    let inner = self.read_u8()?;
                    self.skip_value(inner)?;
                }
            }
            MARKER_DATE => {
                self.read_f64()?;
                self.read_u16()?;
            }
            MARKER_LONG_STRING => {
                let len = self.read_u32()? as usize;
                self.take(len)?;
            }
            _ => return Err(ContainerError::InvalidContainer("script tag value type")),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_string(s: &str) -> Vec<u8> {
        let mut out = (s.len() as u16).to_be_bytes().to_vec();
        out.extend_from_slice(s.as_bytes());
        out
    }

    fn number_pair(name: &str, value: f64) -> Vec<u8> {
        let mut out = short_string(name);
        out.push(MARKER_NUMBER);
        out.extend_from_slice(&value.to_be_bytes());
        out
    }

    fn on_meta_data(pairs: &[Vec<u8>]) -> Vec<u8> {
        let mut out = vec![MARKER_STRING];
        out.extend_from_slice(&short_string("onMetaData"));
        out.push(MARKER_ECMA_ARRAY);
        out.extend_from_slice(&(pairs.len() as u32).to_be_bytes());
        for pair in pairs {
            out.extend_from_slice(pair);
        }
        out.extend_from_slice(&[0, 0, MARKER_OBJECT_END]);
        out
    }

    #[test]
    fn test_parse_on_meta_data() {
        let payload = on_meta_data(&[
            number_pair("framerate", 24.0),
            number_pair("duration", 12.5),
            number_pair("width", 320.0),
            number_pair("height", 240.0),
        ]);
        let metadata = parse_script_data(&payload).unwrap().unwrap();
        assert_eq!(metadata.frame_rate, Some(24.0));
        assert_eq!(metadata.duration, Some(12.5));
        assert_eq!(metadata.width, Some(320));
        assert_eq!(metadata.height, Some(240));
    }

    #[test]
    fn test_unknown_properties_skipped() {
        let mut creator = short_string("encoder");
        creator.push(MARKER_STRING);
        creator.extend_from_slice(&short_string("strix-test"));
        let mut stereo = short_string("stereo");
        stereo.push(MARKER_BOOL);
        stereo.push(1);
        let payload = on_meta_data(&[creator, stereo, number_pair("framerate", 30.0)]);
        let metadata = parse_script_data(&payload).unwrap().unwrap();
        assert_eq!(metadata.frame_rate, Some(30.0));
        assert_eq!(metadata.width, None);
    }

    #[test]
    fn test_other_script_tags_ignored() {
        let mut payload = vec![MARKER_STRING];
        payload.extend_from_slice(&short_string("onCuePoint"));
        assert_eq!(parse_script_data(&payload).unwrap(), None);
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let payload = on_meta_data(&[number_pair("framerate", 24.0)]);
        assert!(matches!(
            parse_script_data(&payload[..payload.len() - 4]),
            Err(ContainerError::UnexpectedEof)
        ));
    }
}
