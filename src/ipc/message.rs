use std::io::{self, Read, Write};

const TYPE_DEVICE_CONNECTION: u8 = 0;
const TYPE_DEVICE_INFO: u8 = 1;
const TYPE_OSC_PORT_CHANGE: u8 = 2;
const TYPE_DEVICE_READY: u8 = 3;
const TYPE_DEVICE_DISCONNECTION: u8 = 4;

/// A single framed IPC message exchanged between a child process and the
/// supervisor. See spec §3 for the invariant on the per-device sequence of
/// these: `(INFO | PORT_CHANGE)*` precede `READY`, and `DISCONNECTION`, if
/// sent, comes last and is followed by pipe EOF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpcMessage {
    /// Sent by the detector for every device it finds, present or hotplugged.
    DeviceConnection { devnode: String },
    /// Sent by a device server once it has opened the device.
    DeviceInfo { serial: String, friendly: String },
    /// Sent by a device server with the UDP port its OSC server bound.
    OscPortChange { port: u16 },
    /// Sent once `DeviceInfo` and `OscPortChange` have both been sent.
    DeviceReady,
    /// Sent by a device server right before it exits.
    DeviceDisconnection,
}

impl IpcMessage {
    /// Encodes this message into a fresh buffer and writes it in a single
    /// `write_all` call, so the frame is delivered to a pipe in one write
    /// syscall (atomic as long as it stays under `PIPE_BUF`, which every
    /// variant here does). Child processes reporting to the supervisor use
    /// this instead of `encode` directly, so a partially-written frame can
    /// never be observed mid-read.
    ///
    /// # Errors
    ///
    /// Returns an error if any string field exceeds `u16::MAX` bytes or if
    /// the underlying writer fails.
    pub fn send(&self, writer: &mut impl Write) -> Result<(), IpcEncodeError> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        writer.write_all(&buf)?;
        Ok(())
    }

    /// Serializes this message as a single frame.
    ///
    /// # Errors
    ///
    /// Returns an error if any string field exceeds `u16::MAX` bytes or if
    /// the underlying writer fails.
    pub fn encode(&self, writer: &mut impl Write) -> Result<(), IpcEncodeError> {
        match self {
            Self::DeviceConnection { devnode } => {
                writer.write_all(&[TYPE_DEVICE_CONNECTION])?;
                write_string(writer, devnode)?;
            }
            Self::DeviceInfo { serial, friendly } => {
                writer.write_all(&[TYPE_DEVICE_INFO])?;
                write_string(writer, serial)?;
                write_string(writer, friendly)?;
            }
            Self::OscPortChange { port } => {
                writer.write_all(&[TYPE_OSC_PORT_CHANGE])?;
                writer.write_all(&port.to_be_bytes())?;
            }
            Self::DeviceReady => writer.write_all(&[TYPE_DEVICE_READY])?,
            Self::DeviceDisconnection => writer.write_all(&[TYPE_DEVICE_DISCONNECTION])?,
        }
        Ok(())
    }

    /// Reads and decodes a single frame.
    ///
    /// A short read anywhere in the frame (including the initial type byte,
    /// which signals a clean EOF when the reader returns zero bytes there)
    /// is reported as [`IpcDecodeError::ShortRead`] per spec §6/§7: framing
    /// errors are skip-and-continue for the caller, never fatal on their own.
    pub fn decode(reader: &mut impl Read) -> Result<Self, IpcDecodeError> {
        let mut type_byte = [0u8; 1];
        read_exact_or_eof(reader, &mut type_byte)?;

        Ok(match type_byte[0] {
            TYPE_DEVICE_CONNECTION => Self::DeviceConnection {
                devnode: read_string(reader)?,
            },
            TYPE_DEVICE_INFO => Self::DeviceInfo {
                serial: read_string(reader)?,
                friendly: read_string(reader)?,
            },
            TYPE_OSC_PORT_CHANGE => {
                let mut buf = [0u8; 2];
                reader.read_exact(&mut buf)?;
                Self::OscPortChange {
                    port: u16::from_be_bytes(buf),
                }
            }
            TYPE_DEVICE_READY => Self::DeviceReady,
            TYPE_DEVICE_DISCONNECTION => Self::DeviceDisconnection,
            other => return Err(IpcDecodeError::UnknownType(other)),
        })
    }
}

fn write_string(writer: &mut impl Write, s: &str) -> Result<(), IpcEncodeError> {
    let bytes = s.as_bytes();
    let len: u16 = bytes
        .len()
        .try_into()
        .map_err(|_| IpcEncodeError::StringTooLong(bytes.len()))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(bytes)?;
    Ok(())
}

fn read_string(reader: &mut impl Read) -> Result<String, IpcDecodeError> {
    let mut len_buf = [0u8; 2];
    reader.read_exact(&mut len_buf)?;
    let len = u16::from_be_bytes(len_buf) as usize;

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| IpcDecodeError::InvalidUtf8(e.utf8_error()))
}

/// Like `read_exact`, but a zero-byte read (clean EOF) is reported as
/// [`IpcDecodeError::Eof`] instead of the generic `UnexpectedEof` io error,
/// so callers can tell "nothing more to read" apart from "frame cut off
/// mid-way".
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> Result<(), IpcDecodeError> {
    let n = reader.read(buf)?;
    if n == 0 {
        return Err(IpcDecodeError::Eof);
    }
    if n < buf.len() {
        reader.read_exact(&mut buf[n..])?;
    }
    Ok(())
}

#[derive(thiserror::Error, Debug)]
pub enum IpcEncodeError {
    #[error("string field is {0} bytes long, exceeding the u16 length prefix")]
    StringTooLong(usize),
    #[error("I/O error while writing an IPC frame")]
    Io(#[from] io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum IpcDecodeError {
    #[error("end of stream before a new frame started")]
    Eof,
    #[error("unknown IPC message type {0}")]
    UnknownType(u8),
    #[error("string field was not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("I/O error while reading an IPC frame")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: IpcMessage) {
        let mut buf = Vec::new();
        msg.encode(&mut buf).expect("encode should succeed");
        let decoded = IpcMessage::decode(&mut &buf[..]).expect("decode should succeed");
        assert_eq!(msg, decoded);
    }

    #[test]
    fn roundtrips_device_connection() {
        roundtrip(IpcMessage::DeviceConnection {
            devnode: "/dev/ttyUSB0".to_string(),
        });
    }

    #[test]
    fn roundtrips_device_connection_with_empty_devnode() {
        roundtrip(IpcMessage::DeviceConnection {
            devnode: String::new(),
        });
    }

    #[test]
    fn roundtrips_device_info() {
        roundtrip(IpcMessage::DeviceInfo {
            serial: "m1000001".to_string(),
            friendly: "monome 128".to_string(),
        });
    }

    #[test]
    fn roundtrips_device_info_with_maximum_length_strings() {
        let long = "x".repeat(u16::MAX as usize);
        roundtrip(IpcMessage::DeviceInfo {
            serial: long.clone(),
            friendly: long,
        });
    }

    #[test]
    fn roundtrips_osc_port_change() {
        roundtrip(IpcMessage::OscPortChange { port: 17500 });
    }

    #[test]
    fn roundtrips_zero_argument_variants() {
        roundtrip(IpcMessage::DeviceReady);
        roundtrip(IpcMessage::DeviceDisconnection);
    }

    #[test]
    fn decode_reports_eof_on_empty_stream() {
        let mut empty: &[u8] = &[];
        let err = IpcMessage::decode(&mut empty).unwrap_err();
        assert!(matches!(err, IpcDecodeError::Eof));
    }

    #[test]
    fn decode_reports_short_frame_as_io_error() {
        // A type byte claiming DeviceInfo follows, but the stream cuts off
        // mid-length-prefix.
        let mut buf: &[u8] = &[TYPE_DEVICE_INFO, 0x00];
        let err = IpcMessage::decode(&mut buf).unwrap_err();
        assert!(matches!(err, IpcDecodeError::Io(_)));
    }

    #[test]
    fn decode_reports_unknown_type() {
        let mut buf: &[u8] = &[0xFF];
        let err = IpcMessage::decode(&mut buf).unwrap_err();
        assert!(matches!(err, IpcDecodeError::UnknownType(0xFF)));
    }

    proptest::proptest! {
        #[test]
        fn device_connection_roundtrips_for_arbitrary_strings(devnode in ".{0,500}") {
            let msg = IpcMessage::DeviceConnection { devnode };
            let mut buf = Vec::new();
            msg.encode(&mut buf).unwrap();
            let decoded = IpcMessage::decode(&mut &buf[..]).unwrap();
            proptest::prop_assert_eq!(msg, decoded);
        }

        #[test]
        fn device_info_roundtrips_for_arbitrary_strings(serial in ".{0,100}", friendly in ".{0,100}") {
            let msg = IpcMessage::DeviceInfo { serial, friendly };
            let mut buf = Vec::new();
            msg.encode(&mut buf).unwrap();
            let decoded = IpcMessage::decode(&mut &buf[..]).unwrap();
            proptest::prop_assert_eq!(msg, decoded);
        }
    }
}
