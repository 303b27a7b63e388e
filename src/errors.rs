use std::{fmt, io, num::TryFromIntError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    /// Malformed document, missing or unparseable mandatory attribute, or an
    /// unresolved node reference in strict mode.
    Parse,
    Config,
    InvalidInput,
    Render,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Parse, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::InvalidInput, message)
    }

    pub fn render(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Render, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} error: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error::new(ErrorKind::Io, value.to_string())
    }
}

impl From<quick_xml::Error> for Error {
    fn from(value: quick_xml::Error) -> Self {
        match value {
            quick_xml::Error::Io(err) => Error::new(ErrorKind::Io, err.to_string()),
            other => Error::parse(other.to_string()),
        }
    }
}

impl From<TryFromIntError> for Error {
    fn from(value: TryFromIntError) -> Self {
        Error::render(value.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::new(ErrorKind::Config, value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_xml_is_a_parse_error() {
        let mut reader = quick_xml::Reader::from_str("<osm></way>");
        let err: Error = loop {
            match reader.read_event() {
                Ok(quick_xml::events::Event::Eof) => panic!("mismatched end tag was accepted"),
                Ok(_) => (),
                Err(err) => break err.into(),
            }
        };
        assert_eq!(err.kind, ErrorKind::Parse);
    }

    #[test]
    fn oversized_canvas_is_a_render_error() {
        let err: Error = i32::try_from(u32::MAX).unwrap_err().into();
        assert_eq!(err.kind, ErrorKind::Render);
    }

    #[test]
    fn io_failure_keeps_io_kind() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "missing").into();
        assert_eq!(err.kind, ErrorKind::Io);
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn bad_json_is_a_config_error() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert_eq!(err.kind, ErrorKind::Config);
    }
}
