//! Streaming XML event source over raw message bytes.
//!
//! Uses quick-xml's namespace-aware reader. Entities are never expanded and
//! DOCTYPE declarations are rejected, so entity declarations cannot reach the
//! processors.

use crate::error::WssError;
use crate::event::{Attribute, XmlEvent, XmlEventSource};
use crate::path::{ElementPath, QName};
use crate::soap::builtin_namespace;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;
use std::fmt;

/// Pulls [`XmlEvent`]s out of an XML document, one at a time.
pub struct XmlEventReader<'a> {
    reader: NsReader<&'a [u8]>,
    path: ElementPath,
    finished: bool,
}

impl<'a> XmlEventReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let mut reader = NsReader::from_reader(data);
        let config = reader.config_mut();
        config.trim_text(true);
        config.expand_empty_elements = true;
        config.check_end_names = true;
        Self {
            reader,
            path: ElementPath::default(),
            finished: false,
        }
    }

    /// Current element path.
    pub fn path(&self) -> &ElementPath {
        &self.path
    }

    fn attributes(&self, start: &BytesStart<'_>) -> Result<Vec<Attribute>, WssError> {
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(xml_error)?;
            if attr.key.as_namespace_binding().is_some() {
                continue;
            }
            let (resolved, local) = self.reader.resolve_attribute(attr.key);
            let namespace = namespace_uri(resolved)?;
            let value = attr.unescape_value().map_err(xml_error)?;
            attributes.push(Attribute::new(
                QName::new(namespace, decode(local.as_ref())?),
                value.into_owned(),
            ));
        }
        Ok(attributes)
    }

    fn read(&mut self) -> Result<Option<XmlEvent>, WssError> {
        let (resolved, event) = self.reader.read_resolved_event().map_err(xml_error)?;
        let namespace = namespace_uri(resolved)?;

        let event = match event {
            Event::Start(start) => {
                let name = QName::new(namespace, decode(start.local_name().as_ref())?);
                let attributes = self.attributes(&start)?;
                self.path.push(name);
                XmlEvent::start_element(self.path.clone(), attributes)
            }
            Event::End(_) => {
                let event = XmlEvent::end_element(self.path.clone());
                self.path.pop();
                event
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(xml_error)?;
                XmlEvent::characters(self.path.clone(), text.into_owned())
            }
            Event::CData(data) => {
                XmlEvent::characters(self.path.clone(), decode(&data.into_inner())?)
            }
            Event::PI(pi) => XmlEvent::processing_instruction(self.path.clone(), decode(&pi)?),
            Event::Comment(comment) => XmlEvent::comment(self.path.clone(), decode(&comment)?),
            Event::DocType(_) => {
                return Err(WssError::XmlParse(
                    "DOCTYPE declarations are not allowed".to_string(),
                ));
            }
            Event::Eof => {
                if !self.path.is_empty() {
                    return Err(WssError::XmlParse(format!(
                        "unexpected end of document inside {}",
                        self.path
                    )));
                }
                self.finished = true;
                XmlEvent::end_document()
            }
            // Declarations and (expanded) empty elements produce nothing
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

impl fmt::Debug for XmlEventReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmlEventReader")
            .field("path", &self.path)
            .field("finished", &self.finished)
            .finish()
    }
}

impl XmlEventSource for XmlEventReader<'_> {
    fn next_event(&mut self) -> Result<XmlEvent, WssError> {
        if self.finished {
            return Ok(XmlEvent::end_document());
        }
        loop {
            if let Some(event) = self.read()? {
                return Ok(event);
            }
        }
    }
}

fn namespace_uri(resolved: ResolveResult<'_>) -> Result<String, WssError> {
    match resolved {
        ResolveResult::Bound(namespace) => decode(namespace.as_ref()),
        ResolveResult::Unbound => Ok(String::new()),
        ResolveResult::Unknown(prefix) => {
            let prefix = decode(&prefix)?;
            match prefix.as_str() {
                "xml" => builtin_namespace("xml")
                    .map(str::to_string)
                    .ok_or_else(|| WssError::XmlParse("unbound prefix 'xml'".to_string())),
                _ => Err(WssError::XmlParse(format!(
                    "unknown namespace prefix '{}'",
                    prefix
                ))),
            }
        }
    }
}

fn decode(bytes: &[u8]) -> Result<String, WssError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| WssError::XmlParse(format!("invalid UTF-8: {}", e)))
}

fn xml_error(error: impl fmt::Display) -> WssError {
    WssError::XmlParse(error.to_string())
}
